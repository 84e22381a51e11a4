pub mod approval;
pub mod course;
pub mod enrollment;
pub mod request;
pub mod session;
pub mod user;
