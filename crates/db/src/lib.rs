pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect_with_config, connect_with_settings, DbPool};
pub use repositories::{EmployeeRecord, EmployeeRole, RepositoryError, SqlDirectory};
pub use service::{NewRequest, WorkflowService};
