pub mod capacity;
pub mod roster;
pub mod waitlist;

pub use capacity::{EnrollmentCapacityManager, Placement, RosterOutcome};
pub use roster::SessionRoster;
pub use waitlist::Waitlist;
