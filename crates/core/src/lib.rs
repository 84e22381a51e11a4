pub mod approvals;
pub mod audit;
pub mod catalog;
pub mod completion;
pub mod config;
pub mod directory;
pub mod domain;
pub mod enrollment;
pub mod errors;
pub mod notification;

pub use approvals::{ApprovalRouter, BulkApprovalReport, RequestCase, RequestDraft, RoutingOutcome};
pub use audit::{AuditBatch, AuditContext, AuditEntity, AuditLogEntry, AuditRecorder};
pub use catalog::{CourseAttributes, RuleCatalog, WorkflowPolicy, WorkflowTier};
pub use completion::{CompletionOutcome, CompletionPolicy, CompletionRuleEvaluator, Verdict};
pub use directory::{DirectoryError, DirectoryLookup};
pub use domain::approval::{Approval, ApprovalId, ApprovalStatus, ApproverRole, Decision};
pub use domain::course::{CostLevel, CourseId, CoursePolicy, TrainingLocation};
pub use domain::enrollment::{
    CompletionStatus, EnrollmentId, EnrollmentStatus, SessionEnrollment,
};
pub use domain::request::{RequestId, RequestNumber, RequestStatus, TrainingRequest};
pub use domain::session::{Session, SessionId, SessionStatus};
pub use domain::user::{EntityId, UserId};
pub use enrollment::{EnrollmentCapacityManager, RosterOutcome, SessionRoster};
pub use errors::{ErrorKind, InterfaceError, ResolutionFailure, StateConflict, WorkflowError};
pub use notification::{
    CertificateIssuer, CertificateRequest, NotificationRequest, NotificationService,
    NotificationType, SideEffect,
};
