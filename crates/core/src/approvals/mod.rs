pub mod router;
pub mod transitions;

pub use router::{
    ApprovalRouter, BulkApprovalReport, BulkItemResult, RequestCase, RequestDraft, RoutingOutcome,
};
pub use transitions::{transition, TransitionError, WorkflowEvent};
