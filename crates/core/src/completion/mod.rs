pub mod evaluator;
pub mod rules;

pub use evaluator::{CompletionOutcome, CompletionRuleEvaluator};
pub use rules::{evaluate, AttendanceRecord, CompletionPolicy, Verdict};
