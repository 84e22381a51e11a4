use serde::{Deserialize, Serialize};

use crate::domain::approval::ApproverRole;
use crate::domain::course::{CostLevel, CoursePolicy, TrainingLocation};

/// Policy data deciding how much sign-off a course needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPolicy {
    pub extended_min_cost_level: CostLevel,
    pub abroad_requires_extended: bool,
    pub chro_min_cost_level: Option<CostLevel>,
    pub chro_for_abroad: bool,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            extended_min_cost_level: CostLevel::High,
            abroad_requires_extended: true,
            chro_min_cost_level: None,
            chro_for_abroad: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTier {
    Standard,
    Extended,
    Executive,
}

const STANDARD_STEPS: &[ApproverRole] = &[ApproverRole::Manager];
const EXTENDED_STEPS: &[ApproverRole] =
    &[ApproverRole::Manager, ApproverRole::Hrbp, ApproverRole::LearningAndDevelopment];
const EXECUTIVE_STEPS: &[ApproverRole] = &[
    ApproverRole::Manager,
    ApproverRole::Hrbp,
    ApproverRole::LearningAndDevelopment,
    ApproverRole::Chro,
];

impl WorkflowTier {
    /// Ordered approval chain; index 0 is level 1.
    pub fn steps(&self) -> &'static [ApproverRole] {
        match self {
            Self::Standard => STANDARD_STEPS,
            Self::Extended => EXTENDED_STEPS,
            Self::Executive => EXECUTIVE_STEPS,
        }
    }

    pub fn step_at(&self, level: u32) -> Option<ApproverRole> {
        let index = usize::try_from(level.checked_sub(1)?).ok()?;
        self.steps().get(index).copied()
    }

    pub fn depth(&self) -> u32 {
        self.steps().len() as u32
    }
}

/// The course attributes the router looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseAttributes {
    pub training_location: TrainingLocation,
    pub cost_level: CostLevel,
}

impl From<&CoursePolicy> for CourseAttributes {
    fn from(course: &CoursePolicy) -> Self {
        Self { training_location: course.training_location, cost_level: course.cost_level }
    }
}

/// Pure function of policy and course attributes.
pub fn tier_for(policy: &WorkflowPolicy, course: CourseAttributes) -> WorkflowTier {
    let abroad = course.training_location == TrainingLocation::Abroad;
    let extended = (abroad && policy.abroad_requires_extended)
        || course.cost_level >= policy.extended_min_cost_level;
    if !extended {
        return WorkflowTier::Standard;
    }

    let chro_by_cost =
        policy.chro_min_cost_level.map(|minimum| course.cost_level >= minimum).unwrap_or(false);
    if chro_by_cost || (abroad && policy.chro_for_abroad) {
        WorkflowTier::Executive
    } else {
        WorkflowTier::Extended
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuleCatalog {
    policy: WorkflowPolicy,
}

impl RuleCatalog {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn tier_for(&self, course: CourseAttributes) -> WorkflowTier {
        tier_for(&self.policy, course)
    }
}
