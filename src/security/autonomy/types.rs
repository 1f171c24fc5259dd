use serde::{Deserialize, Serialize};

/// Trust ladder, ordered from most conservative to most permissive.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AutonomyTier {
    /// Observes only: reads run, every side effect is denied
    Observer,
    /// Every side effect waits for a human
    Guardian,
    /// Routine writes run on their own, execute-class actions wait for a human
    #[default]
    Partner,
    /// Everything runs within the boundary checks
    Autonomous,
}

impl AutonomyTier {
    pub const ALL: [Self; 4] = [
        Self::Observer,
        Self::Guardian,
        Self::Partner,
        Self::Autonomous,
    ];

    /// Base decision this tier makes for an action classification.
    pub fn decision_for(self, class: ActionClass) -> AutonomyDecision {
        match (self, class) {
            (_, ActionClass::Read) | (Self::Partner, ActionClass::Write) | (Self::Autonomous, _) => {
                AutonomyDecision::AutoApprove
            }
            (Self::Observer, _) => AutonomyDecision::Deny,
            (Self::Guardian, _) | (Self::Partner, ActionClass::Execute) => {
                AutonomyDecision::RequireApproval
            }
        }
    }

    /// Whether a pair that crossed its auto-execute threshold may skip approval
    /// under this tier.
    pub fn allows_routine_promotion(self) -> bool {
        matches!(self, Self::Partner | Self::Autonomous)
    }

    /// One rung more permissive, or `None` at the top of the ladder.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Observer => Some(Self::Guardian),
            Self::Guardian => Some(Self::Partner),
            Self::Partner => Some(Self::Autonomous),
            Self::Autonomous => None,
        }
    }
}

/// Coarse side-effect bucket of an action type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionClass {
    Read,
    Write,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AutonomyDecision {
    AutoApprove,
    RequireApproval,
    Deny,
}

/// Everything the autonomy layer concluded about one action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyVerdict {
    pub domain: String,
    pub class: ActionClass,
    pub tier: AutonomyTier,
    pub decision: AutonomyDecision,
}
