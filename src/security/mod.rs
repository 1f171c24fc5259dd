pub mod autonomy;
pub mod boundary;

pub use autonomy::{
    ActionCatalog, ActionClass, AutonomyDecision, AutonomyManager, AutonomyTier, AutonomyVerdict,
};
pub use boundary::{Boundary, BoundaryEnforcer, BoundaryKind, BoundaryRequest};
