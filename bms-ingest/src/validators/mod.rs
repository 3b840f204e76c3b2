//! Extraction validation layer
//!
//! # Validators
//! 1. **sanity_fixer** - Unit/decimal repair, then nulling of impossible values
//! 2. **physics_validator** - Ohm's law, cell topology and chemistry bounds
//! 3. **verification** - A/B/C/D trust classification and re-analysis policy

pub mod physics_validator;
pub mod sanity_fixer;
pub mod verification;

pub use physics_validator::{PhysicsPolicy, PhysicsReport, PhysicsValidator};
pub use sanity_fixer::{FixOutcome, SanityFixer};
pub use verification::{
    should_reanalyze, ReanalysisDecision, StateDecision, VerificationStateMachine, MAX_ANALYSIS_ATTEMPTS,
};
