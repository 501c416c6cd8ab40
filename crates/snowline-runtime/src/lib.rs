//! # snowline-runtime
//!
//! Executes deployment batches against the record store and undoes them.
//!
//! Each artifact runs through its own state machine:
//!
//! ```text
//! pending -> retrying(1..=max_retries) -> falling_back(0..n) -> deployed
//!                                                             | deployed_with_fallback
//!                                                             | failed
//! ```
//!
//! [`DeploymentOrchestrator`] drives the batch (pre-flight conflicts,
//! checkpoint, sequential/parallel/transactional execution, journal, audit).
//! [`RollbackService`] undoes everything journaled for an update set.

pub mod checkpoint;
pub mod conflicts;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod retry;
pub mod rollback;

pub use checkpoint::capture_checkpoint;
pub use conflicts::{detect_conflicts, remote_conflicts};
pub use error::{DeployError, RollbackError};
pub use fallback::{WriteTarget, apply_fallback, fallback_fields};
pub use orchestrator::DeploymentOrchestrator;
pub use retry::RetryPolicy;
pub use rollback::RollbackService;
