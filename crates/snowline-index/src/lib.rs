//! # snowline-index
//!
//! Local persistence for Snowline.
//!
//! - [`ArtifactIndex`]: one JSON document per resolved artifact, named by its
//!   record id, answering repeat lookups without a remote round trip
//! - [`DeploymentJournal`]: checkpoints, batch results and rollback reports
//!
//! ## Layout
//!
//! ```text
//! <index root>/
//!   0123456789abcdef0123456789abcdef.json
//!   ...
//! <journal root>/
//!   checkpoints/<checkpoint_id>.json
//!   batches/<batch_id>.json
//!   rollbacks/<rollback_id>.json
//! ```
//!
//! Every write goes to a temporary file in the same directory and is renamed
//! into place, so concurrent readers see either the old or the new document.

pub mod artifacts;
pub mod documents;
pub mod error;
pub mod journal;

pub use artifacts::ArtifactIndex;
pub use documents::{DocumentDir, is_valid_id};
pub use error::IndexError;
pub use journal::DeploymentJournal;
