//! # snowline-resolver
//!
//! Turns free-text requests into concrete remote artifacts.
//!
//! 1. [`classifier`]: free text to [`Intent`](snowline_core::Intent)
//! 2. [`ArtifactIndex`](snowline_index::ArtifactIndex) lookup (no remote call on a hit)
//! 3. [`cascade`]: ordered query strategies against the record store
//! 4. [`indexer`]: decomposition of each hit, written back to the index
//!
//! [`DiscoveryService`] runs the whole flow.

pub mod cascade;
pub mod classifier;
pub mod discovery;
pub mod error;
pub mod indexer;

pub use cascade::{CascadingResolver, MatchStrategy, Resolution, ResolvedRecord, cascade_plan};
pub use classifier::{IntentClassifier, classify, is_id_token};
pub use discovery::{Discovery, DiscoveryService, DiscoverySource, LookupMode};
pub use error::ResolveError;
pub use indexer::{ArtifactIndexer, DecompositionRule, script_relationships};
