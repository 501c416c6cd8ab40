//! # snowline-core
//!
//! Shared types for the Snowline artifact resolver and deployment orchestrator.
//!
//! - [`Record`]: an opaque document fetched from the remote record store
//! - [`EntityType`] / [`EntityTypeMap`]: entity type tags and the collection each lives in
//! - [`Intent`]: a classified free-text request
//! - [`IndexedArtifact`]: the locally indexed, decomposed view of a record
//! - [`QueryFilter`]: collection-agnostic filter built by the resolver
//! - [`OperationContext`]: per-request context passed explicitly into every operation
//! - deployment types ([`DeploymentBatch`], [`BatchResult`], [`Checkpoint`], ...)

// Configuration types shared across all Snowline crates
pub mod config;

pub mod artifact;
pub mod context;
pub mod deployment;
pub mod entity;
pub mod filter;
pub mod intent;
pub mod record;

pub use artifact::{IndexedArtifact, ModificationKind, ModificationPoint, RelationKind, Relationship};
pub use config::{
    AuditConfig, ConfigError, DeploymentConfig, IndexConfig, McpConfig, ResolverConfig,
    SnowlineConfig, StoreConfig, Transport,
};
pub use context::OperationContext;
pub use deployment::{
    ArtifactOutcome, ArtifactSpec, BatchResult, BatchStatus, CapturedState, Checkpoint,
    ConflictKind, ConflictWarning, DeployOperation, DeploymentBatch, DeploymentFailure,
    DeploymentState, ExistingPolicy, FailureKind, FallbackStrategy, PlannedArtifact, PriorRecord,
    RollbackAction, RollbackKind, RollbackReport, RollbackStatus,
};
pub use entity::{EntityMapping, EntityType, EntityTypeMap};
pub use filter::{Condition, QueryFilter};
pub use intent::{Intent, IntentAction};
pub use record::Record;
