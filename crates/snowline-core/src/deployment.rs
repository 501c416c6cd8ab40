//! Deployment batches, per-artifact outcomes, checkpoints and rollback reports.

use crate::entity::{EntityType, EntityTypeMap};
use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// REQUEST
// =============================================================================

/// What to do when an artifact with the same name already exists remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingPolicy {
    /// Always create a new record.
    #[default]
    CreateNew,
    /// Patch the existing record with the artifact's fields.
    UpdateExisting,
    /// Leave the existing record alone and report it as deployed.
    ReuseExisting,
}

/// One artifact to create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub entity_type: EntityType,

    /// Target collection. Derived from the entity type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Field values to submit.
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Names of artifacts this one depends on.
    #[serde(default)]
    pub expected_relations: Vec<String>,

    /// Existing record to update instead of creating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    #[serde(default)]
    pub if_exists: ExistingPolicy,
}

impl ArtifactSpec {
    pub fn new(entity_type: EntityType, fields: Map<String, Value>) -> Self {
        Self {
            entity_type,
            collection: None,
            fields,
            expected_relations: Vec::new(),
            target_id: None,
            if_exists: ExistingPolicy::CreateNew,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_relations(mut self, relations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.expected_relations = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policy(mut self, policy: ExistingPolicy) -> Self {
        self.if_exists = policy;
        self
    }

    /// The collection this spec deploys into.
    pub fn resolve_collection<'a>(&'a self, map: &'a EntityTypeMap) -> Option<&'a str> {
        self.collection
            .as_deref()
            .or_else(|| map.collection(&self.entity_type))
    }

    /// Field holding the artifact's name for its type.
    pub fn name_field<'a>(&self, map: &'a EntityTypeMap) -> &'a str {
        map.get(&self.entity_type)
            .map(|m| m.name_field.as_str())
            .unwrap_or("name")
    }

    /// Name the artifact will be deployed under.
    pub fn display_name(&self, map: &EntityTypeMap) -> Option<String> {
        let record = Record::new(self.fields.clone());
        record.display_name(self.name_field(map)).map(str::to_string)
    }
}

/// An alternate deployment approach tried after retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Retry once in the global scope instead of the requested one.
    AlternateScope,
    /// Deploy the artifact inactive, pending manual approval.
    ManualApproval,
    /// Create with required fields only, then patch in the rest.
    StagedDeployment,
}

impl FallbackStrategy {
    pub const ALL: [FallbackStrategy; 3] = [
        Self::AlternateScope,
        Self::ManualApproval,
        Self::StagedDeployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlternateScope => "alternate_scope",
            Self::ManualApproval => "manual_approval",
            Self::StagedDeployment => "staged_deployment",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s.trim())
            .ok_or_else(|| format!("unknown fallback strategy '{}'", s))
    }
}

/// A set of artifacts deployed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBatch {
    #[serde(default = "new_batch_id")]
    pub batch_id: String,

    pub artifacts: Vec<ArtifactSpec>,

    /// All-or-nothing: any failure rolls back every artifact created by the batch.
    #[serde(default)]
    pub transaction_mode: bool,

    /// Deploy artifacts concurrently. Ignored in transaction mode.
    #[serde(default)]
    pub parallel: bool,

    /// Capture a checkpoint before executing.
    #[serde(default)]
    pub checkpoint: bool,

    /// Update set the batch belongs to. Falls back to the context's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_set_id: Option<String>,

    /// Overrides the configured attempt limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Overrides the configured fallback order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategies: Option<Vec<FallbackStrategy>>,

    /// Look up each artifact's name remotely during pre-flight.
    #[serde(default)]
    pub check_remote_conflicts: bool,
}

impl DeploymentBatch {
    pub fn new(artifacts: Vec<ArtifactSpec>) -> Self {
        Self {
            batch_id: new_batch_id(),
            artifacts,
            transaction_mode: false,
            parallel: false,
            checkpoint: false,
            update_set_id: None,
            max_retries: None,
            fallback_strategies: None,
            check_remote_conflicts: false,
        }
    }

    pub fn transactional(mut self) -> Self {
        self.transaction_mode = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    pub fn with_update_set(mut self, update_set_id: impl Into<String>) -> Self {
        self.update_set_id = Some(update_set_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_fallbacks(mut self, strategies: Vec<FallbackStrategy>) -> Self {
        self.fallback_strategies = Some(strategies);
        self
    }
}

fn new_batch_id() -> String {
    format!("batch_{}", Uuid::new_v4().simple())
}

// =============================================================================
// PER-ARTIFACT STATE
// =============================================================================

/// Per-artifact deployment state machine.
///
/// `pending -> (retrying)* -> (falling_back)* -> deployed | deployed_with_fallback | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    /// About to make attempt number `attempt` (1-based).
    Retrying { attempt: u32 },
    /// Trying the fallback at `index` in the batch's fallback order.
    FallingBack { index: usize },
    Deployed,
    DeployedWithFallback,
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::DeployedWithFallback | Self::Failed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deployed | Self::DeployedWithFallback)
    }
}

/// Why an artifact failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request was invalid before any remote call (missing required field).
    Validation,
    /// The store rejected or failed the call.
    Remote,
    /// The operation deadline passed.
    Timeout,
    /// Not attempted because a transactional batch was already failing.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DeploymentFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeploymentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Which remote operation deployed the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOperation {
    Create,
    Update,
    /// An existing record was left in place.
    Reuse,
}

/// Final, auditable record of one artifact's deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    /// Position in the batch.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub operation: DeployOperation,
    #[serde(flatten)]
    pub state: DeploymentState,
    /// Primary attempts made (fallbacks not counted).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<FallbackStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DeploymentFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Set when a transactional rollback removed this artifact again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackAction>,
}

impl ArtifactOutcome {
    /// Whether this batch created the record (and so may delete it again).
    pub fn created_record(&self) -> Option<&str> {
        match (self.operation, self.state.is_success()) {
            (DeployOperation::Create, true) => self.record_id.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// BATCH RESULT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every artifact deployed.
    Completed,
    /// Some artifacts deployed.
    PartiallyCompleted,
    /// Nothing deployed, or a transactional batch rolled back.
    Failed,
}

impl BatchStatus {
    /// Status for `succeeded` successes out of `total`.
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total > 0 && succeeded == total {
            Self::Completed
        } else if succeeded > 0 {
            Self::PartiallyCompleted
        } else {
            Self::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Two artifacts in the batch target the same name in the same collection.
    DuplicateName,
    /// A record with the artifact's name already exists remotely.
    ExistingRecord,
    /// An expected relation names nothing in the batch.
    UnresolvedRelation,
}

/// Advisory pre-flight finding. Never blocks deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub kind: ConflictKind,
    pub message: String,
    /// Batch positions involved.
    pub artifacts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    /// Unique per deployment run; batch ids may repeat across runs.
    #[serde(default)]
    pub run_id: String,
    pub update_set_id: String,
    pub status: BatchStatus,
    pub transaction_mode: bool,
    pub parallel: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactOutcome>,
    #[serde(default)]
    pub conflicts: Vec<ConflictWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// Whether transaction mode rolled the batch back.
    #[serde(default)]
    pub rolled_back: bool,
    /// One-line human-readable description.
    pub summary: String,
}

impl BatchResult {
    /// Fresh run id for a deployment of `batch_id`.
    pub fn new_run_id(batch_id: &str) -> String {
        format!("{}_{}", batch_id, Uuid::new_v4().simple())
    }

    /// Key the journal stores this run under.
    pub fn journal_key(&self) -> &str {
        if self.run_id.is_empty() {
            &self.batch_id
        } else {
            &self.run_id
        }
    }

    pub fn succeeded(&self) -> usize {
        self.artifacts.iter().filter(|a| a.state.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.state == DeploymentState::Failed)
            .count()
    }
}

// =============================================================================
// CHECKPOINTS AND ROLLBACK
// =============================================================================

/// One artifact as planned at checkpoint time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedArtifact {
    pub index: usize,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

/// Field values of an update target before the batch touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorRecord {
    pub collection: String,
    pub record_id: String,
    pub fields: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedState {
    #[serde(default)]
    pub planned: Vec<PlannedArtifact>,
    #[serde(default)]
    pub prior_records: Vec<PriorRecord>,
}

/// Snapshot taken before a batch executes. Read-only once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub batch_id: String,
    pub update_set_id: String,
    pub created_at: DateTime<Utc>,
    pub captured_state: CapturedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackKind {
    /// Delete a record the batch created.
    Delete,
    /// Write back field values captured at checkpoint time.
    Restore,
}

/// One undo step and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackAction {
    pub kind: RollbackKind,
    pub collection: String,
    pub record_id: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Completed,
    /// At least one undo step failed.
    Partial,
    /// Nothing recorded for the update set needed undoing.
    NothingToUndo,
}

/// Auditable record of an explicit rollback request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub rollback_id: String,
    pub update_set_id: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub batches: Vec<String>,
    pub actions: Vec<RollbackAction>,
    pub status: RollbackStatus,
}
