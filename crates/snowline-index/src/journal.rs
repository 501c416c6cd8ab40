//! Deployment journal: checkpoints, batch results and rollback reports.

use crate::documents::DocumentDir;
use crate::error::IndexError;
use snowline_core::{BatchResult, Checkpoint, RollbackReport};
use std::path::Path;

/// Durable record of what deployments did, used by rollback.
#[derive(Debug, Clone)]
pub struct DeploymentJournal {
    checkpoints: DocumentDir,
    batches: DocumentDir,
    rollbacks: DocumentDir,
}

impl DeploymentJournal {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        let root = root.as_ref();
        Ok(Self {
            checkpoints: DocumentDir::open(root.join("checkpoints"))?,
            batches: DocumentDir::open(root.join("batches"))?,
            rollbacks: DocumentDir::open(root.join("rollbacks"))?,
        })
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), IndexError> {
        self.checkpoints.write(&checkpoint.checkpoint_id, checkpoint)?;
        Ok(())
    }

    pub fn checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, IndexError> {
        self.checkpoints.read(checkpoint_id)
    }

    /// Checkpoints of an update set, oldest first.
    pub fn checkpoints_for(&self, update_set_id: &str) -> Result<Vec<Checkpoint>, IndexError> {
        let mut found: Vec<Checkpoint> = self
            .checkpoints
            .scan::<Checkpoint>()?
            .into_iter()
            .filter(|c| c.update_set_id == update_set_id)
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    /// Store (or replace) the result of one deployment run.
    pub fn save_batch(&self, result: &BatchResult) -> Result<(), IndexError> {
        self.batches.write(result.journal_key(), result)?;
        Ok(())
    }

    pub fn run(&self, run_id: &str) -> Result<Option<BatchResult>, IndexError> {
        self.batches.read(run_id)
    }

    /// Batch results of an update set, oldest first.
    pub fn batches_for(&self, update_set_id: &str) -> Result<Vec<BatchResult>, IndexError> {
        let mut found: Vec<BatchResult> = self
            .batches
            .scan::<BatchResult>()?
            .into_iter()
            .filter(|b| b.update_set_id == update_set_id)
            .collect();
        found.sort_by_key(|b| b.started_at);
        Ok(found)
    }

    pub fn save_rollback(&self, report: &RollbackReport) -> Result<(), IndexError> {
        self.rollbacks.write(&report.rollback_id, report)?;
        Ok(())
    }

    /// Rollback reports of an update set, oldest first.
    pub fn rollbacks_for(&self, update_set_id: &str) -> Result<Vec<RollbackReport>, IndexError> {
        let mut found: Vec<RollbackReport> = self
            .rollbacks
            .scan::<RollbackReport>()?
            .into_iter()
            .filter(|r| r.update_set_id == update_set_id)
            .collect();
        found.sort_by_key(|r| r.requested_at);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use snowline_core::{BatchStatus, CapturedState};
    use tempfile::TempDir;

    fn batch(id: &str, update_set: &str, offset_secs: i64) -> BatchResult {
        let started = Utc::now() + Duration::seconds(offset_secs);
        BatchResult {
            batch_id: id.to_string(),
            run_id: BatchResult::new_run_id(id),
            update_set_id: update_set.to_string(),
            status: BatchStatus::Completed,
            transaction_mode: false,
            parallel: false,
            started_at: started,
            finished_at: started,
            artifacts: Vec::new(),
            conflicts: Vec::new(),
            checkpoint_id: None,
            rolled_back: false,
            summary: String::new(),
        }
    }

    #[test]
    fn test_batches_grouped_by_update_set() {
        let dir = TempDir::new().unwrap();
        let journal = DeploymentJournal::open(dir.path()).unwrap();
        journal.save_batch(&batch("batch_b", "us1", 10)).unwrap();
        journal.save_batch(&batch("batch_a", "us1", 0)).unwrap();
        journal.save_batch(&batch("batch_c", "us2", 0)).unwrap();

        let ids: Vec<_> = journal
            .batches_for("us1")
            .unwrap()
            .into_iter()
            .map(|b| b.batch_id)
            .collect();
        assert_eq!(ids, vec!["batch_a", "batch_b"]);
        let other = batch("batch_c", "us2", 0);
        journal.save_batch(&other).unwrap();
        assert_eq!(journal.run(&other.run_id).unwrap(), Some(other));
    }

    #[test]
    fn test_repeated_batch_id_keeps_every_run() {
        let dir = TempDir::new().unwrap();
        let journal = DeploymentJournal::open(dir.path()).unwrap();
        let first = batch("b1", "us1", 0);
        let second = batch("b1", "us1", 5);
        journal.save_batch(&first).unwrap();
        journal.save_batch(&second).unwrap();

        let runs = journal.batches_for("us1").unwrap();
        assert_eq!(runs, vec![first, second]);
    }

    #[test]
    fn test_legacy_result_without_run_id_keyed_by_batch() {
        let dir = TempDir::new().unwrap();
        let journal = DeploymentJournal::open(dir.path()).unwrap();
        let mut legacy = batch("b_old", "us1", 0);
        legacy.run_id.clear();
        journal.save_batch(&legacy).unwrap();
        assert_eq!(journal.run("b_old").unwrap(), Some(legacy));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let journal = DeploymentJournal::open(dir.path()).unwrap();
        let checkpoint = Checkpoint {
            checkpoint_id: "cp_1".to_string(),
            batch_id: "batch_a".to_string(),
            update_set_id: "us1".to_string(),
            created_at: Utc::now(),
            captured_state: CapturedState::default(),
        };
        journal.save_checkpoint(&checkpoint).unwrap();

        assert_eq!(journal.checkpoint("cp_1").unwrap(), Some(checkpoint.clone()));
        assert_eq!(journal.checkpoints_for("us1").unwrap(), vec![checkpoint]);
        assert!(journal.checkpoints_for("us2").unwrap().is_empty());
    }
}
