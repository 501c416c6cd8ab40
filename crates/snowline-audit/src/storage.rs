//! Audit storage backends.

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::logger::AuditFilter;
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Name of the JSON Lines file inside the audit directory.
pub const AUDIT_FILE_NAME: &str = "audit.log";

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Store an audit event.
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Query audit events with filters.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError>;

    /// Get an audit event by ID.
    async fn get(&self, event_id: Uuid) -> Result<Option<AuditEvent>, AuditError>;
}

/// Console storage.
///
/// Writes human-readable lines to stderr; stdout may be carrying the
/// stdio tool protocol.
pub struct ConsoleStorage;

#[async_trait]
impl AuditStorage for ConsoleStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        eprintln!("{}", event.to_log_line());
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        // Console storage doesn't support querying
        Ok(vec![])
    }

    async fn get(&self, _event_id: Uuid) -> Result<Option<AuditEvent>, AuditError> {
        Ok(None)
    }
}

/// File storage (appends JSON Lines to `<directory>/audit.log`).
///
/// Nothing is cached in memory; queries scan the file, so they span earlier
/// runs and other processes writing the same log.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes appends and scans.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Open (creating if needed) the audit log inside `directory`.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, AuditError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).map_err(|e| {
            AuditError::InitializationFailed(format!(
                "cannot create audit directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        Ok(Self {
            path: directory.join(AUDIT_FILE_NAME),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(&self) -> Result<Vec<AuditEvent>, AuditError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        load_events(&self.path)
    }
}

fn load_events(path: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = number + 1,
                error = %e,
                "Skipping malformed audit line"
            ),
        }
    }
    Ok(events)
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.scan()?;
        Ok(filter.apply(events.iter()))
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditEvent>, AuditError> {
        Ok(self.scan()?.into_iter().find(|e| e.event_id == event_id))
    }
}

/// Writes to both a primary (queryable) and a secondary storage.
pub struct DualStorage {
    primary: Arc<dyn AuditStorage>,
    secondary: Arc<dyn AuditStorage>,
}

impl DualStorage {
    pub fn new(primary: Arc<dyn AuditStorage>, secondary: Arc<dyn AuditStorage>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.secondary.store(event.clone()).await?;
        self.primary.store(event).await
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        self.primary.query(filter).await
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<AuditEvent>, AuditError> {
        self.primary.get(event_id).await
    }
}

/// Discards every event.
pub struct NullStorage;

#[async_trait]
impl AuditStorage for NullStorage {
    async fn store(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    async fn query(&self, _filter: AuditFilter) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(vec![])
    }

    async fn get(&self, _event_id: Uuid) -> Result<Option<AuditEvent>, AuditError> {
        Ok(None)
    }
}
