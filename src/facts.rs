//! Semantic facts with a validity interval ("base isNavigating").
//!
//! A fact is opened in an external store, which answers with an opaque id, and later
//! closed with that same id. The [`FactRecorder`] holds at most one open handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FactError, ServiceError};

const FACTS_TREE: &str = "facts";

/// Opaque identifier returned by the fact store when a fact is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub String);

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contract of the semantic fact store.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Resolves once the store is reachable.
    async fn wait_for_service(&self) -> Result<(), ServiceError>;

    async fn start_fact(
        &self,
        subject: &str,
        predicate: &str,
        at: DateTime<Utc>,
        immediate: bool,
    ) -> Result<FactId, ServiceError>;

    async fn end_fact(&self, subject: &str, id: &FactId) -> Result<(), ServiceError>;
}

/// An open fact, as remembered by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct FactHandle {
    pub id: FactId,
    pub subject: String,
    pub predicate: String,
    pub opened_at: DateTime<Utc>,
}

pub struct FactRecorder {
    store: Arc<dyn FactStore>,
    handle: Option<FactHandle>,
    immediate: bool,
    timeout: Duration,
}

impl FactRecorder {
    pub fn new(store: Arc<dyn FactStore>, immediate: bool, timeout: Duration) -> Self {
        Self {
            store,
            handle: None,
            immediate,
            timeout,
        }
    }

    pub fn handle(&self) -> Option<&FactHandle> {
        self.handle.as_ref()
    }

    /// Opens a fact and keeps its handle. Refuses while another fact is open.
    ///
    /// On failure no handle is kept and the fact must be assumed unrecorded.
    pub async fn open(
        &mut self,
        subject: &str,
        predicate: &str,
        at: DateTime<Utc>,
    ) -> Result<&FactHandle, FactError> {
        if let Some(open) = &self.handle {
            return Err(FactError::AlreadyOpen(open.id.clone()));
        }

        let request = self.store.start_fact(subject, predicate, at, self.immediate);
        let id = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FactError::Timeout("start_fact"))??;

        info!(fact_id = %id, subject, predicate, "fact opened");
        Ok(&*self.handle.insert(FactHandle {
            id,
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            opened_at: at,
        }))
    }

    /// Closes the open fact, if any. Without an open fact this is a no-op.
    ///
    /// The handle is only cleared once the store confirms the close.
    pub async fn close(&mut self) -> Result<Option<FactId>, FactError> {
        let Some(open) = &self.handle else {
            return Ok(None);
        };

        let request = self.store.end_fact(&open.subject, &open.id);
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FactError::Timeout("end_fact"))??;

        let closed = self.handle.take().map(|h| h.id);
        if let Some(id) = &closed {
            info!(fact_id = %id, "fact closed");
        }
        Ok(closed)
    }
}

impl fmt::Debug for FactRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactRecorder")
            .field("handle", &self.handle)
            .field("immediate", &self.immediate)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A fact as persisted by [`SledFactStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub id: FactId,
    pub subject: String,
    pub predicate: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub immediate: bool,
}

/// Embedded fact store backed by a sled tree.
///
/// Useful when no external knowledge store is running: every fact is kept as JSON
/// under a zero-padded generated id, so iteration follows opening order. Writes
/// are flushed to disk, so the async operations run them on the blocking pool.
#[derive(Debug, Clone)]
pub struct SledFactStore {
    db: sled::Db,
}

impl SledFactStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, ServiceError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    /// All facts recorded so far, in opening order.
    pub fn facts(&self) -> Result<Vec<FactRecord>, ServiceError> {
        let tree = self.db.open_tree(FACTS_TREE)?;
        tree.iter()
            .values()
            .map(|value| -> Result<FactRecord, ServiceError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    fn insert(&self, tree: &sled::Tree, record: &FactRecord) -> Result<(), ServiceError> {
        tree.insert(record.id.0.as_bytes(), serde_json::to_vec(record)?)?;
        tree.flush()?;
        Ok(())
    }

    fn start_blocking(&self, record: FactRecord) -> Result<FactId, ServiceError> {
        let tree = self.db.open_tree(FACTS_TREE)?;
        let record = FactRecord {
            id: FactId(format!("{:020}", self.db.generate_id()?)),
            ..record
        };
        self.insert(&tree, &record)?;
        Ok(record.id)
    }

    fn end_blocking(&self, subject: &str, id: &FactId) -> Result<(), ServiceError> {
        let tree = self.db.open_tree(FACTS_TREE)?;
        let Some(value) = tree.get(id.0.as_bytes())? else {
            return Err(ServiceError::Rejected(format!("unknown fact {id}")));
        };

        let mut record: FactRecord = serde_json::from_slice(&value)?;
        if record.subject != subject {
            return Err(ServiceError::Rejected(format!(
                "fact {id} belongs to {}, not {subject}",
                record.subject
            )));
        }
        if record.end.is_some() {
            return Err(ServiceError::Rejected(format!("fact {id} already ended")));
        }

        record.end = Some(Utc::now());
        self.insert(&tree, &record)
    }
}

#[async_trait]
impl FactStore for SledFactStore {
    async fn wait_for_service(&self) -> Result<(), ServiceError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.open_tree(FACTS_TREE)).await??;
        Ok(())
    }

    async fn start_fact(
        &self,
        subject: &str,
        predicate: &str,
        at: DateTime<Utc>,
        immediate: bool,
    ) -> Result<FactId, ServiceError> {
        let store = self.clone();
        let record = FactRecord {
            id: FactId(String::new()),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            start: at,
            end: None,
            immediate,
        };
        tokio::task::spawn_blocking(move || store.start_blocking(record)).await?
    }

    async fn end_fact(&self, subject: &str, id: &FactId) -> Result<(), ServiceError> {
        let store = self.clone();
        let (subject, id) = (subject.to_string(), id.clone());
        tokio::task::spawn_blocking(move || store.end_blocking(&subject, &id)).await?
    }
}
