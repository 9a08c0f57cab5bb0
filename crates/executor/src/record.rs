use std::{collections::HashMap, sync::RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::ExecutionContext;

pub type RecordId = Uuid;

/// One execution's persisted trace, as the surrounding platform stores it.
///
/// The engine only ever appends to `output` and sets the final fields once;
/// storage and query semantics belong to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: RecordId,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub scan_id: Option<Uuid>,
    pub activity_id: Option<Uuid>,
    pub output: String,
    pub return_code: Option<i64>,
    pub error_output: Option<String>,
}

/// Persistence collaborator seam.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn create_record(
        &self,
        command: &str,
        started_at: DateTime<Utc>,
        context: &ExecutionContext,
    ) -> anyhow::Result<RecordId>;

    async fn append_output(&self, id: RecordId, text: &str) -> anyhow::Result<()>;

    async fn set_return_code(&self, id: RecordId, code: i64) -> anyhow::Result<()>;

    async fn set_error_output(&self, id: RecordId, text: &str) -> anyhow::Result<()>;
}

/// Store for tests and embedders that do not persist to a database.
#[derive(Debug, Default)]
pub struct InMemoryCommandStore {
    records: RwLock<HashMap<RecordId, CommandRecord>>,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RecordId) -> Option<CommandRecord> {
        self.records.read().unwrap().get(&id).cloned()
    }

    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_record<F>(&self, id: RecordId, mutate: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut CommandRecord),
    {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown command record {id}"))?;
        mutate(record);
        Ok(())
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn create_record(
        &self,
        command: &str,
        started_at: DateTime<Utc>,
        context: &ExecutionContext,
    ) -> anyhow::Result<RecordId> {
        let id = Uuid::new_v4();
        let record = CommandRecord {
            id,
            command: command.to_string(),
            started_at,
            scan_id: context.scan_id,
            activity_id: context.activity_id,
            output: String::new(),
            return_code: None,
            error_output: None,
        };
        self.records.write().unwrap().insert(id, record);
        Ok(id)
    }

    async fn append_output(&self, id: RecordId, text: &str) -> anyhow::Result<()> {
        self.with_record(id, |record| record.output.push_str(text))
    }

    async fn set_return_code(&self, id: RecordId, code: i64) -> anyhow::Result<()> {
        self.with_record(id, |record| record.return_code = Some(code))
    }

    async fn set_error_output(&self, id: RecordId, text: &str) -> anyhow::Result<()> {
        self.with_record(id, |record| record.error_output = Some(text.to_string()))
    }
}
