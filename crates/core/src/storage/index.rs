use super::RunStore;
use crate::types::{PipelineId, Run, RunId};
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const RUNS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Run store backed by an embedded redb database
#[derive(Clone)]
pub struct RedbRunStore {
    db: Arc<Database>,
}

impl RedbRunStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create index directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _runs_table = write_txn
                .open_table(RUNS_TABLE)
                .context("Failed to open runs table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    fn put_run(&self, run: &Run) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(RUNS_TABLE)
                .context("Failed to open table")?;

            let key = run.id.to_string();
            let value = serde_json::to_vec(run).context("Failed to serialize run")?;

            table
                .insert(key.as_str(), value.as_slice())
                .context("Failed to insert run")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    fn read_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(RUNS_TABLE).context("Failed to open table")?;

        let key = run_id.to_string();
        let value = table.get(key.as_str()).context("Failed to get run")?;

        match value {
            Some(guard) => {
                let run: Run =
                    serde_json::from_slice(guard.value()).context("Failed to deserialize run")?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl RunStore for RedbRunStore {
    async fn create_run(&self, run: &Run) -> Result<Run> {
        self.put_run(run)?;
        Ok(run.clone())
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<Run>> {
        self.read_run(id)
    }

    async fn update_run(&self, run: &Run) -> Result<Run> {
        if self.read_run(&run.id)?.is_none() {
            anyhow::bail!("Run {} not found", run.id);
        }

        let mut run = run.clone();
        run.updated_at = chrono::Utc::now();
        self.put_run(&run)?;
        Ok(run)
    }

    async fn list_runs(&self, pipeline_id: Option<&PipelineId>) -> Result<Vec<Run>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn.open_table(RUNS_TABLE).context("Failed to open table")?;

        let mut runs = Vec::new();
        for item in table.iter().context("Failed to iterate runs")? {
            let (_key, value) = item.context("Failed to read item")?;
            let run: Run =
                serde_json::from_slice(value.value()).context("Failed to deserialize run")?;
            if pipeline_id.map_or(true, |id| &run.pipeline_id == id) {
                runs.push(run);
            }
        }

        // Most recent first
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(runs)
    }
}
