// Run queue collaborator

use crate::types::{RunId, RunStatus};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Hands queued runs to a separate consumer.
///
/// The coordinator enqueues every submitted run but drives it directly;
/// nothing in the execution path dequeues.
#[async_trait::async_trait]
pub trait QueueService: Send + Sync {
    async fn enqueue_run(&self, run_id: RunId) -> Result<()>;

    /// Pop the oldest run queued under `status`
    async fn dequeue_run(&self, status: RunStatus) -> Result<Option<RunId>>;
}

/// FIFO queue per run status, held in memory
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<RunStatus, VecDeque<RunId>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, status: RunStatus) -> usize {
        self.queues.lock().get(&status).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().values().all(VecDeque::is_empty)
    }
}

#[async_trait::async_trait]
impl QueueService for MemoryQueue {
    async fn enqueue_run(&self, run_id: RunId) -> Result<()> {
        self.queues
            .lock()
            .entry(RunStatus::Queued)
            .or_default()
            .push_back(run_id);
        Ok(())
    }

    async fn dequeue_run(&self, status: RunStatus) -> Result<Option<RunId>> {
        Ok(self
            .queues
            .lock()
            .get_mut(&status)
            .and_then(VecDeque::pop_front))
    }
}
