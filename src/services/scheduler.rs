//! Single-worker inference queue.
//!
//! Every query against a retrieval chain goes through one
//! [`InferenceScheduler`]. Tasks are executed by a single worker task in
//! strict submission order, so the language model never sees two requests
//! at once, while HTTP handlers stay fully concurrent and simply await their
//! own completion handle.
//!
//! The queue is unbounded and tasks cannot be cancelled or timed out once
//! enqueued: a hung model call stalls every caller behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ChainError, SchedulerError};
use crate::models::RetrievalResult;
use crate::services::chain::RetrievalChain;
use crate::services::metrics::{InferenceRecord, MetricsStore};

struct InferenceTask {
    task_id: String,
    query: String,
    chain: Arc<RetrievalChain>,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<RetrievalResult, ChainError>>,
}

/// A finished task as seen by its submitter.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task_id: String,
    pub result: RetrievalResult,
}

/// Completion handle for one enqueued task.
pub struct TaskHandle {
    task_id: String,
    receiver: oneshot::Receiver<Result<RetrievalResult, ChainError>>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the worker to finish this task.
    pub async fn wait(self) -> Result<CompletedTask, SchedulerError> {
        match self.receiver.await {
            Ok(Ok(result)) => Ok(CompletedTask {
                task_id: self.task_id,
                result,
            }),
            Ok(Err(e)) => Err(SchedulerError::Chain(e)),
            Err(_) => Err(SchedulerError::WorkerStopped),
        }
    }
}

pub struct InferenceScheduler {
    sender: mpsc::UnboundedSender<InferenceTask>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl InferenceScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn start(metrics: Option<Arc<MetricsStore>>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(receiver, Arc::clone(&pending), metrics));

        Self {
            sender,
            pending,
            worker,
        }
    }

    /// Queue a task and return its completion handle without waiting.
    pub fn enqueue(
        &self,
        query: impl Into<String>,
        chain: Arc<RetrievalChain>,
    ) -> Result<TaskHandle, SchedulerError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let (reply, receiver) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        let task = InferenceTask {
            task_id: task_id.clone(),
            query: query.into(),
            chain,
            enqueued_at: Instant::now(),
            reply,
        };

        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::WorkerStopped);
        }

        tracing::debug!(task_id = %task_id, "inference task queued");
        Ok(TaskHandle { task_id, receiver })
    }

    /// Queue a task and wait for its result.
    pub async fn submit(
        &self,
        query: impl Into<String>,
        chain: Arc<RetrievalChain>,
    ) -> Result<CompletedTask, SchedulerError> {
        self.enqueue(query, chain)?.wait().await
    }

    /// Tasks submitted but not yet finished, including the running one.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stop accepting tasks, let the worker drain the queue, and wait for it.
    pub async fn shutdown(self) {
        let Self { sender, worker, .. } = self;
        drop(sender);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "inference worker ended abnormally");
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<InferenceTask>,
    pending: Arc<AtomicUsize>,
    metrics: Option<Arc<MetricsStore>>,
) {
    tracing::info!("inference worker started");

    while let Some(task) = receiver.recv().await {
        let queue_wait = task.enqueued_at.elapsed();
        let start = Instant::now();
        let tenant = task.chain.tenant_id().to_string();

        let result = task.chain.answer(&task.query).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => tracing::info!(
                task_id = %task.task_id,
                tenant = %tenant,
                queue_wait_ms = queue_wait.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "inference task finished"
            ),
            Err(e) => tracing::warn!(
                task_id = %task.task_id,
                tenant = %tenant,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "inference task failed"
            ),
        }

        if let Some(store) = &metrics {
            let store = Arc::clone(store);
            let record = InferenceRecord {
                tenant,
                queue_wait_ms: queue_wait.as_millis() as u64,
                latency_ms: elapsed.as_millis() as u64,
                success: result.is_ok(),
            };
            if let Err(e) = tokio::task::spawn_blocking(move || store.record(&record)).await {
                tracing::warn!(error = %e, "metrics writer failed");
            }
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        if task.reply.send(result).is_err() {
            tracing::debug!(task_id = %task.task_id, "submitter went away before completion");
        }
    }

    tracing::info!("inference worker stopped");
}
