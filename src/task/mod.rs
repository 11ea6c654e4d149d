//! Task handles and the background task runner.
//!
//! A [`Task`] stands for one outstanding driver operation. It is completed
//! exactly once, either directly through [`TaskRunner::schedule_run`] and
//! [`TaskRunner::fail`], or by a worker once [`TaskRunner::local_run`] has
//! handed it a unit of work. Callers observe the completion through the
//! [`TaskReceipt`] returned alongside the task.
//!
//! Background work is a queue handoff: the submitting call pushes the task
//! and its boxed future onto a bounded channel and returns; a fixed pool of
//! workers drains the channel. A second completion of the same task is a
//! programming error. It is rejected, and the runner halts so no further
//! work is accepted.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::DriverError;

/// Default number of background workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default capacity of the background work queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Key-value document used for task parameters and results.
pub type ResultDocument = Map<String, Value>;

/// Value delivered to the caller when a task completes.
pub type TaskOutcome = Result<ResultDocument, DriverError>;

/// Errors raised by the task runner.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TaskError {
    /// Raised when a task is completed a second time.
    #[error("task {task_id} was already completed")]
    AlreadyCompleted {
        /// Identifier of the offending task.
        task_id: Uuid,
    },
    /// Raised when work is submitted after the runner stopped.
    #[error("task runner halted; no new work is accepted")]
    RunnerHalted,
    /// Raised when a task is dropped without ever being completed.
    #[error("task {task_id} was dropped without completion")]
    Abandoned {
        /// Identifier of the abandoned task.
        task_id: Uuid,
    },
}

/// Identity of the principal that requested a task.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Principal {
    /// User identifier.
    pub user_id: String,
    /// Project the request is scoped to.
    pub project_id: String,
}

impl Principal {
    /// Creates a principal for the given user and project.
    #[must_use]
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }
}

type CompletionSlot = Arc<Mutex<Option<oneshot::Sender<TaskOutcome>>>>;

/// Handle for one asynchronous driver operation.
///
/// Clones share the same completion slot, so only one of them can complete
/// the task.
#[derive(Clone, Debug)]
pub struct Task {
    id: Uuid,
    params: ResultDocument,
    principal: Principal,
    completion: CompletionSlot,
}

impl Task {
    /// Creates a task and the receipt used to await its completion.
    #[must_use]
    pub fn new(params: ResultDocument, principal: Principal) -> (Self, TaskReceipt) {
        let (sender, receiver) = oneshot::channel();
        let id = Uuid::new_v4();
        let task = Self {
            id,
            params,
            principal,
            completion: Arc::new(Mutex::new(Some(sender))),
        };
        (
            task,
            TaskReceipt {
                task_id: id,
                receiver,
            },
        )
    }

    /// Unique identifier used for log correlation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Input parameters supplied by the caller.
    #[must_use]
    pub const fn params(&self) -> &ResultDocument {
        &self.params
    }

    /// Principal that requested the task.
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns a top-level string parameter.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Returns a string nested under a path of object keys, for example
    /// `["properties", "os_type"]`.
    #[must_use]
    pub fn nested_str(&self, path: &[&str]) -> Option<&str> {
        let (first, rest) = path.split_first()?;
        let mut value = self.params.get(*first)?;
        for key in rest {
            value = value.get(*key)?;
        }
        value.as_str()
    }

    /// Returns a boolean parameter, accepting JSON booleans and the strings
    /// `"true"`/`"false"`.
    #[must_use]
    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) if text.eq_ignore_ascii_case("true") => true,
            Some(Value::String(text)) if text.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Returns `true` once the task has been completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn complete(&self, outcome: TaskOutcome) -> Result<(), TaskError> {
        let sender = self
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TaskError::AlreadyCompleted { task_id: self.id })?;
        if sender.send(outcome).is_err() {
            debug!(task_id = %self.id, "task completed after its receipt was dropped");
        }
        Ok(())
    }
}

/// Caller-side view of a task's eventual completion.
#[derive(Debug)]
pub struct TaskReceipt {
    task_id: Uuid,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskReceipt {
    /// Identifier of the task this receipt belongs to.
    #[must_use]
    pub const fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Waits for the task to complete.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Abandoned`] when every handle to the task was
    /// dropped without completing it.
    pub async fn wait(self) -> Result<TaskOutcome, TaskError> {
        let task_id = self.task_id;
        self.receiver
            .await
            .map_err(|_| TaskError::Abandoned { task_id })
    }

    /// Returns the outcome if the task has already completed.
    pub fn try_outcome(&mut self) -> Option<Result<TaskOutcome, TaskError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(Ok(outcome)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TaskError::Abandoned {
                task_id: self.task_id,
            })),
        }
    }
}

type Work = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'static>>;

struct Job {
    task: Task,
    work: Work,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    halted: AtomicBool,
}

impl Shared {
    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        if self.halted.load(Ordering::SeqCst) {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close(&self) {
        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }

    fn complete(&self, task: &Task, outcome: TaskOutcome) -> Result<(), TaskError> {
        task.complete(outcome).inspect_err(|err| {
            error!(
                task_id = %task.id(),
                error = %err,
                "double completion detected; halting task runner"
            );
            self.halted.store(true, Ordering::SeqCst);
            self.close();
        })
    }
}

/// Executes task completions and background work.
///
/// Cloning the runner shares its queue and workers.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    shared: Arc<Shared>,
    workers: Arc<AsyncMutex<Vec<JoinHandle<()>>>>,
}

impl TaskRunner {
    /// Starts `worker_count` workers draining a queue of `queue_depth` jobs.
    ///
    /// Both values are clamped to at least one. Must be called from within a
    /// tokio runtime.
    #[must_use]
    pub fn new(worker_count: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let shared = Arc::new(Shared {
            queue: Mutex::new(Some(sender)),
            halted: AtomicBool::new(false),
        });
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let workers = (0..worker_count.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&receiver),
                    Arc::clone(&shared),
                ))
            })
            .collect();
        Self {
            shared,
            workers: Arc::new(AsyncMutex::new(workers)),
        }
    }

    /// Completes the task right away with an optional result document.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::AlreadyCompleted`] on a second completion, which
    /// also halts the runner, and [`TaskError::RunnerHalted`] once halted.
    pub fn schedule_run(
        &self,
        task: &Task,
        document: Option<ResultDocument>,
    ) -> Result<(), TaskError> {
        self.finish(task, Ok(document.unwrap_or_default()))
    }

    /// Completes the task right away with a failure.
    ///
    /// # Errors
    ///
    /// Same conditions as [`TaskRunner::schedule_run`].
    pub fn fail(&self, task: &Task, failure: DriverError) -> Result<(), TaskError> {
        self.finish(task, Err(failure))
    }

    /// Queues `work` for a background worker and returns once it is queued.
    ///
    /// The worker completes `task` with whatever the work resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::RunnerHalted`] when the runner no longer accepts
    /// work. The task is dropped uncompleted in that case.
    pub async fn local_run<F>(&self, task: Task, work: F) -> Result<(), TaskError>
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        let sender = self.shared.sender().ok_or(TaskError::RunnerHalted)?;
        let task_id = task.id();
        sender
            .send(Job {
                task,
                work: Box::pin(work),
            })
            .await
            .map_err(|_| TaskError::RunnerHalted)?;
        debug!(%task_id, "task queued for background run");
        Ok(())
    }

    /// Returns `true` once a double completion halted the runner.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    /// Stops accepting work and waits for queued jobs to drain.
    pub async fn shutdown(&self) {
        self.shared.close();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "task worker terminated abnormally");
            }
        }
    }

    fn finish(&self, task: &Task, outcome: TaskOutcome) -> Result<(), TaskError> {
        if self.is_halted() {
            return Err(TaskError::RunnerHalted);
        }
        self.shared.complete(task, outcome)
    }
}

async fn worker_loop(
    index: usize,
    receiver: Arc<AsyncMutex<mpsc::Receiver<Job>>>,
    shared: Arc<Shared>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(Job { task, work }) = next else {
            break;
        };
        let outcome = work.await;
        match &outcome {
            Ok(_) => info!(task_id = %task.id(), worker = index, "background task succeeded"),
            Err(err) => error!(
                task_id = %task.id(),
                worker = index,
                error = %err,
                "background task failed"
            ),
        }
        if shared.complete(&task, outcome).is_err() {
            break;
        }
    }
    debug!(worker = index, "task worker stopped");
}

#[cfg(test)]
mod tests;
