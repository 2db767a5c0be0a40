//! Tasks
//!
//! A `TaskHandle` is a write-once completion cell. Continuations registered
//! before completion run on the completing thread; continuations registered
//! afterwards run immediately on the registering thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::value::{ExceptionRef, Value};

/// Callback run once a task settles
pub type Continuation = Box<dyn FnOnce() + Send>;

/// Settled outcome of a task
pub type TaskOutcome = Result<Value, ExceptionRef>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

struct TaskState {
    outcome: Option<TaskOutcome>,
    waiters: Vec<Continuation>,
}

struct TaskCell {
    id: u64,
    state: Mutex<TaskState>,
}

/// Shared handle to a task
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskCell>);

impl TaskHandle {
    /// A task that has not settled yet
    pub fn pending() -> Self {
        TaskHandle(Arc::new(TaskCell {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(TaskState {
                outcome: None,
                waiters: Vec::new(),
            }),
        }))
    }

    /// A task already completed with `value`
    pub fn ready(value: impl Into<Value>) -> Self {
        let task = Self::pending();
        task.complete(value.into());
        task
    }

    /// A task already failed with `exception`
    pub fn faulted(exception: ExceptionRef) -> Self {
        let task = Self::pending();
        task.fail(exception);
        task
    }

    /// Run `work` on a new thread and settle the task with its outcome
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> TaskOutcome + Send + 'static,
    {
        let task = Self::pending();
        let cell = task.clone();
        std::thread::spawn(move || {
            cell.settle(work());
        });
        task
    }

    /// Complete with a value; returns false if the task had already settled
    pub fn complete(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    /// Fail with an exception; returns false if the task had already settled
    pub fn fail(&self, exception: ExceptionRef) -> bool {
        self.settle(Err(exception))
    }

    /// Settle the task and run waiting continuations outside the lock
    pub fn settle(&self, outcome: TaskOutcome) -> bool {
        let waiters = {
            let mut state = self.0.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            waiter();
        }
        true
    }

    /// Whether the task has settled
    pub fn is_completed(&self) -> bool {
        self.0.state.lock().outcome.is_some()
    }

    /// Settled outcome, if any
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.0.state.lock().outcome.clone()
    }

    /// Run `continuation` once the task settles
    pub fn on_completed(&self, continuation: Continuation) {
        {
            let mut state = self.0.state.lock();
            if state.outcome.is_none() {
                state.waiters.push(continuation);
                return;
            }
        }
        continuation();
    }

    /// Process-unique id
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether both handles refer to the same task
    pub fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::Exception;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_settles_once() {
        let task = TaskHandle::pending();
        assert!(!task.is_completed());
        assert!(task.complete(Value::from(1)));
        assert!(!task.complete(Value::from(2)));
        assert_eq!(task.outcome().unwrap().unwrap(), Value::from(1));
    }

    #[test]
    fn test_continuations_run_on_settle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = TaskHandle::pending();
        let c = counter.clone();
        task.on_completed(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        task.fail(Exception::new("Boom", "late"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let c = counter.clone();
        task.on_completed(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spawn_completes_on_worker() {
        let task = TaskHandle::spawn(|| Ok(Value::from(7)));
        let (tx, rx) = crossbeam::channel::bounded(1);
        task.on_completed(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.recv().unwrap();
        assert_eq!(task.outcome().unwrap().unwrap(), Value::from(7));
    }
}
