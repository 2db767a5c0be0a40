//! Executor
//!
//! Drives resumable machines to completion. `block_on` parks the calling
//! thread on a channel until the awaiter's continuation fires; `spawn` is
//! fully continuation driven and hands back a task; `run_all` fans a batch
//! of machines out over a worker pool.

use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::{VmError, VmResult};
use super::execution::{MachineStatus, Resumable};
use super::task::TaskHandle;
use super::value::{Exception, Value};
use crate::defaults::INVALID_OPERATION;
use crate::options::EngineOptions;

/// Runs machines to completion
#[derive(Debug, Clone, Default)]
pub struct Executor {
    options: EngineOptions,
}

impl Executor {
    /// Executor with the given options
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Worker threads `run_all` uses
    pub fn worker_threads(&self) -> usize {
        match self.options.worker_threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Resume `machine` until it completes, waiting for awaiters on this thread
    pub fn block_on<M: Resumable>(&self, machine: &mut M) -> VmResult<Value> {
        loop {
            match machine.resume()? {
                MachineStatus::Completed(value) => return Ok(value),
                MachineStatus::Yielded(_) => {
                    return Err(VmError::CannotSuspend(
                        "block_on cannot drive a generator".to_string(),
                    ))
                }
                MachineStatus::Suspended => {
                    let suspension = machine.take_suspension().ok_or_else(|| {
                        VmError::InvalidTransition("suspended without an awaiter".to_string())
                    })?;
                    let (tx, rx) = channel::bounded(1);
                    suspension.on_completed(Box::new(move || {
                        let _ = tx.send(());
                    }))?;
                    rx.recv().map_err(|_| {
                        VmError::InvalidTransition("continuation was dropped".to_string())
                    })?;
                }
            }
        }
    }

    /// Start `machine` and return a task settled with its outcome
    ///
    /// Each resumption runs on whichever thread completes the awaited task.
    pub fn spawn<M: Resumable + 'static>(&self, machine: M) -> TaskHandle {
        let task = TaskHandle::pending();
        drive(Arc::new(Mutex::new(machine)), task.clone());
        task
    }

    /// Run every machine on the worker pool; results keep the input order
    pub fn run_all<M: Resumable>(&self, machines: Vec<M>) -> Vec<VmResult<Value>> {
        let count = machines.len();
        let workers = self.worker_threads().min(count).max(1);
        debug!(target: "stepwise::executor", machines = count, workers, "running batch");

        let (job_tx, job_rx) = channel::unbounded();
        for job in machines.into_iter().enumerate() {
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (result_tx, result_rx) = channel::unbounded();
        thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                scope.spawn(move || {
                    for (index, mut machine) in jobs {
                        let _ = results.send((index, self.block_on(&mut machine)));
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<VmResult<Value>>> = (0..count).map(|_| None).collect();
        for (index, result) in result_rx {
            slots[index] = Some(result);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(VmError::InvalidTransition(
                        "worker exited without a result".to_string(),
                    ))
                })
            })
            .collect()
    }
}

/// Resume until the next suspension, then hand the rest to the awaiter's continuation
fn drive<M: Resumable + 'static>(machine: Arc<Mutex<M>>, task: TaskHandle) {
    let mut guard = machine.lock();
    let suspension = match guard.resume() {
        Ok(MachineStatus::Suspended) => guard.take_suspension(),
        Ok(MachineStatus::Completed(value)) => {
            task.complete(value);
            return;
        }
        Ok(MachineStatus::Yielded(_)) => {
            task.fail(Exception::new(
                INVALID_OPERATION,
                "a spawned machine cannot yield",
            ));
            return;
        }
        Err(VmError::Thrown(exception)) => {
            task.fail(exception);
            return;
        }
        Err(err) => {
            warn!(target: "stepwise::executor", error = %err, "machine failed");
            task.fail(Exception::new(INVALID_OPERATION, err.to_string()));
            return;
        }
    };
    // The continuation may run inline, so the lock must be released first
    drop(guard);

    let Some(suspension) = suspension else {
        task.fail(Exception::new(
            INVALID_OPERATION,
            "machine suspended without an awaiter",
        ));
        return;
    };
    let next = machine.clone();
    let resumed = task.clone();
    if let Err(exception) = suspension.on_completed(Box::new(move || drive(next, resumed))) {
        task.fail(exception);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::tree::{BinaryOp, Expr, LambdaExpr};
    use crate::vm::FunctionTable;

    fn adder(functions: FunctionTable) -> crate::vm::CompiledMachine {
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::binary(
                BinaryOp::Add,
                Expr::await_task(Expr::call("T", vec![])),
                Expr::constant(1i64),
            ),
        );
        Compiler::default()
            .compile(&lambda)
            .unwrap()
            .instantiate(vec![], Arc::new(functions))
            .unwrap()
    }

    #[test]
    fn test_block_on_waits_for_other_thread() {
        let functions = FunctionTable::new().with("T", |_| {
            Ok(Value::Task(TaskHandle::spawn(|| {
                thread::sleep(std::time::Duration::from_millis(10));
                Ok(Value::from(41i64))
            })))
        });
        let mut machine = adder(functions);
        let value = Executor::default().block_on(&mut machine).unwrap();
        assert_eq!(value, Value::from(42i64));
    }

    #[test]
    fn test_spawn_settles_task() {
        let pending = TaskHandle::pending();
        let functions = FunctionTable::new().with("T", {
            let pending = pending.clone();
            move |_| Ok(Value::Task(pending.clone()))
        });
        let task = Executor::default().spawn(adder(functions));
        assert!(!task.is_completed());
        pending.complete(Value::from(9i64));
        assert_eq!(task.outcome().unwrap().unwrap(), Value::from(10i64));
    }

    #[test]
    fn test_run_all_keeps_order() {
        let machines: Vec<_> = (0..8i64)
            .map(|n| {
                adder(FunctionTable::new().with("T", move |_| {
                    Ok(Value::Task(TaskHandle::ready(n)))
                }))
            })
            .collect();
        let executor = Executor::new(EngineOptions {
            worker_threads: 3,
            ..EngineOptions::default()
        });
        let results: Vec<Value> = executor
            .run_all(machines)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results, (1..=8i64).map(Value::from).collect::<Vec<_>>());
    }
}
