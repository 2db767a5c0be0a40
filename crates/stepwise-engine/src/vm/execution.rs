//! Resumable machines
//!
//! Both the compiled machine and the tree interpreter implement `Resumable`,
//! so hosts drive them the same way: call `resume` until it completes, and
//! on `Suspended` register a continuation with the awaiter from
//! `take_suspension`.

use super::error::{VmError, VmResult};
use super::host::Suspension;
use super::value::Value;

/// Outcome of one resumption
#[derive(Debug, Clone, PartialEq)]
pub enum MachineStatus {
    /// Waiting on an awaiter; see `Resumable::take_suspension`
    Suspended,
    /// A generator produced a value
    Yielded(Value),
    /// Finished; generators complete with unit
    Completed(Value),
}

/// A machine that runs until its next suspension point
pub trait Resumable: Send {
    /// Run from the current resume point
    fn resume(&mut self) -> VmResult<MachineStatus>;

    /// Awaiter registered by the last `Suspended` status
    fn take_suspension(&mut self) -> Option<Suspension>;

    /// Whether the machine returned, threw or ended its sequence
    fn is_completed(&self) -> bool;
}

/// Generator protocol over a resumable machine
pub struct GeneratorIter<M: Resumable> {
    machine: M,
    current: Value,
    finished: bool,
}

impl<M: Resumable> GeneratorIter<M> {
    /// Wrap a machine that has not run yet
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            current: Value::Unit,
            finished: false,
        }
    }

    /// Advance; true when a new value is available in `current`
    pub fn move_next(&mut self) -> VmResult<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.machine.resume() {
            Ok(MachineStatus::Yielded(value)) => {
                self.current = value;
                Ok(true)
            }
            Ok(MachineStatus::Completed(_)) => {
                self.finished = true;
                Ok(false)
            }
            Ok(MachineStatus::Suspended) => {
                self.finished = true;
                Err(VmError::CannotSuspend(
                    "generator suspended on an awaiter".to_string(),
                ))
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    /// Value produced by the last successful `move_next`
    pub fn current(&self) -> &Value {
        &self.current
    }

    /// The wrapped machine
    pub fn into_inner(self) -> M {
        self.machine
    }
}

impl<M: Resumable> Iterator for GeneratorIter<M> {
    type Item = VmResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.move_next() {
            Ok(true) => Some(Ok(self.current.clone())),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
