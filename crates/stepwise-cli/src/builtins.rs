//! Host functions available to lambdas run from the command line.

use std::thread;
use std::time::Duration;

use stepwise_engine::{Exception, FunctionTable, TaskHandle, Value};

/// Milliseconds `delay` waits when no duration is given
const DEFAULT_DELAY_MS: u64 = 10;

/// The builtin function table
///
/// - `ready(v)`: a task already completed with `v`
/// - `delay(v, ms)`: a task completed with `v` by another thread after `ms` milliseconds
/// - `fail(message)`: a task faulted with `message`
/// - `print(..)`: write the arguments to stdout, space separated
pub fn table() -> FunctionTable {
    FunctionTable::new()
        .with("ready", |args| {
            Ok(Value::Task(TaskHandle::ready(first(args))))
        })
        .with("delay", |args| {
            let value = first(args);
            let ms = args
                .get(1)
                .and_then(Value::as_int)
                .map_or(DEFAULT_DELAY_MS, |ms| ms.max(0) as u64);
            Ok(Value::Task(TaskHandle::spawn(move || {
                thread::sleep(Duration::from_millis(ms));
                Ok(value)
            })))
        })
        .with("fail", |args| {
            let message = first(args).to_string();
            Ok(Value::Task(TaskHandle::faulted(Exception::new(
                "HostError",
                message,
            ))))
        })
        .with("print", |args| {
            let line: Vec<String> = args.iter().map(Value::to_string).collect();
            println!("{}", line.join(" "));
            Ok(Value::Unit)
        })
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}
