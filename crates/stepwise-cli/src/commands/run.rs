//! `stepwise run`: execute a lambda with the builtin host functions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use stepwise_engine::{
    Compiler, Executor, GeneratorIter, Interpreter, LambdaExpr, LambdaKind, Resumable, Value,
};

use super::load_lambda;
use crate::builtins;
use crate::config::Config;
use crate::output::StyledOutput;

pub struct RunArgs {
    pub file: PathBuf,
    pub interpret: bool,
    pub args: Vec<String>,
    pub unoptimized: bool,
    pub step_limit: Option<u64>,
}

pub fn execute(args: RunArgs, config: &Config, out: &mut StyledOutput) -> anyhow::Result<()> {
    let lambda = load_lambda(&args.file)?;
    let options = config.engine_options(args.unoptimized, args.step_limit);
    let values: Vec<Value> = args.args.iter().map(|arg| parse_arg(arg)).collect();
    let functions = Arc::new(builtins::table());
    let executor = Executor::new(options.clone());

    tracing::debug!(
        target: "stepwise::cli",
        lambda = lambda.display_name(),
        interpret = args.interpret,
        args = values.len(),
        "running"
    );

    if args.interpret {
        let interpreter = Interpreter::default().with_options(options);
        let machine = interpreter.launch(&lambda, values, functions)?;
        finish(&lambda, machine, &executor, out)
    } else {
        let machine = Compiler::default()
            .with_options(options)
            .instantiate(&lambda, values, functions)?;
        finish(&lambda, machine, &executor, out)
    }
}

fn finish<M: Resumable>(
    lambda: &LambdaExpr,
    mut machine: M,
    executor: &Executor,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    if lambda.kind == LambdaKind::Generator {
        for item in GeneratorIter::new(machine) {
            let value = item.with_context(|| format!("{} failed", lambda.display_name()))?;
            out.plain(&value.to_string());
            out.newline();
        }
    } else {
        let value = executor
            .block_on(&mut machine)
            .with_context(|| format!("{} failed", lambda.display_name()))?;
        out.plain(&value.to_string());
        out.newline();
    }
    out.flush();
    Ok(())
}

/// JSON scalars keep their type; anything else is taken as a string
fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::from(arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert!(matches!(parse_arg("3"), Value::Int(3)));
        assert!(matches!(parse_arg("true"), Value::Bool(true)));
        assert!(matches!(parse_arg("2.5"), Value::Float(_)));
        assert!(matches!(parse_arg("hello"), Value::Str(_)));
        assert!(matches!(parse_arg("\"quoted\""), Value::Str(_)));
    }
}
