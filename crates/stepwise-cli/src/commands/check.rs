//! `stepwise check`: run the construction checks and lower each file.

use std::path::{Path, PathBuf};

use stepwise_engine::tree::analysis::analyze_lambda;
use stepwise_engine::{Compiler, LambdaExpr};

use super::load_lambda;
use crate::config::Config;
use crate::output::StyledOutput;

/// Check every file; returns false if any failed
pub fn execute(files: &[PathBuf], config: &Config, out: &mut StyledOutput) -> anyhow::Result<bool> {
    let compiler = Compiler::default().with_options(config.engine_options(false, None));
    let mut failed = 0usize;

    for file in files {
        match check_file(&compiler, file) {
            Ok(summary) => {
                out.ok_badge();
                out.plain(&format!(" {} ", file.display()));
                out.info(&summary);
                out.newline();
            }
            Err(e) => {
                failed += 1;
                out.fail_badge();
                out.plain(&format!(" {}: {:#}", file.display(), e));
                out.newline();
            }
        }
    }

    out.newline();
    if failed == 0 {
        out.success(&format!("{} file(s) checked", files.len()));
    } else {
        out.bold(&format!("{} of {} file(s) failed", failed, files.len()));
    }
    out.newline();
    out.flush();
    Ok(failed == 0)
}

fn check_file(compiler: &Compiler, file: &Path) -> anyhow::Result<String> {
    let lambda = load_lambda(file)?;
    let info = analyze_lambda(&lambda)?;
    let compiled = compiler.compile(&lambda)?;
    Ok(format!(
        "({}, {} suspend point(s), {} state(s))",
        kind_name(&lambda),
        info.suspend_points,
        compiled.graph.live_states()
    ))
}

pub(crate) fn kind_name(lambda: &LambdaExpr) -> &'static str {
    match lambda.kind {
        stepwise_engine::LambdaKind::Sync => "sync",
        stepwise_engine::LambdaKind::Async => "async",
        stepwise_engine::LambdaKind::Generator => "generator",
    }
}
