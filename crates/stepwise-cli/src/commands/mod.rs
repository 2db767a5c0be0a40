//! CLI command implementations.

pub mod check;
pub mod lower;
pub mod run;

use anyhow::Context;
use std::path::Path;
use stepwise_engine::LambdaExpr;

/// Read a lambda from its JSON serialization
pub fn load_lambda(path: &Path) -> anyhow::Result<LambdaExpr> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut lambda: LambdaExpr = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid lambda", path.display()))?;
    if lambda.name.is_none() {
        lambda.name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned());
    }
    Ok(lambda)
}
