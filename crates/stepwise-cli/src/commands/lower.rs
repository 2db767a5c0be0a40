//! `stepwise lower`: print the state graph and linear form of a lambda.

use std::path::PathBuf;

use stepwise_engine::{Compiler, PrettyPrint};

use super::load_lambda;
use crate::config::Config;
use crate::output::StyledOutput;

pub struct LowerArgs {
    pub file: PathBuf,
    pub graph: bool,
    pub linear: bool,
    pub unoptimized: bool,
}

pub fn execute(args: LowerArgs, config: &Config, out: &mut StyledOutput) -> anyhow::Result<()> {
    let lambda = load_lambda(&args.file)?;
    let compiler = Compiler::default().with_options(config.engine_options(args.unoptimized, None));
    let compiled = compiler.compile(&lambda)?;

    let both = !args.graph && !args.linear;
    if args.graph || both {
        out.bold("== state graph ==");
        out.newline();
        out.plain(&compiled.graph.pretty_print());
        out.newline();
    }
    if args.linear || both {
        out.bold("== linear ==");
        out.newline();
        out.plain(&compiled.body.pretty_print());
        out.newline();
    }
    out.flush();
    Ok(())
}
