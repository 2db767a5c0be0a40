//! Pretty-printing for state graphs and the linear form
//!
//! Provides human-readable dumps for debugging and for the CLI.

use std::fmt::Write;

use super::graph::StateGraph;
use super::linear::{LinearBlock, LinearBody, LinearInstr};
use crate::tree::{CatchFilter, LambdaKind};

/// Trait for pretty-printing lowering output
pub trait PrettyPrint {
    /// Render as multi-line text
    fn pretty_print(&self) -> String;
}

fn kind_name(kind: LambdaKind) -> &'static str {
    match kind {
        LambdaKind::Sync => "sync",
        LambdaKind::Async => "async",
        LambdaKind::Generator => "generator",
    }
}

impl PrettyPrint for StateGraph {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        let _ = writeln!(
            output,
            "; {} {}({})",
            kind_name(self.kind),
            self.name,
            params.join(", ")
        );
        if !self.variables.is_empty() {
            let vars: Vec<String> = self.variables.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(output, "; variables: {}", vars.join(", "));
        }
        let _ = writeln!(output, "; entry {}", self.entry);

        for region in self.regions() {
            let scope = self.scope(region);
            let nodes = self.region_nodes(region);
            if nodes.is_empty() {
                continue;
            }
            match scope.owner {
                Some(owner) => {
                    let _ = writeln!(output, "region {} (try, entered by {}) {{", region.0, owner);
                }
                None => {
                    let _ = writeln!(output, "region {} {{", region.0);
                }
            }
            for id in nodes {
                let state = self.state(id);
                let _ = writeln!(output, "  {}:", id);
                for expr in &state.expressions {
                    let _ = writeln!(output, "    {}", expr);
                }
                if let Some(result) = &state.result {
                    let _ = writeln!(output, "    {} = {}", result.variable, result.value);
                }
                match &state.transition {
                    Some(transition) => {
                        let _ = writeln!(output, "    => {}", transition.describe());
                    }
                    None => {
                        let _ = writeln!(output, "    => <open>");
                    }
                }
            }
            let _ = writeln!(output, "}}");
        }

        if !self.labels.is_empty() {
            let mut labels: Vec<_> = self.labels.iter().collect();
            labels.sort_by_key(|(id, _)| **id);
            for (id, binding) in labels {
                match &binding.variable {
                    Some(var) => {
                        let _ = writeln!(output, "; label L{} -> {} ({})", id.0, binding.state, var);
                    }
                    None => {
                        let _ = writeln!(output, "; label L{} -> {}", id.0, binding.state);
                    }
                }
            }
        }
        output
    }
}

impl PrettyPrint for LinearBody {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        let _ = writeln!(
            output,
            "{} fn {}({}) {{",
            kind_name(self.kind),
            self.name,
            params.join(", ")
        );
        if !self.variables.is_empty() {
            let vars: Vec<String> = self.variables.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(output, "  ; locals: {}", vars.join(", "));
        }
        write_block(&mut output, &self.entry, 2);
        let _ = writeln!(output, "}}");
        output
    }
}

fn write_block(output: &mut String, block: &LinearBlock, indent: usize) {
    let prefix = " ".repeat(indent);
    if !block.table.is_empty() {
        let _ = writeln!(output, "{}switch (state) {{", prefix);
        for entry in &block.table.entries {
            if entry.nested {
                let _ = writeln!(output, "{}  {} => goto {}", prefix, entry.state, entry.label);
            } else {
                let _ = writeln!(
                    output,
                    "{}  {} => state = -1; goto {}",
                    prefix, entry.state, entry.label
                );
            }
        }
        let _ = writeln!(output, "{}}}", prefix);
    }

    for instr in &block.instrs {
        match instr {
            LinearInstr::Label(label) => {
                let _ = writeln!(output, "{}{}:", " ".repeat(indent.saturating_sub(2)), label);
            }
            LinearInstr::TryRegion(region) => {
                let _ = writeln!(output, "{}try {{", prefix);
                write_block(output, &region.block, indent + 2);
                let _ = write!(output, "{}}}", prefix);
                for (filter, code) in &region.handlers {
                    let filter = match filter {
                        CatchFilter::Any => "*".to_string(),
                        CatchFilter::Kind(kind) => kind.clone(),
                    };
                    let _ = write!(
                        output,
                        " catch ({}) {{ {} = {}; {} = <exception> }}",
                        filter, region.try_state, code, region.exception
                    );
                }
                if region.catch_all {
                    let _ = write!(
                        output,
                        " catch (*) {{ {} = -1; {} = <exception> }}",
                        region.try_state, region.exception
                    );
                }
                let _ = writeln!(output);
                for exit in &region.exits {
                    let _ = writeln!(
                        output,
                        "{}; leave {} => {} = {}",
                        prefix, exit.label, region.try_state, exit.code
                    );
                }
            }
            other => {
                let _ = writeln!(output, "{}{}", prefix, format_instr(other));
            }
        }
    }
}

fn format_instr(instr: &LinearInstr) -> String {
    match instr {
        LinearInstr::Label(label) => format!("{}:", label),
        LinearInstr::Eval(expr) => format!("{}", expr),
        LinearInstr::Assign { target, value } => format!("{} = {}", target, value),
        LinearInstr::Goto(label) => format!("goto {}", label),
        LinearInstr::GotoIf { test, target } => format!("if ({}) goto {}", test, target),
        LinearInstr::Switch {
            value,
            cases,
            default,
        } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(tests, label)| {
                    let tests: Vec<String> = tests.iter().map(|t| t.to_string()).collect();
                    format!("{} => goto {}", tests.join(" | "), label)
                })
                .collect();
            format!(
                "switch ({}) {{ {}; default => goto {} }}",
                value,
                arms.join("; "),
                default
            )
        }
        LinearInstr::SetState(id) => format!("state = {}", id),
        LinearInstr::GetAwaiter {
            awaitable,
            awaiter,
            binder,
            ..
        } => format!("{} = {}.get_awaiter({})", awaiter, binder.type_name(), awaitable),
        LinearInstr::GotoIfCompleted {
            awaiter, target, ..
        } => format!("if ({}.is_completed) goto {}", awaiter, target),
        LinearInstr::RegisterContinuation { awaiter, .. } => {
            format!("host.on_completed({})", awaiter)
        }
        LinearInstr::Suspend(kind) => format!("suspend {:?}", kind).to_lowercase(),
        LinearInstr::GetResult {
            awaiter, target, ..
        } => match target {
            Some(target) => format!("{} = {}.get_result()", target, awaiter),
            None => format!("{}.get_result()", awaiter),
        },
        LinearInstr::SetCurrent(value) => format!("current = {}; success = true", value),
        LinearInstr::YieldBreak => "state = -2; success = false; return".to_string(),
        LinearInstr::Return(Some(value)) => format!("state = -2; return {}", value),
        LinearInstr::Return(None) => "state = -2; return".to_string(),
        LinearInstr::TryRegion(region) => format!("try <{}>", region.owner),
        LinearInstr::DispatchTryState {
            try_state,
            exception,
            cases,
            rethrow_unhandled,
            default,
        } => {
            let mut arms: Vec<String> = cases
                .iter()
                .map(|(code, label)| format!("{} => goto {}", code, label))
                .collect();
            if *rethrow_unhandled {
                arms.push(format!("-1 => throw {}", exception));
            }
            format!(
                "switch ({}) {{ {}; default => goto {} }}",
                try_state,
                arms.join("; "),
                default
            )
        }
    }
}
