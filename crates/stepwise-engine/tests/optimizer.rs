//! Optimizer properties: idempotence, and identical observable behaviour of
//! optimized, unoptimized and interpreted runs.

use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_engine::compiler::optimize::{optimize, OptimizeStats};
use stepwise_engine::{
    BinaryOp, CatchBlock, Compiler, EngineOptions, Executor, Expr, FunctionTable, Interpreter,
    LabelTarget, LambdaExpr, PrettyPrint, SwitchCase, TaskHandle, Value, Var,
};

fn log(value: impl Into<Value>) -> Expr {
    Expr::call("log", vec![Expr::constant(value)])
}

fn ready(value: impl Into<Value>) -> Expr {
    Expr::await_task(Expr::call("ready", vec![Expr::constant(value)]))
}

/// A spread of control-flow shapes
fn corpus() -> Vec<LambdaExpr> {
    let i = Var::new(0, "i");
    let ex = Var::new(1, "ex");
    let brk = LabelTarget::named(0, "break");
    let skip = LabelTarget::named(1, "skip");

    let counting_loop = LambdaExpr::asynchronous(
        vec![],
        Expr::block(
            vec![i.clone()],
            vec![
                Expr::assign(&i, Expr::constant(0i64)),
                Expr::loop_with(
                    Expr::seq(vec![
                        Expr::if_then(
                            Expr::binary(BinaryOp::GreaterThanOrEqual, Expr::var(&i), ready(3i64)),
                            Expr::break_to(&brk),
                        ),
                        Expr::call("log", vec![Expr::var(&i)]),
                        Expr::assign(
                            &i,
                            Expr::binary(BinaryOp::Add, Expr::var(&i), Expr::constant(1i64)),
                        ),
                    ]),
                    Some(brk),
                    None,
                ),
                Expr::var(&i),
            ],
        ),
    )
    .named("counting_loop");

    let guarded = LambdaExpr::asynchronous(
        vec![],
        Expr::try_catch_finally(
            Expr::seq(vec![
                log("body"),
                ready(0i64),
                Expr::throw(Expr::constant("oops")),
            ]),
            vec![CatchBlock::any(
                Some(ex.clone()),
                Expr::seq(vec![log("catch"), ready(1i64)]),
            )],
            log("finally"),
        ),
    )
    .named("guarded");

    let switching = LambdaExpr::asynchronous(
        vec![],
        Expr::seq(vec![
            Expr::switch(
                ready(2i64),
                vec![
                    SwitchCase::new(vec![Expr::constant(1i64)], log("one")),
                    SwitchCase::new(
                        vec![Expr::constant(2i64), Expr::constant(3i64)],
                        Expr::seq(vec![log("two"), ready(0i64), Expr::goto(&skip)]),
                    ),
                ],
                Some(log("other")),
            ),
            log("after switch"),
            Expr::label(&skip, None),
            log("end"),
        ]),
    )
    .named("switching");

    let plain = LambdaExpr::sync(
        vec![],
        Expr::seq(vec![
            log("a"),
            Expr::condition(
                Expr::binary(BinaryOp::LessThan, Expr::constant(1i64), Expr::constant(2i64)),
                log("b"),
                log("c"),
            ),
            log("d"),
        ]),
    )
    .named("plain");

    vec![counting_loop, guarded, switching, plain]
}

fn functions(log: Arc<Mutex<Vec<Value>>>) -> Arc<FunctionTable> {
    Arc::new(
        FunctionTable::new()
            .with("log", move |args| {
                log.lock().push(args.first().cloned().unwrap_or_default());
                Ok(Value::Unit)
            })
            .with("ready", |args| {
                Ok(Value::Task(TaskHandle::ready(
                    args.first().cloned().unwrap_or_default(),
                )))
            }),
    )
}

/// Run a lambda through `run` and capture the log and outcome
fn observe(
    run: impl FnOnce(Arc<FunctionTable>) -> Result<Value, String>,
) -> (Vec<Value>, Result<Value, String>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let outcome = run(functions(log.clone()));
    let seen = log.lock().clone();
    (seen, outcome)
}

mod idempotence {
    use super::*;

    #[test]
    fn test_second_pass_changes_nothing() {
        let compiler = Compiler::default();
        let options = EngineOptions::default();
        for lambda in corpus() {
            let mut graph = compiler.lower(&lambda).unwrap();
            optimize(&mut graph, &options);
            let once = graph.pretty_print();

            let stats = optimize(&mut graph, &options);
            assert_eq!(stats, OptimizeStats::default(), "{}", lambda.display_name());
            assert_eq!(graph.pretty_print(), once, "{}", lambda.display_name());
        }
    }

    #[test]
    fn test_layout_only_is_stable() {
        let compiler = Compiler::default();
        let options = EngineOptions::unoptimized();
        for lambda in corpus() {
            let mut graph = compiler.lower(&lambda).unwrap();
            optimize(&mut graph, &options);
            let once = graph.pretty_print();
            optimize(&mut graph, &options);
            assert_eq!(graph.pretty_print(), once);
        }
    }

    #[test]
    fn test_optimizer_shrinks_or_keeps_graph() {
        let compiler = Compiler::default();
        for lambda in corpus() {
            let mut graph = compiler.lower(&lambda).unwrap();
            let before = graph.live_states();
            optimize(&mut graph, &EngineOptions::default());
            assert!(graph.live_states() <= before);
        }
    }
}

mod transparency {
    use super::*;

    fn compiled(options: EngineOptions, lambda: &LambdaExpr) -> (Vec<Value>, Result<Value, String>) {
        observe(|functions| {
            let compiled = Compiler::default()
                .with_options(options)
                .compile(lambda)
                .map_err(|e| e.to_string())?;
            let mut machine = compiled
                .instantiate(vec![], functions)
                .map_err(|e| e.to_string())?;
            Executor::default()
                .block_on(&mut machine)
                .map_err(|e| e.to_string())
        })
    }

    fn interpreted(lambda: &LambdaExpr) -> (Vec<Value>, Result<Value, String>) {
        observe(|functions| {
            let interpreter = Interpreter::default();
            let prepared = interpreter.prepare(lambda).map_err(|e| e.to_string())?;
            let mut machine = interpreter
                .start(&prepared, vec![], functions)
                .map_err(|e| e.to_string())?;
            Executor::default()
                .block_on(&mut machine)
                .map_err(|e| e.to_string())
        })
    }

    #[test]
    fn test_all_variants_agree() {
        for lambda in corpus() {
            let optimized = compiled(EngineOptions::default(), &lambda);
            let unoptimized = compiled(EngineOptions::unoptimized(), &lambda);
            let tree = interpreted(&lambda);
            assert_eq!(optimized, unoptimized, "{}", lambda.display_name());
            assert_eq!(optimized, tree, "{}", lambda.display_name());
        }
    }

    #[test]
    fn test_expected_logs() {
        let strs = |values: &[&str]| -> Vec<Value> { values.iter().map(|s| Value::from(*s)).collect() };
        let corpus = corpus();

        let (seen, outcome) = compiled(EngineOptions::default(), &corpus[0]);
        assert_eq!(seen, vec![Value::from(0i64), Value::from(1i64), Value::from(2i64)]);
        assert_eq!(outcome, Ok(Value::from(3i64)));

        let (seen, outcome) = compiled(EngineOptions::default(), &corpus[1]);
        assert_eq!(seen, strs(&["body", "catch", "finally"]));
        assert_eq!(outcome, Ok(Value::from(1i64)));

        let (seen, _) = compiled(EngineOptions::default(), &corpus[2]);
        assert_eq!(seen, strs(&["two", "end"]));

        let (seen, _) = compiled(EngineOptions::default(), &corpus[3]);
        assert_eq!(seen, strs(&["a", "b", "d"]));
    }
}
