//! Resumption behaviour: single-entry resume points, finally bodies across
//! suspension, rethrow identity and loop targeting.

use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_engine::{
    BinaryOp, CatchBlock, CompiledMachine, Compiler, Exception, Executor, Expr, FunctionTable,
    Interpreter, LabelTarget, LambdaExpr, MachineStatus, Resumable, TaskHandle, Value, Var,
};

// ============================================================================
// Helpers
// ============================================================================

/// Host functions sharing one side-effect log
struct Harness {
    log: Arc<Mutex<Vec<Value>>>,
    tasks: Arc<Mutex<Vec<TaskHandle>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `log(v)` appends to the log; `wait()` returns a fresh pending task
    fn functions(&self) -> Arc<FunctionTable> {
        let log = self.log.clone();
        let tasks = self.tasks.clone();
        Arc::new(
            FunctionTable::new()
                .with("log", move |args| {
                    log.lock().push(args.first().cloned().unwrap_or_default());
                    Ok(Value::Unit)
                })
                .with("wait", move |_| {
                    let task = TaskHandle::pending();
                    tasks.lock().push(task.clone());
                    Ok(Value::Task(task))
                }),
        )
    }

    fn log(&self) -> Vec<Value> {
        self.log.lock().clone()
    }

    /// Complete the oldest outstanding task
    fn complete_next(&self, value: Value) {
        let task = self.tasks.lock().remove(0);
        task.complete(value);
    }

    fn fail_next(&self, exception: stepwise_engine::ExceptionRef) {
        let task = self.tasks.lock().remove(0);
        task.fail(exception);
    }
}

fn log(value: impl Into<Value>) -> Expr {
    Expr::call("log", vec![Expr::constant(value)])
}

fn wait() -> Expr {
    Expr::await_task(Expr::call("wait", vec![]))
}

fn compile(lambda: &LambdaExpr, functions: Arc<FunctionTable>) -> CompiledMachine {
    Compiler::default()
        .compile(lambda)
        .unwrap()
        .instantiate(vec![], functions)
        .unwrap()
}

fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().map(|s| Value::from(*s)).collect()
}

// ============================================================================
// Single-entry resumption
// ============================================================================

mod single_entry {
    use super::*;

    fn lambda() -> LambdaExpr {
        LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![
                log("a"),
                Expr::await_value(Expr::constant(1i64)),
                log("b"),
                Expr::await_value(Expr::constant(2i64)),
                log("c"),
            ]),
        )
    }

    #[test]
    fn test_each_resume_id_lands_after_its_suspend_point() {
        let compiled = Compiler::default().compile(&lambda()).unwrap();
        let points = compiled.resume_points().to_vec();
        assert_eq!(points.len(), 2);

        let expected = [strs(&["b", "c"]), strs(&["c"])];
        for (point, expected) in points.iter().zip(expected) {
            let harness = Harness::new();
            let mut machine = compiled.instantiate(vec![], harness.functions()).unwrap();
            machine.set_state(*point);
            assert!(matches!(
                machine.resume().unwrap(),
                MachineStatus::Completed(_)
            ));
            assert_eq!(harness.log(), expected);
        }
    }

    #[test]
    fn test_suspended_machine_does_not_repeat_side_effects() {
        let harness = Harness::new();
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::seq(vec![log(1i64), wait(), log(2i64), wait(), log(3i64)]),
        );
        let mut machine = compile(&lambda, harness.functions());

        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        assert_eq!(harness.log(), vec![Value::from(1i64)]);
        harness.complete_next(Value::Unit);
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        assert_eq!(harness.log(), vec![Value::from(1i64), Value::from(2i64)]);
        harness.complete_next(Value::Unit);
        assert!(matches!(
            machine.resume().unwrap(),
            MachineStatus::Completed(_)
        ));
        assert_eq!(
            harness.log(),
            vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)]
        );
    }

    #[test]
    fn test_resume_inside_nested_try_regions() {
        // try { try { log(a); await wait(); log(b) } finally { log(f1) } } finally { log(f2) }
        let harness = Harness::new();
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::try_finally(
                Expr::try_finally(Expr::seq(vec![log("a"), wait(), log("b")]), log("f1")),
                log("f2"),
            ),
        );
        let mut machine = compile(&lambda, harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        assert_eq!(harness.log(), strs(&["a"]));

        harness.complete_next(Value::Unit);
        assert!(matches!(
            machine.resume().unwrap(),
            MachineStatus::Completed(_)
        ));
        assert_eq!(harness.log(), strs(&["a", "b", "f1", "f2"]));
    }
}

// ============================================================================
// Finally bodies
// ============================================================================

mod finally_once {
    use super::*;

    /// try { try { log(a); await wait(); throw Boom } finally { log(f) } } catch { log(c) }
    fn lambda() -> LambdaExpr {
        LambdaExpr::asynchronous(
            vec![],
            Expr::try_catch(
                Expr::try_finally(
                    Expr::seq(vec![
                        log("a"),
                        wait(),
                        Expr::throw(Expr::constant(Value::Exception(Exception::new(
                            "Boom", "x",
                        )))),
                    ]),
                    log("f"),
                ),
                vec![CatchBlock::kind("Boom", None, log("c"))],
            ),
        )
    }

    #[test]
    fn test_throw_after_resume_runs_finally_once() {
        let harness = Harness::new();
        let mut machine = compile(&lambda(), harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        harness.complete_next(Value::Unit);
        machine.resume().unwrap();
        assert_eq!(harness.log(), strs(&["a", "f", "c"]));
    }

    #[test]
    fn test_interpreter_runs_finally_once() {
        let harness = Harness::new();
        let interpreter = Interpreter::default();
        let prepared = interpreter.prepare(&lambda()).unwrap();
        let mut machine = interpreter
            .start(&prepared, vec![], harness.functions())
            .unwrap();
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        harness.complete_next(Value::Unit);
        machine.resume().unwrap();
        assert_eq!(harness.log(), strs(&["a", "f", "c"]));
    }

    #[test]
    fn test_faulted_await_runs_finally_and_propagates() {
        let harness = Harness::new();
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::try_finally(Expr::seq(vec![log("a"), wait(), log("b")]), log("f")),
        );
        let mut machine = compile(&lambda, harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        let fault = Exception::new("Io", "down");
        harness.fail_next(fault.clone());

        let err = machine.resume().unwrap_err();
        assert!(Arc::ptr_eq(err.exception().unwrap(), &fault));
        assert_eq!(harness.log(), strs(&["a", "f"]));
        assert!(machine.is_completed());
    }

    #[test]
    fn test_break_out_of_try_runs_finally_each_iteration() {
        // i = 0; loop { try { i = i + 1; if (i == 3) break; await wait() } finally { log(i) } }
        let harness = Harness::new();
        let i = Var::new(0, "i");
        let brk = LabelTarget::named(0, "break");
        let body = Expr::block(
            vec![i.clone()],
            vec![
                Expr::assign(&i, Expr::constant(0i64)),
                Expr::loop_with(
                    Expr::try_finally(
                        Expr::seq(vec![
                            Expr::assign(
                                &i,
                                Expr::binary(BinaryOp::Add, Expr::var(&i), Expr::constant(1i64)),
                            ),
                            Expr::if_then(
                                Expr::binary(BinaryOp::Equal, Expr::var(&i), Expr::constant(3i64)),
                                Expr::break_to(&brk),
                            ),
                            wait(),
                        ]),
                        Expr::call("log", vec![Expr::var(&i)]),
                    ),
                    Some(brk.clone()),
                    None,
                ),
                Expr::var(&i),
            ],
        );
        let functions = harness.functions();
        let lambda = LambdaExpr::asynchronous(vec![], body);
        let mut machine = compile(&lambda, functions);

        let mut status = machine.resume().unwrap();
        while status == MachineStatus::Suspended {
            harness.complete_next(Value::Unit);
            status = machine.resume().unwrap();
        }
        assert_eq!(status, MachineStatus::Completed(Value::from(3i64)));
        assert_eq!(
            harness.log(),
            vec![Value::from(1i64), Value::from(2i64), Value::from(3i64)]
        );
    }
}

// ============================================================================
// Rethrow identity
// ============================================================================

mod rethrow {
    use super::*;

    /// try { try { throw E } catch (e) { await wait(); <rethrow> } } catch (e2) { e2 }
    fn lambda(thrown: &stepwise_engine::ExceptionRef, rethrow: Expr) -> LambdaExpr {
        let e = Var::new(0, "e");
        let e2 = Var::new(1, "e2");
        LambdaExpr::asynchronous(
            vec![],
            Expr::try_catch(
                Expr::try_catch(
                    Expr::throw(Expr::constant(Value::Exception(thrown.clone()))),
                    vec![CatchBlock::any(Some(e), Expr::seq(vec![wait(), rethrow]))],
                ),
                vec![CatchBlock::any(Some(e2.clone()), Expr::var(&e2))],
            ),
        )
    }

    fn run(lambda: &LambdaExpr) -> Value {
        let harness = Harness::new();
        let mut machine = compile(lambda, harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        harness.complete_next(Value::Unit);
        match machine.resume().unwrap() {
            MachineStatus::Completed(value) => value,
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_bare_rethrow_across_suspend_keeps_identity() {
        let thrown = Exception::new("Boom", "first");
        let caught = run(&lambda(&thrown, Expr::rethrow()));
        assert!(Arc::ptr_eq(caught.as_exception().unwrap(), &thrown));
    }

    #[test]
    fn test_throw_variable_across_suspend_keeps_identity() {
        let thrown = Exception::new("Boom", "first");
        let e = Var::new(0, "e");
        let caught = run(&lambda(&thrown, Expr::throw(Expr::var(&e))));
        assert!(Arc::ptr_eq(caught.as_exception().unwrap(), &thrown));
    }
}

// ============================================================================
// Loop targeting
// ============================================================================

mod loops {
    use super::*;

    #[test]
    fn test_break_and_continue_inside_if_across_await() {
        // i = 0; sum = 0;
        // loop { i = i + 1; if (i == 5) break; if (i == 2) continue; sum = sum + await ready(i) }
        let i = Var::new(0, "i");
        let sum = Var::new(1, "sum");
        let brk = LabelTarget::named(0, "break");
        let cont = LabelTarget::named(1, "continue");
        let body = Expr::block(
            vec![i.clone(), sum.clone()],
            vec![
                Expr::assign(&i, Expr::constant(0i64)),
                Expr::assign(&sum, Expr::constant(0i64)),
                Expr::loop_with(
                    Expr::seq(vec![
                        Expr::assign(
                            &i,
                            Expr::binary(BinaryOp::Add, Expr::var(&i), Expr::constant(1i64)),
                        ),
                        Expr::if_then(
                            Expr::binary(BinaryOp::Equal, Expr::var(&i), Expr::constant(5i64)),
                            Expr::break_to(&brk),
                        ),
                        Expr::if_then(
                            Expr::binary(BinaryOp::Equal, Expr::var(&i), Expr::constant(2i64)),
                            Expr::continue_to(&cont),
                        ),
                        Expr::assign(
                            &sum,
                            Expr::binary(
                                BinaryOp::Add,
                                Expr::var(&sum),
                                Expr::await_task(Expr::call("ready", vec![Expr::var(&i)])),
                            ),
                        ),
                    ]),
                    Some(brk.clone()),
                    Some(cont.clone()),
                ),
                Expr::var(&sum),
            ],
        );
        let lambda = LambdaExpr::asynchronous(vec![], body);
        let functions = Arc::new(FunctionTable::new().with("ready", |args| {
            Ok(Value::Task(TaskHandle::ready(
                args.first().cloned().unwrap_or_default(),
            )))
        }));

        let executor = Executor::default();
        let mut machine = compile(&lambda, functions.clone());
        assert_eq!(executor.block_on(&mut machine).unwrap(), Value::from(8i64));

        let interpreter = Interpreter::default();
        let prepared = interpreter.prepare(&lambda).unwrap();
        let mut machine = interpreter.start(&prepared, vec![], functions).unwrap();
        assert_eq!(executor.block_on(&mut machine).unwrap(), Value::from(8i64));
    }

    #[test]
    fn test_cloned_machine_resumes_independently() {
        let harness = Harness::new();
        let n = Var::new(0, "n");
        let lambda = LambdaExpr::asynchronous(
            vec![],
            Expr::block(
                vec![n.clone()],
                vec![
                    Expr::assign(&n, Expr::constant(1i64)),
                    Expr::assign(
                        &n,
                        Expr::binary(BinaryOp::Add, Expr::var(&n), wait()),
                    ),
                    Expr::var(&n),
                ],
            ),
        );
        let mut machine = compile(&lambda, harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        let mut copy = machine.clone();

        harness.complete_next(Value::from(10i64));
        assert_eq!(
            machine.resume().unwrap(),
            MachineStatus::Completed(Value::from(11i64))
        );
        assert_eq!(
            copy.resume().unwrap(),
            MachineStatus::Completed(Value::from(11i64))
        );
    }

    /// `f` increments `x` through its captured scope; each copy must see its own `x`
    fn closure_counter() -> LambdaExpr {
        let x = Var::new(0, "x");
        let f = Var::new(1, "f");
        let increment = LambdaExpr::sync(
            vec![],
            Expr::seq(vec![
                Expr::assign(
                    &x,
                    Expr::binary(BinaryOp::Add, Expr::var(&x), Expr::constant(1i64)),
                ),
                Expr::var(&x),
            ]),
        );
        LambdaExpr::asynchronous(
            vec![],
            Expr::block(
                vec![x.clone(), f.clone()],
                vec![
                    Expr::assign(&x, Expr::constant(0i64)),
                    Expr::assign(&f, Expr::lambda(increment)),
                    wait(),
                    Expr::binary(
                        BinaryOp::Add,
                        Expr::binary(
                            BinaryOp::Multiply,
                            Expr::invoke(Expr::var(&f), vec![]),
                            Expr::constant(100i64),
                        ),
                        Expr::var(&x),
                    ),
                ],
            ),
        )
    }

    #[test]
    fn test_cloned_machine_rebinds_captured_scopes() {
        let harness = Harness::new();
        let mut machine = compile(&closure_counter(), harness.functions());
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        let mut copy = machine.clone();

        harness.complete_next(Value::Unit);
        assert_eq!(
            machine.resume().unwrap(),
            MachineStatus::Completed(Value::from(101i64))
        );
        assert_eq!(
            copy.resume().unwrap(),
            MachineStatus::Completed(Value::from(101i64))
        );
    }

    #[test]
    fn test_cloned_interpreted_machine_rebinds_captured_scopes() {
        let harness = Harness::new();
        let interpreter = Interpreter::default();
        let prepared = interpreter.prepare(&closure_counter()).unwrap();
        let mut machine = interpreter
            .start(&prepared, vec![], harness.functions())
            .unwrap();
        assert_eq!(machine.resume().unwrap(), MachineStatus::Suspended);
        let mut copy = machine.clone();

        harness.complete_next(Value::Unit);
        assert_eq!(
            machine.resume().unwrap(),
            MachineStatus::Completed(Value::from(101i64))
        );
        assert_eq!(
            copy.resume().unwrap(),
            MachineStatus::Completed(Value::from(101i64))
        );
    }
}
