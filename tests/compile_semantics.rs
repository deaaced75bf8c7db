use hostlisp::error::{CompileError, Error, RuntimeError};
use hostlisp::{Session, SessionOptions, Value};

fn on_big_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    on_stack(64, f)
}

fn on_stack<T: Send + 'static>(megabytes: usize, f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(megabytes * 1024 * 1024)
        .spawn(f)
        .expect("spawn test thread")
        .join()
        .expect("test thread panicked")
}

/// Evaluate each input in one session; the printed primary value of each,
/// or its error.
fn run(inputs: Vec<&'static str>) -> Vec<Result<String, Error>> {
    on_big_stack(move || {
        let mut session = Session::new().expect("session with prelude");
        inputs
            .iter()
            .map(|input| {
                let values = session.eval_string(input)?;
                let first = values.into_iter().next().unwrap_or(Value::Nil);
                Ok(session.print(&first))
            })
            .collect()
    })
}

fn eval(input: &'static str) -> String {
    match run(vec![input]).pop() {
        Some(Ok(printed)) => printed,
        other => panic!("{} failed: {:?}", input, other),
    }
}

fn eval_err(input: &'static str) -> Error {
    match run(vec![input]).pop() {
        Some(Err(e)) => e,
        other => panic!("{} should fail, got {:?}", input, other),
    }
}

// ============================================================================
// Scoping
// ============================================================================

#[test]
fn let_shadows_only_the_variable_namespace() {
    assert_eq!(
        eval("(flet ((x () 'fun)) (let ((x 1)) (let ((x 2)) (list x (x)))))"),
        "(2 FUN)"
    );
}

#[test]
fn let_star_sees_earlier_bindings() {
    assert_eq!(eval("(let* ((a 1) (b (+ a 1))) (list a b))"), "(1 2)");
    assert_eq!(eval("(let ((a 5)) (let ((a 1) (b a)) (list a b)))"), "(1 5)");
}

#[test]
fn closures_capture_bindings() {
    let results = run(vec![
        "(let ((n 0)) (defun bump () (setq n (+ n 1))))",
        "(bump)",
        "(bump)",
    ]);
    assert_eq!(results[2].as_ref().unwrap(), "2");
}

#[test]
fn labels_allows_recursion() {
    assert_eq!(
        eval("(labels ((fact (n) (if (= n 0) 1 (* n (fact (- n 1)))))) (fact 5))"),
        "120"
    );
}

#[test]
fn flet_shadows_inline_primitive() {
    assert_eq!(eval("(flet ((car (x) (list 'mine x))) (car 1))"), "(MINE 1)");
}

// ============================================================================
// Control transfer
// ============================================================================

#[test]
fn return_from_skips_the_rest_of_the_block() {
    let results = run(vec![
        "(defvar *hits* 0)",
        "(block a (return-from a 42) (setq *hits* 1))",
        "*hits*",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "42");
    assert_eq!(results[2].as_ref().unwrap(), "0");
}

#[test]
fn unwind_protect_cleanup_runs_once_per_exit() {
    let results = run(vec![
        "(defvar *cleanups* 0)",
        "(block out (unwind-protect (return-from out 1) (incf *cleanups*)))",
        "*cleanups*",
        "(unwind-protect 2 (incf *cleanups*))",
        "*cleanups*",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "1");
    assert_eq!(results[2].as_ref().unwrap(), "1");
    assert_eq!(results[3].as_ref().unwrap(), "2");
    assert_eq!(results[4].as_ref().unwrap(), "2");
}

#[test]
fn tagbody_counting_loop() {
    assert_eq!(
        eval(
            "(let ((i 0) (count 0))
               (tagbody
                start
                  (when (< i 5)
                    (setq i (+ i 1))
                    (setq count (+ count 1))
                    (go start)))
               count)"
        ),
        "5"
    );
}

#[test]
fn tagbody_with_implicit_first_label() {
    assert_eq!(
        eval(
            "(let ((trace nil))
               (tagbody
                  (setq trace (cons 'a trace))
                  (go skip)
                  (setq trace (cons 'never trace))
                skip
                  (setq trace (cons 'b trace)))
               trace)"
        ),
        "(B A)"
    );
}

#[test]
fn go_from_inside_a_closure() {
    assert_eq!(
        eval(
            "(let ((i 0))
               (tagbody
                top
                  (funcall (lambda () (when (< i 3) (setq i (+ i 1)) (go top)))))
               i)"
        ),
        "3"
    );
}

#[test]
fn catch_and_throw_match_by_runtime_tag() {
    assert_eq!(eval("(catch 'outer (catch 'inner (throw 'outer 1)) 2)"), "1");
    assert_eq!(eval("(let ((tag (list 'k))) (catch tag (throw tag 7)))"), "7");
}

#[test]
fn special_binding_is_restored_after_throw() {
    let results = run(vec![
        "(defvar *depth* 0)",
        "(catch 'done (let ((*depth* 1)) (throw 'done *depth*)))",
        "*depth*",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "1");
    assert_eq!(results[2].as_ref().unwrap(), "0");
}

#[test]
fn special_binding_is_seen_by_called_functions() {
    let results = run(vec![
        "(defvar *level* 0)",
        "(defun level () *level*)",
        "(let ((*level* 3)) (level))",
        "(level)",
    ]);
    assert_eq!(results[2].as_ref().unwrap(), "3");
    assert_eq!(results[3].as_ref().unwrap(), "0");
}

#[test]
fn escaped_return_from_is_an_unmatched_transfer() {
    let e = eval_err("(funcall (block b (function (lambda () (return-from b 1)))))");
    assert!(matches!(e, Error::Runtime(RuntimeError::UnmatchedTransfer { .. })));
}

#[test]
fn prelude_loops() {
    assert_eq!(eval("(let ((c 0)) (dotimes (i 4) (incf c)) c)"), "4");
    assert_eq!(eval("(dolist (x '(1 2 3)) (when (= x 2) (return x)))"), "2");
}

// ============================================================================
// Backquote
// ============================================================================

#[test]
fn backquote_splices() {
    assert_eq!(eval("`(1 ,(+ 1 1) ,@(list 3 4))"), "(1 2 3 4)");
    assert_eq!(eval("(let ((x 5)) `(a . ,x))"), "(A . 5)");
}

#[test]
fn nested_backquote_consumes_one_level() {
    assert_eq!(
        eval("(let ((x 1)) `(a `(b ,(c ,x))))"),
        "(A (BACKQUOTE (B (UNQUOTE (C 1)))))"
    );
}

// ============================================================================
// Multiple values
// ============================================================================

#[test]
fn multiple_value_bind() {
    assert_eq!(eval("(multiple-value-bind (a b) (values 1 2) (+ a b))"), "3");
    assert_eq!(eval("(multiple-value-bind (a b c) (values 1 2) (list a b c))"), "(1 2 NIL)");
}

#[test]
fn plain_argument_sees_primary_value() {
    assert_eq!(eval("(list (values 1 2))"), "(1)");
    assert_eq!(eval("(multiple-value-list (values))"), "NIL");
}

#[test]
fn values_cross_function_and_block_boundaries() {
    let results = run(vec![
        "(defun two () (values 1 2))",
        "(multiple-value-list (two))",
        "(multiple-value-list (block b (return-from b (values 3 4)) 5))",
        "(multiple-value-list (catch 'k (throw 'k (values 5 6))))",
        "(multiple-value-list (multiple-value-prog1 (two) 9))",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "(1 2)");
    assert_eq!(results[2].as_ref().unwrap(), "(3 4)");
    assert_eq!(results[3].as_ref().unwrap(), "(5 6)");
    assert_eq!(results[4].as_ref().unwrap(), "(1 2)");
}

#[test]
fn eval_returns_every_value() {
    let count = on_big_stack(|| {
        let mut session = Session::new().unwrap();
        session.eval_string("(values 1 2 3)").unwrap().len()
    });
    assert_eq!(count, 3);
}

// ============================================================================
// Lambda lists
// ============================================================================

#[test]
fn optional_defaults_see_earlier_parameters() {
    let results = run(vec![
        "(defun o (a &optional (b (+ a 1)) c) (list a b c))",
        "(o 1)",
        "(o 1 5 6)",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "(1 2 NIL)");
    assert_eq!(results[2].as_ref().unwrap(), "(1 5 6)");
}

#[test]
fn rest_collects_in_order() {
    let results = run(vec!["(defun r (a &rest xs) xs)", "(r 1 2 3)", "(r 1)"]);
    assert_eq!(results[1].as_ref().unwrap(), "(2 3)");
    assert_eq!(results[2].as_ref().unwrap(), "NIL");
}

#[test]
fn keyword_defaults_and_supplied_flags() {
    let results = run(vec![
        "(defun h (&key (a 10 a-p) ((:bee b) 20)) (list a a-p b))",
        "(h)",
        "(h :a 1 :bee 2)",
        "(h :a 1 :a 2)",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "(10 NIL 20)");
    assert_eq!(results[2].as_ref().unwrap(), "(1 T 2)");
    assert_eq!(results[3].as_ref().unwrap(), "(1 T 20)");
}

#[test]
fn unknown_keyword_is_an_error() {
    let results = run(vec![
        "(defun f (&key a) a)",
        "(f :b 1)",
        "(f :a)",
        "(defun g (&key a &allow-other-keys) a)",
        "(g :b 1 :a 2)",
    ]);
    assert!(matches!(results[1], Err(Error::Runtime(RuntimeError::UnknownKeyword(_)))));
    assert!(matches!(results[2], Err(Error::Runtime(RuntimeError::OddKeywords))));
    assert_eq!(results[4].as_ref().unwrap(), "2");
}

#[test]
fn caller_can_allow_other_keys() {
    let results = run(vec![
        "(defun k (&key a) a)",
        "(k :b 1 :allow-other-keys t :a 3)",
        "((lambda (&key a) a) :b 1 :allow-other-keys t)",
        "(k :allow-other-keys nil :b 1)",
        "(k :allow-other-keys nil :a 4)",
        "(k :allow-other-keys t :allow-other-keys nil :c 2)",
        "(k :allow-other-keys nil :allow-other-keys t :c 2)",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "3");
    assert_eq!(results[2].as_ref().unwrap(), "NIL");
    assert!(matches!(results[3], Err(Error::Runtime(RuntimeError::UnknownKeyword(_)))));
    assert_eq!(results[4].as_ref().unwrap(), "4");
    assert_eq!(results[5].as_ref().unwrap(), "NIL");
    assert!(matches!(results[6], Err(Error::Runtime(RuntimeError::UnknownKeyword(_)))));
}

#[test]
fn arity_is_checked() {
    let results = run(vec!["(defun two-args (a b) a)", "(two-args 1)", "(two-args 1 2 3)"]);
    assert!(matches!(results[1], Err(Error::Runtime(RuntimeError::Arity { .. }))));
    assert!(matches!(results[2], Err(Error::Runtime(RuntimeError::Arity { .. }))));
}

#[test]
fn docstrings_are_attached() {
    let results = run(vec![
        "(defun documented () \"Says hi.\" 'hi)",
        "(documentation 'documented 'function)",
        "(documented)",
    ]);
    assert_eq!(results[1].as_ref().unwrap(), "\"Says hi.\"");
    assert_eq!(results[2].as_ref().unwrap(), "HI");
}

// ============================================================================
// Definitions and errors
// ============================================================================

#[test]
fn defconstant_inlines_and_rejects_assignment() {
    let results = run(vec!["(defconstant +k+ 7)", "(+ +k+ 1)", "(setq +k+ 1)"]);
    assert_eq!(results[1].as_ref().unwrap(), "8");
    assert!(matches!(results[2], Err(Error::Compile(CompileError::ConstantAssignment(_)))));
}

#[test]
fn undefined_names_fail_at_run_time() {
    assert!(matches!(
        eval_err("some-unbound-variable"),
        Error::Runtime(RuntimeError::UnboundVariable(_))
    ));
    assert!(matches!(
        eval_err("(no-such-function 1)"),
        Error::Runtime(RuntimeError::UndefinedFunction(_))
    ));
}

#[test]
fn compile_failure_leaves_session_usable() {
    let results = run(vec!["(progn (defvar *before* 1) (go nowhere))", "(+ 1 2)"]);
    assert!(matches!(results[0], Err(Error::Compile(CompileError::UnknownTag(_)))));
    assert_eq!(results[1].as_ref().unwrap(), "3");
}

#[test]
fn macro_defined_and_used_in_one_progn() {
    assert_eq!(eval("(progn (defmacro sq (x) `(* ,x ,x)) (sq 7))"), "49");
}

#[test]
fn macroexpand_through_the_session() {
    let printed = on_big_stack(|| {
        let mut session = Session::new().unwrap();
        let form = session.read("(when a b)").unwrap().unwrap();
        let (once, expanded) = session.macroexpand_1(&form).unwrap();
        (session.print(&once), expanded)
    });
    assert_eq!(printed.0, "(IF A (PROGN B) NIL)");
    assert!(printed.1);
}

#[test]
fn compile_to_string_is_host_source() {
    let text = on_big_stack(|| {
        let mut session = Session::new().unwrap();
        session.compile_string("(block a (return-from a 1))").unwrap()
    });
    assert!(text.starts_with("(function(values) {"));
    assert!(text.contains("catch (cf)"));
    assert!(text.contains("internals.transfer(\"block\""));
}

// ============================================================================
// Call depth
// ============================================================================

#[test]
fn deep_recursion_through_binding_forms() {
    let results = on_stack(512, || {
        let mut session = Session::new().unwrap();
        [
            "(defun g (n) (block b (let ((x n)) (if (= x 0) 0 (+ 1 (g (- x 1)))))))",
            "(g 1000)",
            "(labels ((f (n) (let ((m n)) (if (= m 0) 'done (f (- m 1)))))) (f 1000))",
        ]
        .iter()
        .map(|input| {
            let values = session.eval_string(input)?;
            Ok(session.print(&values[0]))
        })
        .collect::<Vec<Result<String, Error>>>()
    });
    assert_eq!(results[1].as_ref().unwrap(), "1000");
    assert_eq!(results[2].as_ref().unwrap(), "DONE");
}

#[test]
fn call_depth_limit_counts_lisp_calls() {
    let results = on_big_stack(|| {
        let mut session = Session::with_options(SessionOptions {
            max_call_depth: 60,
            ..SessionOptions::default()
        })
        .unwrap();
        [
            "(defun g (n) (block b (let ((x n)) (if (= x 0) 0 (+ 1 (g (- x 1)))))))",
            "(g 50)",
            "(g 100)",
        ]
        .iter()
        .map(|input| {
            let values = session.eval_string(input)?;
            Ok(session.print(&values[0]))
        })
        .collect::<Vec<Result<String, Error>>>()
    });
    assert_eq!(results[1].as_ref().unwrap(), "50");
    assert!(matches!(results[2], Err(Error::Runtime(RuntimeError::StackExhausted(_)))));
}
