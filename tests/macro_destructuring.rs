use hostlisp::error::{CompileError, Error};
use hostlisp::{Session, Value};

fn new_session() -> Session {
    Session::new().expect("session with prelude")
}

/// Run on a thread with room for the recursive compiler and host.
fn on_big_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(f)
        .expect("spawn test thread")
        .join()
        .expect("test thread panicked")
}

fn eval_print(input: &'static str) -> Result<String, Error> {
    on_big_stack(move || {
        let mut session = new_session();
        let values = session.eval_string(input)?;
        let first = values.into_iter().next().unwrap_or(Value::Nil);
        Ok(session.print(&first))
    })
}

#[test]
fn macro_destructuring_nested_optional_key() {
    let program = "(progn\
        (defmacro m ((a &optional b &key (c 9)) &optional (d 5))\
          (list 'list a b c d))\
        (m (1 2 :c 3) 4))";
    assert_eq!(eval_print(program).expect("macro eval failed"), "(1 2 3 4)");
}

#[test]
fn macro_destructuring_defaults() {
    let program = "(progn\
        (defmacro m ((a &optional b &key (c 9)) &optional (d 5))\
          (list 'list a b c d))\
        (m (1)))";
    assert_eq!(eval_print(program).expect("macro eval failed"), "(1 NIL 9 5)");
}

#[test]
fn macro_destructuring_unknown_keyword_rejected() {
    let program = "(progn\
        (defmacro m ((a &key b))\
          (list 'list a b))\
        (m (1 :x 2)))";
    let result = eval_print(program);
    assert!(matches!(result, Err(Error::Compile(CompileError::MacroExpansion { .. }))));
}

#[test]
fn macro_whole_and_dotted_rest() {
    let program = "(progn\
        (defmacro w (&whole form a . more)\
          (list 'quote (list (car form) a more)))\
        (w 1 2 3))";
    assert_eq!(eval_print(program).unwrap(), "(W 1 (2 3))");
}

#[test]
fn macro_nested_sublists() {
    let program = "(progn\
        (defmacro pairs (((a b) (c d)))\
          (list 'list a b c d))\
        (pairs ((1 2) (3 4))))";
    assert_eq!(eval_print(program).unwrap(), "(1 2 3 4)");
}

#[test]
fn macro_body_is_a_block_named_after_the_macro() {
    let program = "(progn\
        (defmacro early (x)\
          (return-from early (list 'quote x))\
          99)\
        (early hello))";
    assert_eq!(eval_print(program).unwrap(), "HELLO");
}

#[test]
fn macrolet_is_local() {
    let result = on_big_stack(|| {
        let mut session = new_session();
        let inside = session
            .eval_string("(macrolet ((twice (x) (list '* 2 x))) (twice 21))")
            .map(|v| session.print(&v[0]));
        let outside = session.eval_string("(twice 21)");
        (inside, outside.is_err())
    });
    assert_eq!(result.0.unwrap(), "42");
    assert!(result.1);
}

#[test]
fn prelude_dolist_destructures_its_spec() {
    let program = "(let ((sum 0)) (dolist (x '(1 2 3) sum) (setq sum (+ sum x))))";
    assert_eq!(eval_print(program).unwrap(), "6");
}
