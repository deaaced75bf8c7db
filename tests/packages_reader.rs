use hostlisp::error::{Error, PackageError, ReaderError};
use hostlisp::symbol::{PackageId, SymbolTable, Visibility};
use hostlisp::{Session, SessionOptions, Value};

fn bare_session() -> Session {
    Session::with_options(SessionOptions {
        prelude: false,
        ..SessionOptions::default()
    })
    .expect("bare session")
}

fn reprint(session: &mut Session, text: &str) -> String {
    let value = session.read(text).expect("read failed").expect("no datum");
    session.print(&value)
}

#[test]
fn printed_forms_read_back_the_same() {
    let mut session = bare_session();
    for text in [
        "42",
        "-7",
        "1.5",
        "\"a\\\"b\\\\c\"",
        "FOO",
        "(A B . C)",
        "(1 (2 (3)) NIL)",
        "#(1 \"x\" #\\a)",
        "#\\Space",
        ":KEY",
        "|lower case|",
        "CL-USER::PRIVATE",
    ] {
        let printed = reprint(&mut session, text);
        assert_eq!(reprint(&mut session, &printed), printed, "{}", text);
    }
}

#[test]
fn reader_normalizes_case_and_quote() {
    let mut session = bare_session();
    assert_eq!(reprint(&mut session, "foo"), "FOO");
    assert_eq!(reprint(&mut session, "'x"), "(QUOTE X)");
    assert_eq!(reprint(&mut session, "#'car"), "(FUNCTION CAR)");
    assert_eq!(
        reprint(&mut session, "`(a ,b ,@c)"),
        "(BACKQUOTE (A (UNQUOTE B) (UNQUOTE-SPLICING C)))"
    );
    assert_eq!(reprint(&mut session, "()"), "NIL");
}

#[test]
fn package_prefixes_resolve_to_the_same_symbol() {
    let mut session = bare_session();
    let qualified = session.read("cl:car").unwrap().unwrap();
    let plain = session.read("car").unwrap().unwrap();
    assert!(qualified.eql(&plain));
    assert_eq!(session.print(&qualified), "CAR");
}

#[test]
fn uninterned_symbols_are_distinct() {
    let mut session = bare_session();
    let a = session.read("#:g").unwrap().unwrap();
    let b = session.read("#:g").unwrap().unwrap();
    assert!(!a.eql(&b));
    assert_eq!(session.print(&a), "#:G");
}

#[test]
fn feature_expressions() {
    let mut session = bare_session();
    let forms = session
        .read_all("#+hostlisp 1 #-hostlisp 2 #+(or nope common-lisp) 3 #+nope 4")
        .unwrap();
    let printed: Vec<String> = forms.iter().map(|f| session.print(f)).collect();
    assert_eq!(printed, vec!["1", "3"]);
}

#[test]
fn reader_errors() {
    let mut session = bare_session();
    assert!(matches!(session.read("(1 2"), Err(Error::Reader(ReaderError::UnbalancedParen))));
    assert!(matches!(session.read("\"open"), Err(Error::Reader(ReaderError::UnterminatedString))));
    assert!(matches!(
        session.read("nope:thing"),
        Err(Error::Reader(ReaderError::Package(PackageError::NoSuchPackage(_))))
    ));
}

#[test]
fn session_recovers_after_reader_error() {
    let mut session = bare_session();
    assert!(session.eval_string("(car '(1 2)").is_err());
    let values = session.eval_string("(car '(1 2))").unwrap();
    assert!(matches!(values[0], Value::Number(n) if n == 1.0));
}

// ============================================================================
// Packages
// ============================================================================

#[test]
fn intern_is_idempotent() {
    let mut symbols = SymbolTable::new();
    let a = symbols.intern("WIDGET", PackageId::COMMON_LISP_USER);
    let b = symbols.intern("WIDGET", PackageId::COMMON_LISP_USER);
    assert_eq!(a, b);
    assert!(matches!(
        symbols.find_symbol("WIDGET", PackageId::COMMON_LISP_USER),
        Some((id, Visibility::Internal)) if id == a
    ));
}

#[test]
fn exported_symbols_are_inherited_by_users() {
    let mut symbols = SymbolTable::new();
    let tools = symbols.make_package("TOOLS", &["T1"], &[]).unwrap();
    let app = symbols.make_package("APP", &[], &[tools]).unwrap();

    let hammer = symbols.intern("HAMMER", tools);
    assert!(symbols.find_symbol("HAMMER", app).is_none());

    symbols.export(hammer, tools).unwrap();
    assert!(matches!(
        symbols.find_symbol("HAMMER", app),
        Some((id, Visibility::Inherited)) if id == hammer
    ));
    assert_eq!(symbols.intern("HAMMER", app), hammer);
    assert_eq!(symbols.find_package("T1"), Some(tools));
}

#[test]
fn duplicate_package_names_are_rejected() {
    let mut symbols = SymbolTable::new();
    symbols.make_package("ONE", &["UNO"], &[]).unwrap();
    assert!(matches!(
        symbols.make_package("UNO", &[], &[]),
        Err(PackageError::PackageExists(_))
    ));
}

#[test]
fn keywords_evaluate_to_themselves() {
    let mut symbols = SymbolTable::new();
    let key = symbols.intern_keyword("TEST");
    assert!(symbols.is_keyword(key));
    assert!(matches!(&symbols.symbol(key).value, Some(Value::Symbol(id)) if *id == key));
}
