// HostLisp Primitives - Built-in Functions
//
// Each primitive has a host routine (`internals.<js>`) and an inline code
// template used at direct call sites. Inline expansion falls back to an
// ordinary call when the argument count does not fit.

use crate::host::{Eval, Exception, Machine, NativeFn, RuntimeError};
use crate::internals::coerce_function;
use crate::js::{BinOp, Expr, UnaryOp};
use crate::printer::princ_to_string;
use crate::symbol::{PackageId, SymbolId};
use crate::types::{FunctionKind, Value};

#[derive(Debug, Clone, Copy)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }

    fn describe(&self) -> String {
        match self.max {
            Some(max) if max == self.min => max.to_string(),
            Some(max) => format!("{} to {}", self.min, max),
            None => format!("at least {}", self.min),
        }
    }
}

const fn exactly(n: usize) -> Arity {
    Arity { min: n, max: Some(n) }
}

const fn at_least(n: usize) -> Arity {
    Arity { min: n, max: None }
}

const fn between(min: usize, max: usize) -> Arity {
    Arity { min, max: Some(max) }
}

/// Inline template: arguments (already compiled) and the acceptor of the
/// call site.
pub type Template = fn(Vec<Expr>, Expr) -> Expr;

pub enum Inline {
    /// `internals.<js>(args)`
    Call,
    /// Left fold of a host arithmetic operator
    Arith(BinOp),
    /// Two-argument host comparison yielding T or NIL
    Compare(BinOp),
    Custom(Template),
}

pub struct Primitive {
    /// Lisp name, interned in COMMON-LISP
    pub name: &'static str,
    /// Name of the host routine under `internals`
    pub js: &'static str,
    pub arity: Arity,
    /// Receives the call site's acceptor as its first argument
    pub takes_acceptor: bool,
    pub inline: Inline,
    pub native: NativeFn,
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<PRIMITIVE {}>", self.name)
    }
}

macro_rules! prim {
    ($name:expr, $js:expr, $arity:expr, $inline:expr, $native:expr) => {
        Primitive {
            name: $name,
            js: $js,
            arity: $arity,
            takes_acceptor: false,
            inline: $inline,
            native: $native,
        }
    };
    ($name:expr, $js:expr, $arity:expr, $inline:expr, $native:expr, acceptor) => {
        Primitive {
            name: $name,
            js: $js,
            arity: $arity,
            takes_acceptor: true,
            inline: $inline,
            native: $native,
        }
    };
}

pub static PRIMITIVES: &[Primitive] = &[
    // Arithmetic
    prim!("+", "add", at_least(0), Inline::Arith(BinOp::Add), prim_add),
    prim!("-", "sub", at_least(1), Inline::Arith(BinOp::Sub), prim_sub),
    prim!("*", "mul", at_least(0), Inline::Arith(BinOp::Mul), prim_mul),
    prim!("/", "div", at_least(1), Inline::Call, prim_div),
    prim!("1+", "inc", exactly(1), Inline::Custom(inline_inc), prim_inc),
    prim!("1-", "dec", exactly(1), Inline::Custom(inline_dec), prim_dec),
    prim!("MOD", "mod", exactly(2), Inline::Call, prim_mod),
    prim!("=", "numEq", at_least(1), Inline::Compare(BinOp::StrictEq), prim_num_eq),
    prim!("<", "lt", at_least(1), Inline::Compare(BinOp::Lt), prim_lt),
    prim!(">", "gt", at_least(1), Inline::Compare(BinOp::Gt), prim_gt),
    prim!("<=", "le", at_least(1), Inline::Compare(BinOp::Le), prim_le),
    prim!(">=", "ge", at_least(1), Inline::Compare(BinOp::Ge), prim_ge),
    // Conses and lists
    prim!("CONS", "cons", exactly(2), Inline::Call, prim_cons),
    prim!("CAR", "car", exactly(1), Inline::Call, prim_car),
    prim!("CDR", "cdr", exactly(1), Inline::Call, prim_cdr),
    prim!("RPLACA", "rplaca", exactly(2), Inline::Call, prim_rplaca),
    prim!("RPLACD", "rplacd", exactly(2), Inline::Call, prim_rplacd),
    prim!("LIST", "list", at_least(0), Inline::Call, prim_list),
    prim!("LIST*", "listStar", at_least(1), Inline::Call, prim_list_star),
    prim!("APPEND", "append", at_least(0), Inline::Call, prim_append),
    prim!("LENGTH", "length", exactly(1), Inline::Call, prim_length),
    prim!("REVERSE", "reverse", exactly(1), Inline::Call, prim_reverse),
    prim!("NTH", "nth", exactly(2), Inline::Call, prim_nth),
    // Predicates
    prim!("EQ", "eq", exactly(2), Inline::Compare(BinOp::StrictEq), prim_eq),
    prim!("EQL", "eql", exactly(2), Inline::Call, prim_eql),
    prim!("EQUAL", "equal", exactly(2), Inline::Call, prim_equal),
    prim!("NULL", "isNull", exactly(1), Inline::Custom(inline_null), prim_null),
    prim!("NOT", "not", exactly(1), Inline::Custom(inline_null), prim_null),
    prim!("CONSP", "consp", exactly(1), Inline::Call, prim_consp),
    prim!("ATOM", "atom", exactly(1), Inline::Call, prim_atom),
    prim!("LISTP", "listp", exactly(1), Inline::Call, prim_listp),
    prim!("SYMBOLP", "symbolp", exactly(1), Inline::Call, prim_symbolp),
    prim!("KEYWORDP", "keywordp", exactly(1), Inline::Call, prim_keywordp),
    prim!("NUMBERP", "numberp", exactly(1), Inline::Call, prim_numberp),
    prim!("STRINGP", "stringp", exactly(1), Inline::Call, prim_stringp),
    prim!("CHARACTERP", "characterp", exactly(1), Inline::Call, prim_characterp),
    prim!("FUNCTIONP", "functionp", exactly(1), Inline::Call, prim_functionp),
    prim!("VECTORP", "vectorp", exactly(1), Inline::Call, prim_vectorp),
    // Symbols
    prim!("SYMBOL-VALUE", "symbolValue", exactly(1), Inline::Call, prim_symbol_value),
    prim!("SYMBOL-FUNCTION", "symbolFunction", exactly(1), Inline::Call, prim_symbol_function),
    prim!("SET", "set", exactly(2), Inline::Call, prim_set),
    prim!("FSET", "fset", exactly(2), Inline::Call, prim_fset),
    prim!("BOUNDP", "boundp", exactly(1), Inline::Call, prim_boundp),
    prim!("FBOUNDP", "fboundp", exactly(1), Inline::Call, prim_fboundp),
    prim!("SYMBOL-NAME", "symbolName", exactly(1), Inline::Call, prim_symbol_name),
    prim!("SYMBOL-PLIST", "symbolPlist", exactly(1), Inline::Call, prim_symbol_plist),
    prim!("GET", "get", between(2, 3), Inline::Call, prim_get),
    prim!("INTERN", "intern", between(1, 2), Inline::Call, prim_intern),
    prim!("MAKE-SYMBOL", "makeSymbol", exactly(1), Inline::Call, prim_make_symbol),
    prim!("GENSYM", "gensym", between(0, 1), Inline::Call, prim_gensym),
    // Functions and values
    prim!("FUNCALL", "funcall", at_least(1), Inline::Call, prim_funcall, acceptor),
    prim!("APPLY", "applyList", at_least(2), Inline::Call, prim_apply, acceptor),
    prim!("VALUES", "values", at_least(0), Inline::Custom(inline_values), prim_values, acceptor),
    prim!("VALUES-LIST", "valuesList", exactly(1), Inline::Call, prim_values_list, acceptor),
    prim!("DOCUMENTATION", "documentation", exactly(2), Inline::Call, prim_documentation),
    // Vectors
    prim!("VECTOR", "vector", at_least(0), Inline::Call, prim_vector),
    prim!("AREF", "aref", exactly(2), Inline::Call, prim_aref),
    // Conditions
    prim!("ERROR", "error", at_least(1), Inline::Call, prim_error),
];

pub fn find(name: &str) -> Option<&'static Primitive> {
    PRIMITIVES.iter().find(|p| p.name == name)
}

/// Inline code for a direct call, or None when the argument count does not
/// fit the template (the call site then compiles an ordinary call).
pub fn inline(prim: &Primitive, args: Vec<Expr>, acceptor: Expr) -> Option<Expr> {
    if !prim.arity.accepts(args.len()) {
        return None;
    }
    match &prim.inline {
        Inline::Call => {
            let mut actuals = Vec::with_capacity(args.len() + 1);
            if prim.takes_acceptor {
                actuals.push(acceptor);
            }
            actuals.extend(args);
            Some(Expr::internal_call(prim.js, actuals))
        }
        Inline::Arith(op) => inline_arith(*op, args),
        Inline::Compare(op) => {
            if args.len() != 2 {
                return Some(Expr::internal_call(prim.js, args));
            }
            let mut args = args.into_iter();
            let (a, b) = (args.next()?, args.next()?);
            Some(Expr::cond(Expr::binary(*op, a, b), Expr::t(), Expr::nil()))
        }
        Inline::Custom(template) => Some(template(args, acceptor)),
    }
}

fn inline_arith(op: BinOp, args: Vec<Expr>) -> Option<Expr> {
    let mut args = args.into_iter();
    let first = match args.next() {
        Some(first) => first,
        None => return Some(Expr::Number(if op == BinOp::Mul { 1.0 } else { 0.0 })),
    };
    let rest: Vec<Expr> = args.collect();
    if rest.is_empty() {
        return Some(match op {
            BinOp::Sub => Expr::Unary(UnaryOp::Neg, Box::new(first)),
            // A lone argument still goes through the operator's number check.
            _ => Expr::binary(op, Expr::Number(if op == BinOp::Mul { 1.0 } else { 0.0 }), first),
        });
    }
    Some(rest.into_iter().fold(first, |acc, arg| Expr::binary(op, acc, arg)))
}

fn inline_inc(mut args: Vec<Expr>, _: Expr) -> Expr {
    let x = args.pop().unwrap_or(Expr::Undefined);
    Expr::binary(BinOp::Add, x, Expr::Number(1.0))
}

fn inline_dec(mut args: Vec<Expr>, _: Expr) -> Expr {
    let x = args.pop().unwrap_or(Expr::Undefined);
    Expr::binary(BinOp::Sub, x, Expr::Number(1.0))
}

fn inline_null(mut args: Vec<Expr>, _: Expr) -> Expr {
    let x = args.pop().unwrap_or(Expr::Undefined);
    Expr::cond(
        Expr::binary(BinOp::StrictEq, x, Expr::nil()),
        Expr::t(),
        Expr::nil(),
    )
}

/// `(values a b)` calls the acceptor directly.
fn inline_values(args: Vec<Expr>, acceptor: Expr) -> Expr {
    Expr::call(acceptor, args)
}

/// Call a primitive through the Lisp convention: `args[0]` is the
/// acceptor.
pub fn call_as_function(m: &mut Machine<'_>, prim: &Primitive, args: &[Value]) -> Eval<Value> {
    let actual = args.len().saturating_sub(1);
    if !prim.arity.accepts(actual) {
        return Err(RuntimeError::Arity {
            expected: prim.arity.describe(),
            got: actual,
        }
        .into());
    }
    if prim.takes_acceptor {
        (prim.native)(m, args)
    } else {
        (prim.native)(m, args.get(1..).unwrap_or(&[]))
    }
}

/// The function object installed in a primitive's function slot.
pub fn function_value(prim: &'static Primitive) -> Value {
    Value::Function(std::rc::Rc::new(crate::types::Function::new(
        FunctionKind::Primitive(prim),
    )))
}

// ============================================================================
// Helpers
// ============================================================================

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Nil)
}

fn number(m: &Machine<'_>, v: &Value) -> Eval<f64> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(m.type_error(other, "NUMBER")),
    }
}

fn symbol(m: &Machine<'_>, v: &Value) -> Eval<SymbolId> {
    v.as_symbol().ok_or_else(|| m.type_error(v, "SYMBOL"))
}

fn list_items(m: &Machine<'_>, v: &Value) -> Eval<Vec<Value>> {
    v.list_to_vec().ok_or_else(|| m.type_error(v, "LIST"))
}

fn signal(message: String) -> Exception {
    RuntimeError::Signal(message).into()
}

// ============================================================================
// Arithmetic Primitives
// ============================================================================

fn prim_add(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let mut sum = 0.0;
    for a in args {
        sum += number(m, a)?;
    }
    Ok(Value::Number(sum))
}

fn prim_sub(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let first = number(m, &arg(args, 0))?;
    if args.len() == 1 {
        return Ok(Value::Number(-first));
    }
    let mut acc = first;
    for a in &args[1..] {
        acc -= number(m, a)?;
    }
    Ok(Value::Number(acc))
}

fn prim_mul(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let mut product = 1.0;
    for a in args {
        product *= number(m, a)?;
    }
    Ok(Value::Number(product))
}

fn prim_div(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let first = number(m, &arg(args, 0))?;
    let (mut acc, rest) = if args.len() == 1 {
        (1.0, args)
    } else {
        (first, &args[1..])
    };
    for a in rest {
        let d = number(m, a)?;
        if d == 0.0 {
            return Err(signal("division by zero".to_string()));
        }
        acc /= d;
    }
    Ok(Value::Number(acc))
}

fn prim_inc(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::Number(number(m, &arg(args, 0))? + 1.0))
}

fn prim_dec(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::Number(number(m, &arg(args, 0))? - 1.0))
}

/// Floor modulus: the result takes the sign of the divisor.
fn prim_mod(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let a = number(m, &arg(args, 0))?;
    let b = number(m, &arg(args, 1))?;
    if b == 0.0 {
        return Err(signal("division by zero".to_string()));
    }
    Ok(Value::Number(a - b * (a / b).floor()))
}

// ============================================================================
// Comparison Primitives
// ============================================================================

fn compare_chain<F>(m: &mut Machine<'_>, args: &[Value], cmp: F) -> Eval<Value>
where
    F: Fn(f64, f64) -> bool,
{
    let mut prev = number(m, &arg(args, 0))?;
    for a in args.iter().skip(1) {
        let curr = number(m, a)?;
        if !cmp(prev, curr) {
            return Ok(Value::Nil);
        }
        prev = curr;
    }
    Ok(Value::t())
}

fn prim_num_eq(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    compare_chain(m, args, |a, b| a == b)
}

fn prim_lt(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    compare_chain(m, args, |a, b| a < b)
}

fn prim_gt(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    compare_chain(m, args, |a, b| a > b)
}

fn prim_le(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    compare_chain(m, args, |a, b| a <= b)
}

fn prim_ge(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    compare_chain(m, args, |a, b| a >= b)
}

// ============================================================================
// List Primitives
// ============================================================================

fn prim_cons(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::cons(arg(args, 0), arg(args, 1)))
}

fn prim_car(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        Value::Nil => Ok(Value::Nil),
        Value::Cons(cell) => Ok(cell.car()),
        other => Err(m.type_error(&other, "LIST")),
    }
}

fn prim_cdr(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        Value::Nil => Ok(Value::Nil),
        Value::Cons(cell) => Ok(cell.cdr()),
        other => Err(m.type_error(&other, "LIST")),
    }
}

fn prim_rplaca(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        cons @ Value::Cons(_) => {
            if let Value::Cons(cell) = &cons {
                cell.set_car(arg(args, 1));
            }
            Ok(cons)
        }
        other => Err(m.type_error(&other, "CONS")),
    }
}

fn prim_rplacd(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        cons @ Value::Cons(_) => {
            if let Value::Cons(cell) = &cons {
                cell.set_cdr(arg(args, 1));
            }
            Ok(cons)
        }
        other => Err(m.type_error(&other, "CONS")),
    }
}

fn prim_list(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::list(args.to_vec()))
}

fn prim_list_star(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match args.split_last() {
        Some((tail, items)) => Ok(Value::list_with_tail(items.to_vec(), tail.clone())),
        None => Ok(Value::Nil),
    }
}

/// All but the last argument are copied; the last is shared.
fn prim_append(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let (last, init) = match args.split_last() {
        Some(split) => split,
        None => return Ok(Value::Nil),
    };
    let mut items = Vec::new();
    for list in init {
        items.extend(list_items(m, list)?);
    }
    Ok(Value::list_with_tail(items, last.clone()))
}

fn prim_length(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let v = arg(args, 0);
    let n = match &v {
        Value::Vector(items) => items.borrow().len(),
        Value::String(s) => s.chars().count(),
        _ => list_items(m, &v)?.len(),
    };
    Ok(Value::Number(n as f64))
}

fn prim_reverse(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        Value::Vector(items) => {
            let mut out = items.borrow().clone();
            out.reverse();
            Ok(Value::vector(out))
        }
        Value::String(s) => Ok(Value::string(&s.chars().rev().collect::<String>())),
        other => {
            let items = list_items(m, &other)?;
            Ok(Value::list(items.into_iter().rev().collect::<Vec<_>>()))
        }
    }
}

fn prim_nth(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let n = number(m, &arg(args, 0))? as usize;
    let mut current = arg(args, 1);
    for _ in 0..n {
        current = match current {
            Value::Cons(cell) => cell.cdr(),
            Value::Nil => return Ok(Value::Nil),
            other => return Err(m.type_error(&other, "LIST")),
        };
    }
    match current {
        Value::Cons(cell) => Ok(cell.car()),
        Value::Nil => Ok(Value::Nil),
        other => Err(m.type_error(&other, "LIST")),
    }
}

// ============================================================================
// Predicates
// ============================================================================

fn prim_eq(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(crate::host::strict_equals(&arg(args, 0), &arg(args, 1))))
}

fn prim_eql(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(arg(args, 0).eql(&arg(args, 1))))
}

fn prim_equal(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(arg(args, 0).equal(&arg(args, 1))))
}

fn prim_null(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(arg(args, 0).is_nil()))
}

fn prim_consp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(arg(args, 0).is_cons()))
}

fn prim_atom(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(!arg(args, 0).is_cons()))
}

fn prim_listp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::Nil | Value::Cons(_))))
}

fn prim_symbolp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(arg(args, 0).as_symbol().is_some()))
}

fn prim_keywordp(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(
        matches!(arg(args, 0), Value::Symbol(id) if m.symbols.is_keyword(id)),
    ))
}

fn prim_numberp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::Number(_))))
}

fn prim_stringp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::String(_))))
}

fn prim_characterp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::Character(_))))
}

fn prim_functionp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::Function(_))))
}

fn prim_vectorp(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::boolean(matches!(arg(args, 0), Value::Vector(_))))
}

// ============================================================================
// Symbol Primitives
// ============================================================================

/// Checked read of the value slot.
fn prim_symbol_value(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let v = arg(args, 0);
    let id = symbol(m, &v)?;
    match &m.symbols.symbol(id).value {
        Some(value) => Ok(value.clone()),
        None => Err(RuntimeError::UnboundVariable(m.describe(&v)).into()),
    }
}

/// Checked read of the function slot.
fn prim_symbol_function(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let v = arg(args, 0);
    let id = symbol(m, &v)?;
    match &m.symbols.symbol(id).function {
        Some(function) => Ok(function.clone()),
        None => Err(RuntimeError::UndefinedFunction(m.describe(&v)).into()),
    }
}

fn prim_set(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    let value = arg(args, 1);
    m.symbols.symbol_mut(id).value = Some(value.clone());
    Ok(value)
}

fn prim_fset(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    let function = arg(args, 1);
    if !matches!(function, Value::Function(_)) {
        return Err(m.type_error(&function, "FUNCTION"));
    }
    m.symbols.symbol_mut(id).function = Some(function.clone());
    Ok(function)
}

fn prim_boundp(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    Ok(Value::boolean(m.symbols.symbol(id).value.is_some()))
}

fn prim_fboundp(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    Ok(Value::boolean(m.symbols.symbol(id).function.is_some()))
}

fn prim_symbol_name(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    Ok(Value::string(m.symbols.symbol_name(id)))
}

fn prim_symbol_plist(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    Ok(m.symbols.symbol(id).plist.clone())
}

fn prim_get(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let id = symbol(m, &arg(args, 0))?;
    let indicator = arg(args, 1);
    let plist = m.symbols.symbol(id).plist.clone();
    let items = list_items(m, &plist)?;
    for pair in items.chunks(2) {
        if pair[0].eql(&indicator) {
            return Ok(pair.get(1).cloned().unwrap_or(Value::Nil));
        }
    }
    Ok(arg(args, 2))
}

fn package_designator(m: &mut Machine<'_>, v: &Value) -> Eval<PackageId> {
    match v {
        Value::Package(id) => Ok(*id),
        Value::String(name) => m
            .symbols
            .require_package(name)
            .map_err(|e| signal(e.to_string())),
        Value::Symbol(id) => {
            let name = m.symbols.symbol_name(*id).to_string();
            m.symbols
                .require_package(&name)
                .map_err(|e| signal(e.to_string()))
        }
        other => Err(m.type_error(other, "PACKAGE")),
    }
}

fn prim_intern(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let name = match arg(args, 0) {
        Value::String(s) => s,
        other => return Err(m.type_error(&other, "STRING")),
    };
    let pkg = match args.get(1) {
        Some(designator) => package_designator(m, designator)?,
        None => m.symbols.current_package(),
    };
    Ok(Value::symbol(m.symbols.intern(&name, pkg)))
}

fn prim_make_symbol(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        Value::String(s) => Ok(Value::Symbol(m.symbols.make_symbol(&s))),
        other => Err(m.type_error(&other, "STRING")),
    }
}

fn prim_gensym(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let prefix = match args.first() {
        Some(Value::String(s)) => s.to_string(),
        _ => "G".to_string(),
    };
    Ok(Value::Symbol(m.symbols.gensym(&prefix)))
}

// ============================================================================
// Function and Multiple-Value Primitives
// ============================================================================

/// `funcall(acceptor, f, args...)`
fn prim_funcall(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let function = coerce_function(m, args.get(1..2).unwrap_or(&[]))?;
    let mut actuals = vec![arg(args, 0)];
    actuals.extend(args.iter().skip(2).cloned());
    m.call(&function, actuals)
}

/// `applyList(acceptor, f, args..., list)`
fn prim_apply(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let function = coerce_function(m, args.get(1..2).unwrap_or(&[]))?;
    let mut actuals = vec![arg(args, 0)];
    if let Some((spread, fixed)) = args.get(2..).and_then(|rest| rest.split_last()) {
        actuals.extend(fixed.iter().cloned());
        actuals.extend(list_items(m, spread)?);
    }
    m.call(&function, actuals)
}

/// `values(acceptor, args...)`
fn prim_values(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let acceptor = arg(args, 0);
    m.call(&acceptor, args.iter().skip(1).cloned().collect())
}

fn prim_values_list(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let acceptor = arg(args, 0);
    let items = list_items(m, &arg(args, 1))?;
    m.call(&acceptor, items)
}

/// Docstring of a function or of a symbol's function.
fn prim_documentation(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let target = match arg(args, 0) {
        f @ Value::Function(_) => f,
        Value::Symbol(id) => match &m.symbols.symbol(id).function {
            Some(f) => f.clone(),
            None => return Ok(Value::Nil),
        },
        _ => return Ok(Value::Nil),
    };
    match target {
        Value::Function(f) => match f.property("docstring") {
            Value::Undefined => Ok(Value::Nil),
            doc => Ok(doc),
        },
        _ => Ok(Value::Nil),
    }
}

// ============================================================================
// Vector Primitives
// ============================================================================

fn prim_vector(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(Value::vector(args.to_vec()))
}

fn prim_aref(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let v = arg(args, 0);
    let i = number(m, &arg(args, 1))?;
    let item = match &v {
        Value::Vector(items) => items.borrow().get(i as usize).cloned(),
        Value::String(s) => s.chars().nth(i as usize).map(Value::Character),
        _ => return Err(m.type_error(&v, "VECTOR")),
    };
    item.ok_or_else(|| signal(format!("index {} out of bounds for {}", i, m.describe(&v))))
}

// ============================================================================
// Conditions
// ============================================================================

/// `(error "fmt" args...)` with `~a`, `~s` and `~%` directives.
fn prim_error(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let message = match arg(args, 0) {
        Value::String(control) => format_directives(m, &control, args.get(1..).unwrap_or(&[])),
        other => m.describe(&other),
    };
    Err(signal(message))
}

fn format_directives(m: &Machine<'_>, control: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = control.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next().map(|d| d.to_ascii_uppercase()) {
            Some('A') => {
                if let Some(a) = args.next() {
                    out.push_str(&princ_to_string(a, m.symbols));
                }
            }
            Some('S') => {
                if let Some(a) = args.next() {
                    out.push_str(&m.describe(a));
                }
            }
            Some('%') => out.push('\n'),
            Some('~') => out.push('~'),
            Some(other) => {
                out.push('~');
                out.push(other);
            }
            None => out.push('~'),
        }
    }
    out
}
