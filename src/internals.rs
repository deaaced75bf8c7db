// HostLisp Runtime Support
//
// The `internals` routines emitted code calls for argument checking, the
// multiple-value protocol and non-local transfer signals.

use std::rc::Rc;

use crate::host::{host_error, Eval, Exception, Machine, NativeFn, RuntimeError};
use crate::symbol::{PackageId, SymbolId};
use crate::types::{TransferKind, Value};

pub fn natives() -> impl Iterator<Item = (&'static str, NativeFn)> {
    let table: [(&'static str, NativeFn); 15] = [
        ("mv", mv),
        ("pv", pv),
        ("applyValues", apply_values),
        ("mvAppend", mv_append),
        ("apply", apply),
        ("coerceFunction", coerce_function),
        ("character", character),
        ("checkArgs", check_args),
        ("checkArgsAtLeast", check_args_at_least),
        ("checkArgsAtMost", check_args_at_most),
        ("checkKeywordPairs", check_keyword_pairs),
        ("unknownKeyword", unknown_keyword),
        ("transfer", transfer),
        ("internSymbol", intern_symbol),
        ("uninternedSymbol", uninterned_symbol),
    ];
    table.into_iter()
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn count(m: &Machine<'_>, v: &Value) -> Eval<usize> {
    match v {
        Value::Number(n) if *n >= 0.0 => Ok(*n as usize),
        other => Err(m.type_error(other, "INTEGER")),
    }
}

/// Pack every argument into a values bundle. A single value stays bare.
pub fn mv(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(match args {
        [single] => single.clone(),
        _ => Value::MultipleValues(Rc::from(args)),
    })
}

/// Primary value only.
pub fn pv(_: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Ok(args.first().cloned().unwrap_or(Value::Nil))
}

/// The values carried by a result, whether bundled or bare.
pub fn values_of(value: &Value) -> Vec<Value> {
    match value {
        Value::MultipleValues(vs) => vs.to_vec(),
        other => vec![other.clone()],
    }
}

/// Re-deliver a payload to the acceptor of the receiving context.
fn apply_values(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let acceptor = arg(args, 0);
    let payload = arg(args, 1);
    m.call(&acceptor, values_of(&payload))
}

/// Append the values of `vs` to the argument vector `args`.
fn mv_append(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let mut out = match arg(args, 0) {
        Value::Vector(items) => items.borrow().clone(),
        other => return Err(m.type_error(&other, "VECTOR")),
    };
    out.extend(values_of(&arg(args, 1)));
    Ok(Value::vector(out))
}

/// `apply(f, argsVector)`
fn apply(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let function = arg(args, 0);
    let actuals = match arg(args, 1) {
        Value::Vector(items) => items.borrow().clone(),
        other => return Err(m.type_error(&other, "VECTOR")),
    };
    m.call(&function, actuals)
}

/// A function designator to a function: symbols go through their
/// function slot.
pub fn coerce_function(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    match arg(args, 0) {
        f @ Value::Function(_) => Ok(f),
        designator @ (Value::Symbol(_) | Value::Nil) => {
            let id = designator.as_symbol().unwrap_or(crate::symbol::SymbolId::NIL);
            m.symbols
                .symbol(id)
                .function
                .clone()
                .ok_or_else(|| RuntimeError::UndefinedFunction(m.describe(&designator)).into())
        }
        other => Err(RuntimeError::NotAFunction(m.describe(&other)).into()),
    }
}

fn character(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let code = count(m, &arg(args, 0))?;
    char::from_u32(code as u32)
        .map(Value::Character)
        .ok_or_else(|| m.type_error(&arg(args, 0), "CHARACTER-CODE"))
}

fn arity_error(expected: String, got: usize) -> Exception {
    RuntimeError::Arity { expected, got }.into()
}

/// `checkArgs(count, n)`
fn check_args(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let got = count(m, &arg(args, 0))?;
    let expected = count(m, &arg(args, 1))?;
    if got != expected {
        return Err(arity_error(expected.to_string(), got));
    }
    Ok(Value::Undefined)
}

/// `checkArgsAtLeast(count, min)`
fn check_args_at_least(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let got = count(m, &arg(args, 0))?;
    let min = count(m, &arg(args, 1))?;
    if got < min {
        return Err(arity_error(format!("at least {}", min), got));
    }
    Ok(Value::Undefined)
}

/// `checkArgsAtMost(count, max)`
fn check_args_at_most(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let got = count(m, &arg(args, 0))?;
    let max = count(m, &arg(args, 1))?;
    if got > max {
        return Err(arity_error(format!("at most {}", max), got));
    }
    Ok(Value::Undefined)
}

/// `checkKeywordPairs(n)`: keyword arguments come in pairs.
fn check_keyword_pairs(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let n = count(m, &arg(args, 0))?;
    if n % 2 != 0 {
        return Err(RuntimeError::OddKeywords.into());
    }
    Ok(Value::Undefined)
}

fn unknown_keyword(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    Err(RuntimeError::UnknownKeyword(m.describe(&arg(args, 0))).into())
}

/// `transfer(kind, id, payload, name)` builds the signal object thrown by
/// RETURN-FROM, THROW and GO.
fn transfer(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let kind = match arg(args, 0) {
        Value::String(s) => TransferKind::parse(&s),
        _ => None,
    }
    .ok_or_else(|| host_error("invalid transfer kind"))?;
    let name = match arg(args, 3) {
        Value::String(s) => Some(s.to_string()),
        Value::Undefined => None,
        other => Some(m.describe(&other)),
    };
    Ok(m.make_transfer(kind, arg(args, 1), arg(args, 2), name))
}

/// `internSymbol(name, packageName)` for hoisted symbol literals.
fn intern_symbol(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let (name, package) = match (arg(args, 0), arg(args, 1)) {
        (Value::String(name), Value::String(package)) => (name, package),
        (other, _) => return Err(m.type_error(&other, "STRING")),
    };
    let pkg = match m.symbols.find_package(&package) {
        Some(pkg) => pkg,
        None if package.is_empty() => PackageId::COMMON_LISP_USER,
        None => return Err(host_error(format!("package {} does not exist", package))),
    };
    Ok(Value::symbol(m.symbols.intern(&name, pkg)))
}

/// `uninternedSymbol(name, id)`: the uninterned symbol a literal was
/// compiled from. A registry that does not know the id makes a fresh one.
fn uninterned_symbol(m: &mut Machine<'_>, args: &[Value]) -> Eval<Value> {
    let name = match arg(args, 0) {
        Value::String(name) => name,
        other => return Err(m.type_error(&other, "STRING")),
    };
    if let Value::Number(n) = arg(args, 1) {
        let id = SymbolId(n as u32);
        if (id.0 as usize) < m.symbols.symbol_count() {
            let symbol = m.symbols.symbol(id);
            if symbol.package.is_none() && symbol.name == *name {
                return Ok(Value::Symbol(id));
            }
        }
    }
    Ok(Value::Symbol(m.symbols.make_symbol(&name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_mv_and_pv() {
        let host = Host::new(10);
        let mut symbols = SymbolTable::new();
        let mut m = host.machine(&mut symbols);
        let one = Value::Number(1.0);
        let two = Value::Number(2.0);
        assert_eq!(pv(&mut m, &[one.clone(), two.clone()]).unwrap(), one);
        assert_eq!(pv(&mut m, &[]).unwrap(), Value::Nil);
        assert_eq!(mv(&mut m, &[one.clone()]).unwrap(), one);
        let both = mv(&mut m, &[one.clone(), two.clone()]).unwrap();
        assert_eq!(values_of(&both), vec![one, two]);
    }

    #[test]
    fn test_arity_checks() {
        let host = Host::new(10);
        let mut symbols = SymbolTable::new();
        let mut m = host.machine(&mut symbols);
        assert!(check_args(&mut m, &[Value::Number(2.0), Value::Number(2.0)]).is_ok());
        assert!(matches!(
            check_args(&mut m, &[Value::Number(1.0), Value::Number(2.0)]),
            Err(Exception::Error(RuntimeError::Arity { got: 1, .. }))
        ));
        assert!(check_args_at_most(&mut m, &[Value::Number(3.0), Value::Number(2.0)]).is_err());
        assert!(check_keyword_pairs(&mut m, &[Value::Number(3.0)]).is_err());
    }

    #[test]
    fn test_apply_values_through_pv() {
        let host = Host::new(10);
        let mut symbols = SymbolTable::new();
        let mut m = host.machine(&mut symbols);
        let acceptor = host.internal("pv").unwrap();
        let bundle = Value::MultipleValues(Rc::from(vec![Value::Number(5.0), Value::Number(6.0)]));
        assert_eq!(apply_values(&mut m, &[acceptor, bundle]).unwrap(), Value::Number(5.0));
    }
}
