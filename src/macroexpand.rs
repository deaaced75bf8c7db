// HostLisp Macro Expander
//
// Macro expanders are ordinary compiled functions, built at compile time
// from a DEFMACRO or MACROLET definition and called with the whole form
// followed by its argument forms. Destructuring lambda lists are lowered to
// plain ones: a sublist in a required position becomes a fresh parameter
// whose value is spread into a nested lambda with APPLY.

use tracing::trace;

use crate::compiler::{CompileError, CompileResult, Compiler};
use crate::env::{Namespace, Reference};
use crate::symbol::SymbolId;
use crate::types::Value;

/// A lambda list lowered to one the function compiler accepts, with the
/// body rewritten to perform the destructuring.
struct Lowered {
    list: Value,
    body: Vec<Value>,
    whole: Option<SymbolId>,
}

fn lambda_list_error(c: &Compiler<'_>, list: &Value, reason: &str) -> CompileError {
    CompileError::LambdaList {
        list: c.describe(list),
        reason: reason.to_string(),
    }
}

fn lower(c: &mut Compiler<'_>, list: &Value, body: Vec<Value>) -> CompileResult<Lowered> {
    let (items, tail) = list.split_dotted();
    let known = &c.ctx.known;
    let (whole_kw, environment_kw, rest_kw) = (known.whole, known.environment, known.rest);

    let mut flat = Vec::with_capacity(items.len() + 2);
    let mut whole = None;
    let mut environment = None;
    let mut destructured = Vec::new();
    let mut required = true;
    let mut iter = items.iter().enumerate().peekable();
    while let Some((index, item)) = iter.next() {
        let keyword = item.as_symbol().filter(|&id| c.ctx.known.is_lambda_keyword(id));
        match keyword {
            Some(kw) if kw == whole_kw => {
                if index != 0 {
                    return Err(lambda_list_error(c, list, "&WHOLE must come first"));
                }
                let var = iter
                    .next()
                    .and_then(|(_, v)| v.as_symbol())
                    .ok_or_else(|| lambda_list_error(c, list, "&WHOLE needs a variable"))?;
                whole = Some(var);
            }
            Some(kw) if kw == environment_kw => {
                let var = iter
                    .next()
                    .and_then(|(_, v)| v.as_symbol())
                    .ok_or_else(|| lambda_list_error(c, list, "&ENVIRONMENT needs a variable"))?;
                environment = Some(var);
            }
            Some(_) => {
                required = false;
                flat.push(item.clone());
            }
            None if required && item.is_cons() => {
                let param = c.ctx.symbols.gensym("ARG");
                destructured.push((param, item.clone()));
                flat.push(Value::symbol(param));
            }
            None => flat.push(item.clone()),
        }
    }
    match tail {
        Value::Nil => {}
        Value::Symbol(_) => {
            flat.push(Value::symbol(rest_kw));
            flat.push(tail);
        }
        _ => return Err(lambda_list_error(c, list, "dotted tail must be a symbol")),
    }

    let let_sym = Value::symbol(c.ctx.symbols.intern_cl("LET"));
    let mut body = body;
    if let Some(var) = environment {
        let bindings = Value::list(vec![Value::list(vec![Value::symbol(var), Value::Nil])]);
        body = vec![Value::list_with_tail(vec![let_sym.clone(), bindings], Value::list(body))];
    }
    for (param, sublist) in destructured.into_iter().rev() {
        let inner = lower(c, &sublist, body)?;
        let known = &c.ctx.known;
        let lambda = Value::list_with_tail(
            vec![Value::symbol(known.lambda), inner.list],
            Value::list(inner.body),
        );
        let spread = Value::list(vec![
            Value::symbol(known.apply),
            Value::list(vec![Value::symbol(known.function), lambda]),
            Value::symbol(param),
        ]);
        body = vec![match inner.whole {
            Some(var) => {
                let binding = Value::list(vec![Value::symbol(var), Value::symbol(param)]);
                let bindings = Value::list(vec![binding]);
                Value::list(vec![let_sym.clone(), bindings, spread])
            }
            None => spread,
        }];
    }
    Ok(Lowered {
        list: Value::list(flat),
        body,
        whole,
    })
}

/// Build the expander for a macro: `(named-lambda NAME (WHOLE . LIST) . BODY)`
/// compiled and evaluated now.
pub fn make_expander(
    c: &mut Compiler<'_>,
    name: SymbolId,
    lambda_list: &Value,
    body: &[Value],
) -> CompileResult<Value> {
    let lowered = lower(c, lambda_list, body.to_vec())?;
    let whole = match lowered.whole {
        Some(var) => var,
        None => c.ctx.symbols.gensym("WHOLE"),
    };
    let known = &c.ctx.known;
    let expander = Value::list_with_tail(
        vec![
            Value::symbol(known.named_lambda),
            Value::symbol(name),
            Value::cons(Value::symbol(whole), lowered.list),
        ],
        Value::list(lowered.body),
    );
    let form = Value::list(vec![Value::symbol(known.function), expander]);
    trace!(macro_name = %c.ctx.symbol_name(name), form = %c.describe(&form), "building expander");
    match c.eval_at_compile_time(&form)? {
        function @ Value::Function(_) => Ok(function),
        other => Err(CompileError::MacroExpansion {
            name: c.ctx.symbol_name(name).to_string(),
            message: format!("expander evaluated to {}", c.describe(&other)),
        }),
    }
}

/// Run an expander on a form. Host failures become expansion errors.
pub fn call_expander(
    c: &mut Compiler<'_>,
    name: SymbolId,
    expander: &Value,
    form: &Value,
) -> CompileResult<Value> {
    let args = form
        .cdr()
        .and_then(|rest| rest.list_to_vec())
        .ok_or_else(|| c.malformed(form, "dotted argument list"))?;
    let acceptor = c
        .host
        .internal("pv")
        .ok_or_else(|| CompileError::MacroExpansion {
            name: c.ctx.symbol_name(name).to_string(),
            message: "host has no primary-value acceptor".to_string(),
        })?;
    let mut actuals = Vec::with_capacity(args.len() + 2);
    actuals.push(acceptor);
    actuals.push(form.clone());
    actuals.extend(args);

    let result = c.host.call(&mut c.ctx.symbols, expander, actuals);
    match result {
        Ok(expansion) => {
            trace!(
                macro_name = %c.ctx.symbol_name(name),
                expansion = %c.describe(&expansion),
                "expanded"
            );
            Ok(expansion)
        }
        Err(e) => Err(CompileError::MacroExpansion {
            name: c.ctx.symbol_name(name).to_string(),
            message: c.describe_exception(&e),
        }),
    }
}

/// The expander a form's head names in the current environment, if any.
pub fn macro_function(c: &mut Compiler<'_>, form: &Value) -> Option<(SymbolId, Value)> {
    let head = form.car()?;
    let id = head.as_symbol()?;
    if c.ctx.special_form(id).is_some() {
        return None;
    }
    let binding = c.resolve(&head, Namespace::Function)?;
    match &binding.reference {
        Reference::Macro(expander) => Some((id, expander.clone())),
        _ => None,
    }
}

/// One expansion step; the flag is false when the form is not a macro call.
pub fn expand_1(c: &mut Compiler<'_>, form: &Value) -> CompileResult<(Value, bool)> {
    match macro_function(c, form) {
        Some((name, expander)) => Ok((call_expander(c, name, &expander, form)?, true)),
        None => Ok((form.clone(), false)),
    }
}

/// Expand until the head is no longer a macro.
pub fn expand(c: &mut Compiler<'_>, form: &Value) -> CompileResult<(Value, bool)> {
    let mut current = form.clone();
    let mut expanded = false;
    loop {
        let (next, again) = expand_1(c, &current)?;
        if !again {
            return Ok((current, expanded));
        }
        expanded = true;
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalContext;
    use crate::host::Host;
    use crate::printer::print_to_string;
    use crate::reader::read_from_string;

    fn read(ctx: &mut GlobalContext, source: &str) -> Value {
        read_from_string(source, &mut ctx.symbols, &[]).unwrap().unwrap()
    }

    fn lowered(source: &str) -> (String, String) {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let list = read(&mut ctx, source);
        let mut compiler = Compiler::new(&mut ctx, &host);
        let out = lower(&mut compiler, &list, vec![Value::Nil]).unwrap();
        (
            print_to_string(&out.list, &ctx.symbols),
            print_to_string(&Value::list(out.body), &ctx.symbols),
        )
    }

    #[test]
    fn test_dotted_list_becomes_rest() {
        let (list, _) = lowered("(a . b)");
        assert_eq!(list, "(A &REST B)");
    }

    #[test]
    fn test_sublist_is_spread_with_apply() {
        let (list, body) = lowered("((a b) c)");
        assert!(list.starts_with("(#:ARG"));
        assert!(list.ends_with(" C)"));
        assert!(body.contains("(APPLY (FUNCTION (LAMBDA (A B) NIL)) #:ARG"));
    }

    #[test]
    fn test_environment_is_bound_to_nil() {
        let (list, body) = lowered("(a &environment env)");
        assert_eq!(list, "(A)");
        assert_eq!(body, "((LET ((ENV NIL)) NIL))");
    }

    #[test]
    fn test_whole_must_be_first() {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let list = read(&mut ctx, "(a &whole w)");
        let mut compiler = Compiler::new(&mut ctx, &host);
        assert!(matches!(
            lower(&mut compiler, &list, vec![]),
            Err(CompileError::LambdaList { .. })
        ));
    }

    #[test]
    fn test_expand_1_and_expand() {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(200);
        let defs = read(&mut ctx, "(progn (defmacro m1 (x) (list 'm2 x)) (defmacro m2 (x) x))");
        let call = read(&mut ctx, "(m1 5)");
        let mut compiler = Compiler::new(&mut ctx, &host);
        compiler.compile_toplevel(&defs).unwrap();

        let (once, expanded) = expand_1(&mut compiler, &call).unwrap();
        assert!(expanded);
        assert_eq!(compiler.describe(&once), "(M2 5)");

        let (done, expanded) = expand(&mut compiler, &call).unwrap();
        assert!(expanded);
        assert!(matches!(done, Value::Number(n) if n == 5.0));

        let (same, expanded) = expand_1(&mut compiler, &done).unwrap();
        assert!(!expanded);
        assert!(matches!(same, Value::Number(_)));
    }

    #[test]
    fn test_expander_failure_is_reported() {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(200);
        let defs = read(&mut ctx, "(defmacro two (a b) (list a b))");
        let call = read(&mut ctx, "(two 1)");
        let mut compiler = Compiler::new(&mut ctx, &host);
        compiler.compile_toplevel(&defs).unwrap();
        assert!(matches!(
            compiler.compile_toplevel(&call),
            Err(CompileError::MacroExpansion { .. })
        ));
    }
}
