// HostLisp Special Forms
//
// Binding, function and compile-time special forms. Control transfer
// (BLOCK, CATCH, TAGBODY, UNWIND-PROTECT) lives in `control`.

use tracing::debug;

use crate::backquote;
use crate::compiler::{BindingScope, CompileError, CompileResult, Compiler, DeclSpecs};
use crate::context::GlobalContext;
use crate::env::{Binding, Environment, Namespace, Reference};
use crate::js::{Expr, Stmt};
use crate::lambda;
use crate::macroexpand;
use crate::symbol::SymbolId;
use crate::types::Value;

pub fn install(ctx: &mut GlobalContext) {
    ctx.register_special_form("QUOTE", compile_quote);
    ctx.register_special_form("FUNCTION", compile_function);
    ctx.register_special_form("IF", compile_if);
    ctx.register_special_form("PROGN", compile_progn);
    ctx.register_special_form("SETQ", compile_setq);
    ctx.register_special_form("LET", compile_let);
    ctx.register_special_form("LET*", compile_let_star);
    ctx.register_special_form("FLET", compile_flet);
    ctx.register_special_form("LABELS", compile_labels);
    ctx.register_special_form("MACROLET", compile_macrolet);
    ctx.register_special_form("LOCALLY", compile_locally);
    ctx.register_special_form("THE", compile_the);
    ctx.register_special_form("EVAL-WHEN", compile_eval_when);
    ctx.register_special_form("DECLAIM", compile_declaim);
    ctx.register_special_form("DEFMACRO", compile_defmacro);
    ctx.register_special_form("DEFCONSTANT", compile_defconstant);
    ctx.register_special_form("BACKQUOTE", compile_backquote);
    ctx.register_special_form("UNQUOTE", compile_stray_unquote);
    ctx.register_special_form("UNQUOTE-SPLICING", compile_stray_unquote);
    ctx.register_special_form("MULTIPLE-VALUE-CALL", compile_multiple_value_call);
    ctx.register_special_form("MULTIPLE-VALUE-PROG1", compile_multiple_value_prog1);
}

fn expect_args(
    c: &Compiler<'_>,
    form: &Value,
    args: &[Value],
    min: usize,
    max: Option<usize>,
) -> CompileResult<()> {
    if args.len() < min || max.map_or(false, |max| args.len() > max) {
        let expected = match max {
            Some(max) if max == min => format!("exactly {} argument(s)", min),
            Some(max) => format!("{} to {} arguments", min, max),
            None => format!("at least {} argument(s)", min),
        };
        return Err(c.malformed(form, format!("expected {}", expected)));
    }
    Ok(())
}

fn symbol_arg(
    c: &Compiler<'_>,
    form: &Value,
    value: &Value,
    what: &str,
) -> CompileResult<SymbolId> {
    value
        .as_symbol()
        .ok_or_else(|| c.malformed(form, format!("{} must be a symbol", what)))
}

fn list_arg(
    c: &Compiler<'_>,
    form: &Value,
    value: &Value,
    what: &str,
) -> CompileResult<Vec<Value>> {
    value
        .list_to_vec()
        .ok_or_else(|| c.malformed(form, format!("{} must be a proper list", what)))
}

// ============================================================================
// Basic forms
// ============================================================================

fn compile_quote(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, Some(1))?;
    c.literal(&args[0])
}

fn compile_function(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, Some(1))?;
    c.function_reference(&args[0])
}

fn compile_if(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 2, Some(3))?;
    let test = c.compile_single(&args[0])?;
    let then = c.compile(&args[1])?;
    let otherwise = match args.get(2) {
        Some(e) => c.compile(e)?,
        None => Expr::nil(),
    };
    Ok(Expr::cond(Compiler::truth_test(test), then, otherwise))
}

fn compile_progn(c: &mut Compiler<'_>, _form: &Value, args: &[Value]) -> CompileResult<Expr> {
    c.compile_progn(args)
}

fn compile_setq(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    if args.len() % 2 != 0 {
        return Err(c.malformed(form, "odd number of arguments"));
    }
    let mut assignments = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks(2) {
        let sym = symbol_arg(c, form, &pair[0], "variable")?;
        let place = c.variable_place(sym)?;
        let value = c.compile_single(&pair[1])?;
        assignments.push(Expr::assign(place, value));
    }
    Ok(match assignments.len() {
        0 => Expr::nil(),
        1 => assignments.pop().unwrap_or_else(Expr::nil),
        _ => Expr::Comma(assignments),
    })
}

fn compile_the(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 2, Some(2))?;
    c.compile(&args[1])
}

fn compile_locally(c: &mut Compiler<'_>, _form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let body = c.parse_body(args, false)?;
    let env = c.env().clone();
    let env = c.apply_free_declarations(env, &body.declarations, &[]);
    c.with_env(env, |c| c.compile_progn(&body.forms))
}

// ============================================================================
// Variable bindings
// ============================================================================

/// `name`, `(name)` or `(name init)`
fn binding_spec(c: &Compiler<'_>, form: &Value, spec: &Value) -> CompileResult<(SymbolId, Value)> {
    match spec {
        Value::Symbol(_) | Value::Nil => Ok((symbol_arg(c, form, spec, "bound name")?, Value::Nil)),
        Value::Cons(_) => {
            let parts = list_arg(c, form, spec, "binding")?;
            match parts.as_slice() {
                [name] => Ok((symbol_arg(c, form, name, "bound name")?, Value::Nil)),
                [name, init] => Ok((symbol_arg(c, form, name, "bound name")?, init.clone())),
                _ => Err(c.malformed(form, "binding must be (name [init])")),
            }
        }
        _ => Err(c.malformed(form, "binding must be a symbol or a list")),
    }
}

fn parse_bindings(
    c: &mut Compiler<'_>,
    form: &Value,
    args: &[Value],
) -> CompileResult<Vec<(SymbolId, Value)>> {
    let specs = list_arg(c, form, &args[0], "binding list")?;
    let mut bindings = Vec::with_capacity(specs.len());
    for spec in &specs {
        let (sym, init) = binding_spec(c, form, spec)?;
        c.check_bindable(sym)?;
        bindings.push((sym, init));
    }
    Ok(bindings)
}

/// Body of a binding form, inheriting the multiple-value context.
fn finish_bindings(
    c: &mut Compiler<'_>,
    scope: BindingScope,
    env: Environment,
    declarations: &DeclSpecs,
    bound: &[SymbolId],
    forms: &[Value],
) -> CompileResult<Expr> {
    let env = c.apply_free_declarations(env, declarations, bound);
    let stmts = c.with_env(env, |c| c.compile_body(forms))?;
    Ok(Compiler::statements_expr(scope.finish(stmts)))
}

/// LET: every init is evaluated in the outer environment before any
/// variable is bound.
fn compile_let(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let bindings = parse_bindings(c, form, args)?;
    let body = c.parse_body(&args[1..], false)?;

    let mut scope = BindingScope::new();
    let mut hosts = Vec::with_capacity(bindings.len());
    for (sym, init) in &bindings {
        let host = c.fresh_var_for(*sym);
        let value = c.compile_single(init)?;
        scope.push(Stmt::Var(host.clone(), Some(value)));
        hosts.push(host);
    }

    let mut env = c.env().clone();
    for ((sym, _), host) in bindings.iter().zip(&hosts) {
        let special = c.binds_special(*sym, &body.declarations);
        if special {
            scope.bind_special(c, *sym, Expr::ident(host.clone()))?;
        }
        env = env.extend(c.variable_binding(*sym, host, special));
    }
    let bound: Vec<SymbolId> = bindings.iter().map(|(s, _)| *s).collect();
    finish_bindings(c, scope, env, &body.declarations, &bound, &body.forms)
}

/// LET*: each init sees the variables bound before it.
fn compile_let_star(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let bindings = parse_bindings(c, form, args)?;
    let body = c.parse_body(&args[1..], false)?;

    let mut scope = BindingScope::new();
    let mut env = c.env().clone();
    for (sym, init) in &bindings {
        let host = c.fresh_var_for(*sym);
        let value = c.with_env(env.clone(), |c| c.compile_single(init))?;
        scope.push(Stmt::Var(host.clone(), Some(value)));
        let special = c.binds_special(*sym, &body.declarations);
        if special {
            scope.bind_special(c, *sym, Expr::ident(host.clone()))?;
        }
        env = env.extend(c.variable_binding(*sym, &host, special));
    }
    let bound: Vec<SymbolId> = bindings.iter().map(|(s, _)| *s).collect();
    finish_bindings(c, scope, env, &body.declarations, &bound, &body.forms)
}

// ============================================================================
// Local functions and macros
// ============================================================================

struct LocalDefinition {
    name: SymbolId,
    lambda_list: Value,
    body: Vec<Value>,
}

fn local_definitions(
    c: &Compiler<'_>,
    form: &Value,
    list: &Value,
) -> CompileResult<Vec<LocalDefinition>> {
    let mut defs = Vec::new();
    for def in list_arg(c, form, list, "definition list")? {
        let parts = list_arg(c, form, &def, "definition")?;
        match parts.as_slice() {
            [name, lambda_list, body @ ..] => defs.push(LocalDefinition {
                name: symbol_arg(c, form, name, "function name")?,
                lambda_list: lambda_list.clone(),
                body: body.to_vec(),
            }),
            _ => return Err(c.malformed(form, "definition needs a name and a lambda list")),
        }
    }
    Ok(defs)
}

fn compile_local_functions(
    c: &mut Compiler<'_>,
    form: &Value,
    args: &[Value],
    recursive: bool,
) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let defs = local_definitions(c, form, &args[0])?;
    let body = c.parse_body(&args[1..], false)?;

    let outer = c.env().clone();
    let hosts: Vec<String> = defs.iter().map(|d| c.fresh_var_for(d.name)).collect();
    let inner = outer.extend_all(
        defs.iter()
            .zip(&hosts)
            .map(|(d, host)| Binding::function(d.name, Reference::Local(host.clone()))),
    );

    let definition_env = if recursive { inner.clone() } else { outer };
    let mut scope = BindingScope::new();
    for (def, host) in defs.iter().zip(&hosts) {
        let function = c.with_env(definition_env.clone(), |c| {
            lambda::compile_lambda(c, &def.lambda_list, &def.body, Some(def.name))
        })?;
        scope.push(Stmt::Var(host.clone(), Some(function)));
    }
    finish_bindings(c, scope, inner, &body.declarations, &[], &body.forms)
}

fn compile_flet(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    compile_local_functions(c, form, args, false)
}

fn compile_labels(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    compile_local_functions(c, form, args, true)
}

fn compile_macrolet(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let defs = local_definitions(c, form, &args[0])?;
    let mut env = c.env().clone();
    for def in &defs {
        let expander = macroexpand::make_expander(c, def.name, &def.lambda_list, &def.body)?;
        env = env.extend(Binding::function(def.name, Reference::Macro(expander)));
    }
    let rest = args[1..].to_vec();
    c.with_env(env, |c| compile_locally(c, form, &rest))
}

// ============================================================================
// Definitions and compile-time forms
// ============================================================================

fn compile_defmacro(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 2, None)?;
    let name = symbol_arg(c, form, &args[0], "macro name")?;
    let expander = macroexpand::make_expander(c, name, &args[1], &args[2..])?;
    debug!(name = %c.ctx.symbol_name(name), "defined macro");
    c.ctx
        .globals
        .define(Binding::function(name, Reference::Macro(expander)));
    c.symbol_literal(name)
}

/// DEFCONSTANT: the value is computed now so later references compile to
/// the literal; the value cell is set at load time as well.
fn compile_defconstant(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 2, Some(3))?;
    let name = symbol_arg(c, form, &args[0], "constant name")?;
    if name == SymbolId::T || name == SymbolId::NIL || c.ctx.symbols.is_keyword(name) {
        return Err(CompileError::ConstantAssignment(c.ctx.symbol_name(name).to_string()));
    }
    let value = c.eval_at_compile_time(&args[1])?;
    let literal = c.literal(&value)?;
    let binding = c
        .ctx
        .globals
        .define(Binding::variable(name, Reference::Constant(value)));
    binding.set_constant(true);
    let cell = c.symbol_literal(name)?;
    Ok(Expr::Comma(vec![
        Expr::assign(Expr::member(cell.clone(), "value"), literal),
        cell,
    ]))
}

/// DECLAIM: global proclamations, applied at compile time.
fn compile_declaim(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let mut declarations = DeclSpecs::default();
    let as_declare = Value::cons(Value::Nil, Value::list(args.to_vec()));
    c.parse_declaration(&as_declare, &mut declarations)
        .map_err(|_| c.malformed(form, "bad proclamation"))?;
    for sym in &declarations.specials {
        c.ctx.globals.lookup(*sym, Namespace::Variable).set_special(true);
    }
    for sym in &declarations.notinline {
        c.ctx.globals.lookup(*sym, Namespace::Function).set_notinline(true);
    }
    for sym in &declarations.inline {
        c.ctx.globals.lookup(*sym, Namespace::Function).set_notinline(false);
    }
    Ok(Expr::nil())
}

/// EVAL-WHEN: `:compile-toplevel` evaluates the body now; `:execute` and
/// `:load-toplevel` compile it in place.
fn compile_eval_when(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let situations = list_arg(c, form, &args[0], "situation list")?;
    let known = &c.ctx.known;
    let has = |names: &[SymbolId]| {
        situations
            .iter()
            .any(|s| s.as_symbol().map_or(false, |id| names.contains(&id)))
    };
    let now = has(&[known.compile_toplevel, known.compile]);
    let later = has(&[known.load_toplevel, known.load, known.execute, known.eval]);
    let progn = Value::symbol(c.ctx.symbols.intern_cl("PROGN"));
    let body = Value::cons(progn, Value::list(args[1..].to_vec()));
    if now && c.env().is_empty() {
        c.eval_at_compile_time(&body)?;
    }
    if later {
        c.compile(&body)
    } else {
        Ok(Expr::nil())
    }
}

fn compile_backquote(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, Some(1))?;
    let expansion = backquote::expand(c, &args[0])?;
    c.compile(&expansion)
}

fn compile_stray_unquote(
    c: &mut Compiler<'_>,
    form: &Value,
    _args: &[Value],
) -> CompileResult<Expr> {
    Err(CompileError::StrayUnquote(c.describe(form)))
}

// ============================================================================
// Multiple values
// ============================================================================

/// `internals.apply(f, mvAppend(mvAppend([ACC], v1), v2)...)`
fn compile_multiple_value_call(
    c: &mut Compiler<'_>,
    form: &Value,
    args: &[Value],
) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let acceptor = c.acceptor();
    let function = c.compile_single(&args[0])?;
    let mut actuals = Expr::Array(vec![acceptor]);
    for arg in &args[1..] {
        let bundle = c.compile_bundle(arg)?;
        actuals = Expr::internal_call("mvAppend", vec![actuals, bundle]);
    }
    Ok(Expr::internal_call(
        "apply",
        vec![Expr::internal_call("coerceFunction", vec![function]), actuals],
    ))
}

/// The first form's values, compiled for the current acceptor, are held
/// while the rest run for effect.
fn compile_multiple_value_prog1(
    c: &mut Compiler<'_>,
    form: &Value,
    args: &[Value],
) -> CompileResult<Expr> {
    expect_args(c, form, args, 1, None)?;
    let first = c.compile(&args[0])?;
    if args.len() == 1 {
        return Ok(first);
    }
    let result = c.fresh_var("result");
    let mut stmts = vec![Stmt::Var(result.clone(), Some(first))];
    for arg in &args[1..] {
        let expr = c.compile_single(arg)?;
        if !expr.is_constant() {
            stmts.push(Stmt::Expr(expr));
        }
    }
    stmts.push(Stmt::Return(Expr::ident(result)));
    Ok(Expr::iife(vec![], vec![], stmts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::reader::read_from_string;

    fn compile(source: &str) -> CompileResult<String> {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let form = read_from_string(source, &mut ctx.symbols, &[]).unwrap().unwrap();
        let mut compiler = Compiler::new(&mut ctx, &host);
        compiler.compile_toplevel(&form).map(|p| p.to_string())
    }

    #[test]
    fn test_if_compares_against_nil() {
        let text = compile("(if 1 2 3)").unwrap();
        assert!(text.contains("(1 !== internals.NIL) ? 2 : 3"));
    }

    #[test]
    fn test_let_binds_host_locals() {
        let text = compile("(let ((x 1)) x)").unwrap();
        assert!(text.contains("var x_"));
        assert!(!text.contains("symbolValue"));
    }

    #[test]
    fn test_special_let_restores_in_finally() {
        let text = compile("(let ((x 1)) (declare (special x)) x)").unwrap();
        assert!(text.contains(".value = x_"));
        assert!(text.contains("finally"));
        assert!(text.contains("internals.symbolValue("));
    }

    #[test]
    fn test_malformed_forms() {
        assert!(matches!(compile("(if)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(setq x)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(let ((1 2)) 3)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(quote)"), Err(CompileError::Malformed { .. })));
    }

    #[test]
    fn test_constants_cannot_be_assigned_or_bound() {
        assert!(matches!(compile("(setq t 1)"), Err(CompileError::ConstantAssignment(_))));
        assert!(matches!(compile("(setq :k 1)"), Err(CompileError::ConstantAssignment(_))));
        assert!(matches!(compile("(let ((nil 1)) nil)"), Err(CompileError::ConstantBinding(_))));
    }

    #[test]
    fn test_stray_unquote() {
        assert!(matches!(compile(",x"), Err(CompileError::StrayUnquote(_))));
    }

    #[test]
    fn test_flet_shadows_inline_primitive() {
        let text = compile("(flet ((car (x) x)) (car 1))").unwrap();
        assert!(text.contains("car_"));
        assert!(!text.contains("internals.car("));
    }

    #[test]
    fn test_notinline_suppresses_inlining() {
        let text = compile("(locally (declare (notinline car)) (car '(1)))").unwrap();
        assert!(text.contains("internals.symbolFunction("));
        assert!(!text.contains("internals.car("));
    }
}
