// HostLisp Lambda Compiler
//
// Parses ordinary lambda lists and emits the argument-parsing prologue of
// a compiled function. Every compiled function takes the caller's acceptor
// first; Lisp arguments follow, so `arguments.length - 1` is the Lisp
// argument count.

use smallvec::SmallVec;

use crate::compiler::{BindingScope, CompileError, CompileResult, Compiler};
use crate::env::Binding;
use crate::js::{BinOp, Case, Expr, Stmt};
use crate::symbol::SymbolId;
use crate::types::Value;

#[derive(Debug, Clone)]
pub struct OptionalParam {
    pub var: SymbolId,
    pub default: Value,
    pub supplied: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct KeyParam {
    pub var: SymbolId,
    /// The keyword matched against the argument list
    pub keyword: SymbolId,
    pub default: Value,
    pub supplied: Option<SymbolId>,
}

#[derive(Debug, Default)]
pub struct LambdaList {
    pub required: SmallVec<[SymbolId; 4]>,
    pub optional: Vec<OptionalParam>,
    pub rest: Option<SymbolId>,
    /// `&key` appeared, even with no keys after it
    pub has_keys: bool,
    pub keys: Vec<KeyParam>,
    pub allow_other_keys: bool,
}

impl LambdaList {
    fn variables(&self) -> Vec<SymbolId> {
        let mut vars: Vec<SymbolId> = self.required.iter().copied().collect();
        for opt in &self.optional {
            vars.push(opt.var);
            vars.extend(opt.supplied);
        }
        vars.extend(self.rest);
        for key in &self.keys {
            vars.push(key.var);
            vars.extend(key.supplied);
        }
        vars
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Required,
    Optional,
    Rest,
    Key,
    Done,
}

pub fn parse_lambda_list(c: &mut Compiler<'_>, list: &Value) -> CompileResult<LambdaList> {
    let items = list
        .list_to_vec()
        .ok_or_else(|| lambda_list_error(c, list, "dotted lambda list"))?;
    let known = &c.ctx.known;
    let (optional, rest, body, key, allow) = (
        known.optional,
        known.rest,
        known.body,
        known.key,
        known.allow_other_keys,
    );

    let mut parsed = LambdaList::default();
    let mut mode = Mode::Required;
    for item in &items {
        if let Some(sym) = item.as_symbol() {
            let next = match sym {
                s if s == optional => Some(Mode::Optional),
                s if s == rest || s == body => Some(Mode::Rest),
                s if s == key => Some(Mode::Key),
                s if s == allow => {
                    if mode != Mode::Key {
                        let reason = "&ALLOW-OTHER-KEYS must follow &KEY";
                        return Err(lambda_list_error(c, list, reason));
                    }
                    parsed.allow_other_keys = true;
                    continue;
                }
                s if c.ctx.known.is_lambda_keyword(s) => {
                    return Err(lambda_list_error(c, list, "lambda-list keyword not allowed here"));
                }
                _ => None,
            };
            if let Some(next) = next {
                let in_order = match next {
                    Mode::Optional => mode == Mode::Required,
                    Mode::Rest => matches!(mode, Mode::Required | Mode::Optional),
                    _ => matches!(mode, Mode::Required | Mode::Optional | Mode::Done),
                };
                if !in_order {
                    return Err(lambda_list_error(c, list, "lambda-list keywords out of order"));
                }
                if next == Mode::Key {
                    parsed.has_keys = true;
                }
                mode = next;
                continue;
            }
        }

        match mode {
            Mode::Required => {
                let var = parameter(c, item).ok_or_else(|| {
                    lambda_list_error(c, list, "required parameter must be a symbol")
                })?;
                parsed.required.push(var);
            }
            Mode::Optional => {
                let (var, default, supplied) = parameter_spec(c, item)
                    .ok_or_else(|| lambda_list_error(c, list, "bad &OPTIONAL parameter"))?;
                parsed.optional.push(OptionalParam {
                    var,
                    default,
                    supplied,
                });
            }
            Mode::Rest => {
                let var = parameter(c, item)
                    .ok_or_else(|| lambda_list_error(c, list, "&REST needs a symbol"))?;
                parsed.rest = Some(var);
                mode = Mode::Done;
            }
            Mode::Key => {
                let (var, keyword, default, supplied) = key_spec(c, item)
                    .ok_or_else(|| lambda_list_error(c, list, "bad &KEY parameter"))?;
                parsed.keys.push(KeyParam {
                    var,
                    keyword,
                    default,
                    supplied,
                });
            }
            Mode::Done => {
                return Err(lambda_list_error(c, list, "only one variable may follow &REST"));
            }
        }
    }
    if mode == Mode::Rest {
        return Err(lambda_list_error(c, list, "&REST without a variable"));
    }
    Ok(parsed)
}

fn lambda_list_error(c: &Compiler<'_>, list: &Value, reason: &str) -> CompileError {
    CompileError::LambdaList {
        list: c.describe(list),
        reason: reason.to_string(),
    }
}

fn parameter(c: &Compiler<'_>, item: &Value) -> Option<SymbolId> {
    match item {
        Value::Symbol(id) if !c.ctx.known.is_lambda_keyword(*id) => Some(*id),
        _ => None,
    }
}

/// `var` or `(var [default [supplied-p]])`
fn parameter_spec(c: &Compiler<'_>, item: &Value) -> Option<(SymbolId, Value, Option<SymbolId>)> {
    if let Some(var) = parameter(c, item) {
        return Some((var, Value::Nil, None));
    }
    let parts = item.list_to_vec()?;
    let var = parameter(c, parts.first()?)?;
    let default = parts.get(1).cloned().unwrap_or(Value::Nil);
    let supplied = match parts.get(2) {
        Some(s) => Some(parameter(c, s)?),
        None => None,
    };
    if parts.len() > 3 {
        return None;
    }
    Some((var, default, supplied))
}

/// `var`, `(var ...)` or `((keyword var) ...)`
fn key_spec(
    c: &mut Compiler<'_>,
    item: &Value,
) -> Option<(SymbolId, SymbolId, Value, Option<SymbolId>)> {
    let head = match item {
        Value::Cons(_) => item.car()?,
        other => other.clone(),
    };
    let (var, keyword) = match &head {
        Value::Cons(_) => {
            let pair = head.list_to_vec()?;
            match pair.as_slice() {
                [keyword, var] => (parameter(c, var)?, keyword.as_symbol()?),
                _ => return None,
            }
        }
        _ => {
            let var = parameter(c, &head)?;
            let name = c.ctx.symbols.symbol_name(var).to_string();
            (var, c.ctx.symbols.intern_keyword(&name))
        }
    };
    let (default, supplied) = match item {
        Value::Cons(_) => {
            let parts = item.list_to_vec()?;
            if parts.len() > 3 {
                return None;
            }
            let supplied = match parts.get(2) {
                Some(s) => Some(parameter(c, s)?),
                None => None,
            };
            (parts.get(1).cloned().unwrap_or(Value::Nil), supplied)
        }
        _ => (Value::Nil, None),
    };
    Some((var, keyword, default, supplied))
}

/// `arguments.length - 1`
fn argument_count() -> Expr {
    Expr::binary(
        BinOp::Sub,
        Expr::member(Expr::ident("arguments"), "length"),
        Expr::Number(1.0),
    )
}

fn argument(index: Expr) -> Expr {
    Expr::index(Expr::ident("arguments"), index)
}

fn truth(test: Expr) -> Expr {
    Expr::cond(test, Expr::t(), Expr::nil())
}

/// Compile a lambda expression into a host function expression. A named
/// lambda gets an implicit block of its name and an `fname` property.
pub fn compile_lambda(
    c: &mut Compiler<'_>,
    lambda_list: &Value,
    body: &[Value],
    name: Option<SymbolId>,
) -> CompileResult<Expr> {
    let list = parse_lambda_list(c, lambda_list)?;
    let body = c.parse_body(body, true)?;
    for var in list.variables() {
        c.check_bindable(var)?;
    }

    let forms = match name {
        Some(name) => {
            let block = Value::symbol(c.ctx.symbols.intern_cl("BLOCK"));
            vec![Value::list_with_tail(
                [block, Value::symbol(name)],
                Value::list(body.forms.clone()),
            )]
        }
        None => body.forms.clone(),
    };

    let outer = c.env().clone();
    let mut env = outer.clone();
    let mut params = vec!["values".to_string()];
    let mut scope = BindingScope::new();
    let declarations = &body.declarations;

    // Arity
    let nreq = list.required.len();
    let nopt = list.optional.len();
    let variadic = list.rest.is_some() || list.has_keys;
    if nopt == 0 && !variadic {
        scope.push(Stmt::Expr(Expr::internal_call(
            "checkArgs",
            vec![argument_count(), Expr::Number(nreq as f64)],
        )));
    } else {
        if nreq > 0 {
            scope.push(Stmt::Expr(Expr::internal_call(
                "checkArgsAtLeast",
                vec![argument_count(), Expr::Number(nreq as f64)],
            )));
        }
        if !variadic {
            scope.push(Stmt::Expr(Expr::internal_call(
                "checkArgsAtMost",
                vec![argument_count(), Expr::Number((nreq + nopt) as f64)],
            )));
        }
    }

    // Required
    for &var in &list.required {
        let host = c.fresh_var_for(var);
        params.push(host.clone());
        env = bind(c, &mut scope, env, var, &host, declarations)?;
    }

    // Optional: the defaults run in a fallthrough switch on the argument
    // count, unless a special optional has to be bound before the next
    // default is computed.
    let mut optional_hosts = Vec::with_capacity(nopt);
    for (i, opt) in list.optional.iter().enumerate() {
        let host = c.fresh_var_for(opt.var);
        params.push(host.clone());
        optional_hosts.push(host);
        if let Some(supplied) = opt.supplied {
            let flag = c.fresh_var_for(supplied);
            let test = Expr::binary(BinOp::Gt, argument_count(), Expr::Number((nreq + i) as f64));
            scope.push(Stmt::Var(flag.clone(), Some(truth(test))));
            env = bind(c, &mut scope, env, supplied, &flag, declarations)?;
        }
    }
    let sequential = list
        .optional
        .iter()
        .any(|opt| c.binds_special(opt.var, declarations));
    if sequential {
        for (i, (opt, host)) in list.optional.iter().zip(&optional_hosts).enumerate() {
            let default = c.with_env(env.clone(), |c| c.compile_single(&opt.default))?;
            let position = Expr::Number((nreq + i) as f64);
            let missing = Expr::binary(BinOp::Le, argument_count(), position);
            scope.push(Stmt::If(
                missing,
                vec![Stmt::Expr(Expr::assign(Expr::ident(host.clone()), default))],
                vec![],
            ));
            env = bind(c, &mut scope, env, opt.var, host, declarations)?;
        }
    } else if nopt > 0 {
        let mut cases = Vec::with_capacity(nopt);
        for (i, (opt, host)) in list.optional.iter().zip(&optional_hosts).enumerate() {
            let default = c.with_env(env.clone(), |c| c.compile_single(&opt.default))?;
            cases.push(Case {
                test: Some(Expr::Number((nreq + i) as f64)),
                body: vec![Stmt::Expr(Expr::assign(Expr::ident(host.clone()), default))],
            });
            env = env.extend(c.variable_binding(opt.var, host, false));
        }
        scope.push(Stmt::Switch {
            discriminant: argument_count(),
            cases,
        });
    }

    // Rest, collected back to front so the list keeps argument order
    let first_extra = nreq + nopt + 1;
    if let Some(rest) = list.rest {
        let host = c.fresh_var_for(rest);
        let index = c.fresh_var("i");
        scope.push(Stmt::Var(host.clone(), Some(Expr::nil())));
        scope.push(Stmt::Var(index.clone(), None));
        scope.push(Stmt::For {
            init: Expr::assign(Expr::ident(index.clone()), argument_count()),
            test: Expr::binary(
                BinOp::Ge,
                Expr::ident(index.clone()),
                Expr::Number(first_extra as f64),
            ),
            update: Expr::assign(
                Expr::ident(index.clone()),
                Expr::binary(BinOp::Sub, Expr::ident(index.clone()), Expr::Number(1.0)),
            ),
            body: vec![Stmt::Expr(Expr::assign(
                Expr::ident(host.clone()),
                Expr::internal_call(
                    "cons",
                    vec![argument(Expr::ident(index)), Expr::ident(host.clone())],
                ),
            ))],
        });
        env = bind(c, &mut scope, env, rest, &host, declarations)?;
    }

    // Keys: leftmost occurrence wins
    if list.has_keys {
        let index = c.fresh_var("i");
        scope.push(Stmt::Var(index.clone(), None));
        let extra = Expr::binary(
            BinOp::Sub,
            Expr::member(Expr::ident("arguments"), "length"),
            Expr::Number(first_extra as f64),
        );
        scope.push(Stmt::If(
            Expr::binary(BinOp::Gt, extra.clone(), Expr::Number(0.0)),
            vec![Stmt::Expr(Expr::internal_call("checkKeywordPairs", vec![extra]))],
            vec![],
        ));
        let scan = |index: &str, body: Vec<Stmt>| Stmt::For {
            init: Expr::assign(Expr::ident(index), Expr::Number(first_extra as f64)),
            test: Expr::binary(
                BinOp::Lt,
                Expr::ident(index),
                Expr::member(Expr::ident("arguments"), "length"),
            ),
            update: Expr::assign(
                Expr::ident(index),
                Expr::binary(BinOp::Add, Expr::ident(index), Expr::Number(2.0)),
            ),
            body,
        };

        let mut keyword_literals = Vec::with_capacity(list.keys.len());
        for key in &list.keys {
            let host = c.fresh_var_for(key.var);
            let keyword = c.symbol_literal(key.keyword)?;
            keyword_literals.push(keyword.clone());
            scope.push(Stmt::Var(host.clone(), None));
            let mut found = vec![Stmt::Expr(Expr::assign(
                Expr::ident(host.clone()),
                argument(Expr::binary(BinOp::Add, Expr::ident(index.clone()), Expr::Number(1.0))),
            ))];
            let flag = match key.supplied {
                Some(supplied) => {
                    let flag = c.fresh_var_for(supplied);
                    scope.push(Stmt::Var(flag.clone(), Some(Expr::nil())));
                    found.push(Stmt::Expr(Expr::assign(Expr::ident(flag.clone()), Expr::t())));
                    Some((supplied, flag))
                }
                None => None,
            };
            found.push(Stmt::Break(None));
            scope.push(scan(
                &index,
                vec![Stmt::If(
                    Expr::binary(BinOp::StrictEq, argument(Expr::ident(index.clone())), keyword),
                    found,
                    vec![],
                )],
            ));
            let default = c.with_env(env.clone(), |c| c.compile_single(&key.default))?;
            scope.push(Stmt::If(
                Expr::binary(BinOp::StrictEq, Expr::ident(host.clone()), Expr::Undefined),
                vec![Stmt::Expr(Expr::assign(Expr::ident(host.clone()), default))],
                vec![],
            ));
            if let Some((supplied, flag)) = flag {
                env = bind(c, &mut scope, env, supplied, &flag, declarations)?;
            }
            env = bind(c, &mut scope, env, key.var, &host, declarations)?;
        }

        // A call may pass `:allow-other-keys` with a true value to waive the check
        if !list.allow_other_keys {
            let allow_other_keys = c.ctx.known.allow_other_keys_key;
            let allow_key = c.symbol_literal(allow_other_keys)?;
            let allow = c.fresh_var("allow");
            scope.push(Stmt::Var(allow.clone(), None));
            scope.push(scan(
                &index,
                vec![Stmt::If(
                    Expr::binary(
                        BinOp::StrictEq,
                        argument(Expr::ident(index.clone())),
                        allow_key.clone(),
                    ),
                    vec![
                        Stmt::Expr(Expr::assign(
                            Expr::ident(allow.clone()),
                            argument(Expr::binary(
                                BinOp::Add,
                                Expr::ident(index.clone()),
                                Expr::Number(1.0),
                            )),
                        )),
                        Stmt::Break(None),
                    ],
                    vec![],
                )],
            ));

            let current = argument(Expr::ident(index.clone()));
            let unknown = keyword_literals
                .into_iter()
                .chain(std::iter::once(allow_key))
                .map(|k| Expr::binary(BinOp::StrictNe, current.clone(), k))
                .reduce(|a, b| Expr::binary(BinOp::And, a, b))
                .unwrap_or(Expr::Bool(true));
            let checked = Expr::binary(
                BinOp::Or,
                Expr::binary(BinOp::StrictEq, Expr::ident(allow.clone()), Expr::Undefined),
                Expr::binary(BinOp::StrictEq, Expr::ident(allow), Expr::nil()),
            );
            scope.push(Stmt::If(
                checked,
                vec![scan(
                    &index,
                    vec![Stmt::If(
                        unknown,
                        vec![Stmt::Expr(Expr::internal_call("unknownKeyword", vec![current]))],
                        vec![],
                    )],
                )],
                vec![],
            ));
        }
    }

    let bound = list.variables();
    let env = c.apply_free_declarations(env, declarations, &bound);
    let stmts = c.with_env(env, |c| c.with_multiple_values(true, |c| c.compile_body(&forms)))?;
    let function = Expr::function(params, scope.finish(stmts));

    let mut props = Vec::new();
    if let Some(name) = name {
        let name = c.ctx.symbols.symbol_name(name).to_string();
        props.push(("fname", name));
    }
    if let Some(doc) = &body.docstring {
        props.push(("docstring", doc.clone()));
    }
    if props.is_empty() {
        return Ok(function);
    }
    let f = c.fresh_var("f");
    let mut setup: Vec<Stmt> = props
        .into_iter()
        .map(|(prop, value)| {
            let target = Expr::member(Expr::ident(f.clone()), prop);
            Stmt::Expr(Expr::assign(target, Expr::string(value)))
        })
        .collect();
    setup.push(Stmt::Return(Expr::ident(f.clone())));
    Ok(Expr::iife(vec![f], vec![function], setup))
}

/// Bind a parameter whose value sits in host variable `host`. Special
/// parameters move the value into the symbol's value cell.
fn bind(
    c: &mut Compiler<'_>,
    scope: &mut BindingScope,
    env: crate::env::Environment,
    var: SymbolId,
    host: &str,
    declarations: &crate::compiler::DeclSpecs,
) -> CompileResult<crate::env::Environment> {
    let special = c.binds_special(var, declarations);
    if special {
        scope.bind_special(c, var, Expr::ident(host))?;
    }
    let binding: Binding = c.variable_binding(var, host, special);
    Ok(env.extend(binding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalContext;
    use crate::host::Host;
    use crate::reader::read_from_string;

    fn parse(text: &str, check: impl FnOnce(&Compiler<'_>, CompileResult<LambdaList>)) {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let list = read_from_string(text, &mut ctx.symbols, &[]).unwrap().unwrap();
        let mut compiler = Compiler::new(&mut ctx, &host);
        let parsed = parse_lambda_list(&mut compiler, &list);
        check(&compiler, parsed);
    }

    #[test]
    fn test_parse_full_lambda_list() {
        parse(
            "(a b &optional (c 1 c-p) &rest r &key ((:kk k) 2) d &allow-other-keys)",
            |c, parsed| {
                let list = parsed.unwrap();
                assert_eq!(list.required.len(), 2);
                assert_eq!(list.optional.len(), 1);
                assert!(list.optional[0].supplied.is_some());
                assert!(list.rest.is_some());
                assert!(list.has_keys);
                assert_eq!(list.keys.len(), 2);
                assert_eq!(c.ctx.symbols.symbol_name(list.keys[0].keyword), "KK");
                assert_eq!(c.ctx.symbols.symbol_name(list.keys[1].keyword), "D");
                assert!(c.ctx.symbols.is_keyword(list.keys[1].keyword));
                assert!(list.allow_other_keys);
            },
        );
    }

    #[test]
    fn test_body_is_a_rest_synonym() {
        parse("(x &body forms)", |_, parsed| {
            let list = parsed.unwrap();
            assert!(list.rest.is_some());
        });
    }

    #[test]
    fn test_malformed_lambda_lists() {
        for text in ["(a &rest)", "(&key a &optional b)", "(a . b)", "(&rest a b)", "(1)"] {
            parse(text, |_, parsed| {
                assert!(matches!(parsed, Err(CompileError::LambdaList { .. })), "{}", text);
            });
        }
    }
}
