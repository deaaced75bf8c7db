// HostLisp Control Transfer
//
// BLOCK, CATCH, TAGBODY and UNWIND-PROTECT over the host's exceptions.
// Every exit throws one kind of object, `internals.transfer(kind, id,
// payload, name)`; each handler matches on kind and id and rethrows
// anything else, so the operators nest freely.

use crate::compiler::{CompileError, CompileResult, Compiler};
use crate::context::GlobalContext;
use crate::env::{Binding, Namespace, Reference};
use crate::js::{BinOp, Case, Expr, Stmt};
use crate::types::Value;

pub fn install(ctx: &mut GlobalContext) {
    ctx.register_special_form("BLOCK", compile_block);
    ctx.register_special_form("RETURN-FROM", compile_return_from);
    ctx.register_special_form("CATCH", compile_catch);
    ctx.register_special_form("THROW", compile_throw);
    ctx.register_special_form("TAGBODY", compile_tagbody);
    ctx.register_special_form("GO", compile_go);
    ctx.register_special_form("UNWIND-PROTECT", compile_unwind_protect);
}

const SIGNAL: &str = "cf";

/// `cf.kind === KIND && cf.id === ID`
fn matches_signal(kind: &str, id: Expr) -> Expr {
    let signal = || Expr::ident(SIGNAL);
    Expr::binary(
        BinOp::And,
        Expr::binary(BinOp::StrictEq, Expr::member(signal(), "kind"), Expr::string(kind)),
        Expr::binary(BinOp::StrictEq, Expr::member(signal(), "id"), id),
    )
}

fn payload() -> Expr {
    Expr::member(Expr::ident(SIGNAL), "payload")
}

/// `try { block } catch (cf) { if (MATCH) { on_match } else { throw cf; } }`
fn guarded(block: Vec<Stmt>, test: Expr, on_match: Vec<Stmt>) -> Stmt {
    Stmt::Try {
        block,
        handler: Some((
            SIGNAL.to_string(),
            vec![Stmt::If(test, on_match, vec![Stmt::Throw(Expr::ident(SIGNAL))])],
        )),
        finalizer: None,
    }
}

/// `(function(){ throw internals.transfer(kind, id, payload, name); })()`
fn raise(kind: &str, id: Expr, payload: Expr, name: Expr) -> Expr {
    let signal = Expr::internal_call("transfer", vec![Expr::string(kind), id, payload, name]);
    Expr::iife(vec![], vec![], vec![Stmt::Throw(signal)])
}

// ============================================================================
// BLOCK / RETURN-FROM
// ============================================================================

fn compile_block(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let (name, body) = match args.split_first() {
        Some((name, body)) => (name, body),
        None => return Err(c.malformed(form, "missing block name")),
    };
    let name = name
        .as_symbol()
        .ok_or_else(|| c.malformed(form, "block name must be a symbol"))?;

    let id = c.ctx.counters.block();
    let multiple_values = c.multiple_values();
    let binding = std::rc::Rc::new(Binding::new(
        Value::symbol(name),
        Namespace::Block,
        Reference::Block {
            id: id.clone(),
            multiple_values,
        },
    ));
    let env = c.env().extend_rc(binding.clone());
    let stmts = c.with_env(env, |c| c.compile_body(body))?;

    // Unreferenced blocks need no handler.
    if !binding.is_used() {
        return Ok(Compiler::statements_expr(stmts));
    }
    let result = if multiple_values {
        Expr::internal_call("applyValues", vec![Expr::ident("values"), payload()])
    } else {
        payload()
    };
    Ok(Expr::iife(
        vec![],
        vec![],
        vec![
            Stmt::Var(id.clone(), Some(Expr::Array(vec![]))),
            guarded(stmts, matches_signal("block", Expr::ident(id)), vec![Stmt::Return(result)]),
        ],
    ))
}

fn compile_return_from(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    if args.is_empty() || args.len() > 2 {
        return Err(c.malformed(form, "expected a block name and an optional value"));
    }
    let name = args[0]
        .as_symbol()
        .ok_or_else(|| c.malformed(form, "block name must be a symbol"))?;
    let binding = c
        .env()
        .lookup(&Value::symbol(name), Namespace::Block)
        .ok_or_else(|| CompileError::UnknownBlock(c.ctx.symbol_name(name).to_string()))?;
    binding.mark_used();
    let (id, multiple_values) = match &binding.reference {
        Reference::Block { id, multiple_values } => (id.clone(), *multiple_values),
        _ => return Err(CompileError::UnknownBlock(c.ctx.symbol_name(name).to_string())),
    };
    let value = args.get(1).cloned().unwrap_or(Value::Nil);
    let payload = if multiple_values {
        c.compile_bundle(&value)?
    } else {
        c.compile_single(&value)?
    };
    let label = Expr::string(c.ctx.symbol_name(name));
    Ok(raise("block", Expr::ident(id), payload, label))
}

// ============================================================================
// CATCH / THROW
// ============================================================================

/// The tag is evaluated at run time and matched by identity.
fn compile_catch(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let (tag, body) = match args.split_first() {
        Some(split) => split,
        None => return Err(c.malformed(form, "missing catch tag")),
    };
    let tag_var = c.fresh_var("tag");
    let tag = c.compile_single(tag)?;
    let stmts = c.compile_body(body)?;
    let result = Expr::internal_call("applyValues", vec![c.acceptor(), payload()]);
    Ok(Expr::iife(
        vec![],
        vec![],
        vec![
            Stmt::Var(tag_var.clone(), Some(tag)),
            guarded(
                stmts,
                matches_signal("catch", Expr::ident(tag_var)),
                vec![Stmt::Return(result)],
            ),
        ],
    ))
}

fn compile_throw(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    if args.len() != 2 {
        return Err(c.malformed(form, "expected a tag and a result form"));
    }
    let tag_var = c.fresh_var("tag");
    let tag = c.compile_single(&args[0])?;
    let bundle = c.compile_bundle(&args[1])?;
    let signal = Expr::internal_call(
        "transfer",
        vec![
            Expr::string("catch"),
            Expr::ident(tag_var.clone()),
            bundle,
            Expr::ident(tag_var.clone()),
        ],
    );
    Ok(Expr::iife(
        vec![],
        vec![],
        vec![Stmt::Var(tag_var, Some(tag)), Stmt::Throw(signal)],
    ))
}

// ============================================================================
// TAGBODY / GO
// ============================================================================

enum Segment {
    Tag(Value),
    Form(Value),
}

fn segments(c: &Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Vec<Segment>> {
    args.iter()
        .map(|item| match item {
            Value::Symbol(_) | Value::Nil | Value::Number(_) => Ok(Segment::Tag(item.clone())),
            Value::Cons(_) => Ok(Segment::Form(item.clone())),
            _ => Err(c.malformed(form, format!("{} is not a valid tag", c.describe(item)))),
        })
        .collect()
}

/// TAGBODY: a labeled loop around a switch on the current label. Control
/// falls through the cases in source order; GO throws the target label to
/// the loop's handler, which re-enters the switch there.
fn compile_tagbody(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let segments = segments(c, form, args)?;
    if !segments.iter().any(|s| matches!(s, Segment::Tag(_))) {
        let mut forms: Vec<Value> = args.to_vec();
        forms.push(Value::Nil);
        return c.compile_progn(&forms);
    }

    let (tagbody, loop_label) = c.ctx.counters.tagbody();
    let mut env = c.env().clone();
    let mut cases: Vec<Case> = Vec::new();
    let mut bindings = Vec::new();
    if !matches!(segments.first(), Some(Segment::Tag(_))) {
        cases.push(Case {
            test: Some(Expr::Number(c.ctx.counters.go_tag() as f64)),
            body: vec![],
        });
    }
    for segment in &segments {
        if let Segment::Tag(tag) = segment {
            let label = c.ctx.counters.go_tag();
            let binding = std::rc::Rc::new(Binding::new(
                tag.clone(),
                Namespace::GoTag,
                Reference::GoTag {
                    tagbody: tagbody.clone(),
                    label,
                },
            ));
            env = env.extend_rc(binding.clone());
            bindings.push(binding);
            cases.push(Case {
                test: Some(Expr::Number(label as f64)),
                body: vec![],
            });
        }
    }

    let first_label = match cases.first().and_then(|case| case.test.clone()) {
        Some(label) => label,
        None => return Err(c.malformed(form, "empty tagbody")),
    };
    let mut current = 0;
    // With an implicit leading label, the first real tag opens case 1.
    let mut started = !matches!(segments.first(), Some(Segment::Tag(_)));
    c.with_env(env, |c| {
        for segment in &segments {
            match segment {
                Segment::Tag(_) => {
                    if started {
                        current += 1;
                    }
                    started = true;
                }
                Segment::Form(item) => {
                    let expr = c.compile_single(item)?;
                    cases[current].body.push(Stmt::Expr(expr));
                }
            }
        }
        Ok(())
    })?;

    if !bindings.iter().any(|b| b.is_used()) {
        let mut stmts: Vec<Stmt> = cases.into_iter().flat_map(|case| case.body).collect();
        stmts.push(Stmt::Return(Expr::nil()));
        return Ok(Compiler::statements_expr(stmts));
    }

    let branch = c.fresh_var("branch");
    let dispatch = Stmt::Switch {
        discriminant: Expr::ident(branch.clone()),
        cases,
    };
    let body = guarded(
        vec![dispatch, Stmt::Break(Some(loop_label.clone()))],
        matches_signal("tagbody", Expr::ident(tagbody.clone())),
        vec![Stmt::Expr(Expr::assign(Expr::ident(branch.clone()), payload()))],
    );
    Ok(Expr::iife(
        vec![],
        vec![],
        vec![
            Stmt::Var(tagbody, Some(Expr::Array(vec![]))),
            Stmt::Var(branch, Some(first_label)),
            Stmt::While {
                label: Some(loop_label),
                test: Expr::Bool(true),
                body: vec![body],
            },
            Stmt::Return(Expr::nil()),
        ],
    ))
}

fn compile_go(c: &mut Compiler<'_>, form: &Value, args: &[Value]) -> CompileResult<Expr> {
    let tag = match args {
        [tag] => tag,
        _ => return Err(c.malformed(form, "expected exactly one tag")),
    };
    let binding = c
        .env()
        .lookup(tag, Namespace::GoTag)
        .ok_or_else(|| CompileError::UnknownTag(c.describe(tag)))?;
    binding.mark_used();
    match &binding.reference {
        Reference::GoTag { tagbody, label } => Ok(raise(
            "tagbody",
            Expr::ident(tagbody.clone()),
            Expr::Number(*label as f64),
            Expr::string(c.describe(tag)),
        )),
        _ => Err(CompileError::UnknownTag(c.describe(tag))),
    }
}

// ============================================================================
// UNWIND-PROTECT
// ============================================================================

fn compile_unwind_protect(
    c: &mut Compiler<'_>,
    form: &Value,
    args: &[Value],
) -> CompileResult<Expr> {
    let (protected, cleanup) = match args.split_first() {
        Some(split) => split,
        None => return Err(c.malformed(form, "missing protected form")),
    };
    let protected = c.compile(protected)?;
    if cleanup.is_empty() {
        return Ok(protected);
    }
    let mut finalizer = Vec::with_capacity(cleanup.len());
    for item in cleanup {
        let expr = c.compile_single(item)?;
        if !expr.is_constant() {
            finalizer.push(Stmt::Expr(expr));
        }
    }
    Ok(Expr::iife(
        vec![],
        vec![],
        vec![Stmt::Try {
            block: vec![Stmt::Return(protected)],
            handler: None,
            finalizer: Some(finalizer),
        }],
    ))
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
    fn test_unreferenced_block_has_no_handler() {
        let text = compile("(block a 1 2)").unwrap();
        assert!(!text.contains("catch"));
        assert!(text.contains("return 2;"));
    }

    #[test]
    fn test_referenced_block_matches_its_id() {
        let text = compile("(block a (return-from a 42) 99)").unwrap();
        assert!(text.contains("var b"));
        assert!(text.contains("cf.kind === \"block\""));
        assert!(text.contains("internals.transfer(\"block\""));
        assert!(text.contains("internals.applyValues(values, cf.payload)"));
    }

    #[test]
    fn test_unknown_block_and_tag() {
        assert!(matches!(compile("(return-from nowhere 1)"), Err(CompileError::UnknownBlock(_))));
        assert!(matches!(compile("(tagbody (go nowhere))"), Err(CompileError::UnknownTag(_))));
    }

    #[test]
    fn test_block_is_lexical_across_lambdas() {
        assert!(compile("(block a (function (lambda () (return-from a 1))))").is_ok());
        assert!(matches!(
            compile("(progn (block a 1) (return-from a 2))"),
            Err(CompileError::UnknownBlock(_))
        ));
    }

    #[test]
    fn test_tagbody_without_tags_is_progn() {
        let text = compile("(tagbody (foo))").unwrap();
        assert!(!text.contains("while"));
        assert!(text.contains("internals.NIL"));
    }

    #[test]
    fn test_tagbody_loop_shape() {
        let text = compile("(tagbody start (foo) (go start))").unwrap();
        assert!(text.contains("tbloop"));
        assert!(text.contains("switch (branch_"));
        assert!(text.contains("internals.transfer(\"tagbody\""));
    }

    #[test]
    fn test_unwind_protect_uses_finally() {
        let text = compile("(unwind-protect (foo) (bar))").unwrap();
        assert!(text.contains("finally"));
    }

    #[test]
    fn test_malformed_control_forms() {
        assert!(matches!(compile("(block)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(block 1)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(throw 'a)"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(tagbody \"x\")"), Err(CompileError::Malformed { .. })));
        assert!(matches!(compile("(unwind-protect)"), Err(CompileError::Malformed { .. })));
    }
}
