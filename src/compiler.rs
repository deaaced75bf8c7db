// HostLisp Compiler - Forms to Host Code
//
// Table-driven dispatch over source forms. The lexical environment and the
// multiple-value context are fields of the compiler, swapped in and out by
// the `with_*` guards; every special form lives in `special_forms` or
// `control` and is looked up by symbol identity.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, trace};

use crate::context::GlobalContext;
use crate::env::{Binding, Environment, Namespace, Reference};
use crate::host::{Exception, Host};
use crate::internals::values_of;
use crate::js::{BinOp, Expr, Program, Stmt};
use crate::lambda;
use crate::macroexpand;
use crate::primitives;
use crate::printer::print_to_string;
use crate::symbol::SymbolId;
use crate::types::Value;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("malformed {form}: {reason}")]
    Malformed { form: String, reason: String },

    #[error("illegal function call: {0}")]
    IllegalCall(String),

    #[error("not a function name: {0}")]
    BadFunctionName(String),

    #[error("return from unknown block: {0}")]
    UnknownBlock(String),

    #[error("attempt to GO to nonexistent tag: {0}")]
    UnknownTag(String),

    #[error("malformed lambda list {list}: {reason}")]
    LambdaList { list: String, reason: String },

    #[error("cannot compile literal {0}")]
    UnsupportedLiteral(String),

    #[error("{0} is a constant and cannot be assigned")]
    ConstantAssignment(String),

    #[error("{0} is a constant and cannot be bound")]
    ConstantBinding(String),

    #[error("comma not inside a backquote: {0}")]
    StrayUnquote(String),

    #[error(",@ after backquote in {0}")]
    SpliceOutsideList(String),

    #[error("error while expanding macro {name}: {message}")]
    MacroExpansion { name: String, message: String },

    #[error("error during compile-time evaluation: {0}")]
    CompileTimeEval(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// A special form: the compiler, the whole form and its argument forms.
pub type SpecialForm = fn(&mut Compiler<'_>, &Value, &[Value]) -> CompileResult<Expr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LiteralKey {
    Symbol(SymbolId),
    Character(char),
    Object(*const ()),
}

/// Literals hoisted to the head of the current top-level program.
#[derive(Default)]
struct CompileUnit {
    literals: HashMap<LiteralKey, String>,
    /// Keeps hoisted objects alive so their addresses stay unique keys.
    #[allow(dead_code)]
    pinned: Vec<Value>,
    initializers: Vec<Stmt>,
}

/// Declarations at the head of a body.
#[derive(Debug, Default)]
pub struct DeclSpecs {
    pub specials: HashSet<SymbolId>,
    pub notinline: Vec<SymbolId>,
    pub inline: Vec<SymbolId>,
}

/// A body split into docstring, declarations and forms.
pub struct Body {
    pub docstring: Option<String>,
    pub declarations: DeclSpecs,
    pub forms: Vec<Value>,
}

/// Statements that dynamically rebind special variables. Everything emitted
/// after a rebinding runs inside a `try` whose `finally` restores the old
/// value, so non-local exits unwind the binding too.
#[derive(Default)]
pub struct BindingScope {
    current: Vec<Stmt>,
    frames: Vec<(Vec<Stmt>, Vec<Stmt>)>,
}

impl BindingScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.current.push(stmt);
    }

    pub fn extend(&mut self, stmts: impl IntoIterator<Item = Stmt>) {
        self.current.extend(stmts);
    }

    pub fn bind_special(
        &mut self,
        c: &mut Compiler<'_>,
        sym: SymbolId,
        value: Expr,
    ) -> CompileResult<()> {
        let cell = Expr::member(c.symbol_literal(sym)?, "value");
        let old = c.fresh_var("old");
        self.current.push(Stmt::Var(old.clone(), Some(cell.clone())));
        self.current.push(Stmt::Expr(Expr::assign(cell.clone(), value)));
        let restore = vec![Stmt::Expr(Expr::assign(cell, Expr::ident(old)))];
        let before = std::mem::take(&mut self.current);
        self.frames.push((before, restore));
        Ok(())
    }

    pub fn finish(mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        self.current.extend(body);
        let mut stmts = self.current;
        while let Some((mut before, restore)) = self.frames.pop() {
            before.push(Stmt::Try {
                block: stmts,
                handler: None,
                finalizer: Some(restore),
            });
            stmts = before;
        }
        stmts
    }
}

pub struct Compiler<'a> {
    pub ctx: &'a mut GlobalContext,
    pub host: &'a Host,
    env: Environment,
    multiple_values: bool,
    unit: CompileUnit,
}

impl<'a> Compiler<'a> {
    pub fn new(ctx: &'a mut GlobalContext, host: &'a Host) -> Self {
        Self {
            ctx,
            host,
            env: Environment::empty(),
            multiple_values: true,
            unit: CompileUnit::default(),
        }
    }

    /// Compile one top-level form into a self-contained program:
    /// `(function(values){ literals; return FORM; })(internals.mv)`.
    /// A failed compile leaves nothing behind.
    pub fn compile_toplevel(&mut self, form: &Value) -> CompileResult<Program> {
        let unit = self.ctx.counters.unit();
        debug!(unit, form = %self.describe(form), "compiling top-level form");
        self.unit = CompileUnit::default();
        self.env = Environment::empty();
        self.multiple_values = true;
        let result = self.compile(form);
        let compiled = std::mem::take(&mut self.unit);
        let expr = result?;
        let mut body = compiled.initializers;
        body.push(Stmt::Return(expr));
        Ok(Program {
            body: vec![Stmt::Expr(Expr::iife(
                vec!["values".to_string()],
                vec![Expr::Internal("mv")],
                body,
            ))],
        })
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn multiple_values(&self) -> bool {
        self.multiple_values
    }

    pub fn describe(&self, value: &Value) -> String {
        print_to_string(value, &self.ctx.symbols)
    }

    pub fn malformed(&self, form: &Value, reason: impl Into<String>) -> CompileError {
        CompileError::Malformed {
            form: self.describe(form),
            reason: reason.into(),
        }
    }

    pub fn fresh_var(&mut self, hint: &str) -> String {
        self.ctx.counters.variable(hint)
    }

    /// A fresh host variable named after a Lisp symbol.
    pub fn fresh_var_for(&mut self, sym: SymbolId) -> String {
        let hint = self.ctx.symbols.symbol_name(sym).to_string();
        self.ctx.counters.variable(&hint)
    }

    // ========================================================================
    // Guards
    // ========================================================================

    /// Run `f` with `env` as the lexical environment; the previous one is
    /// restored on every exit.
    pub fn with_env<T>(
        &mut self,
        env: Environment,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        let saved = std::mem::replace(&mut self.env, env);
        let result = f(self);
        self.env = saved;
        result
    }

    pub fn with_multiple_values<T>(
        &mut self,
        on: bool,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        let saved = std::mem::replace(&mut self.multiple_values, on);
        let result = f(self);
        self.multiple_values = saved;
        result
    }

    /// The acceptor handed to callees at the current position.
    pub fn acceptor(&self) -> Expr {
        if self.multiple_values {
            Expr::ident("values")
        } else {
            Expr::Internal("pv")
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    pub fn compile(&mut self, form: &Value) -> CompileResult<Expr> {
        match form {
            Value::Symbol(id) => self.compile_symbol(*id),
            Value::Cons(_) => self.compile_compound(form),
            other => self.literal(other),
        }
    }

    /// Compile for the primary value only.
    pub fn compile_single(&mut self, form: &Value) -> CompileResult<Expr> {
        self.with_multiple_values(false, |c| c.compile(form))
    }

    /// Compile so that the result is always a complete values bundle,
    /// whatever acceptor is in scope: `values` is rebound to `internals.mv`.
    pub fn compile_bundle(&mut self, form: &Value) -> CompileResult<Expr> {
        let expr = self.with_multiple_values(true, |c| c.compile(form))?;
        Ok(Expr::iife(
            vec![],
            vec![],
            vec![
                Stmt::Var("values".to_string(), Some(Expr::Internal("mv"))),
                Stmt::Return(expr),
            ],
        ))
    }

    pub fn compile_args(&mut self, args: &[Value]) -> CompileResult<Vec<Expr>> {
        self.with_multiple_values(false, |c| args.iter().map(|a| c.compile(a)).collect())
    }

    fn compile_compound(&mut self, form: &Value) -> CompileResult<Expr> {
        let head = form.car().unwrap_or(Value::Nil);
        let args = form
            .cdr()
            .and_then(|rest| rest.list_to_vec())
            .ok_or_else(|| self.malformed(form, "dotted argument list"))?;

        let id = match &head {
            Value::Symbol(id) => *id,
            Value::Cons(_) if self.is_lambda_expression(&head) => {
                let callee = self.function_reference(&head)?;
                return self.compile_call(callee, &args);
            }
            _ => return Err(CompileError::IllegalCall(self.describe(form))),
        };

        if id == self.ctx.known.lambda {
            return self.function_reference(form);
        }
        if let Some(special) = self.ctx.special_form(id) {
            trace!(form = %self.ctx.symbol_name(id), "special form");
            return special(self, form, &args);
        }

        let binding = self
            .resolve(&head, Namespace::Function)
            .ok_or_else(|| CompileError::IllegalCall(self.describe(form)))?;
        binding.mark_used();
        match &binding.reference {
            Reference::Macro(expander) => {
                let expander = expander.clone();
                let expansion = macroexpand::call_expander(self, id, &expander, form)?;
                self.compile(&expansion)
            }
            Reference::Local(name) => {
                let callee = Expr::ident(name.clone());
                self.compile_call(callee, &args)
            }
            Reference::Global => {
                if !binding.is_notinline() {
                    if let Some(prim) = self.ctx.primitive(id) {
                        if prim.arity.accepts(args.len()) {
                            let acceptor = self.acceptor();
                            let compiled = self.compile_args(&args)?;
                            if let Some(code) = primitives::inline(prim, compiled, acceptor) {
                                return Ok(code);
                            }
                        }
                    }
                }
                let callee = self.global_function(id)?;
                self.compile_call(callee, &args)
            }
            _ => Err(CompileError::IllegalCall(self.describe(form))),
        }
    }

    /// `callee(ACCEPTOR, args...)`
    pub fn compile_call(&mut self, callee: Expr, args: &[Value]) -> CompileResult<Expr> {
        let mut actuals = vec![self.acceptor()];
        actuals.extend(self.compile_args(args)?);
        Ok(Expr::call(callee, actuals))
    }

    fn global_function(&mut self, sym: SymbolId) -> CompileResult<Expr> {
        let cell = self.symbol_literal(sym)?;
        Ok(Expr::internal_call("symbolFunction", vec![cell]))
    }

    pub fn is_lambda_expression(&self, form: &Value) -> bool {
        let known = &self.ctx.known;
        matches!(
            form.car().and_then(|h| h.as_symbol()),
            Some(id) if id == known.lambda || id == known.named_lambda
        )
    }

    /// The function a designator form names: a symbol in the Function
    /// namespace or a lambda expression.
    pub fn function_reference(&mut self, designator: &Value) -> CompileResult<Expr> {
        match designator {
            Value::Symbol(id) => {
                let binding = self
                    .resolve(designator, Namespace::Function)
                    .ok_or_else(|| CompileError::BadFunctionName(self.describe(designator)))?;
                binding.mark_used();
                match &binding.reference {
                    Reference::Local(name) => Ok(Expr::ident(name.clone())),
                    Reference::Global => self.global_function(*id),
                    _ => Err(CompileError::BadFunctionName(self.describe(designator))),
                }
            }
            Value::Cons(_) if self.is_lambda_expression(designator) => {
                let parts = designator
                    .list_to_vec()
                    .ok_or_else(|| self.malformed(designator, "dotted lambda expression"))?;
                let named =
                    parts.first().and_then(|h| h.as_symbol()) == Some(self.ctx.known.named_lambda);
                let (name, rest) = if named {
                    let name = parts
                        .get(1)
                        .and_then(|n| n.as_symbol())
                        .ok_or_else(|| {
                            self.malformed(designator, "NAMED-LAMBDA needs a symbol name")
                        })?;
                    (Some(name), parts.get(2..).unwrap_or(&[]))
                } else {
                    (None, parts.get(1..).unwrap_or(&[]))
                };
                let (lambda_list, body) = rest
                    .split_first()
                    .ok_or_else(|| self.malformed(designator, "missing lambda list"))?;
                lambda::compile_lambda(self, lambda_list, body, name)
            }
            other => Err(CompileError::BadFunctionName(self.describe(other))),
        }
    }

    // ========================================================================
    // Variables
    // ========================================================================

    pub fn resolve(&mut self, name: &Value, namespace: Namespace) -> Option<std::rc::Rc<Binding>> {
        self.ctx.globals.resolve(&self.env, name, namespace)
    }

    /// Constants evaluate to themselves: T, keywords and DEFCONSTANT names.
    pub fn is_constant_symbol(&mut self, sym: SymbolId) -> bool {
        if sym == SymbolId::T || sym == SymbolId::NIL || self.ctx.symbols.is_keyword(sym) {
            return true;
        }
        self.resolve(&Value::symbol(sym), Namespace::Variable)
            .map_or(false, |b| b.is_constant())
    }

    /// Whether a newly bound variable is dynamic: declared special at the
    /// binding form, or proclaimed special globally.
    pub fn binds_special(&self, sym: SymbolId, declarations: &DeclSpecs) -> bool {
        declarations.specials.contains(&sym)
            || self
                .ctx
                .globals
                .get(sym, Namespace::Variable)
                .map_or(false, |b| b.is_special())
    }

    fn compile_symbol(&mut self, id: SymbolId) -> CompileResult<Expr> {
        if id == SymbolId::T || self.ctx.symbols.is_keyword(id) {
            return self.symbol_literal(id);
        }
        let name = Value::Symbol(id);
        let binding = self
            .resolve(&name, Namespace::Variable)
            .ok_or_else(|| CompileError::UnsupportedLiteral(self.describe(&name)))?;
        binding.mark_used();
        match &binding.reference {
            Reference::Constant(value) => {
                let value = value.clone();
                self.literal(&value)
            }
            Reference::Local(var) if !binding.is_special() => Ok(Expr::ident(var.clone())),
            _ => {
                let cell = self.symbol_literal(id)?;
                Ok(Expr::internal_call("symbolValue", vec![cell]))
            }
        }
    }

    /// Assignment target for a variable, after checking it is assignable.
    pub fn variable_place(&mut self, sym: SymbolId) -> CompileResult<Expr> {
        if self.is_constant_symbol(sym) {
            return Err(CompileError::ConstantAssignment(self.ctx.symbol_name(sym).to_string()));
        }
        let name = Value::Symbol(sym);
        let binding = self
            .resolve(&name, Namespace::Variable)
            .ok_or_else(|| CompileError::UnsupportedLiteral(self.describe(&name)))?;
        binding.mark_used();
        match &binding.reference {
            Reference::Local(var) if !binding.is_special() => Ok(Expr::ident(var.clone())),
            _ => Ok(Expr::member(self.symbol_literal(sym)?, "value")),
        }
    }

    // ========================================================================
    // Literals
    // ========================================================================

    pub fn literal(&mut self, value: &Value) -> CompileResult<Expr> {
        match value {
            Value::Nil => Ok(Expr::nil()),
            Value::Number(n) => Ok(Expr::Number(*n)),
            Value::String(s) => Ok(Expr::string(s.as_ref())),
            Value::Symbol(id) => self.symbol_literal(*id),
            Value::Character(_) | Value::Cons(_) | Value::Vector(_) => self.hoist(value),
            other => Err(CompileError::UnsupportedLiteral(self.describe(other))),
        }
    }

    pub fn symbol_literal(&mut self, sym: SymbolId) -> CompileResult<Expr> {
        match sym {
            SymbolId::NIL => Ok(Expr::nil()),
            SymbolId::T => Ok(Expr::t()),
            _ => self.hoist(&Value::Symbol(sym)),
        }
    }

    fn hoist(&mut self, value: &Value) -> CompileResult<Expr> {
        let key = match value {
            Value::Symbol(id) => LiteralKey::Symbol(*id),
            Value::Character(c) => LiteralKey::Character(*c),
            Value::Cons(cell) => LiteralKey::Object(std::rc::Rc::as_ptr(cell) as *const ()),
            Value::Vector(items) => LiteralKey::Object(std::rc::Rc::as_ptr(items) as *const ()),
            other => return Err(CompileError::UnsupportedLiteral(self.describe(other))),
        };
        if let Some(name) = self.unit.literals.get(&key) {
            return Ok(Expr::ident(name.clone()));
        }
        let init = match value {
            Value::Symbol(id) => self.symbol_initializer(*id),
            Value::Character(c) => {
                Expr::internal_call("character", vec![Expr::Number(*c as u32 as f64)])
            }
            Value::Cons(cell) => {
                let car = self.literal(&cell.car())?;
                let cdr = self.literal(&cell.cdr())?;
                Expr::internal_call("cons", vec![car, cdr])
            }
            Value::Vector(items) => {
                let items = items.borrow().clone();
                let mut elements = Vec::with_capacity(items.len());
                for item in &items {
                    elements.push(self.literal(item)?);
                }
                Expr::internal_call("vector", elements)
            }
            other => return Err(CompileError::UnsupportedLiteral(self.describe(other))),
        };
        let name = self.ctx.counters.literal();
        self.unit.initializers.push(Stmt::Var(name.clone(), Some(init)));
        self.unit.literals.insert(key, name.clone());
        self.unit.pinned.push(value.clone());
        Ok(Expr::ident(name))
    }

    fn symbol_initializer(&self, sym: SymbolId) -> Expr {
        let symbol = self.ctx.symbols.symbol(sym);
        match symbol.package {
            Some(pkg) => Expr::internal_call(
                "internSymbol",
                vec![
                    Expr::string(symbol.name.as_str()),
                    Expr::string(self.ctx.symbols.package_name(pkg)),
                ],
            ),
            None => Expr::internal_call(
                "uninternedSymbol",
                vec![Expr::string(symbol.name.as_str()), Expr::Number(sym.0 as f64)],
            ),
        }
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Statements for a body: all but the last form for effect, the last
    /// one returned. Constant forms in effect position are dropped.
    pub fn compile_body(&mut self, forms: &[Value]) -> CompileResult<Vec<Stmt>> {
        let (last, init) = match forms.split_last() {
            Some(split) => split,
            None => return Ok(vec![Stmt::Return(Expr::nil())]),
        };
        let mut stmts = Vec::with_capacity(forms.len());
        for form in init {
            let expr = self.compile_single(form)?;
            if !expr.is_constant() {
                stmts.push(Stmt::Expr(expr));
            }
        }
        stmts.push(Stmt::Return(self.compile(last)?));
        Ok(stmts)
    }

    /// The same sequence as a single comma expression.
    pub fn compile_progn(&mut self, forms: &[Value]) -> CompileResult<Expr> {
        let (last, init) = match forms.split_last() {
            Some(split) => split,
            None => return Ok(Expr::nil()),
        };
        let mut exprs = Vec::with_capacity(forms.len());
        for form in init {
            let expr = self.compile_single(form)?;
            if !expr.is_constant() {
                exprs.push(expr);
            }
        }
        let last = self.compile(last)?;
        if exprs.is_empty() {
            return Ok(last);
        }
        exprs.push(last);
        Ok(Expr::Comma(exprs))
    }

    /// Wrap statements as an expression; a lone `return` is unwrapped.
    pub fn statements_expr(stmts: Vec<Stmt>) -> Expr {
        match <[Stmt; 1]>::try_from(stmts) {
            Ok([Stmt::Return(expr)]) => expr,
            Ok([other]) => Expr::iife(vec![], vec![], vec![other]),
            Err(stmts) => Expr::iife(vec![], vec![], stmts),
        }
    }

    /// `x !== internals.NIL`: Lisp truth in a host test position.
    pub fn truth_test(expr: Expr) -> Expr {
        Expr::binary(BinOp::StrictNe, expr, Expr::nil())
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Split off a docstring (only when more forms follow) and leading
    /// `declare` forms.
    pub fn parse_body(&mut self, forms: &[Value], allow_docstring: bool) -> CompileResult<Body> {
        let mut docstring = None;
        let mut declarations = DeclSpecs::default();
        let mut rest = forms;
        loop {
            match rest {
                [Value::String(doc), more @ ..]
                    if allow_docstring && docstring.is_none() && !more.is_empty() =>
                {
                    docstring = Some(doc.to_string());
                    rest = more;
                }
                [first, more @ ..] if self.is_declaration(first) => {
                    self.parse_declaration(first, &mut declarations)?;
                    rest = more;
                }
                _ => break,
            }
        }
        Ok(Body {
            docstring,
            declarations,
            forms: rest.to_vec(),
        })
    }

    fn is_declaration(&self, form: &Value) -> bool {
        form.car().and_then(|h| h.as_symbol()) == Some(self.ctx.known.declare)
    }

    /// Record the specs of a `(declare ...)` or `(declaim ...)` form.
    pub fn parse_declaration(&self, form: &Value, into: &mut DeclSpecs) -> CompileResult<()> {
        let specs = form
            .cdr()
            .and_then(|r| r.list_to_vec())
            .ok_or_else(|| self.malformed(form, "dotted declaration"))?;
        for spec in specs {
            let items = spec
                .list_to_vec()
                .ok_or_else(|| self.malformed(form, "declaration specifier must be a list"))?;
            let (kind, names) = match items.split_first() {
                Some((kind, names)) => (kind.as_symbol(), names),
                None => continue,
            };
            let known = &self.ctx.known;
            let kind = match kind {
                Some(k) if k == known.special => DeclKind::Special,
                Some(k) if k == known.notinline => DeclKind::Notinline,
                Some(k) if k == known.inline => DeclKind::Inline,
                // type, ignore, optimize and the rest carry no meaning here
                _ => continue,
            };
            for name in names {
                let sym = name
                    .as_symbol()
                    .ok_or_else(|| self.malformed(form, "declared name must be a symbol"))?;
                match kind {
                    DeclKind::Special => {
                        into.specials.insert(sym);
                    }
                    DeclKind::Notinline => into.notinline.push(sym),
                    DeclKind::Inline => into.inline.push(sym),
                }
            }
        }
        Ok(())
    }

    /// Free declarations: a shadowing copy of the current binding carrying
    /// the new flag, so the outer scope is unaffected. Names in `bound` are
    /// handled by the binding form itself.
    pub fn apply_free_declarations(
        &mut self,
        env: Environment,
        declarations: &DeclSpecs,
        bound: &[SymbolId],
    ) -> Environment {
        let mut env = env;
        for &sym in &declarations.specials {
            if bound.contains(&sym) {
                continue;
            }
            let current = self.ctx.globals.resolve(&env, &Value::symbol(sym), Namespace::Variable);
            if let Some(current) = current {
                let shadow = current.shadow();
                shadow.set_special(true);
                env = env.extend(shadow);
            }
        }
        let function_flags = declarations
            .notinline
            .iter()
            .map(|s| (*s, true))
            .chain(declarations.inline.iter().map(|s| (*s, false)));
        for (sym, notinline) in function_flags {
            let current = self.ctx.globals.resolve(&env, &Value::symbol(sym), Namespace::Function);
            if let Some(current) = current {
                let shadow = current.shadow();
                shadow.set_notinline(notinline);
                env = env.extend(shadow);
            }
        }
        env
    }

    /// Environment binding for a variable just introduced by a binding form.
    pub fn variable_binding(&self, sym: SymbolId, var: &str, special: bool) -> Binding {
        if special {
            let binding = Binding::variable(sym, Reference::Global);
            binding.set_special(true);
            binding
        } else {
            Binding::variable(sym, Reference::Local(var.to_string()))
        }
    }

    pub fn check_bindable(&mut self, sym: SymbolId) -> CompileResult<()> {
        if self.is_constant_symbol(sym) {
            return Err(CompileError::ConstantBinding(self.ctx.symbol_name(sym).to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Compile-time evaluation
    // ========================================================================

    /// Compile `form` as its own top-level unit and run it now. Used for
    /// macro expanders, `eval-when (:compile-toplevel)` and DEFCONSTANT.
    pub fn eval_at_compile_time(&mut self, form: &Value) -> CompileResult<Value> {
        let program = {
            let mut nested = Compiler::new(&mut *self.ctx, self.host);
            nested.compile_toplevel(form)?
        };
        trace!(program = %program, "compile-time evaluation");
        let result = self.host.run(&program, &mut self.ctx.symbols);
        match result {
            Ok(value) => Ok(values_of(&value).into_iter().next().unwrap_or(Value::Nil)),
            Err(e) => Err(CompileError::CompileTimeEval(self.describe_exception(&e))),
        }
    }

    pub fn describe_exception(&self, e: &Exception) -> String {
        match e {
            Exception::Error(err) => err.to_string(),
            Exception::Throw(Value::Transfer(t)) => {
                let name = t.name.clone().unwrap_or_else(|| self.describe(&t.id));
                format!("attempt to {} to {}, which is no longer active", t.kind.as_str(), name)
            }
            Exception::Throw(other) => format!("uncaught host exception: {}", self.describe(other)),
        }
    }
}

#[derive(Clone, Copy)]
enum DeclKind {
    Special,
    Notinline,
    Inline,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_from_string;

    fn compile(source: &str) -> CompileResult<String> {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let form = read_from_string(source, &mut ctx.symbols, &[]).unwrap().unwrap();
        let mut compiler = Compiler::new(&mut ctx, &host);
        compiler.compile_toplevel(&form).map(|p| p.to_string())
    }

    #[test]
    fn test_toplevel_shape() {
        let text = compile("42").unwrap();
        assert!(text.starts_with("(function(values) {"));
        assert!(text.contains("return 42;"));
        assert!(text.contains("})(internals.mv);"));
    }

    #[test]
    fn test_symbol_literals_are_hoisted_once() {
        let text = compile("(list 'foo 'foo)").unwrap();
        let intern = "internals.internSymbol(\"FOO\", \"COMMON-LISP-USER\")";
        assert_eq!(text.matches(intern).count(), 1);
    }

    #[test]
    fn test_inline_primitive() {
        let text = compile("(+ 1 2)").unwrap();
        assert!(text.contains("return 1 + 2;"));
    }

    #[test]
    fn test_global_call_passes_acceptor() {
        let text = compile("(foo 1)").unwrap();
        assert!(text.contains("internals.symbolFunction(l"));
        assert!(text.contains("(values, 1)"));
    }

    #[test]
    fn test_free_variable_reads_value_cell() {
        let text = compile("x").unwrap();
        assert!(text.contains("internals.symbolValue(l"));
    }

    #[test]
    fn test_illegal_call() {
        assert!(matches!(compile("(1 2)"), Err(CompileError::IllegalCall(_))));
        assert!(matches!(compile("(foo . 1)"), Err(CompileError::Malformed { .. })));
    }

    #[test]
    fn test_binding_scope_nests_finally() {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let sym = ctx.symbols.intern("*X*", crate::symbol::PackageId::COMMON_LISP_USER);
        let mut compiler = Compiler::new(&mut ctx, &host);
        let mut scope = BindingScope::new();
        scope.bind_special(&mut compiler, sym, Expr::Number(1.0)).unwrap();
        let stmts = scope.finish(vec![Stmt::Return(Expr::nil())]);
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[2], Stmt::Try { finalizer: Some(_), .. }));
    }
}
