// HostLisp Script Host
//
// Executes the target AST in-process: closures, `var` scoping, labeled
// loops, switch fallthrough, try/catch/finally and dynamic properties.
// Compiled code only ever sees this machine through `internals.*` and the
// property protocol below.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::trace;

use crate::internals;
use crate::js::{BinOp, Expr, FunctionExpr, Program, Stmt, UnaryOp};
use crate::primitives;
use crate::printer::print_to_string;
use crate::symbol::{SymbolId, SymbolTable};
use crate::types::{Function, FunctionKind, Transfer, TransferKind, Value};

/// Signature of runtime support routines.
pub type NativeFn = fn(&mut Machine<'_>, &[Value]) -> Result<Value, Exception>;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("the variable {0} is unbound")]
    UnboundVariable(String),

    #[error("the function {0} is undefined")]
    UndefinedFunction(String),

    #[error("invalid number of arguments: {got} (expected {expected})")]
    Arity { expected: String, got: usize },

    #[error("odd number of &KEY arguments")]
    OddKeywords,

    #[error("unknown &KEY argument: {0}")]
    UnknownKeyword(String),

    #[error("{0} is not a function")]
    NotAFunction(String),

    #[error("the value {value} is not of type {expected}")]
    TypeError { value: String, expected: &'static str },

    #[error("attempt to {kind} to {name}, which is no longer active")]
    UnmatchedTransfer { kind: &'static str, name: String },

    #[error("uncaught host exception: {0}")]
    Uncaught(String),

    #[error("{0}")]
    Signal(String),

    #[error("control stack exhausted (depth {0})")]
    StackExhausted(usize),

    #[error("host error: {0}")]
    Host(String),
}

/// An abrupt completion. `Throw` is catchable by compiled `catch` clauses;
/// `Error` only runs `finally` blocks on its way out.
#[derive(Debug, Clone)]
pub enum Exception {
    Throw(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Exception {
    fn from(err: RuntimeError) -> Self {
        Exception::Error(err)
    }
}

pub type Eval<T> = Result<T, Exception>;

/// A compiled function together with the scope it closes over.
pub struct Closure {
    pub code: Rc<FunctionExpr>,
    pub scope: Rc<Scope>,
}

/// A variable scope. Function scopes receive `var` declarations; other
/// scopes only hold catch parameters.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    function: bool,
}

impl Scope {
    pub fn global() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function: true,
        })
    }

    fn child(parent: &Rc<Scope>, function: bool) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            function,
        })
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref()?.lookup(name)
    }

    fn assign(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    fn bind(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// `var` semantics: declare in the nearest function scope. A bare
    /// redeclaration keeps the current value.
    fn declare(self: &Rc<Self>, name: &str, value: Option<Value>) {
        let mut scope = self.clone();
        while !scope.function {
            match &scope.parent {
                Some(parent) => scope = parent.clone(),
                None => break,
            }
        }
        let mut vars = scope.vars.borrow_mut();
        match value {
            Some(v) => {
                vars.insert(name.to_string(), v);
            }
            None => {
                vars.entry(name.to_string()).or_insert(Value::Undefined);
            }
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break(Option<String>),
}

/// The process-wide host: the `internals` object and the global scope.
pub struct Host {
    internals: HashMap<&'static str, Value>,
    global: Rc<Scope>,
    max_depth: usize,
}

impl Host {
    pub fn new(max_depth: usize) -> Self {
        let mut internals = HashMap::new();
        internals.insert("NIL", Value::Nil);
        internals.insert("T", Value::Symbol(SymbolId::T));
        for (name, call) in internals::natives() {
            internals.insert(name, native(name, call));
        }
        for prim in primitives::PRIMITIVES {
            internals.insert(prim.js, native(prim.js, prim.native));
        }
        Self {
            internals,
            global: Scope::global(),
            max_depth,
        }
    }

    pub fn internal(&self, name: &str) -> Option<Value> {
        self.internals.get(name).cloned()
    }

    pub fn machine<'a>(&'a self, symbols: &'a mut SymbolTable) -> Machine<'a> {
        Machine {
            host: self,
            symbols,
            depth: 0,
        }
    }

    /// Evaluate a program; the value is that of its last expression
    /// statement.
    pub fn run(&self, program: &Program, symbols: &mut SymbolTable) -> Eval<Value> {
        let mut machine = self.machine(symbols);
        let mut last = Value::Undefined;
        for stmt in &program.body {
            match stmt {
                Stmt::Expr(expr) => last = machine.eval(expr, &self.global)?,
                other => match machine.exec(other, &self.global)? {
                    Flow::Normal => {}
                    Flow::Return(v) => return Ok(v),
                    Flow::Break(_) => return Err(host_error("break outside of a loop")),
                },
            }
        }
        Ok(last)
    }

    /// Call a host function from Rust (macro expanders, the session).
    pub fn call(
        &self,
        symbols: &mut SymbolTable,
        function: &Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        self.machine(symbols).call(function, args)
    }
}

fn native(name: &'static str, call: NativeFn) -> Value {
    Value::Function(Rc::new(Function::new(FunctionKind::Native { name, call })))
}

pub fn host_error(message: impl Into<String>) -> Exception {
    Exception::Error(RuntimeError::Host(message.into()))
}

/// One activation of the host, borrowing the symbol table for the
/// duration of a run.
pub struct Machine<'a> {
    pub host: &'a Host,
    pub symbols: &'a mut SymbolTable,
    depth: usize,
}

impl Machine<'_> {
    pub fn describe(&self, value: &Value) -> String {
        print_to_string(value, self.symbols)
    }

    pub fn type_error(&self, value: &Value, expected: &'static str) -> Exception {
        Exception::Error(RuntimeError::TypeError {
            value: self.describe(value),
            expected,
        })
    }

    pub fn call(&mut self, function: &Value, args: Vec<Value>) -> Eval<Value> {
        let func = match function {
            Value::Function(f) => f.clone(),
            other => return Err(RuntimeError::NotAFunction(self.describe(other)).into()),
        };
        match &func.kind {
            FunctionKind::Closure(closure) => {
                if self.depth >= self.host.max_depth {
                    return Err(RuntimeError::StackExhausted(self.depth).into());
                }
                self.depth += 1;
                let result = self.call_closure(closure, args);
                self.depth -= 1;
                result
            }
            FunctionKind::Native { call, .. } => call(self, &args),
            FunctionKind::Primitive(prim) => primitives::call_as_function(self, prim, &args),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Eval<Value> {
        let scope = Scope::child(&closure.scope, true);
        for (i, param) in closure.code.params.iter().enumerate() {
            scope.bind(param, args.get(i).cloned().unwrap_or(Value::Undefined));
        }
        scope.bind("arguments", Value::vector(args));
        match self.exec_block(&closure.code.body, &scope)? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::Undefined),
            Flow::Break(_) => Err(host_error("break outside of a loop")),
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Eval<Flow> {
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Eval<Flow> {
        match stmt {
            Stmt::Var(name, init) => {
                let value = match init {
                    Some(expr) => Some(self.eval(expr, scope)?),
                    None => None,
                };
                scope.declare(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(expr) => Ok(Flow::Return(self.eval(expr, scope)?)),
            Stmt::If(test, then, otherwise) => {
                if self.eval(test, scope)?.truthy() {
                    self.exec_block(then, scope)
                } else {
                    self.exec_block(otherwise, scope)
                }
            }
            Stmt::While { label, test, body } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Normal => {}
                        Flow::Break(None) => break,
                        Flow::Break(Some(target)) if label.as_ref() == Some(&target) => break,
                        abrupt => return Ok(abrupt),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.eval(init, scope)?;
                while self.eval(test, scope)?.truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Normal => {}
                        Flow::Break(None) => break,
                        abrupt => return Ok(abrupt),
                    }
                    self.eval(update, scope)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, scope)?;
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if strict_equals(&value, &self.eval(test, scope)?) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                if let Some(start) = start {
                    for case in &cases[start..] {
                        match self.exec_block(&case.body, scope)? {
                            Flow::Normal => {}
                            Flow::Break(None) => break,
                            abrupt => return Ok(abrupt),
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break(label) => Ok(Flow::Break(label.clone())),
            Stmt::Throw(expr) => Err(Exception::Throw(self.eval(expr, scope)?)),
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, scope);
                if let (Err(Exception::Throw(thrown)), Some((param, body))) = (&result, handler) {
                    let catch_scope = Scope::child(scope, false);
                    catch_scope.bind(param, thrown.clone());
                    result = self.exec_block(body, &catch_scope);
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, scope)? {
                        Flow::Normal => {}
                        abrupt => return Ok(abrupt),
                    }
                }
                result
            }
        }
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Eval<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::string(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| host_error(format!("{} is not defined", name))),
            Expr::Internal(name) => self
                .host
                .internal(name)
                .ok_or_else(|| host_error(format!("internals.{} is not defined", name))),
            Expr::Member(object, property) => {
                let object = self.eval(object, scope)?;
                Ok(self.get_property(&object, property))
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                Ok(index_value(&object, &index))
            }
            // A function literal called in place is a body wrapper; it runs
            // without counting toward the call depth.
            Expr::Call(callee, args) => {
                let mut values = Vec::with_capacity(args.len());
                if let Expr::Function(code) = callee.as_ref() {
                    for arg in args {
                        values.push(self.eval(arg, scope)?);
                    }
                    let closure = Closure {
                        code: code.clone(),
                        scope: scope.clone(),
                    };
                    return self.call_closure(&closure, values);
                }
                let function = self.eval(callee, scope)?;
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call(&function, values)
            }
            Expr::Function(code) => Ok(Value::Function(Rc::new(Function::new(
                FunctionKind::Closure(Closure {
                    code: code.clone(),
                    scope: scope.clone(),
                }),
            )))),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                Ok(Value::vector(values))
            }
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    self.eval(right, scope)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!self.eval(operand, scope)?.truthy()))
            }
            Expr::Unary(UnaryOp::Neg, operand) => match self.eval(operand, scope)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(self.type_error(&other, "NUMBER")),
            },
            Expr::Cond(test, then, otherwise) => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign(target, value) => {
                let value = self.eval(value, scope)?;
                self.assign(target, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Comma(exprs) => {
                let mut last = Value::Undefined;
                for e in exprs {
                    last = self.eval(e, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> Eval<()> {
        match target {
            Expr::Ident(name) => {
                if scope.assign(name, value) {
                    Ok(())
                } else {
                    Err(host_error(format!("assignment to undeclared variable {}", name)))
                }
            }
            Expr::Member(object, property) => {
                let object = self.eval(object, scope)?;
                self.set_property(&object, property, value)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                match (&object, &index) {
                    (Value::Vector(items), Value::Number(i)) if *i >= 0.0 => {
                        let i = *i as usize;
                        let mut items = items.borrow_mut();
                        if i >= items.len() {
                            items.resize(i + 1, Value::Undefined);
                        }
                        items[i] = value;
                        Ok(())
                    }
                    _ => Err(self.type_error(&object, "VECTOR")),
                }
            }
            _ => Err(host_error("invalid assignment target")),
        }
    }

    fn binary(&self, op: BinOp, left: &Value, right: &Value) -> Eval<Value> {
        let result = match op {
            BinOp::StrictEq | BinOp::Eq => Value::Bool(strict_equals(left, right)),
            BinOp::StrictNe | BinOp::Ne => Value::Bool(!strict_equals(left, right)),
            _ => match (left, right) {
                (Value::Number(a), Value::Number(b)) => match op {
                    BinOp::Add => Value::Number(a + b),
                    BinOp::Sub => Value::Number(a - b),
                    BinOp::Mul => Value::Number(a * b),
                    BinOp::Div => Value::Number(a / b),
                    BinOp::Mod => Value::Number(a % b),
                    BinOp::Lt => Value::Bool(a < b),
                    BinOp::Gt => Value::Bool(a > b),
                    BinOp::Le => Value::Bool(a <= b),
                    BinOp::Ge => Value::Bool(a >= b),
                    _ => return Err(host_error(format!("unsupported operator {}", op.as_str()))),
                },
                (Value::String(a), Value::String(b)) => match op {
                    BinOp::Add => Value::string(&format!("{}{}", a, b)),
                    BinOp::Lt => Value::Bool(a < b),
                    BinOp::Gt => Value::Bool(a > b),
                    BinOp::Le => Value::Bool(a <= b),
                    BinOp::Ge => Value::Bool(a >= b),
                    _ => return Err(self.type_error(left, "NUMBER")),
                },
                (Value::Number(_), other) | (other, _) => {
                    return Err(self.type_error(other, "NUMBER"))
                }
            },
        };
        Ok(result)
    }

    pub fn get_property(&self, object: &Value, property: &str) -> Value {
        match (object, property) {
            (Value::Nil | Value::Symbol(_), _) => {
                let id = object.as_symbol().unwrap_or(SymbolId::NIL);
                let symbol = self.symbols.symbol(id);
                match property {
                    "value" => symbol.value.clone().unwrap_or(Value::Undefined),
                    "fvalue" => symbol.function.clone().unwrap_or(Value::Undefined),
                    "name" => Value::string(&symbol.name),
                    "package" => symbol.package.map(Value::Package).unwrap_or(Value::Nil),
                    "plist" => symbol.plist.clone(),
                    _ => Value::Undefined,
                }
            }
            (Value::Function(f), _) => f.property(property),
            (Value::Cons(cell), "car") => cell.car(),
            (Value::Cons(cell), "cdr") => cell.cdr(),
            (Value::Vector(items), "length") => Value::Number(items.borrow().len() as f64),
            (Value::String(s), "length") => Value::Number(s.chars().count() as f64),
            (Value::MultipleValues(vs), "length") => Value::Number(vs.len() as f64),
            (Value::Transfer(t), "kind") => Value::string(t.kind.as_str()),
            (Value::Transfer(t), "id") => t.id.clone(),
            (Value::Transfer(t), "payload") => t.payload.clone(),
            (Value::Transfer(t), "name") => t
                .name
                .as_deref()
                .map(Value::string)
                .unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    pub fn set_property(&mut self, object: &Value, property: &str, value: Value) -> Eval<()> {
        let slot = |v: Value| match v {
            Value::Undefined => None,
            v => Some(v),
        };
        match (object, property) {
            (Value::Nil | Value::Symbol(_), "value" | "fvalue" | "plist") => {
                let id = object.as_symbol().unwrap_or(SymbolId::NIL);
                trace!(symbol = %self.symbols.symbol_name(id), property, "slot write");
                let symbol = self.symbols.symbol_mut(id);
                match property {
                    "value" => symbol.value = slot(value),
                    "fvalue" => symbol.function = slot(value),
                    _ => symbol.plist = value,
                }
                Ok(())
            }
            (Value::Function(f), _) => {
                f.set_property(property, value);
                Ok(())
            }
            (Value::Cons(cell), "car") => {
                cell.set_car(value);
                Ok(())
            }
            (Value::Cons(cell), "cdr") => {
                cell.set_cdr(value);
                Ok(())
            }
            _ => Err(host_error(format!(
                "cannot set property {} of {}",
                property,
                self.describe(object)
            ))),
        }
    }

    pub fn make_transfer(
        &self,
        kind: TransferKind,
        id: Value,
        payload: Value,
        name: Option<String>,
    ) -> Value {
        Value::Transfer(Rc::new(Transfer {
            kind,
            id,
            payload,
            name,
        }))
    }
}

/// `===`: strings by content, everything else by identity.
pub fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        _ => left.eql(right),
    }
}

fn index_value(object: &Value, index: &Value) -> Value {
    let i = match index {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => *n as usize,
        _ => return Value::Undefined,
    };
    match object {
        Value::Vector(items) => items.borrow().get(i).cloned().unwrap_or(Value::Undefined),
        Value::MultipleValues(vs) => vs.get(i).cloned().unwrap_or(Value::Undefined),
        Value::String(s) => s.chars().nth(i).map(Value::Character).unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::Case;

    fn run(body: Vec<Stmt>) -> Eval<Value> {
        let host = Host::new(40);
        let mut symbols = SymbolTable::new();
        let program = Program {
            body: vec![Stmt::Expr(Expr::iife(vec![], vec![], body))],
        };
        host.run(&program, &mut symbols)
    }

    fn num(n: f64) -> Expr {
        Expr::Number(n)
    }

    #[test]
    fn test_var_and_return() {
        let result = run(vec![
            Stmt::Var("x".into(), Some(num(2.0))),
            Stmt::Expr(Expr::assign(
                Expr::ident("x"),
                Expr::binary(BinOp::Mul, Expr::ident("x"), num(21.0)),
            )),
            Stmt::Return(Expr::ident("x")),
        ]);
        assert_eq!(result.unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_closures_capture_scope() {
        // var n = 0; var inc = function() { n = n + 1; return n; }; inc(); return inc();
        let inc = Expr::function(
            vec![],
            vec![
                Stmt::Expr(Expr::assign(
                    Expr::ident("n"),
                    Expr::binary(BinOp::Add, Expr::ident("n"), num(1.0)),
                )),
                Stmt::Return(Expr::ident("n")),
            ],
        );
        let result = run(vec![
            Stmt::Var("n".into(), Some(num(0.0))),
            Stmt::Var("inc".into(), Some(inc)),
            Stmt::Expr(Expr::call(Expr::ident("inc"), vec![])),
            Stmt::Return(Expr::call(Expr::ident("inc"), vec![])),
        ]);
        assert_eq!(result.unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_switch_falls_through() {
        let result = run(vec![
            Stmt::Var("acc".into(), Some(num(0.0))),
            Stmt::Switch {
                discriminant: num(1.0),
                cases: vec![
                    Case {
                        test: Some(num(0.0)),
                        body: vec![Stmt::Expr(Expr::assign(Expr::ident("acc"), num(100.0)))],
                    },
                    Case {
                        test: Some(num(1.0)),
                        body: vec![Stmt::Expr(Expr::assign(
                            Expr::ident("acc"),
                            Expr::binary(BinOp::Add, Expr::ident("acc"), num(1.0)),
                        ))],
                    },
                    Case {
                        test: None,
                        body: vec![Stmt::Expr(Expr::assign(
                            Expr::ident("acc"),
                            Expr::binary(BinOp::Add, Expr::ident("acc"), num(10.0)),
                        ))],
                    },
                ],
            },
            Stmt::Return(Expr::ident("acc")),
        ]);
        assert_eq!(result.unwrap(), Value::Number(11.0));
    }

    #[test]
    fn test_finally_runs_on_throw() {
        let result = run(vec![
            Stmt::Var("cleaned".into(), Some(num(0.0))),
            Stmt::Try {
                block: vec![Stmt::Try {
                    block: vec![Stmt::Throw(num(7.0))],
                    handler: None,
                    finalizer: Some(vec![Stmt::Expr(Expr::assign(
                        Expr::ident("cleaned"),
                        num(1.0),
                    ))]),
                }],
                handler: Some((
                    "e".into(),
                    vec![Stmt::Return(Expr::binary(
                        BinOp::Add,
                        Expr::ident("e"),
                        Expr::ident("cleaned"),
                    ))],
                )),
                finalizer: None,
            },
        ]);
        assert_eq!(result.unwrap(), Value::Number(8.0));
    }

    #[test]
    fn test_labeled_break() {
        let result = run(vec![
            Stmt::Var("i".into(), Some(num(0.0))),
            Stmt::While {
                label: Some("outer".into()),
                test: Expr::Bool(true),
                body: vec![Stmt::While {
                    label: None,
                    test: Expr::Bool(true),
                    body: vec![
                        Stmt::Expr(Expr::assign(
                            Expr::ident("i"),
                            Expr::binary(BinOp::Add, Expr::ident("i"), num(1.0)),
                        )),
                        Stmt::If(
                            Expr::binary(BinOp::Ge, Expr::ident("i"), num(3.0)),
                            vec![Stmt::Break(Some("outer".into()))],
                            vec![],
                        ),
                    ],
                }],
            },
            Stmt::Return(Expr::ident("i")),
        ]);
        assert_eq!(result.unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_runtime_errors_skip_catch() {
        let result = run(vec![Stmt::Try {
            block: vec![Stmt::Return(Expr::ident("missing"))],
            handler: Some(("e".into(), vec![Stmt::Return(num(1.0))])),
            finalizer: None,
        }]);
        assert!(matches!(result, Err(Exception::Error(RuntimeError::Host(_)))));
    }

    #[test]
    fn test_stack_limit() {
        // var f = function() { return f(); }; return f();
        let f = Expr::function(
            vec![],
            vec![Stmt::Return(Expr::call(Expr::ident("f"), vec![]))],
        );
        let result = run(vec![
            Stmt::Var("f".into(), Some(f)),
            Stmt::Return(Expr::call(Expr::ident("f"), vec![])),
        ]);
        assert!(matches!(
            result,
            Err(Exception::Error(RuntimeError::StackExhausted(_)))
        ));
    }

    #[test]
    fn test_wrappers_do_not_count_toward_depth() {
        // (function(){ return (function(){ ... return 7; })(); })() nested deeper than the limit
        let mut body = vec![Stmt::Return(num(7.0))];
        for _ in 0..20 {
            body = vec![Stmt::Return(Expr::iife(vec![], vec![], body))];
        }
        let host = Host::new(2);
        let mut symbols = SymbolTable::new();
        let program = Program {
            body: vec![Stmt::Expr(Expr::iife(vec![], vec![], body))],
        };
        assert_eq!(host.run(&program, &mut symbols).unwrap(), Value::Number(7.0));
    }

    #[test]
    fn test_symbol_slots() {
        let host = Host::new(10);
        let mut symbols = SymbolTable::new();
        let foo = symbols.intern("FOO", crate::symbol::PackageId::COMMON_LISP_USER);
        let mut machine = host.machine(&mut symbols);
        let sym = Value::Symbol(foo);
        assert_eq!(machine.get_property(&sym, "value"), Value::Undefined);
        machine.set_property(&sym, "value", Value::Number(1.0)).unwrap();
        assert_eq!(machine.get_property(&sym, "value"), Value::Number(1.0));
        machine.set_property(&sym, "value", Value::Undefined).unwrap();
        assert!(machine.symbols.symbol(foo).value.is_none());
    }
}
