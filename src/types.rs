// HostLisp Values
//
// The closed value model shared by the reader, the compiler and the host.
// Source forms are ordinary values: the compiler walks conses and symbols,
// and macro expanders receive and return the same representation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::host::{Closure, NativeFn};
use crate::primitives::Primitive;
pub use crate::symbol::{PackageId, SymbolId};

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Number(f64),
    Character(char),
    String(Rc<str>),
    Symbol(SymbolId),
    Cons(Rc<Cons>),
    Vector(Rc<RefCell<Vec<Value>>>),
    Function(Rc<Function>),
    Package(PackageId),
    // Host-level values, never produced by the reader.
    Bool(bool),
    Undefined,
    MultipleValues(Rc<[Value]>),
    Transfer(Rc<Transfer>),
}

/// A mutable cons cell.
#[derive(Debug)]
pub struct Cons {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Cons {
    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.borrow_mut() = value;
    }
}

/// Kind tag of a non-local transfer signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Block,
    Catch,
    Tagbody,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferKind::Block => "block",
            TransferKind::Catch => "catch",
            TransferKind::Tagbody => "tagbody",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "block" => Some(TransferKind::Block),
            "catch" => Some(TransferKind::Catch),
            "tagbody" => Some(TransferKind::Tagbody),
            _ => None,
        }
    }
}

/// The object thrown by RETURN-FROM, THROW and GO.
#[derive(Debug)]
pub struct Transfer {
    pub kind: TransferKind,
    pub id: Value,
    pub payload: Value,
    /// Block name or catch tag, for diagnostics only
    pub name: Option<String>,
}

pub enum FunctionKind {
    /// A compiled function closed over a host scope
    Closure(Closure),
    /// A runtime support routine, called with host conventions
    Native { name: &'static str, call: NativeFn },
    /// A primitive called through the Lisp convention (leading acceptor)
    Primitive(&'static Primitive),
}

/// A host function object. Properties (`fname`, `docstring`) are dynamic
/// like any other host object.
pub struct Function {
    pub kind: FunctionKind,
    props: RefCell<HashMap<String, Value>>,
}

impl Function {
    pub fn new(kind: FunctionKind) -> Self {
        Self {
            kind,
            props: RefCell::new(HashMap::new()),
        }
    }

    pub fn property(&self, key: &str) -> Value {
        self.props
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    pub fn set_property(&self, key: &str, value: Value) {
        self.props.borrow_mut().insert(key.to_string(), value);
    }

    pub fn name(&self) -> Option<String> {
        if let Value::String(s) = self.property("fname") {
            return Some(s.to_string());
        }
        match &self.kind {
            FunctionKind::Closure(_) => None,
            FunctionKind::Native { name, .. } => Some(name.to_string()),
            FunctionKind::Primitive(prim) => Some(prim.name.to_string()),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "#<FUNCTION {}>", name),
            None => write!(f, "#<FUNCTION>"),
        }
    }
}

impl Value {
    /// The value a symbol stands for as data; the NIL symbol is `Nil`.
    pub fn symbol(id: SymbolId) -> Value {
        if id == SymbolId::NIL {
            Value::Nil
        } else {
            Value::Symbol(id)
        }
    }

    pub fn t() -> Value {
        Value::Symbol(SymbolId::T)
    }

    pub fn boolean(b: bool) -> Value {
        if b {
            Value::t()
        } else {
            Value::Nil
        }
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Rc::new(Cons {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        Value::list_with_tail(items, Value::Nil)
    }

    pub fn list_with_tail<I>(items: I, tail: Value) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(RefCell::new(items)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_cons(&self) -> bool {
        matches!(self, Value::Cons(_))
    }

    /// Symbol designated by this value, treating NIL as a symbol.
    pub fn as_symbol(&self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(*id),
            Value::Nil => Some(SymbolId::NIL),
            _ => None,
        }
    }

    pub fn car(&self) -> Option<Value> {
        match self {
            Value::Cons(cell) => Some(cell.car()),
            _ => None,
        }
    }

    pub fn cdr(&self) -> Option<Value> {
        match self {
            Value::Cons(cell) => Some(cell.cdr()),
            _ => None,
        }
    }

    /// Elements of a proper list, or None for an improper one.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut out = Vec::new();
        let mut current = self.clone();
        loop {
            match current {
                Value::Nil => return Some(out),
                Value::Cons(cell) => {
                    out.push(cell.car());
                    current = cell.cdr();
                }
                _ => return None,
            }
        }
    }

    /// Elements of a possibly dotted list together with its final tail.
    pub fn split_dotted(&self) -> (Vec<Value>, Value) {
        let mut out = Vec::new();
        let mut current = self.clone();
        while let Value::Cons(cell) = current {
            out.push(cell.car());
            current = cell.cdr();
        }
        (out, current)
    }

    /// Identity comparison (`eql`); numbers and characters by value.
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Character(a), Value::Character(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Package(a), Value::Package(b)) => a == b,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
            (Value::Cons(a), Value::Cons(b)) => Rc::ptr_eq(a, b),
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::MultipleValues(a), Value::MultipleValues(b)) => Rc::ptr_eq(a, b),
            (Value::Transfer(a), Value::Transfer(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `equal`: conses and strings by structure, everything else by `eql`.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Cons(a), Value::Cons(b)) => {
                Rc::ptr_eq(a, b) || (a.car().equal(&b.car()) && a.cdr().equal(&b.cdr()))
            }
            (Value::String(a), Value::String(b)) => a == b,
            _ => self.eql(other),
        }
    }

    /// Host truthiness. NIL is an object to the host and therefore true;
    /// compiled conditionals compare against NIL explicitly.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Undefined => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "NULL",
            Value::Number(_) => "NUMBER",
            Value::Character(_) => "CHARACTER",
            Value::String(_) => "STRING",
            Value::Symbol(_) => "SYMBOL",
            Value::Cons(_) => "CONS",
            Value::Vector(_) => "VECTOR",
            Value::Function(_) => "FUNCTION",
            Value::Package(_) => "PACKAGE",
            Value::Bool(_) => "BOOLEAN",
            Value::Undefined => "UNDEFINED",
            Value::MultipleValues(_) => "MULTIPLE-VALUES",
            Value::Transfer(_) => "TRANSFER",
        }
    }
}

/// Structural equality, used by tests and the reader round-trip property.
/// Unlike `equal`, vectors compare element-wise.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Cons(a), Value::Cons(b)) => a.car() == b.car() && a.cdr() == b.cdr(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => *a.borrow() == *b.borrow(),
            (Value::MultipleValues(a), Value::MultipleValues(b)) => a == b,
            _ => self.eql(other),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// Render a host number the way both the printer and the emitted source
/// expect: integral values without a fraction.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
