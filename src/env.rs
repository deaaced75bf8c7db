// HostLisp Lexical Environment
//
// Four independent namespaces over a persistent binding chain. Extending
// an environment returns a new value that shares its tail; nothing reachable
// from an outer environment is ever replaced.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::symbol::SymbolId;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Variable,
    Function,
    Block,
    GoTag,
}

/// Declaration flags. Mutable in place so that marking a binding used (or
/// special, from a bound declaration) is visible to every environment that
/// shares it.
#[derive(Debug, Default)]
pub struct Declarations {
    special: Cell<bool>,
    notinline: Cell<bool>,
    constant: Cell<bool>,
    used: Cell<bool>,
}

impl Declarations {
    fn copy_from(other: &Declarations) -> Self {
        Self {
            special: Cell::new(other.special.get()),
            notinline: Cell::new(other.notinline.get()),
            constant: Cell::new(other.constant.get()),
            used: Cell::new(false),
        }
    }
}

/// What a binding compiles to.
#[derive(Debug, Clone)]
pub enum Reference {
    /// The symbol's own value or function slot
    Global,
    /// A host local variable
    Local(String),
    /// A macro expander function
    Macro(Value),
    /// A value substituted inline
    Constant(Value),
    /// Host variable holding the block's runtime identity token
    Block { id: String, multiple_values: bool },
    /// A tagbody's token variable and the switch label of the tag
    GoTag { tagbody: String, label: usize },
}

#[derive(Debug)]
pub struct Binding {
    pub name: Value,
    pub namespace: Namespace,
    pub reference: Reference,
    pub declarations: Declarations,
}

impl Binding {
    pub fn new(name: Value, namespace: Namespace, reference: Reference) -> Self {
        Self {
            name,
            namespace,
            reference,
            declarations: Declarations::default(),
        }
    }

    pub fn variable(name: SymbolId, reference: Reference) -> Self {
        Self::new(Value::symbol(name), Namespace::Variable, reference)
    }

    pub fn function(name: SymbolId, reference: Reference) -> Self {
        Self::new(Value::symbol(name), Namespace::Function, reference)
    }

    /// A copy carrying the same reference and flags, for declarations that
    /// must not leak into outer scopes.
    pub fn shadow(&self) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace,
            reference: self.reference.clone(),
            declarations: Declarations::copy_from(&self.declarations),
        }
    }

    pub fn is_special(&self) -> bool {
        self.declarations.special.get()
    }

    pub fn is_notinline(&self) -> bool {
        self.declarations.notinline.get()
    }

    pub fn is_constant(&self) -> bool {
        self.declarations.constant.get()
    }

    pub fn is_used(&self) -> bool {
        self.declarations.used.get()
    }

    pub fn set_special(&self, on: bool) {
        self.declarations.special.set(on);
    }

    pub fn set_notinline(&self, on: bool) {
        self.declarations.notinline.set(on);
    }

    pub fn set_constant(&self, on: bool) {
        self.declarations.constant.set(on);
    }

    pub fn mark_used(&self) {
        self.declarations.used.set(true);
    }

    pub fn is_macro(&self) -> bool {
        matches!(self.reference, Reference::Macro(_))
    }
}

struct Frame {
    binding: Rc<Binding>,
    next: Option<Rc<Frame>>,
}

/// A lexical environment: innermost binding first.
#[derive(Clone, Default)]
pub struct Environment {
    head: Option<Rc<Frame>>,
}

impl Environment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn extend(&self, binding: Binding) -> Environment {
        self.extend_rc(Rc::new(binding))
    }

    pub fn extend_rc(&self, binding: Rc<Binding>) -> Environment {
        Environment {
            head: Some(Rc::new(Frame {
                binding,
                next: self.head.clone(),
            })),
        }
    }

    pub fn extend_all<I: IntoIterator<Item = Binding>>(&self, bindings: I) -> Environment {
        bindings
            .into_iter()
            .fold(self.clone(), |env, binding| env.extend(binding))
    }

    /// First binding of `name` in `namespace`, innermost first.
    pub fn lookup(&self, name: &Value, namespace: Namespace) -> Option<Rc<Binding>> {
        self.iter()
            .find(|b| b.namespace == namespace && b.name.eql(name))
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Binding>> {
        let mut frame = self.head.as_deref();
        std::iter::from_fn(move || {
            let current = frame?;
            frame = current.next.as_deref();
            Some(&current.binding)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|b| &b.name)).finish()
    }
}

/// The always-present outermost scope. Unknown global names get a binding
/// synthesized on first reference, so forward references compile.
#[derive(Default)]
pub struct GlobalEnvironment {
    bindings: HashMap<(SymbolId, Namespace), Rc<Binding>>,
}

impl GlobalEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, name: SymbolId, namespace: Namespace) -> Rc<Binding> {
        self.bindings
            .entry((name, namespace))
            .or_insert_with(|| {
                Rc::new(Binding::new(Value::symbol(name), namespace, Reference::Global))
            })
            .clone()
    }

    pub fn get(&self, name: SymbolId, namespace: Namespace) -> Option<Rc<Binding>> {
        self.bindings.get(&(name, namespace)).cloned()
    }

    /// Install or replace the global binding for a name, keeping any
    /// declarations already made on it.
    pub fn define(&mut self, binding: Binding) -> Rc<Binding> {
        let name = match binding.name.as_symbol() {
            Some(id) => id,
            None => return Rc::new(binding),
        };
        if let Some(old) = self.bindings.get(&(name, binding.namespace)) {
            binding.set_special(old.is_special());
            binding.set_notinline(old.is_notinline());
        }
        let binding = Rc::new(binding);
        self.bindings
            .insert((name, binding.namespace), binding.clone());
        binding
    }

    /// Resolve a name: lexical bindings first, then the global scope.
    /// Block and go-tag names have no global fallback.
    pub fn resolve(
        &mut self,
        env: &Environment,
        name: &Value,
        namespace: Namespace,
    ) -> Option<Rc<Binding>> {
        if let Some(binding) = env.lookup(name, namespace) {
            return Some(binding);
        }
        match (namespace, name.as_symbol()) {
            (Namespace::Variable | Namespace::Function, Some(id)) => {
                Some(self.lookup(id, namespace))
            }
            _ => None,
        }
    }
}
