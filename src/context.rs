// HostLisp Global Context
//
// Everything a session shares across compile units: the symbol registry,
// the special-form and primitive registries, the global environment and
// the identifier counters.

use std::collections::HashMap;

use crate::compiler::SpecialForm;
use crate::control;
use crate::counters::Counters;
use crate::env::{Binding, GlobalEnvironment, Reference};
use crate::primitives::{self, Primitive, PRIMITIVES};
use crate::special_forms;
use crate::symbol::{SymbolId, SymbolTable};
use crate::types::Value;

/// Symbols the compiler recognizes by identity.
pub struct KnownSymbols {
    pub quote: SymbolId,
    pub function: SymbolId,
    pub lambda: SymbolId,
    pub named_lambda: SymbolId,
    pub backquote: SymbolId,
    pub unquote: SymbolId,
    pub unquote_splicing: SymbolId,
    pub declare: SymbolId,
    pub special: SymbolId,
    pub inline: SymbolId,
    pub notinline: SymbolId,
    pub optional: SymbolId,
    pub rest: SymbolId,
    pub body: SymbolId,
    pub key: SymbolId,
    pub allow_other_keys: SymbolId,
    pub whole: SymbolId,
    pub environment: SymbolId,
    pub cons: SymbolId,
    pub list: SymbolId,
    pub append: SymbolId,
    pub apply: SymbolId,
    pub vector: SymbolId,
    pub compile_toplevel: SymbolId,
    pub load_toplevel: SymbolId,
    pub execute: SymbolId,
    pub allow_other_keys_key: SymbolId,
    pub compile: SymbolId,
    pub load: SymbolId,
    pub eval: SymbolId,
}

impl KnownSymbols {
    pub fn new(symbols: &mut SymbolTable) -> Self {
        let mut cl = |name: &str| symbols.intern_cl(name);
        let known = Self {
            quote: cl("QUOTE"),
            function: cl("FUNCTION"),
            lambda: cl("LAMBDA"),
            named_lambda: cl("NAMED-LAMBDA"),
            backquote: cl("BACKQUOTE"),
            unquote: cl("UNQUOTE"),
            unquote_splicing: cl("UNQUOTE-SPLICING"),
            declare: cl("DECLARE"),
            special: cl("SPECIAL"),
            inline: cl("INLINE"),
            notinline: cl("NOTINLINE"),
            optional: cl("&OPTIONAL"),
            rest: cl("&REST"),
            body: cl("&BODY"),
            key: cl("&KEY"),
            allow_other_keys: cl("&ALLOW-OTHER-KEYS"),
            whole: cl("&WHOLE"),
            environment: cl("&ENVIRONMENT"),
            cons: cl("CONS"),
            list: cl("LIST"),
            append: cl("APPEND"),
            apply: cl("APPLY"),
            vector: cl("VECTOR"),
            compile: cl("COMPILE"),
            load: cl("LOAD"),
            eval: cl("EVAL"),
            compile_toplevel: SymbolId::NIL,
            load_toplevel: SymbolId::NIL,
            execute: SymbolId::NIL,
            allow_other_keys_key: SymbolId::NIL,
        };
        Self {
            compile_toplevel: symbols.intern_keyword("COMPILE-TOPLEVEL"),
            load_toplevel: symbols.intern_keyword("LOAD-TOPLEVEL"),
            execute: symbols.intern_keyword("EXECUTE"),
            allow_other_keys_key: symbols.intern_keyword("ALLOW-OTHER-KEYS"),
            ..known
        }
    }

    /// Lambda-list keywords, which never name parameters.
    pub fn is_lambda_keyword(&self, id: SymbolId) -> bool {
        [
            self.optional,
            self.rest,
            self.body,
            self.key,
            self.allow_other_keys,
            self.whole,
            self.environment,
        ]
        .contains(&id)
    }
}

pub struct GlobalContext {
    pub symbols: SymbolTable,
    pub known: KnownSymbols,
    pub special_forms: HashMap<SymbolId, SpecialForm>,
    pub primitives: HashMap<SymbolId, &'static Primitive>,
    pub globals: GlobalEnvironment,
    pub counters: Counters,
    /// Reader feature names, upcased
    pub features: Vec<String>,
}

impl GlobalContext {
    pub fn new(features: Vec<String>) -> Self {
        let mut symbols = SymbolTable::new();
        let known = KnownSymbols::new(&mut symbols);
        let mut ctx = Self {
            symbols,
            known,
            special_forms: HashMap::new(),
            primitives: HashMap::new(),
            globals: GlobalEnvironment::new(),
            counters: Counters::default(),
            features,
        };

        let t = ctx
            .globals
            .define(Binding::variable(SymbolId::T, Reference::Constant(Value::t())));
        t.set_constant(true);
        let nil = ctx
            .globals
            .define(Binding::variable(SymbolId::NIL, Reference::Constant(Value::Nil)));
        nil.set_constant(true);

        special_forms::install(&mut ctx);
        control::install(&mut ctx);
        for prim in PRIMITIVES {
            ctx.register_primitive(prim);
        }
        ctx
    }

    pub fn register_special_form(&mut self, name: &str, form: SpecialForm) -> SymbolId {
        let sym = self.symbols.intern_cl(name);
        self.special_forms.insert(sym, form);
        sym
    }

    /// Intern and export the primitive's name and install its function
    /// object, so `#'car` and `notinline` calls reach the same code.
    pub fn register_primitive(&mut self, prim: &'static Primitive) {
        let sym = self.symbols.intern_cl(prim.name);
        self.symbols.symbol_mut(sym).function = Some(primitives::function_value(prim));
        self.primitives.insert(sym, prim);
    }

    pub fn special_form(&self, sym: SymbolId) -> Option<SpecialForm> {
        self.special_forms.get(&sym).copied()
    }

    pub fn primitive(&self, sym: SymbolId) -> Option<&'static Primitive> {
        self.primitives.get(&sym).copied()
    }

    pub fn symbol_name(&self, sym: SymbolId) -> &str {
        self.symbols.symbol_name(sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Namespace;
    use crate::symbol::PackageId;

    #[test]
    fn test_registries_are_populated() {
        let mut ctx = GlobalContext::new(vec![]);
        let car = ctx.symbols.intern("CAR", PackageId::COMMON_LISP);
        assert!(ctx.primitive(car).is_some());
        assert!(ctx.symbols.symbol(car).function.is_some());
        let tagbody = ctx.symbols.intern("TAGBODY", PackageId::COMMON_LISP);
        assert!(ctx.special_form(tagbody).is_some());
        let user_car = ctx.symbols.find_symbol("CAR", PackageId::COMMON_LISP_USER);
        assert!(matches!(user_car, Some((id, _)) if id == car));
    }

    #[test]
    fn test_t_and_nil_are_constants() {
        let ctx = GlobalContext::new(vec![]);
        let t = ctx.globals.get(SymbolId::T, Namespace::Variable).unwrap();
        assert!(t.is_constant());
        let nil = ctx.globals.get(SymbolId::NIL, Namespace::Variable).unwrap();
        assert!(nil.is_constant());
    }
}
