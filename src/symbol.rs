// HostLisp Symbol Table and Package System
//
// Symbols are interned per package and compared by id. Each symbol carries
// its global value and function slots, which the host reads and writes
// through `lit.value` / `lit.fvalue` property access.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::types::Value;

/// Unique identifier for a symbol (index into symbol table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub const NIL: SymbolId = SymbolId(0);
    pub const T: SymbolId = SymbolId(1);
}

/// Unique identifier for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageId(pub u32);

impl PackageId {
    pub const KEYWORD: PackageId = PackageId(0);
    pub const COMMON_LISP: PackageId = PackageId(1);
    pub const COMMON_LISP_USER: PackageId = PackageId(2);
}

/// How a symbol was found by `find_symbol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Internal,
    External,
    Inherited,
}

impl Visibility {
    pub fn keyword_name(self) -> &'static str {
        match self {
            Visibility::Internal => "INTERNAL",
            Visibility::External => "EXTERNAL",
            Visibility::Inherited => "INHERITED",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PackageError {
    #[error("package {0} does not exist")]
    NoSuchPackage(String),

    #[error("a package named {0} already exists")]
    PackageExists(String),

    #[error("symbol {symbol} is not accessible in package {package}")]
    Inaccessible { symbol: String, package: String },

    #[error("symbol {name} is not external in package {package}")]
    NotExternal { name: String, package: String },
}

/// A Lisp symbol with its global slots.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    /// Home package (None for uninterned symbols)
    pub package: Option<PackageId>,
    pub value: Option<Value>,
    pub function: Option<Value>,
    pub plist: Value,
}

impl Symbol {
    fn new(name: String, package: Option<PackageId>) -> Self {
        Self {
            name,
            package,
            value: None,
            function: None,
            plist: Value::Nil,
        }
    }

    pub fn is_keyword(&self) -> bool {
        self.package == Some(PackageId::KEYWORD)
    }
}

/// A package: own table split into internal and external halves, plus an
/// ordered use list.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub nicknames: Vec<String>,
    internal: HashMap<String, SymbolId>,
    external: HashMap<String, SymbolId>,
    use_list: Vec<PackageId>,
}

impl Package {
    fn new(name: &str, nicknames: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            nicknames: nicknames.iter().map(|n| n.to_string()).collect(),
            internal: HashMap::new(),
            external: HashMap::new(),
            use_list: Vec::new(),
        }
    }

    pub fn find_external(&self, name: &str) -> Option<SymbolId> {
        self.external.get(name).copied()
    }

    pub fn use_list(&self) -> &[PackageId] {
        &self.use_list
    }

    pub fn external_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.external.values().copied()
    }
}

/// The global symbol table
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    packages: Vec<Package>,
    /// Package name and nickname lookup
    package_names: HashMap<String, PackageId>,
    current_package: PackageId,
    gensym_counter: u64,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            packages: Vec::new(),
            package_names: HashMap::new(),
            current_package: PackageId::COMMON_LISP_USER,
            gensym_counter: 0,
        };

        table.register_package(Package::new("KEYWORD", &[]));
        table.register_package(Package::new("COMMON-LISP", &["CL"]));
        table.register_package(Package::new("COMMON-LISP-USER", &["CL-USER"]));
        table.packages[PackageId::COMMON_LISP_USER.0 as usize]
            .use_list
            .push(PackageId::COMMON_LISP);

        // NIL and T occupy the first two ids.
        let nil = table.intern("NIL", PackageId::COMMON_LISP);
        let t = table.intern("T", PackageId::COMMON_LISP);
        debug_assert_eq!((nil, t), (SymbolId::NIL, SymbolId::T));
        for id in [nil, t] {
            table.promote_to_external(id, PackageId::COMMON_LISP);
        }
        table.symbols[nil.0 as usize].value = Some(Value::Nil);
        table.symbols[t.0 as usize].value = Some(Value::Symbol(t));

        table
    }

    fn register_package(&mut self, package: Package) -> PackageId {
        let id = PackageId(self.packages.len() as u32);
        self.package_names.insert(package.name.clone(), id);
        for nick in &package.nicknames {
            self.package_names.insert(nick.clone(), id);
        }
        self.packages.push(package);
        id
    }

    /// Create a new package. Names are taken verbatim.
    pub fn make_package(
        &mut self,
        name: &str,
        nicknames: &[&str],
        use_list: &[PackageId],
    ) -> Result<PackageId, PackageError> {
        for candidate in std::iter::once(&name).chain(nicknames.iter()) {
            if self.package_names.contains_key(*candidate) {
                return Err(PackageError::PackageExists(candidate.to_string()));
            }
        }
        let mut package = Package::new(name, nicknames);
        package.use_list.extend_from_slice(use_list);
        let id = self.register_package(package);
        debug!(package = name, "created package");
        Ok(id)
    }

    pub fn find_package(&self, name: &str) -> Option<PackageId> {
        self.package_names.get(name).copied()
    }

    pub fn require_package(&self, name: &str) -> Result<PackageId, PackageError> {
        self.find_package(name)
            .ok_or_else(|| PackageError::NoSuchPackage(name.to_string()))
    }

    pub fn current_package(&self) -> PackageId {
        self.current_package
    }

    pub fn set_current_package(&mut self, pkg: PackageId) {
        self.current_package = pkg;
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn package_name(&self, id: PackageId) -> &str {
        &self.package(id).name
    }

    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages
            .iter()
            .enumerate()
            .map(|(i, p)| (PackageId(i as u32), p))
    }

    /// Add `used` to the end of `pkg`'s use list. No cycle detection.
    pub fn use_package(&mut self, pkg: PackageId, used: PackageId) {
        let package = &mut self.packages[pkg.0 as usize];
        if !package.use_list.contains(&used) {
            package.use_list.push(used);
        }
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn symbol_name(&self, id: SymbolId) -> &str {
        &self.symbol(id).name
    }

    pub fn symbol_package(&self, id: SymbolId) -> Option<PackageId> {
        self.symbol(id).package
    }

    pub fn is_keyword(&self, id: SymbolId) -> bool {
        self.symbol(id).is_keyword()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Own internals, own externals, then each used package's externals in
    /// use-list order. The first hit wins.
    pub fn find_symbol(&self, name: &str, pkg: PackageId) -> Option<(SymbolId, Visibility)> {
        let package = self.package(pkg);
        if let Some(&id) = package.internal.get(name) {
            return Some((id, Visibility::Internal));
        }
        if let Some(&id) = package.external.get(name) {
            return Some((id, Visibility::External));
        }
        package.use_list.iter().find_map(|used| {
            self.package(*used)
                .find_external(name)
                .map(|id| (id, Visibility::Inherited))
        })
    }

    /// Intern `name` verbatim (callers upcase) into `pkg`.
    pub fn intern(&mut self, name: &str, pkg: PackageId) -> SymbolId {
        self.intern_with_status(name, pkg).0
    }

    /// Like `intern`, also reporting how an existing symbol was found.
    pub fn intern_with_status(
        &mut self,
        name: &str,
        pkg: PackageId,
    ) -> (SymbolId, Option<Visibility>) {
        if let Some((id, visibility)) = self.find_symbol(name, pkg) {
            return (id, Some(visibility));
        }

        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name.to_string(), Some(pkg)));
        if pkg == PackageId::KEYWORD {
            self.symbols[id.0 as usize].value = Some(Value::Symbol(id));
            self.packages[pkg.0 as usize].external.insert(name.to_string(), id);
        } else {
            self.packages[pkg.0 as usize].internal.insert(name.to_string(), id);
        }
        (id, None)
    }

    pub fn intern_keyword(&mut self, name: &str) -> SymbolId {
        self.intern(name, PackageId::KEYWORD)
    }

    /// Intern in COMMON-LISP and export.
    pub fn intern_cl(&mut self, name: &str) -> SymbolId {
        let id = self.intern(name, PackageId::COMMON_LISP);
        self.promote_to_external(id, PackageId::COMMON_LISP);
        id
    }

    fn promote_to_external(&mut self, id: SymbolId, pkg: PackageId) {
        let name = self.symbols[id.0 as usize].name.clone();
        let package = &mut self.packages[pkg.0 as usize];
        package.internal.remove(&name);
        package.external.insert(name, id);
    }

    /// Export `id` from `pkg`. The symbol must already be accessible there;
    /// an inherited symbol is imported first.
    pub fn export(&mut self, id: SymbolId, pkg: PackageId) -> Result<(), PackageError> {
        let name = self.symbol_name(id).to_string();
        match self.find_symbol(&name, pkg) {
            Some((found, _)) if found == id => {
                self.promote_to_external(id, pkg);
                Ok(())
            }
            _ => Err(PackageError::Inaccessible {
                symbol: name,
                package: self.package_name(pkg).to_string(),
            }),
        }
    }

    /// Create an uninterned symbol.
    pub fn make_symbol(&mut self, name: &str) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(name.to_string(), None));
        id
    }

    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        self.gensym_counter += 1;
        let name = format!("{}{}", prefix, self.gensym_counter);
        self.make_symbol(&name)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_packages() {
        let table = SymbolTable::new();
        let cl = table.find_package("COMMON-LISP");
        assert_eq!(cl, Some(PackageId::COMMON_LISP));
        assert_eq!(table.find_package("CL"), cl);
        assert_eq!(table.find_package("CL-USER"), Some(PackageId::COMMON_LISP_USER));
    }

    #[test]
    fn test_nil_and_t_are_fixed() {
        let mut table = SymbolTable::new();
        assert_eq!(table.intern("NIL", PackageId::COMMON_LISP_USER), SymbolId::NIL);
        assert_eq!(table.intern("T", PackageId::COMMON_LISP_USER), SymbolId::T);
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let foo1 = table.intern("FOO", PackageId::COMMON_LISP_USER);
        let foo2 = table.intern("FOO", PackageId::COMMON_LISP_USER);
        assert_eq!(foo1, foo2);
        let bar = table.intern("BAR", PackageId::COMMON_LISP_USER);
        assert_ne!(foo1, bar);
        assert_eq!(
            table.find_symbol("FOO", PackageId::COMMON_LISP_USER),
            Some((foo1, Visibility::Internal))
        );
    }

    #[test]
    fn test_keyword_self_evaluates() {
        let mut table = SymbolTable::new();
        let kw = table.intern_keyword("TEST");
        assert!(table.is_keyword(kw));
        assert_eq!(table.symbol(kw).value, Some(Value::Symbol(kw)));
        assert_eq!(
            table.find_symbol("TEST", PackageId::KEYWORD),
            Some((kw, Visibility::External))
        );
    }

    #[test]
    fn test_uninterned() {
        let mut table = SymbolTable::new();
        let g = table.gensym("G");
        assert!(table.symbol_package(g).is_none());
        assert_eq!(table.find_symbol(table.symbol_name(g), PackageId::COMMON_LISP_USER), None);
    }

    #[test]
    fn test_inheritance_through_use_list() {
        let mut table = SymbolTable::new();
        let foo_cl = table.intern("FOO", PackageId::COMMON_LISP);
        table.export(foo_cl, PackageId::COMMON_LISP).unwrap();

        let foo_user = table.intern("FOO", PackageId::COMMON_LISP_USER);
        assert_eq!(foo_cl, foo_user, "FOO should be inherited from CL");
        assert_eq!(
            table.find_symbol("FOO", PackageId::COMMON_LISP_USER),
            Some((foo_cl, Visibility::Inherited))
        );
    }

    #[test]
    fn test_first_used_package_wins() {
        let mut table = SymbolTable::new();
        let a = table.make_package("A", &[], &[]).unwrap();
        let b = table.make_package("B", &[], &[]).unwrap();
        let x_a = table.intern("X", a);
        let x_b = table.intern("X", b);
        table.export(x_a, a).unwrap();
        table.export(x_b, b).unwrap();
        let c = table.make_package("C", &[], &[b, a]).unwrap();
        assert_eq!(table.intern("X", c), x_b);
    }

    #[test]
    fn test_export_requires_accessibility() {
        let mut table = SymbolTable::new();
        let other = table.make_package("OTHER", &[], &[]).unwrap();
        let foo = table.intern("FOO", other);
        let err = table.export(foo, PackageId::COMMON_LISP_USER);
        assert!(matches!(err, Err(PackageError::Inaccessible { .. })));
    }

    #[test]
    fn test_duplicate_package() {
        let mut table = SymbolTable::new();
        let err = table.make_package("CL", &[], &[]);
        assert!(matches!(err, Err(PackageError::PackageExists(_))));
    }
}
