// HostLisp Printer - Expression Output
//
// Readable (prin1) and human (princ) rendering of values.

use crate::symbol::{PackageId, SymbolId, SymbolTable, Visibility};
use crate::types::{format_number, FunctionKind, Value};

/// Print options
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Print readably (escape strings, characters and symbol names)
    pub escape: bool,
    /// Maximum depth to print
    pub max_depth: usize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            escape: true,
            max_depth: 200,
        }
    }
}

impl PrintOptions {
    /// For prin1 (readable)
    pub fn prin1() -> Self {
        Self::default()
    }

    /// For princ (human-readable)
    pub fn princ() -> Self {
        Self {
            escape: false,
            ..Self::default()
        }
    }
}

/// The HostLisp Printer
pub struct Printer<'a> {
    symbols: &'a SymbolTable,
    output: String,
    options: PrintOptions,
    current_depth: usize,
}

impl<'a> Printer<'a> {
    pub fn new(symbols: &'a SymbolTable, options: PrintOptions) -> Self {
        Self {
            symbols,
            output: String::new(),
            options,
            current_depth: 0,
        }
    }

    /// Print a value and return the accumulated output
    pub fn print(mut self, value: &Value) -> String {
        self.print_value(value);
        self.output
    }

    fn print_value(&mut self, value: &Value) {
        if self.current_depth > self.options.max_depth {
            self.output.push_str("...");
            return;
        }
        self.current_depth += 1;

        match value {
            Value::Nil => self.output.push_str("NIL"),
            Value::Number(n) => self.output.push_str(&format_number(*n)),
            Value::Character(c) => self.print_character(*c),
            Value::String(s) => self.print_string(s),
            Value::Symbol(id) => self.print_symbol(*id),
            Value::Cons(_) => self.print_list(value),
            Value::Vector(items) => {
                self.output.push_str("#(");
                let items = items.borrow().clone();
                self.print_sequence(&items);
                self.output.push(')');
            }
            Value::Function(f) => {
                let name = match &f.kind {
                    FunctionKind::Native { name, .. } => Some(format!("internals.{}", name)),
                    _ => f.name(),
                };
                match name {
                    Some(name) => self.output.push_str(&format!("#<FUNCTION {}>", name)),
                    None => self.output.push_str("#<FUNCTION (LAMBDA)>"),
                }
            }
            Value::Package(id) => {
                let name = self.symbols.package_name(*id).to_string();
                self.output.push_str(&format!("#<PACKAGE \"{}\">", name));
            }
            Value::Bool(b) => {
                self.output.push_str(if *b { "#<HOST true>" } else { "#<HOST false>" })
            }
            Value::Undefined => self.output.push_str("#<HOST undefined>"),
            Value::MultipleValues(values) => {
                self.output.push_str("#<VALUES");
                for v in values.iter() {
                    self.output.push(' ');
                    self.print_value(v);
                }
                self.output.push('>');
            }
            Value::Transfer(t) => {
                self.output.push_str(&format!("#<TRANSFER {}", t.kind.as_str()));
                if let Some(name) = &t.name {
                    self.output.push(' ');
                    self.output.push_str(name);
                }
                self.output.push('>');
            }
        }

        self.current_depth -= 1;
    }

    fn print_sequence(&mut self, items: &[Value]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.output.push(' ');
            }
            self.print_value(item);
        }
    }

    fn print_list(&mut self, list: &Value) {
        let (items, tail) = list.split_dotted();
        self.output.push('(');
        self.print_sequence(&items);
        if !tail.is_nil() {
            self.output.push_str(" . ");
            self.print_value(&tail);
        }
        self.output.push(')');
    }

    fn print_character(&mut self, c: char) {
        if !self.options.escape {
            self.output.push(c);
            return;
        }
        self.output.push_str("#\\");
        match c {
            ' ' => self.output.push_str("Space"),
            '\n' => self.output.push_str("Newline"),
            '\t' => self.output.push_str("Tab"),
            '\r' => self.output.push_str("Return"),
            '\x0c' => self.output.push_str("Page"),
            '\x7f' => self.output.push_str("Rubout"),
            '\x08' => self.output.push_str("Backspace"),
            '\0' => self.output.push_str("Null"),
            _ => self.output.push(c),
        }
    }

    fn print_string(&mut self, s: &str) {
        if !self.options.escape {
            self.output.push_str(s);
            return;
        }
        self.output.push('"');
        for c in s.chars() {
            if c == '"' || c == '\\' {
                self.output.push('\\');
            }
            self.output.push(c);
        }
        self.output.push('"');
    }

    fn print_symbol(&mut self, id: SymbolId) {
        let symbol = self.symbols.symbol(id);
        let name = symbol.name.clone();
        if !self.options.escape {
            self.output.push_str(&name);
            return;
        }

        match symbol.package {
            None => self.output.push_str("#:"),
            Some(PackageId::KEYWORD) => self.output.push(':'),
            Some(home) => {
                let current = self.symbols.current_package();
                let accessible = matches!(
                    self.symbols.find_symbol(&name, current),
                    Some((found, _)) if found == id
                );
                if !accessible {
                    let external = matches!(
                        self.symbols.find_symbol(&name, home),
                        Some((_, Visibility::External))
                    );
                    self.output.push_str(self.symbols.package_name(home));
                    self.output.push_str(if external { ":" } else { "::" });
                }
            }
        }
        self.print_symbol_name(&name);
    }

    fn print_symbol_name(&mut self, name: &str) {
        if symbol_name_needs_bars(name) {
            self.output.push('|');
            for c in name.chars() {
                if c == '|' || c == '\\' {
                    self.output.push('\\');
                }
                self.output.push(c);
            }
            self.output.push('|');
        } else {
            self.output.push_str(name);
        }
    }
}

fn symbol_name_needs_bars(name: &str) -> bool {
    if name.is_empty() || name.chars().all(|c| c == '.') {
        return true;
    }
    let digits = name.trim_start_matches(['+', '-']);
    if !digits.is_empty() && digits.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.') {
        // Could read back as a number.
        if digits.chars().all(|c| c.is_ascii_digit() || c == '.' || c == 'E') {
            return true;
        }
    }
    name.chars().any(|c| {
        c.is_lowercase()
            || c.is_whitespace()
            || matches!(c, '(' | ')' | '\'' | '"' | ';' | '`' | ',' | ':' | '|' | '\\' | '#')
    })
}

/// prin1 a value to a string
pub fn print_to_string(value: &Value, symbols: &SymbolTable) -> String {
    Printer::new(symbols, PrintOptions::prin1()).print(value)
}

/// princ a value to a string
pub fn princ_to_string(value: &Value, symbols: &SymbolTable) -> String {
    Printer::new(symbols, PrintOptions::princ()).print(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_from_string;

    fn round_trip(symbols: &mut SymbolTable, value: &Value) -> Value {
        let text = print_to_string(value, symbols);
        read_from_string(&text, symbols, &[]).unwrap().unwrap()
    }

    #[test]
    fn test_print_atoms() {
        let symbols = SymbolTable::new();
        assert_eq!(print_to_string(&Value::Number(42.0), &symbols), "42");
        assert_eq!(print_to_string(&Value::Nil, &symbols), "NIL");
        assert_eq!(print_to_string(&Value::t(), &symbols), "T");
        assert_eq!(print_to_string(&Value::Character(' '), &symbols), "#\\Space");
        assert_eq!(print_to_string(&Value::string("a\"b"), &symbols), "\"a\\\"b\"");
        assert_eq!(princ_to_string(&Value::string("a\"b"), &symbols), "a\"b");
    }

    #[test]
    fn test_print_lists() {
        let symbols = SymbolTable::new();
        let list = Value::list(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(print_to_string(&list, &symbols), "(1 2)");
        let dotted = Value::cons(Value::Number(1.0), Value::Number(2.0));
        assert_eq!(print_to_string(&dotted, &symbols), "(1 . 2)");
        let vector = Value::vector(vec![Value::Number(1.0), Value::string("x")]);
        assert_eq!(print_to_string(&vector, &symbols), "#(1 \"x\")");
    }

    #[test]
    fn test_print_symbols() {
        let mut symbols = SymbolTable::new();
        let kw = symbols.intern_keyword("KEY");
        assert_eq!(print_to_string(&Value::Symbol(kw), &symbols), ":KEY");
        let g = symbols.make_symbol("G");
        assert_eq!(print_to_string(&Value::Symbol(g), &symbols), "#:G");
        let pkg = symbols.make_package("OTHER", &[], &[]).unwrap();
        let hidden = symbols.intern("HIDDEN", pkg);
        assert_eq!(print_to_string(&Value::Symbol(hidden), &symbols), "OTHER::HIDDEN");
        let lower = symbols.intern("lower", PackageId::COMMON_LISP_USER);
        assert_eq!(print_to_string(&Value::Symbol(lower), &symbols), "|lower|");
    }

    #[test]
    fn test_round_trip() {
        let mut symbols = SymbolTable::new();
        let foo = Value::Symbol(symbols.intern("FOO", PackageId::COMMON_LISP_USER));
        let samples = vec![
            Value::Number(-17.0),
            Value::string("quote\" back\\slash\nnewline"),
            foo.clone(),
            Value::list(vec![foo.clone(), Value::Number(1.0), Value::string("s")]),
            Value::list_with_tail(vec![Value::Number(1.0)], Value::Number(2.0)),
            Value::vector(vec![Value::Number(3.0), foo.clone()]),
            Value::Character('\n'),
        ];
        for sample in samples {
            let back = round_trip(&mut symbols, &sample);
            assert_eq!(back, sample, "round trip of {:?}", sample);
        }
        assert!(round_trip(&mut symbols, &foo).eql(&foo));
    }
}
