// HostLisp Reader - S-Expression Parser
//
// Text to values, interning symbols as a side effect. Unqualified tokens
// are upcased and interned in the current package.

use thiserror::Error;

use crate::symbol::{PackageError, PackageId, SymbolTable, Visibility};
use crate::types::Value;

struct ReaderInput {
    chars: Vec<char>,
    index: usize,
}

impl ReaderInput {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            index: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        Some(c)
    }

    fn position(&self) -> usize {
        self.index
    }
}

/// Reader error types
#[derive(Debug, Clone, Error)]
pub enum ReaderError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected character: '{0}'")]
    UnexpectedChar(char),

    #[error("unterminated list")]
    UnbalancedParen,

    #[error("unterminated string")]
    UnterminatedString,

    #[error("unknown dispatch character: #{0}")]
    UnknownDispatch(char),

    #[error("invalid character name: {0}")]
    InvalidChar(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Package(#[from] PackageError),
}

pub type ReaderResult<T> = Result<T, ReaderError>;

/// A token with the position of its package marker, if any.
struct Token {
    text: String,
    escaped: bool,
    /// Byte offset of the first unescaped colon, and whether it is doubled
    colon: Option<(usize, bool)>,
}

fn is_terminating(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | ';' | '`' | ',')
}

/// The HostLisp Reader
pub struct Reader<'a> {
    input: ReaderInput,
    symbols: &'a mut SymbolTable,
    features: &'a [String],
}

impl<'a> Reader<'a> {
    pub fn new(input: &str, symbols: &'a mut SymbolTable, features: &'a [String]) -> Self {
        Self {
            input: ReaderInput::new(input),
            symbols,
            features,
        }
    }

    pub fn position(&self) -> usize {
        self.input.position()
    }

    /// Read the next datum, or None at end of input.
    pub fn read(&mut self) -> ReaderResult<Option<Value>> {
        loop {
            self.skip_whitespace();
            if self.input.peek().is_none() {
                return Ok(None);
            }
            if let Some(value) = self.read_item()? {
                return Ok(Some(value));
            }
        }
    }

    pub fn read_all(&mut self) -> ReaderResult<Vec<Value>> {
        let mut forms = Vec::new();
        while let Some(form) = self.read()? {
            forms.push(form);
        }
        Ok(forms)
    }

    /// A datum that must be present: end of input is an error here.
    fn read_datum(&mut self) -> ReaderResult<Value> {
        loop {
            self.skip_whitespace();
            match self.input.peek() {
                None => return Err(ReaderError::UnexpectedEof),
                Some(')') => return Err(ReaderError::UnexpectedChar(')')),
                Some(_) => {
                    if let Some(value) = self.read_item()? {
                        return Ok(value);
                    }
                }
            }
        }
    }

    /// One syntactic item. None when the item produced nothing (a block
    /// comment or a feature-excluded form).
    fn read_item(&mut self) -> ReaderResult<Option<Value>> {
        let c = self.input.peek().ok_or(ReaderError::UnexpectedEof)?;
        match c {
            '(' => {
                self.input.next();
                self.read_list().map(Some)
            }
            ')' => Err(ReaderError::UnexpectedChar(')')),
            '\'' => {
                self.input.next();
                self.read_wrapped("QUOTE").map(Some)
            }
            '`' => {
                self.input.next();
                self.read_wrapped("BACKQUOTE").map(Some)
            }
            ',' => {
                self.input.next();
                if self.input.peek() == Some('@') {
                    self.input.next();
                    self.read_wrapped("UNQUOTE-SPLICING").map(Some)
                } else {
                    self.read_wrapped("UNQUOTE").map(Some)
                }
            }
            '"' => {
                self.input.next();
                self.read_string().map(Some)
            }
            '#' => {
                self.input.next();
                self.read_dispatch()
            }
            _ => {
                let token = self.read_token()?;
                self.parse_atom(token).map(Some)
            }
        }
    }

    /// Skip whitespace and line comments
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.input.peek() {
            if c.is_whitespace() {
                self.input.next();
            } else if c == ';' {
                while let Some(c) = self.input.next() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    /// Skip a possibly nested block comment; the opening `#|` is consumed.
    fn skip_block_comment(&mut self) -> ReaderResult<()> {
        let mut depth = 1usize;
        while let Some(c) = self.input.next() {
            match c {
                '#' if self.input.peek() == Some('|') => {
                    self.input.next();
                    depth += 1;
                }
                '|' if self.input.peek() == Some('#') => {
                    self.input.next();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(ReaderError::UnexpectedEof)
    }

    fn read_wrapped(&mut self, operator: &str) -> ReaderResult<Value> {
        let form = self.read_datum()?;
        let op = self.symbols.intern_cl(operator);
        Ok(Value::list(vec![Value::Symbol(op), form]))
    }

    /// Read list elements after `(`, including a dotted tail.
    fn read_list(&mut self) -> ReaderResult<Value> {
        let mut elements = Vec::new();
        loop {
            self.skip_whitespace();
            match self.input.peek() {
                None => return Err(ReaderError::UnbalancedParen),
                Some(')') => {
                    self.input.next();
                    return Ok(Value::list(elements));
                }
                Some('.') if self.dot_is_separator() => {
                    if elements.is_empty() {
                        return Err(ReaderError::UnexpectedChar('.'));
                    }
                    self.input.next();
                    let tail = self.read_datum()?;
                    self.skip_whitespace();
                    return match self.input.next() {
                        Some(')') => Ok(Value::list_with_tail(elements, tail)),
                        Some(c) => Err(ReaderError::UnexpectedChar(c)),
                        None => Err(ReaderError::UnbalancedParen),
                    };
                }
                Some(_) => {
                    if let Some(value) = self.read_item()? {
                        elements.push(value);
                    }
                }
            }
        }
    }

    fn dot_is_separator(&self) -> bool {
        match self.input.chars.get(self.input.index + 1) {
            Some(&c) => is_terminating(c),
            None => true,
        }
    }

    /// Read a string after the opening quote. `\` takes the next character
    /// literally.
    fn read_string(&mut self) -> ReaderResult<Value> {
        let mut s = String::new();
        loop {
            match self.input.next() {
                None => return Err(ReaderError::UnterminatedString),
                Some('"') => return Ok(Value::string(&s)),
                Some('\\') => match self.input.next() {
                    None => return Err(ReaderError::UnterminatedString),
                    Some(c) => s.push(c),
                },
                Some(c) => s.push(c),
            }
        }
    }

    /// Read dispatch macro after `#`
    fn read_dispatch(&mut self) -> ReaderResult<Option<Value>> {
        let c = self.input.next().ok_or(ReaderError::UnexpectedEof)?;
        match c {
            '\'' => self.read_wrapped("FUNCTION").map(Some),
            '(' => {
                let list = self.read_list()?;
                let (items, _) = list.split_dotted();
                Ok(Some(Value::vector(items)))
            }
            ':' => {
                let token = self.read_token()?;
                let id = self.symbols.make_symbol(&token.text);
                Ok(Some(Value::Symbol(id)))
            }
            '\\' => self.read_character().map(Some),
            '|' => {
                self.skip_block_comment()?;
                Ok(None)
            }
            '+' | '-' => {
                let wanted = c == '+';
                let present = self.read_feature_check()?;
                let form = self.read_datum()?;
                if present == wanted {
                    Ok(Some(form))
                } else {
                    Ok(None)
                }
            }
            other => Err(ReaderError::UnknownDispatch(other)),
        }
    }

    /// Read a feature expression with the keyword package current.
    fn read_feature_check(&mut self) -> ReaderResult<bool> {
        let saved = self.symbols.current_package();
        self.symbols.set_current_package(PackageId::KEYWORD);
        let expr = self.read_datum();
        self.symbols.set_current_package(saved);
        Ok(self.eval_feature(&expr?))
    }

    fn eval_feature(&self, expr: &Value) -> bool {
        match expr {
            Value::Symbol(id) => {
                let name = self.symbols.symbol_name(*id);
                self.features.iter().any(|f| f == name)
            }
            Value::Cons(cell) => {
                let args = cell.cdr().list_to_vec().unwrap_or_default();
                let op = match cell.car() {
                    Value::Symbol(id) => self.symbols.symbol_name(id).to_string(),
                    _ => return false,
                };
                match op.as_str() {
                    "NOT" => !args.first().map(|a| self.eval_feature(a)).unwrap_or(false),
                    "AND" => args.iter().all(|a| self.eval_feature(a)),
                    "OR" => args.iter().any(|a| self.eval_feature(a)),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Read a character literal after `#\`. The first character is taken
    /// even if it would otherwise terminate a token.
    fn read_character(&mut self) -> ReaderResult<Value> {
        let first = self.input.next().ok_or(ReaderError::UnexpectedEof)?;
        let mut name = String::new();
        name.push(first);
        while let Some(c) = self.input.peek() {
            if is_terminating(c) {
                break;
            }
            name.push(c);
            self.input.next();
        }
        if name.chars().count() == 1 {
            return Ok(Value::Character(first));
        }
        let ch = match name.to_uppercase().as_str() {
            "SPACE" => ' ',
            "NEWLINE" | "LINEFEED" => '\n',
            "TAB" => '\t',
            "RETURN" => '\r',
            "PAGE" => '\x0c',
            "RUBOUT" => '\x7f',
            "BACKSPACE" => '\x08',
            "NULL" => '\0',
            _ => return Err(ReaderError::InvalidChar(name)),
        };
        Ok(Value::Character(ch))
    }

    /// Collect a token, upcasing unescaped characters.
    fn read_token(&mut self) -> ReaderResult<Token> {
        let mut text = String::new();
        let mut escaped = false;
        let mut colon = None;
        let mut in_multi_escape = false;

        while let Some(c) = self.input.peek() {
            if in_multi_escape {
                self.input.next();
                match c {
                    '|' => in_multi_escape = false,
                    '\\' => text.push(self.input.next().ok_or(ReaderError::UnexpectedEof)?),
                    _ => text.push(c),
                }
                continue;
            }
            if is_terminating(c) {
                break;
            }
            self.input.next();
            match c {
                '\\' => {
                    escaped = true;
                    text.push(self.input.next().ok_or(ReaderError::UnexpectedEof)?);
                }
                '|' => {
                    escaped = true;
                    in_multi_escape = true;
                }
                ':' if colon.is_none() => {
                    let double = self.input.peek() == Some(':');
                    if double {
                        self.input.next();
                    }
                    colon = Some((text.len(), double));
                }
                _ => text.extend(c.to_uppercase()),
            }
        }

        if in_multi_escape {
            return Err(ReaderError::UnexpectedEof);
        }
        Ok(Token {
            text,
            escaped,
            colon,
        })
    }

    /// Parse a token as a number or a symbol
    fn parse_atom(&mut self, token: Token) -> ReaderResult<Value> {
        if !token.escaped && token.colon.is_none() {
            if !token.text.is_empty() && token.text.chars().all(|c| c == '.') {
                return Err(ReaderError::InvalidToken(token.text));
            }
            if let Some(n) = parse_number(&token.text) {
                return Ok(Value::Number(n));
            }
        }

        let id = match token.colon {
            None => {
                let pkg = self.symbols.current_package();
                self.symbols.intern(&token.text, pkg)
            }
            Some((0, _)) => self.symbols.intern_keyword(&token.text),
            Some((pos, double)) => {
                let (pkg_name, name) = token.text.split_at(pos);
                let pkg = self.symbols.require_package(pkg_name)?;
                if double || pkg == PackageId::KEYWORD {
                    self.symbols.intern(name, pkg)
                } else {
                    match self.symbols.find_symbol(name, pkg) {
                        Some((id, Visibility::External)) => id,
                        _ => {
                            return Err(PackageError::NotExternal {
                                name: name.to_string(),
                                package: pkg_name.to_string(),
                            }
                            .into())
                        }
                    }
                }
            }
        };
        Ok(Value::symbol(id))
    }
}

/// Integers are optional sign plus digits (a trailing decimal point is
/// allowed); anything with a fraction or exponent is a float.
fn parse_number(s: &str) -> Option<f64> {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    if body.is_empty() {
        return None;
    }
    let digits = body.strip_suffix('.').unwrap_or(body);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return s.trim_end_matches('.').parse::<f64>().ok();
    }
    if looks_like_float(body) {
        return s.replace(['D', 'F', 'S', 'L'], "E").parse::<f64>().ok();
    }
    None
}

fn looks_like_float(body: &str) -> bool {
    let (mantissa, exponent) = match body.find(['E', 'D', 'F', 'S', 'L']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(pos) => (&mantissa[..pos], Some(&mantissa[pos + 1..])),
        None => (mantissa, None),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) {
        return false;
    }
    let frac_ok = match frac_part {
        Some(f) => {
            all_digits(f)
                && (!f.is_empty() || exponent.is_some())
                && !(int_part.is_empty() && f.is_empty())
        }
        None => exponent.is_some() && !int_part.is_empty(),
    };
    let exp_ok = match exponent {
        Some(e) => {
            let e = e.strip_prefix(['+', '-']).unwrap_or(e);
            !e.is_empty() && all_digits(e)
        }
        None => true,
    };
    frac_ok && exp_ok
}

/// Read the first datum of `text`.
pub fn read_from_string(
    text: &str,
    symbols: &mut SymbolTable,
    features: &[String],
) -> ReaderResult<Option<Value>> {
    Reader::new(text, symbols, features).read()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(symbols: &mut SymbolTable, text: &str) -> ReaderResult<Option<Value>> {
        let features = vec!["HOSTLISP".to_string()];
        read_from_string(text, symbols, &features)
    }

    fn read_ok(symbols: &mut SymbolTable, text: &str) -> Value {
        read(symbols, text).unwrap().unwrap()
    }

    fn sym(symbols: &mut SymbolTable, name: &str) -> Value {
        Value::Symbol(symbols.intern(name, PackageId::COMMON_LISP_USER))
    }

    #[test]
    fn test_read_integer() {
        let mut symbols = SymbolTable::new();
        assert_eq!(read_ok(&mut symbols, "42"), Value::Number(42.0));
        assert_eq!(read_ok(&mut symbols, "-7"), Value::Number(-7.0));
        assert_eq!(read_ok(&mut symbols, "+3"), Value::Number(3.0));
    }

    #[test]
    fn test_read_float() {
        let mut symbols = SymbolTable::new();
        assert_eq!(read_ok(&mut symbols, "1.5"), Value::Number(1.5));
        assert_eq!(read_ok(&mut symbols, "1e3"), Value::Number(1000.0));
        assert!(matches!(read_ok(&mut symbols, "1+"), Value::Symbol(_)));
    }

    #[test]
    fn test_read_symbol_upcases() {
        let mut symbols = SymbolTable::new();
        let foo = read_ok(&mut symbols, "foo");
        assert_eq!(foo, sym(&mut symbols, "FOO"));
        let escaped = read_ok(&mut symbols, "|foo|");
        assert_eq!(escaped, sym(&mut symbols, "foo"));
    }

    #[test]
    fn test_read_nil() {
        let mut symbols = SymbolTable::new();
        assert!(read_ok(&mut symbols, "nil").is_nil());
        assert!(read_ok(&mut symbols, "()").is_nil());
    }

    #[test]
    fn test_read_list_and_dotted() {
        let mut symbols = SymbolTable::new();
        let list = read_ok(&mut symbols, "(1 2 3)");
        assert_eq!(list.list_to_vec().unwrap().len(), 3);

        let pair = read_ok(&mut symbols, "(1 . 2)");
        assert_eq!(pair.car(), Some(Value::Number(1.0)));
        assert_eq!(pair.cdr(), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_read_quote_forms() {
        let mut symbols = SymbolTable::new();
        let quoted = read_ok(&mut symbols, "'x");
        let quote = Value::Symbol(symbols.intern_cl("QUOTE"));
        assert_eq!(quoted.car(), Some(quote));

        let splice = read_ok(&mut symbols, ",@x");
        let unquote_splicing = Value::Symbol(symbols.intern_cl("UNQUOTE-SPLICING"));
        assert_eq!(splice.car(), Some(unquote_splicing));

        let function = read_ok(&mut symbols, "#'car");
        let function_sym = Value::Symbol(symbols.intern_cl("FUNCTION"));
        assert_eq!(function.car(), Some(function_sym));
    }

    #[test]
    fn test_read_string_escapes() {
        let mut symbols = SymbolTable::new();
        let s = read_ok(&mut symbols, r#""a\"b\\c""#);
        assert_eq!(s, Value::string("a\"b\\c"));
    }

    #[test]
    fn test_read_characters() {
        let mut symbols = SymbolTable::new();
        assert_eq!(read_ok(&mut symbols, "#\\a"), Value::Character('a'));
        assert_eq!(read_ok(&mut symbols, "#\\Space"), Value::Character(' '));
        assert_eq!(read_ok(&mut symbols, "#\\newline"), Value::Character('\n'));
        assert_eq!(read_ok(&mut symbols, "#\\("), Value::Character('('));
    }

    #[test]
    fn test_read_vector() {
        let mut symbols = SymbolTable::new();
        let v = read_ok(&mut symbols, "#(1 2)");
        assert_eq!(v, Value::vector(vec![Value::Number(1.0), Value::Number(2.0)]));
    }

    #[test]
    fn test_keywords_and_uninterned() {
        let mut symbols = SymbolTable::new();
        let kw = read_ok(&mut symbols, ":test");
        match kw {
            Value::Symbol(id) => assert!(symbols.is_keyword(id)),
            other => panic!("expected keyword, got {:?}", other),
        }
        let a = read_ok(&mut symbols, "#:g");
        let b = read_ok(&mut symbols, "#:g");
        assert!(!a.eql(&b));
    }

    #[test]
    fn test_package_prefix() {
        let mut symbols = SymbolTable::new();
        let car_id = symbols.intern_cl("CAR");
        assert_eq!(read_ok(&mut symbols, "cl:car"), Value::Symbol(car_id));
        assert_eq!(read_ok(&mut symbols, "car"), Value::Symbol(car_id));

        let err = read(&mut symbols, "cl:no-such-external");
        assert!(matches!(err, Err(ReaderError::Package(PackageError::NotExternal { .. }))));

        let internal = read_ok(&mut symbols, "cl::no-such-external");
        assert!(matches!(internal, Value::Symbol(_)));

        let err = read(&mut symbols, "nopkg:x");
        assert!(matches!(err, Err(ReaderError::Package(PackageError::NoSuchPackage(_)))));
    }

    #[test]
    fn test_comments() {
        let mut symbols = SymbolTable::new();
        let v = read_ok(&mut symbols, "; line\n #| block #| nested |# |# (1 ; inner\n 2)");
        assert_eq!(v.list_to_vec().unwrap().len(), 2);
    }

    #[test]
    fn test_feature_expressions() {
        let mut symbols = SymbolTable::new();
        assert_eq!(read_ok(&mut symbols, "#+hostlisp 1 2"), Value::Number(1.0));
        assert_eq!(read_ok(&mut symbols, "#-hostlisp 1 2"), Value::Number(2.0));
        assert_eq!(read_ok(&mut symbols, "#+(or sbcl hostlisp) 3"), Value::Number(3.0));
        assert_eq!(read_ok(&mut symbols, "#+(and hostlisp (not sbcl)) 4"), Value::Number(4.0));
        assert_eq!(symbols.current_package(), PackageId::COMMON_LISP_USER);
    }

    #[test]
    fn test_eof_sentinel() {
        let mut symbols = SymbolTable::new();
        assert!(read(&mut symbols, "   ; nothing").unwrap().is_none());
    }

    #[test]
    fn test_malformed_input() {
        let mut symbols = SymbolTable::new();
        assert!(matches!(read(&mut symbols, "(1 2"), Err(ReaderError::UnbalancedParen)));
        assert!(matches!(read(&mut symbols, "\"abc"), Err(ReaderError::UnterminatedString)));
        assert!(matches!(read(&mut symbols, "#<x>"), Err(ReaderError::UnknownDispatch('<'))));
        assert!(matches!(read(&mut symbols, ")"), Err(ReaderError::UnexpectedChar(')'))));
    }

    #[test]
    fn test_read_all() {
        let mut symbols = SymbolTable::new();
        let features = Vec::new();
        let forms = Reader::new("1 (a) \"s\"", &mut symbols, &features)
            .read_all()
            .unwrap();
        assert_eq!(forms.len(), 3);
    }
}
