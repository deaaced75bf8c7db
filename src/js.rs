// HostLisp Target AST
//
// The compiler builds this tree; `Display` renders it as JavaScript source
// and the in-process host executes it directly.

use std::fmt::{self, Write};
use std::rc::Rc;

use crate::types::format_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Le,
    Ge,
    StrictEq,
    StrictNe,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::StrictEq => "===",
            BinOp::StrictNe => "!==",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    String(String),
    Bool(bool),
    Undefined,
    Ident(String),
    /// A member of the runtime support object, `internals.NAME`
    Internal(&'static str),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Function(Rc<FunctionExpr>),
    Array(Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    Comma(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct FunctionExpr {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Case {
    /// None for `default:`
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Var(String, Option<Expr>),
    Expr(Expr),
    Return(Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While {
        label: Option<String>,
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Expr,
        test: Expr,
        update: Expr,
        body: Vec<Stmt>,
    },
    /// Cases fall through unless they break
    Switch {
        discriminant: Expr,
        cases: Vec<Case>,
    },
    Break(Option<String>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        handler: Option<(String, Vec<Stmt>)>,
        finalizer: Option<Vec<Stmt>>,
    },
}

/// A compiled top-level unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(name.into())
    }

    pub fn string(s: impl Into<String>) -> Expr {
        Expr::String(s.into())
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Box::new(callee), args)
    }

    pub fn internal_call(name: &'static str, args: Vec<Expr>) -> Expr {
        Expr::call(Expr::Internal(name), args)
    }

    pub fn member(object: Expr, property: &str) -> Expr {
        Expr::Member(Box::new(object), property.to_string())
    }

    pub fn index(object: Expr, index: Expr) -> Expr {
        Expr::Index(Box::new(object), Box::new(index))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(expr))
    }

    pub fn cond(test: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Cond(Box::new(test), Box::new(then), Box::new(otherwise))
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign(Box::new(target), Box::new(value))
    }

    pub fn function(params: Vec<String>, body: Vec<Stmt>) -> Expr {
        Expr::Function(Rc::new(FunctionExpr { params, body }))
    }

    /// `(function(params){ body })(args)`
    pub fn iife(params: Vec<String>, args: Vec<Expr>, body: Vec<Stmt>) -> Expr {
        Expr::call(Expr::function(params, body), args)
    }

    pub fn nil() -> Expr {
        Expr::Internal("NIL")
    }

    pub fn t() -> Expr {
        Expr::Internal("T")
    }

    /// Side-effect free and value-irrelevant in statement position.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Expr::Number(_)
                | Expr::String(_)
                | Expr::Bool(_)
                | Expr::Undefined
                | Expr::Ident(_)
                | Expr::Internal(_)
                | Expr::Function(_)
        )
    }

    fn is_primary(&self) -> bool {
        match self {
            Expr::Number(n) => *n >= 0.0 && n.is_finite(),
            Expr::String(_)
            | Expr::Bool(_)
            | Expr::Undefined
            | Expr::Ident(_)
            | Expr::Internal(_)
            | Expr::Member(..)
            | Expr::Index(..)
            | Expr::Call(..)
            | Expr::Array(_) => true,
            _ => false,
        }
    }
}

pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' | '\u{2029}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct SourceWriter<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    indent: usize,
}

impl SourceWriter<'_, '_> {
    fn line_start(&mut self) -> fmt::Result {
        for _ in 0..self.indent {
            self.out.write_str("  ")?;
        }
        Ok(())
    }

    fn operand(&mut self, expr: &Expr) -> fmt::Result {
        if expr.is_primary() {
            self.expr(expr)
        } else {
            self.out.write_char('(')?;
            self.expr(expr)?;
            self.out.write_char(')')
        }
    }

    /// An element of a comma-separated list.
    fn item(&mut self, expr: &Expr) -> fmt::Result {
        if matches!(expr, Expr::Comma(_)) {
            self.out.write_char('(')?;
            self.expr(expr)?;
            self.out.write_char(')')
        } else {
            self.expr(expr)
        }
    }

    fn items(&mut self, exprs: &[Expr]) -> fmt::Result {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.write_str(", ")?;
            }
            self.item(e)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> fmt::Result {
        match expr {
            Expr::Number(n) => self.out.write_str(&format_number(*n)),
            Expr::String(s) => self.out.write_str(&quote_string(s)),
            Expr::Bool(b) => write!(self.out, "{}", b),
            Expr::Undefined => self.out.write_str("undefined"),
            Expr::Ident(name) => self.out.write_str(name),
            Expr::Internal(name) => write!(self.out, "internals.{}", name),
            Expr::Member(object, property) => {
                self.operand(object)?;
                write!(self.out, ".{}", property)
            }
            Expr::Index(object, index) => {
                self.operand(object)?;
                self.out.write_char('[')?;
                self.expr(index)?;
                self.out.write_char(']')
            }
            Expr::Call(callee, args) => {
                self.operand(callee)?;
                self.out.write_char('(')?;
                self.items(args)?;
                self.out.write_char(')')
            }
            Expr::Function(function) => {
                write!(self.out, "function({}) ", function.params.join(", "))?;
                self.block(&function.body)
            }
            Expr::Array(items) => {
                self.out.write_char('[')?;
                self.items(items)?;
                self.out.write_char(']')
            }
            Expr::Binary(op, left, right) => {
                self.operand(left)?;
                write!(self.out, " {} ", op.as_str())?;
                self.operand(right)
            }
            Expr::Unary(op, operand) => {
                self.out.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                })?;
                self.operand(operand)
            }
            Expr::Cond(test, then, otherwise) => {
                self.operand(test)?;
                self.out.write_str(" ? ")?;
                self.operand(then)?;
                self.out.write_str(" : ")?;
                self.operand(otherwise)
            }
            Expr::Assign(target, value) => {
                self.expr(target)?;
                self.out.write_str(" = ")?;
                self.item(value)
            }
            Expr::Comma(exprs) => self.items(exprs),
        }
    }

    fn block(&mut self, body: &[Stmt]) -> fmt::Result {
        self.out.write_str("{\n")?;
        self.indent += 1;
        for stmt in body {
            self.stmt(stmt)?;
        }
        self.indent -= 1;
        self.line_start()?;
        self.out.write_char('}')
    }

    fn stmt(&mut self, stmt: &Stmt) -> fmt::Result {
        self.line_start()?;
        match stmt {
            Stmt::Var(name, None) => write!(self.out, "var {};", name)?,
            Stmt::Var(name, Some(init)) => {
                write!(self.out, "var {} = ", name)?;
                self.item(init)?;
                self.out.write_char(';')?;
            }
            Stmt::Expr(expr) => {
                if matches!(expr, Expr::Function(_)) {
                    self.operand(&Expr::Comma(vec![expr.clone()]))?;
                } else {
                    self.expr(expr)?;
                }
                self.out.write_char(';')?;
            }
            Stmt::Return(expr) => {
                self.out.write_str("return ")?;
                self.expr(expr)?;
                self.out.write_char(';')?;
            }
            Stmt::If(test, then, otherwise) => {
                self.out.write_str("if (")?;
                self.expr(test)?;
                self.out.write_str(") ")?;
                self.block(then)?;
                if !otherwise.is_empty() {
                    self.out.write_str(" else ")?;
                    self.block(otherwise)?;
                }
            }
            Stmt::While { label, test, body } => {
                if let Some(label) = label {
                    write!(self.out, "{}: ", label)?;
                }
                self.out.write_str("while (")?;
                self.expr(test)?;
                self.out.write_str(") ")?;
                self.block(body)?;
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.out.write_str("for (")?;
                self.expr(init)?;
                self.out.write_str("; ")?;
                self.expr(test)?;
                self.out.write_str("; ")?;
                self.expr(update)?;
                self.out.write_str(") ")?;
                self.block(body)?;
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                self.out.write_str("switch (")?;
                self.expr(discriminant)?;
                self.out.write_str(") {\n")?;
                self.indent += 1;
                for case in cases {
                    self.line_start()?;
                    match &case.test {
                        Some(test) => {
                            self.out.write_str("case ")?;
                            self.expr(test)?;
                            self.out.write_str(":\n")?;
                        }
                        None => self.out.write_str("default:\n")?,
                    }
                    self.indent += 1;
                    for stmt in &case.body {
                        self.stmt(stmt)?;
                    }
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.line_start()?;
                self.out.write_char('}')?;
            }
            Stmt::Break(None) => self.out.write_str("break;")?,
            Stmt::Break(Some(label)) => write!(self.out, "break {};", label)?,
            Stmt::Throw(expr) => {
                self.out.write_str("throw ")?;
                self.expr(expr)?;
                self.out.write_char(';')?;
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
            } => {
                self.out.write_str("try ")?;
                self.block(block)?;
                if let Some((param, body)) = handler {
                    write!(self.out, " catch ({}) ", param)?;
                    self.block(body)?;
                }
                if let Some(body) = finalizer {
                    self.out.write_str(" finally ")?;
                    self.block(body)?;
                }
            }
        }
        self.out.write_char('\n')
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SourceWriter { out: f, indent: 0 }.expr(self)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SourceWriter { out: f, indent: 0 }.stmt(self)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut writer = SourceWriter { out: f, indent: 0 };
        for stmt in &self.body {
            writer.stmt(stmt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_escaping() {
        assert_eq!(quote_string("a\"b\\c\nd"), r#""a\"b\\c\nd""#);
    }

    #[test]
    fn test_iife_is_parenthesized() {
        let expr = Expr::iife(vec![], vec![], vec![Stmt::Return(Expr::Number(1.0))]);
        let text = expr.to_string();
        assert!(text.starts_with("(function() {"));
        assert!(text.ends_with("})()"));
    }

    #[test]
    fn test_operators_and_members() {
        let expr = Expr::cond(
            Expr::binary(BinOp::StrictNe, Expr::ident("x"), Expr::nil()),
            Expr::member(Expr::ident("l1"), "value"),
            Expr::Number(-1.0),
        );
        assert_eq!(expr.to_string(), "(x !== internals.NIL) ? l1.value : (-1)");
    }

    #[test]
    fn test_statements() {
        let stmt = Stmt::Try {
            block: vec![Stmt::Throw(Expr::ident("e"))],
            handler: Some(("cf".to_string(), vec![Stmt::Break(Some("loop1".into()))])),
            finalizer: Some(vec![]),
        };
        let text = stmt.to_string();
        assert!(text.contains("throw e;"));
        assert!(text.contains("catch (cf)"));
        assert!(text.contains("break loop1;"));
        assert!(text.contains("finally"));
    }
}
