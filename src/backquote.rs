// HostLisp Backquote
//
// Rewrites a quasiquote template into list-construction code. Depth counts
// enclosing backquotes: an unquote at depth 1 is evaluated, deeper ones are
// rebuilt as data with one level consumed.

use crate::compiler::{CompileError, CompileResult, Compiler};
use crate::symbol::SymbolId;
use crate::types::Value;

/// Expansion of `(backquote template)`.
pub fn expand(c: &mut Compiler<'_>, template: &Value) -> CompileResult<Value> {
    Expander { c }.template(template, 1)
}

struct Expander<'c, 'a> {
    c: &'c mut Compiler<'a>,
}

enum Marker {
    Backquote,
    Unquote,
    Splice,
}

impl Expander<'_, '_> {
    fn sym(&self, pick: impl Fn(&crate::context::KnownSymbols) -> SymbolId) -> Value {
        Value::symbol(pick(&self.c.ctx.known))
    }

    fn quote(&self, value: Value) -> Value {
        Value::list(vec![self.sym(|k| k.quote), value])
    }

    /// `(backquote x)`, `(unquote x)` or `(unquote-splicing x)`, with `x`.
    fn marker(&self, form: &Value) -> Option<(Marker, Value)> {
        let head = form.car()?.as_symbol()?;
        let rest = form.cdr()?;
        let arg = match rest.list_to_vec()?.as_slice() {
            [arg] => arg.clone(),
            _ => return None,
        };
        let known = &self.c.ctx.known;
        let marker = if head == known.backquote {
            Marker::Backquote
        } else if head == known.unquote {
            Marker::Unquote
        } else if head == known.unquote_splicing {
            Marker::Splice
        } else {
            return None;
        };
        Some((marker, arg))
    }

    /// Rebuild a marker form as data at a deeper level.
    fn rebuild(&self, marker: SymbolId, inner: Value) -> Value {
        Value::list(vec![
            self.sym(|k| k.list),
            self.quote(Value::symbol(marker)),
            inner,
        ])
    }

    fn template(&mut self, template: &Value, depth: usize) -> CompileResult<Value> {
        match template {
            Value::Cons(_) => {
                if let Some((marker, arg)) = self.marker(template) {
                    return self.marked(template, marker, arg, depth);
                }
                self.list(template, depth)
            }
            Value::Vector(items) => {
                let items = items.borrow().clone();
                let list = self.list(&Value::list(items), depth)?;
                Ok(Value::list(vec![
                    self.sym(|k| k.apply),
                    Value::list(vec![self.sym(|k| k.function), self.sym(|k| k.vector)]),
                    list,
                ]))
            }
            Value::Symbol(_) | Value::Nil => Ok(self.quote(template.clone())),
            other => Ok(other.clone()),
        }
    }

    fn marked(
        &mut self,
        template: &Value,
        marker: Marker,
        arg: Value,
        depth: usize,
    ) -> CompileResult<Value> {
        let known = &self.c.ctx.known;
        let (backquote, unquote, splice) = (known.backquote, known.unquote, known.unquote_splicing);
        match marker {
            Marker::Backquote => {
                let inner = self.template(&arg, depth + 1)?;
                Ok(self.rebuild(backquote, inner))
            }
            Marker::Unquote if depth == 1 => Ok(arg),
            Marker::Unquote => {
                let inner = self.template(&arg, depth - 1)?;
                Ok(self.rebuild(unquote, inner))
            }
            Marker::Splice if depth == 1 => {
                Err(CompileError::SpliceOutsideList(self.c.describe(template)))
            }
            Marker::Splice => {
                let inner = self.template(&arg, depth - 1)?;
                Ok(self.rebuild(splice, inner))
            }
        }
    }

    /// Elements prepend with `cons`, `,@x` splices with `append`; a dotted
    /// `,x` or `,@x` tail becomes the tail itself.
    fn list(&mut self, template: &Value, depth: usize) -> CompileResult<Value> {
        let mut elements = Vec::new();
        let mut rest = template.clone();
        while let Value::Cons(cell) = &rest {
            if self.marker(&rest).is_some() {
                break;
            }
            elements.push(cell.car());
            let next = cell.cdr();
            rest = next;
        }

        let mut result = match self.marker(&rest) {
            Some((Marker::Unquote | Marker::Splice, arg)) if depth == 1 => arg,
            _ if rest.is_nil() => Value::Nil,
            _ => self.template(&rest, depth)?,
        };
        for element in elements.iter().rev() {
            result = match self.marker(element) {
                Some((Marker::Splice, arg)) if depth == 1 => {
                    Value::list(vec![self.sym(|k| k.append), arg, result])
                }
                _ => {
                    let item = self.template(element, depth)?;
                    Value::list(vec![self.sym(|k| k.cons), item, result])
                }
            };
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GlobalContext;
    use crate::host::Host;
    use crate::printer::print_to_string;
    use crate::reader::read_from_string;

    fn expand_text(source: &str) -> CompileResult<String> {
        let mut ctx = GlobalContext::new(vec![]);
        let host = Host::new(50);
        let form = read_from_string(source, &mut ctx.symbols, &[]).unwrap().unwrap();
        let template = form.cdr().and_then(|r| r.car()).unwrap();
        let mut compiler = Compiler::new(&mut ctx, &host);
        let expansion = expand(&mut compiler, &template)?;
        Ok(print_to_string(&expansion, &ctx.symbols))
    }

    #[test]
    fn test_atoms() {
        assert_eq!(expand_text("`a").unwrap(), "(QUOTE A)");
        assert_eq!(expand_text("`1").unwrap(), "1");
        assert_eq!(expand_text("`,x").unwrap(), "X");
    }

    #[test]
    fn test_cons_and_splice() {
        assert_eq!(
            expand_text("`(a ,b ,@c)").unwrap(),
            "(CONS (QUOTE A) (CONS B (APPEND C NIL)))"
        );
    }

    #[test]
    fn test_dotted_tail() {
        assert_eq!(expand_text("`(a . ,b)").unwrap(), "(CONS (QUOTE A) B)");
    }

    #[test]
    fn test_vector_template() {
        assert_eq!(
            expand_text("`#(1 ,x)").unwrap(),
            "(APPLY (FUNCTION VECTOR) (CONS 1 (CONS X NIL)))"
        );
    }

    #[test]
    fn test_nested_backquote_keeps_inner_unquote() {
        let text = expand_text("`(a `(b ,c))").unwrap();
        assert!(text.contains("(QUOTE BACKQUOTE)"));
        assert!(text.contains("(QUOTE UNQUOTE)"));
    }

    #[test]
    fn test_splice_directly_under_backquote() {
        assert!(matches!(expand_text("`,@x"), Err(CompileError::SpliceOutsideList(_))));
    }
}
