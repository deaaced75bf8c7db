// HostLisp Session - Top-Level Driver
//
// Read, compile and run, one top-level form at a time. Each form is fully
// compiled and executed before the next one is read, so macros and
// packages defined by earlier forms are visible to later ones.

use tracing::{debug, trace};

use crate::compiler::Compiler;
use crate::context::GlobalContext;
use crate::error::{Error, Result};
use crate::host::{Exception, Host, RuntimeError};
use crate::internals::values_of;
use crate::js::Program;
use crate::macroexpand;
use crate::printer::{princ_to_string, print_to_string};
use crate::reader::Reader;
use crate::symbol::SymbolTable;
use crate::types::Value;

const PRELUDE: &str = include_str!("prelude.lisp");

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Load the derived macros of the prelude
    pub prelude: bool,
    /// Features tested by `#+` and `#-`, upcased
    pub features: Vec<String>,
    /// Nesting limit for Lisp function calls. Each level also uses native
    /// stack, so deep programs need a thread with a large stack.
    pub max_call_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            prelude: true,
            features: vec!["HOSTLISP".to_string(), "COMMON-LISP".to_string()],
            max_call_depth: 10_000,
        }
    }
}

pub struct Session {
    ctx: GlobalContext,
    host: Host,
}

impl Session {
    pub fn new() -> Result<Self> {
        Self::with_options(SessionOptions::default())
    }

    pub fn with_options(options: SessionOptions) -> Result<Self> {
        let features = options
            .features
            .iter()
            .map(|f| f.to_ascii_uppercase())
            .collect();
        let mut session = Self {
            ctx: GlobalContext::new(features),
            host: Host::new(options.max_call_depth),
        };
        if options.prelude {
            session.eval_string(PRELUDE)?;
            debug!("prelude loaded");
        }
        Ok(session)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.ctx.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.ctx.symbols
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// The first form of `text`, or None if it holds only whitespace and
    /// comments.
    pub fn read(&mut self, text: &str) -> Result<Option<Value>> {
        Ok(Reader::new(text, &mut self.ctx.symbols, &self.ctx.features).read()?)
    }

    pub fn read_all(&mut self, text: &str) -> Result<Vec<Value>> {
        Ok(Reader::new(text, &mut self.ctx.symbols, &self.ctx.features).read_all()?)
    }

    /// Read one form and return it with the unread remainder of `text`.
    fn read_next<'t>(&mut self, text: &'t str) -> Result<Option<(Value, &'t str)>> {
        let mut reader = Reader::new(text, &mut self.ctx.symbols, &self.ctx.features);
        let form = match reader.read()? {
            Some(form) => form,
            None => return Ok(None),
        };
        let consumed = reader.position();
        let offset = text
            .char_indices()
            .nth(consumed)
            .map_or(text.len(), |(i, _)| i);
        Ok(Some((form, &text[offset..])))
    }

    // ========================================================================
    // Compiling and running
    // ========================================================================

    pub fn compile(&mut self, form: &Value) -> Result<Program> {
        let mut compiler = Compiler::new(&mut self.ctx, &self.host);
        Ok(compiler.compile_toplevel(form)?)
    }

    pub fn compile_to_string(&mut self, form: &Value) -> Result<String> {
        Ok(self.compile(form)?.to_string())
    }

    /// Compile and run one form, returning all of its values.
    pub fn eval(&mut self, form: &Value) -> Result<Vec<Value>> {
        let program = self.compile(form)?;
        trace!(program = %program, "running");
        match self.host.run(&program, &mut self.ctx.symbols) {
            Ok(result) => Ok(values_of(&result)),
            Err(e) => Err(self.runtime_error(e)),
        }
    }

    /// Compile every form of `text` to host source, one program per form.
    /// Forms are compiled in order and not run; DEFMACRO, DECLAIM and
    /// `eval-when (:compile-toplevel)` still take effect as they are met.
    pub fn compile_string(&mut self, text: &str) -> Result<String> {
        let mut out = String::new();
        let mut rest = text;
        while let Some((form, remaining)) = self.read_next(rest)? {
            out.push_str(&self.compile_to_string(&form)?);
            rest = remaining;
        }
        Ok(out)
    }

    /// Evaluate every form of `text` in order; the values of the last one
    /// are returned.
    pub fn eval_string(&mut self, text: &str) -> Result<Vec<Value>> {
        let mut last = vec![Value::Nil];
        let mut rest = text;
        while let Some((form, remaining)) = self.read_next(rest)? {
            last = self.eval(&form)?;
            rest = remaining;
        }
        Ok(last)
    }

    pub fn macroexpand_1(&mut self, form: &Value) -> Result<(Value, bool)> {
        let mut compiler = Compiler::new(&mut self.ctx, &self.host);
        Ok(macroexpand::expand_1(&mut compiler, form)?)
    }

    pub fn macroexpand(&mut self, form: &Value) -> Result<(Value, bool)> {
        let mut compiler = Compiler::new(&mut self.ctx, &self.host);
        Ok(macroexpand::expand(&mut compiler, form)?)
    }

    // ========================================================================
    // Printing
    // ========================================================================

    pub fn print(&self, value: &Value) -> String {
        print_to_string(value, &self.ctx.symbols)
    }

    pub fn princ(&self, value: &Value) -> String {
        princ_to_string(value, &self.ctx.symbols)
    }

    /// A host exception that reached the top level.
    fn runtime_error(&self, e: Exception) -> Error {
        match e {
            Exception::Error(err) => err.into(),
            Exception::Throw(Value::Transfer(transfer)) => {
                let name = transfer
                    .name
                    .clone()
                    .unwrap_or_else(|| self.print(&transfer.id));
                RuntimeError::UnmatchedTransfer {
                    kind: transfer.kind.as_str(),
                    name,
                }
                .into()
            }
            Exception::Throw(other) => RuntimeError::Uncaught(self.print(&other)).into(),
        }
    }
}
