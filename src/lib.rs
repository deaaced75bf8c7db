// HostLisp: a Common Lisp subset compiled to JavaScript
//
// The compiler lowers forms to a JavaScript AST (`js`). The AST prints as
// host source and runs on the in-process host (`host`), which backs `eval`,
// macro expanders and compile-time evaluation.

pub mod error;
pub mod types;
pub mod symbol;
pub mod env;
pub mod reader;
pub mod printer;

pub mod js;
pub mod host;
pub mod internals;
pub mod primitives;

pub mod counters;
pub mod context;
pub mod compiler;
pub mod lambda;
pub mod special_forms;
pub mod control;
pub mod backquote;
pub mod macroexpand;

pub mod session;

pub use error::{Error, Result};
pub use session::{Session, SessionOptions};
pub use types::Value;
