// HostLisp Errors
//
// One error type per layer, folded into the crate-wide `Error`.

use thiserror::Error;

pub use crate::compiler::CompileError;
pub use crate::host::RuntimeError;
pub use crate::reader::ReaderError;
pub use crate::symbol::PackageError;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Package(#[from] PackageError),
}

pub type Result<T> = std::result::Result<T, Error>;
