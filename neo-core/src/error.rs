use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("runtime directory was not found at {0}")]
    MissingRuntime(PathBuf),
    #[error("runtime header was not found at {0}")]
    MissingRuntimeHeader(PathBuf),
    #[error("lex error: {0}")]
    LexError(Diagnostic),
    #[error("parse error: {0}")]
    ParseError(Diagnostic),
    #[error("semantic error: {0}")]
    SemanticError(Diagnostic),
}

impl CoreError {
    /// The source-positioned diagnostic behind this error, if any.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            CoreError::LexError(diag)
            | CoreError::ParseError(diag)
            | CoreError::SemanticError(diag) => Some(diag),
            _ => None,
        }
    }
}
