//! Core compiler pipeline for the Neo language.
//!
//! The pipeline is roughly:
//!
//!   source .neo
//!     -> lexer      (tokens, bracket groups)
//!     -> parser     (statement tree over token slices)
//!     -> compiler   (scopes, lifetimes, forward references)
//!     -> codegen_c  (C translation unit against the Neo runtime)
//!
//! Higher-level tools (the CLI and its host build step) should depend on
//! this crate rather than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Language surface: operators, builtins and the C runtime
// ---------------------------------------------------------------------

pub mod operators;
pub mod builtins;
pub mod runtime;

// ---------------------------------------------------------------------
// Back-end: scopes, expressions, code generation
// ---------------------------------------------------------------------

pub mod scope;
pub mod expression;
pub mod codegen_c;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompilationArtifact, CompileOptions, compile_c, compile_c_with};
pub use diagnostic::Diagnostic;
pub use error::CoreError;
