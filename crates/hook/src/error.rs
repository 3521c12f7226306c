//! The error taxonomy shared by the scanner, compiler, and VM.
//!
//! Compile-time errors (lexical, syntax, semantic) carry the source file,
//! line, and column of the offending token and abort compilation. Runtime
//! errors carry the file and line of the offending instruction, recovered
//! from the chunk's line table, and unwind every frame of the VM that
//! raised them. `Exit` is not a failure: it is how a script or native
//! requests process termination with a specific code.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("lexical error: {message}\n  in {file}:{line},{col}")]
    Lexical {
        message: String,
        file: String,
        line: u32,
        col: u32,
    },

    #[error("syntax error: {message}\n  in {file}:{line},{col}")]
    Syntax {
        message: String,
        file: String,
        line: u32,
        col: u32,
    },

    #[error("compile error: {message}\n  in {file}:{line},{col}")]
    Compile {
        message: String,
        file: String,
        line: u32,
        col: u32,
    },

    #[error("runtime error: {message}\n  in {file}:{line}")]
    Runtime {
        message: String,
        file: String,
        line: u32,
    },

    /// A script returned an integer from its top level, or a native called
    /// the exit builtin. Carries the requested process exit code.
    #[error("exit({0}) requested")]
    Exit(i32),

    #[error("stack overflow")]
    StackOverflow,

    #[error("too many nested calls")]
    CallOverflow,

    #[error("unable to load bytecode")]
    InvalidBytecode,
}

impl Error {
    /// Whether this error is an exit request rather than a failure.
    pub fn is_exit(&self) -> bool {
        matches!(self, Error::Exit(_))
    }

    /// The requested exit code, if this is an exit request.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Exit(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
