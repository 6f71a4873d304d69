use inkwell::builder::BuilderError;
use thiserror::Error;

/// A recoverable violation found during semantic analysis. These never unwind
/// a pass; they are recorded on the frontend context and analysis continues.
#[derive(Clone, Debug)]
pub struct SemanticError {
    pub message: String,
    pub help: Option<String>,
}

impl SemanticError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// Per-function code generation failure. Unknown names here mean the type
/// checker was skipped or has a bug; they are handled defensively so the one
/// offending function can be discarded while its siblings still compile.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("expression reached code generation without a resolved type")]
    UntypedExpression,
    #[error("variable {0} cannot be rebound to a value of a different type")]
    AssignTypeConflict(String),
    #[error("function {name} takes {expected} arguments, {provided} provided")]
    ArgumentCount {
        name: String,
        expected: u32,
        provided: usize,
    },
    #[error("call to {0} produced no value")]
    VoidCall(String),
    #[error("Function verification failed for {0}")]
    Verification(String),
    #[error(transparent)]
    Builder(#[from] BuilderError),
}
