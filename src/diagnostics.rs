use crate::language::{context::FrontendContext, errors::SemanticError};
use miette::{Diagnostic, Report};
use thiserror::Error;

/// Rich rendering for the errors a compilation run accumulated. The passes
/// themselves echo plain one-liners as they go; embedders call this at the
/// end of a run for the full report.
#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SemanticDiagnostic {
    message: String,
    #[help]
    help: Option<String>,
}

impl SemanticDiagnostic {
    pub fn from_error(error: &SemanticError) -> Self {
        Self {
            message: error.message.clone(),
            help: error.help.clone(),
        }
    }
}

pub fn emit_semantic_errors(context: &FrontendContext) {
    for error in context.errors() {
        eprintln!("{:?}", Report::new(SemanticDiagnostic::from_error(error)));
    }
}

/// One-line summary matching the per-error output format.
pub fn report_error_tally(context: &FrontendContext) {
    let count = context.errors_count();
    if count > 0 {
        eprintln!("{count} errors generated.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_carries_message_and_help() {
        let error = SemanticError::new("bad thing").with_help("do the good thing");
        let diagnostic = SemanticDiagnostic::from_error(&error);
        assert_eq!(diagnostic.to_string(), "bad thing");
    }
}
