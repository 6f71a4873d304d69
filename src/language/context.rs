use crate::language::{
    errors::SemanticError,
    interner::{StringId, StringInterner},
};

/// Shared frontend services: string lookup and the error channel. One context
/// is created per compilation run and passed by reference into every pass, so
/// there is exactly one writer at a time and no ambient globals.
#[derive(Default)]
pub struct FrontendContext {
    interner: StringInterner,
    errors: Vec<SemanticError>,
}

impl FrontendContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> StringId {
        self.interner.intern(text)
    }

    pub fn get_string(&self, id: StringId) -> &str {
        self.interner.lookup(id)
    }

    /// Records a recoverable error and echoes it to stderr. The pass that
    /// detected the violation keeps going; the aggregate failure is read off
    /// `errors_count` at the end of the run.
    pub fn print_error(&mut self, message: impl Into<String>) {
        let error = SemanticError::new(message);
        eprintln!("  Error: {}", error.message);
        self.errors.push(error);
    }

    pub fn errors_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[SemanticError] {
        &self.errors
    }
}
