pub mod ast;
pub mod compiler;
pub mod context;
pub mod errors;
pub mod interner;
pub mod scope;
pub mod typecheck;
pub mod types;
