use std::fmt;

/// Static type of an expression. Every expression node carries one of these
/// after semantic analysis; the set is closed by design.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpressionType {
    Boolean,
    Number,
    String,
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpressionType::Boolean => "Boolean",
            ExpressionType::Number => "Number",
            ExpressionType::String => "String",
        };
        f.write_str(name)
    }
}
