use crate::language::{interner::StringId, types::ExpressionType};
use std::fmt;

/// One compilation unit: an unordered collection of function declarations.
/// The external parser fills it through `add_function` as grammar productions
/// reduce.
#[derive(Debug, Default)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: FunctionDecl) {
        self.functions.push(function);
    }
}

/// Created once at parse time; later passes only read it, except that body
/// statements gain type annotations during checking.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: StringId,
    pub parameters: Vec<ParameterDecl>,
    pub return_type: ExpressionType,
    pub body: Vec<Statement>,
}

impl FunctionDecl {
    pub fn new(
        name: StringId,
        parameters: Vec<ParameterDecl>,
        return_type: ExpressionType,
        body: Vec<Statement>,
    ) -> Self {
        Self {
            name,
            parameters,
            return_type,
            body,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParameterDecl {
    pub name: StringId,
    pub ty: ExpressionType,
}

impl ParameterDecl {
    pub fn new(name: StringId, ty: ExpressionType) -> Self {
        Self { name, ty }
    }
}

#[derive(Debug)]
pub enum Statement {
    Print(Expression),
    Assign {
        name: StringId,
        value: Expression,
    },
    Return(Expression),
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    Repeat {
        condition: Expression,
        body: Vec<Statement>,
    },
}

/// An expression node plus its resolved static type. The type is absent until
/// the checker visits the node and is assigned exactly once.
#[derive(Debug)]
pub struct Expression {
    pub kind: ExprKind,
    ty: Option<ExpressionType>,
}

impl Expression {
    pub fn new(kind: ExprKind) -> Self {
        // A literal's type is intrinsic to its value tag and known at parse
        // time, same as parameter declarations.
        let ty = match &kind {
            ExprKind::Literal(value) => Some(value.intrinsic_type()),
            _ => None,
        };
        Self { kind, ty }
    }

    pub fn literal(value: LiteralValue) -> Self {
        Self::new(ExprKind::Literal(value))
    }

    pub fn variable(name: StringId) -> Self {
        Self::new(ExprKind::Variable(name))
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn call(function: StringId, arguments: Vec<Expression>) -> Self {
        Self::new(ExprKind::Call {
            function,
            arguments,
        })
    }

    pub fn get_type(&self) -> Option<ExpressionType> {
        self.ty
    }

    /// Annotates the node. A node is checked exactly once, so assigning a
    /// different type to an already-typed node is an invariant violation.
    pub fn set_type(&mut self, ty: ExpressionType) {
        debug_assert!(
            self.ty.is_none() || self.ty == Some(ty),
            "expression type annotated twice with different types"
        );
        self.ty = Some(ty);
    }
}

#[derive(Debug)]
pub enum ExprKind {
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Literal(LiteralValue),
    Call {
        function: StringId,
        arguments: Vec<Expression>,
    },
    Variable(StringId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl LiteralValue {
    pub fn intrinsic_type(&self) -> ExpressionType {
        match self {
            LiteralValue::Boolean(_) => ExpressionType::Boolean,
            LiteralValue::Number(_) => ExpressionType::Number,
            LiteralValue::String(_) => ExpressionType::String,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Less,
    Equals,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Less => "<",
            BinaryOp::Equals => "==",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        };
        f.write_str(symbol)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
        };
        f.write_str(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_type_is_intrinsic() {
        let number = Expression::literal(LiteralValue::Number(4.0));
        let boolean = Expression::literal(LiteralValue::Boolean(true));
        let string = Expression::literal(LiteralValue::String("hi".into()));
        assert_eq!(number.get_type(), Some(ExpressionType::Number));
        assert_eq!(boolean.get_type(), Some(ExpressionType::Boolean));
        assert_eq!(string.get_type(), Some(ExpressionType::String));
    }

    #[test]
    fn non_literal_nodes_start_untyped() {
        let mut interner = crate::language::interner::StringInterner::new();
        let x = interner.intern("x");
        let expr = Expression::variable(x);
        assert_eq!(expr.get_type(), None);
    }
}
