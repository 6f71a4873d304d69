use crate::language::{
    ast::{BinaryOp, ExprKind, Expression, FunctionDecl, Program, Statement, UnaryOp},
    context::FrontendContext,
    interner::StringId,
    scope::ScopeChain,
    types::ExpressionType,
};

/// Registered form of a function declaration: parameter types in order plus
/// the declared return type. Filled by the registration pass so bodies may
/// call functions declared later in the source.
#[derive(Clone)]
struct FunctionSignature {
    parameters: Vec<ExpressionType>,
    return_type: ExpressionType,
}

impl FunctionSignature {
    fn of(function: &FunctionDecl) -> Self {
        Self {
            parameters: function.parameters.iter().map(|param| param.ty).collect(),
            return_type: function.return_type,
        }
    }
}

/// Type checker entry point. Two passes over the whole program: register
/// every function signature, then check every body, annotating expression
/// nodes in place. Violations go through the context's error channel and
/// checking continues; the compile failed iff the error count is nonzero
/// afterwards.
pub fn run_semantic_pass(context: &mut FrontendContext, program: &mut Program) {
    let mut checker = TypeChecker::new(context);
    checker.check_program(program);
}

struct TypeChecker<'a> {
    context: &'a mut FrontendContext,
    functions: ScopeChain<FunctionSignature>,
    return_type: Option<ExpressionType>,
}

impl<'a> TypeChecker<'a> {
    fn new(context: &'a mut FrontendContext) -> Self {
        Self {
            context,
            functions: ScopeChain::new(),
            return_type: None,
        }
    }

    fn check_program(&mut self, program: &mut Program) {
        self.functions.push_scope();
        for function in &program.functions {
            if self.functions.defined_innermost(function.name) {
                let name = self.context.get_string(function.name).to_owned();
                self.context
                    .print_error(format!("function {name} should not be redefined"));
            } else {
                self.functions
                    .define(function.name, FunctionSignature::of(function));
            }
        }
        for function in &mut program.functions {
            self.check_function(function);
        }
        self.functions.pop_scope();
    }

    fn check_function(&mut self, function: &mut FunctionDecl) {
        self.return_type = Some(function.return_type);
        let mut variables = ScopeChain::new();
        variables.with_scope(|scope| {
            for param in &function.parameters {
                scope.define(param.name, param.ty);
            }
            for statement in &mut function.body {
                self.check_statement(scope, statement);
            }
        });
    }

    fn check_statement(
        &mut self,
        variables: &mut ScopeChain<ExpressionType>,
        statement: &mut Statement,
    ) {
        match statement {
            Statement::Print(value) => {
                self.evaluate(variables, value);
            }
            Statement::Assign { name, value } => {
                let name = *name;
                let Some(ty) = self.evaluate(variables, value) else {
                    return;
                };
                match variables.lookup(name) {
                    Some(&existing) if existing != ty => {
                        let var = self.context.get_string(name).to_owned();
                        self.context.print_error(format!(
                            "Cannot reassign variable {var} to different type"
                        ));
                    }
                    Some(_) => {}
                    // First assignment in a function defines the variable in
                    // that function's top scope.
                    None => variables.define(name, ty),
                }
            }
            Statement::Return(value) => {
                let Some(ty) = self.evaluate(variables, value) else {
                    return;
                };
                if self.return_type.is_some_and(|declared| declared != ty) {
                    self.context
                        .print_error(format!("Function cannot return value of type {ty}"));
                }
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                self.check_condition(variables, condition);
                // Loops and conditionals reuse the enclosing variable scope;
                // this language has function-level scoping only.
                for statement in then_body {
                    self.check_statement(variables, statement);
                }
                for statement in else_body {
                    self.check_statement(variables, statement);
                }
            }
            Statement::While { condition, body } | Statement::Repeat { condition, body } => {
                self.check_condition(variables, condition);
                for statement in body {
                    self.check_statement(variables, statement);
                }
            }
        }
    }

    fn check_condition(
        &mut self,
        variables: &mut ScopeChain<ExpressionType>,
        condition: &mut Expression,
    ) {
        let Some(ty) = self.evaluate(variables, condition) else {
            return;
        };
        if ty != ExpressionType::Boolean {
            self.context
                .print_error(format!("Cannot use {ty} in condition, expected Boolean"));
        }
    }

    /// Bottom-up expression typing, memoized onto the node. Returns None when
    /// the sub-expression failed to type; the error was already reported at
    /// its origin, so callers propagate the poison silently.
    fn evaluate(
        &mut self,
        variables: &mut ScopeChain<ExpressionType>,
        expr: &mut Expression,
    ) -> Option<ExpressionType> {
        if let Some(ty) = expr.get_type() {
            return Some(ty);
        }
        let ty = match &mut expr.kind {
            ExprKind::Literal(value) => Some(value.intrinsic_type()),
            ExprKind::Variable(name) => {
                let name = *name;
                match variables.lookup(name) {
                    Some(&ty) => Some(ty),
                    None => {
                        let var = self.context.get_string(name).to_owned();
                        self.context
                            .print_error(format!("used undefined variable {var}"));
                        None
                    }
                }
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let operand_type = self.evaluate(variables, operand)?;
                self.evaluate_unary_operation(op, operand_type)
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                // Evaluate both sides before bailing so one poisoned operand
                // does not hide errors in the other.
                let left_type = self.evaluate(variables, left);
                let right_type = self.evaluate(variables, right);
                self.evaluate_binary_operation(op, left_type?, right_type?)
            }
            ExprKind::Call {
                function,
                arguments,
            } => {
                let function = *function;
                self.evaluate_call(variables, function, arguments)
            }
        }?;
        expr.set_type(ty);
        Some(ty)
    }

    fn evaluate_unary_operation(
        &mut self,
        op: UnaryOp,
        operand: ExpressionType,
    ) -> Option<ExpressionType> {
        if operand != ExpressionType::Number {
            self.context
                .print_error(format!("Operation {op} not allowed for type {operand}"));
            return None;
        }
        Some(ExpressionType::Number)
    }

    fn evaluate_binary_operation(
        &mut self,
        op: BinaryOp,
        left: ExpressionType,
        right: ExpressionType,
    ) -> Option<ExpressionType> {
        let allowed = match op {
            BinaryOp::Less | BinaryOp::Equals => left == right,
            // `+` doubles as string concatenation; mixed operands stay errors.
            BinaryOp::Add => left == right && left != ExpressionType::Boolean,
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
                left == right && left == ExpressionType::Number
            }
        };
        if !allowed {
            self.context.print_error(format!(
                "Operation {op} not allowed for types {left} and {right}"
            ));
            return None;
        }
        match op {
            BinaryOp::Less | BinaryOp::Equals => Some(ExpressionType::Boolean),
            BinaryOp::Add => Some(left),
            _ => Some(ExpressionType::Number),
        }
    }

    fn evaluate_call(
        &mut self,
        variables: &mut ScopeChain<ExpressionType>,
        function: StringId,
        arguments: &mut [Expression],
    ) -> Option<ExpressionType> {
        let Some(signature) = self.functions.lookup(function).cloned() else {
            let name = self.context.get_string(function).to_owned();
            self.context
                .print_error(format!("function {name} is undefined"));
            // Still walk the arguments; their own errors are independent.
            for argument in arguments {
                self.evaluate(variables, argument);
            }
            return None;
        };
        let argument_types: Vec<Option<ExpressionType>> = arguments
            .iter_mut()
            .map(|argument| self.evaluate(variables, argument))
            .collect();
        if signature.parameters.len() != argument_types.len() {
            let name = self.context.get_string(function).to_owned();
            self.context.print_error(format!(
                "function {name} requires {} arguments, while {} provided",
                signature.parameters.len(),
                argument_types.len()
            ));
            return Some(signature.return_type);
        }
        for (index, (argument, expected)) in argument_types
            .iter()
            .zip(&signature.parameters)
            .enumerate()
        {
            if argument.is_some_and(|actual| actual != *expected) {
                let name = self.context.get_string(function).to_owned();
                self.context.print_error(format!(
                    "function {name} expects {expected} in the {index} parameter"
                ));
            }
        }
        // The call's type depends only on the registered signature, so the
        // node stays typed even when an argument was rejected.
        Some(signature.return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ast::{LiteralValue, ParameterDecl};
    use pretty_assertions::assert_eq;

    fn number(value: f64) -> Expression {
        Expression::literal(LiteralValue::Number(value))
    }

    fn boolean(value: bool) -> Expression {
        Expression::literal(LiteralValue::Boolean(value))
    }

    fn string(value: &str) -> Expression {
        Expression::literal(LiteralValue::String(value.into()))
    }

    fn check_single_function(
        context: &mut FrontendContext,
        return_type: ExpressionType,
        body: Vec<Statement>,
    ) -> Program {
        let name = context.intern("f");
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(name, Vec::new(), return_type, body));
        run_semantic_pass(context, &mut program);
        program
    }

    #[test]
    fn literal_statements_type_cleanly() {
        let mut context = FrontendContext::new();
        let program = check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::Print(number(1.0)),
                Statement::Print(boolean(true)),
                Statement::Print(string("hi")),
                Statement::Return(number(0.0)),
            ],
        );
        assert_eq!(context.errors_count(), 0);
        let Statement::Print(expr) = &program.functions[0].body[0] else {
            panic!("expected print");
        };
        assert_eq!(expr.get_type(), Some(ExpressionType::Number));
    }

    #[test]
    fn rechecking_an_annotated_ast_is_idempotent() {
        let mut context = FrontendContext::new();
        let name = context.intern("f");
        let x = context.intern("x");
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(
            name,
            Vec::new(),
            ExpressionType::Number,
            vec![
                Statement::Assign {
                    name: x,
                    value: Expression::binary(BinaryOp::Add, number(1.0), number(2.0)),
                },
                Statement::Return(Expression::variable(x)),
            ],
        ));
        run_semantic_pass(&mut context, &mut program);
        assert_eq!(context.errors_count(), 0);
        run_semantic_pass(&mut context, &mut program);
        assert_eq!(context.errors_count(), 0);
        let Statement::Return(expr) = &program.functions[0].body[1] else {
            panic!("expected return");
        };
        assert_eq!(expr.get_type(), Some(ExpressionType::Number));
    }

    #[test]
    fn reassigning_to_a_different_type_reports_exactly_one_error() {
        let mut context = FrontendContext::new();
        let x = context.intern("x");
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::Assign {
                    name: x,
                    value: number(1.0),
                },
                Statement::Assign {
                    name: x,
                    value: boolean(false),
                },
                Statement::Return(Expression::variable(x)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0]
            .message
            .contains("Cannot reassign variable x to different type"));
    }

    #[test]
    fn string_name_rebound_to_number_counts_one_error() {
        // Scenario: a name first bound to String, then assigned a Number.
        let mut context = FrontendContext::new();
        let s = context.intern("s");
        check_single_function(
            &mut context,
            ExpressionType::String,
            vec![
                Statement::Assign {
                    name: s,
                    value: string("text"),
                },
                Statement::Assign {
                    name: s,
                    value: number(3.0),
                },
                Statement::Return(Expression::variable(s)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
    }

    #[test]
    fn return_type_mismatch_names_the_type() {
        let mut context = FrontendContext::new();
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![Statement::Return(string("nope"))],
        );
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0]
            .message
            .contains("cannot return value of type String"));
    }

    #[test]
    fn mixed_number_string_addition_names_operator_and_types() {
        let mut context = FrontendContext::new();
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::Print(Expression::binary(BinaryOp::Add, number(1.0), string("b"))),
                Statement::Return(number(0.0)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
        let message = &context.errors()[0].message;
        assert!(message.contains('+'));
        assert!(message.contains("Number"));
        assert!(message.contains("String"));
    }

    #[test]
    fn string_concatenation_types_as_string() {
        let mut context = FrontendContext::new();
        let program = check_single_function(
            &mut context,
            ExpressionType::String,
            vec![Statement::Return(Expression::binary(
                BinaryOp::Add,
                string("a"),
                string("b"),
            ))],
        );
        assert_eq!(context.errors_count(), 0);
        let Statement::Return(expr) = &program.functions[0].body[0] else {
            panic!("expected return");
        };
        assert_eq!(expr.get_type(), Some(ExpressionType::String));
    }

    #[test]
    fn comparison_requires_same_types_and_yields_boolean() {
        let mut context = FrontendContext::new();
        let program = check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::Print(Expression::binary(
                    BinaryOp::Equals,
                    string("a"),
                    string("a"),
                )),
                Statement::Print(Expression::binary(BinaryOp::Less, number(1.0), boolean(true))),
                Statement::Return(number(0.0)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
        let Statement::Print(same) = &program.functions[0].body[0] else {
            panic!("expected print");
        };
        assert_eq!(same.get_type(), Some(ExpressionType::Boolean));
    }

    #[test]
    fn unary_operators_require_number() {
        let mut context = FrontendContext::new();
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::Print(Expression::unary(UnaryOp::Minus, string("x"))),
                Statement::Return(number(0.0)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0].message.contains("not allowed for type String"));
    }

    #[test]
    fn undefined_variable_is_reported_once() {
        let mut context = FrontendContext::new();
        let ghost = context.intern("ghost");
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![Statement::Return(Expression::variable(ghost))],
        );
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0]
            .message
            .contains("used undefined variable ghost"));
    }

    #[test]
    fn non_boolean_condition_is_rejected() {
        let mut context = FrontendContext::new();
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::While {
                    condition: number(1.0),
                    body: Vec::new(),
                },
                Statement::Return(number(0.0)),
            ],
        );
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0]
            .message
            .contains("Cannot use Number in condition"));
    }

    #[test]
    fn duplicate_function_names_are_rejected_but_checking_continues() {
        let mut context = FrontendContext::new();
        let name = context.intern("twice");
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(
            name,
            Vec::new(),
            ExpressionType::Number,
            vec![Statement::Return(number(1.0))],
        ));
        program.add_function(FunctionDecl::new(
            name,
            Vec::new(),
            ExpressionType::Number,
            vec![Statement::Return(string("oops"))],
        ));
        run_semantic_pass(&mut context, &mut program);
        // One redefinition error plus the bad return in the second body.
        assert_eq!(context.errors_count(), 2);
        assert!(context.errors()[0]
            .message
            .contains("function twice should not be redefined"));
    }

    #[test]
    fn calls_check_registration_arity_and_argument_types() {
        let mut context = FrontendContext::new();
        let add = context.intern("add");
        let main = context.intern("main");
        let a = context.intern("a");
        let b = context.intern("b");
        let missing = context.intern("missing");
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(
            add,
            vec![
                ParameterDecl::new(a, ExpressionType::Number),
                ParameterDecl::new(b, ExpressionType::Number),
            ],
            ExpressionType::Number,
            vec![Statement::Return(Expression::binary(
                BinaryOp::Add,
                Expression::variable(a),
                Expression::variable(b),
            ))],
        ));
        program.add_function(FunctionDecl::new(
            main,
            Vec::new(),
            ExpressionType::Number,
            vec![
                Statement::Print(Expression::call(add, vec![number(1.0)])),
                Statement::Print(Expression::call(add, vec![number(1.0), string("x")])),
                Statement::Print(Expression::call(missing, Vec::new())),
                Statement::Return(Expression::call(add, vec![number(2.0), number(3.0)])),
            ],
        ));
        run_semantic_pass(&mut context, &mut program);
        assert_eq!(context.errors_count(), 3);
        assert!(context.errors()[0]
            .message
            .contains("add requires 2 arguments, while 1 provided"));
        assert!(context.errors()[1]
            .message
            .contains("add expects Number in the 1 parameter"));
        assert!(context.errors()[2].message.contains("missing is undefined"));
    }

    #[test]
    fn forward_references_resolve_through_registration() {
        let mut context = FrontendContext::new();
        let first = context.intern("first");
        let second = context.intern("second");
        let mut program = Program::new();
        program.add_function(FunctionDecl::new(
            first,
            Vec::new(),
            ExpressionType::Number,
            vec![Statement::Return(Expression::call(second, Vec::new()))],
        ));
        program.add_function(FunctionDecl::new(
            second,
            Vec::new(),
            ExpressionType::Number,
            vec![Statement::Return(number(7.0))],
        ));
        run_semantic_pass(&mut context, &mut program);
        assert_eq!(context.errors_count(), 0);
    }

    #[test]
    fn branch_bodies_are_checked_in_the_function_scope() {
        let mut context = FrontendContext::new();
        let x = context.intern("x");
        check_single_function(
            &mut context,
            ExpressionType::Number,
            vec![
                Statement::If {
                    condition: boolean(true),
                    then_body: vec![Statement::Assign {
                        name: x,
                        value: number(1.0),
                    }],
                    else_body: vec![Statement::Assign {
                        name: x,
                        value: string("shadow"),
                    }],
                },
                Statement::Return(number(0.0)),
            ],
        );
        // No block scoping: the else branch sees the then branch's binding.
        assert_eq!(context.errors_count(), 1);
        assert!(context.errors()[0].message.contains("Cannot reassign"));
    }
}
