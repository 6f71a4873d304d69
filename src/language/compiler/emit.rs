use inkwell::{
    basic_block::BasicBlock,
    builder::Builder,
    values::{
        BasicMetadataValueEnum, BasicValueEnum, FunctionValue, IntValue, PointerValue,
    },
    AddressSpace, FloatPredicate, IntPredicate,
};

use super::{CodegenContext, StorageCell};
use crate::language::{
    ast::{BinaryOp, ExprKind, Expression, FunctionDecl, LiteralValue, Statement, UnaryOp},
    context::FrontendContext,
    errors::CodegenError,
    interner::StringId,
    scope::ScopeChain,
    types::ExpressionType,
};

/// An expression result plus who owns it. `owned` marks a heap string the
/// current statement is responsible for: it either transfers into a variable
/// or return slot, or is freed when the statement finishes.
struct EmittedValue<'ctx> {
    value: BasicValueEnum<'ctx>,
    owned: bool,
}

impl<'ctx> EmittedValue<'ctx> {
    fn borrowed(value: BasicValueEnum<'ctx>) -> Self {
        Self {
            value,
            owned: false,
        }
    }

    fn owned(value: BasicValueEnum<'ctx>) -> Self {
        Self { value, owned: true }
    }
}

/// Lowers one function body. Owns the builder, the list of heap strings the
/// current statement still has to release, and the list of String stack cells
/// that every exit path must sweep.
pub(super) struct FunctionCodegen<'ctx, 'a> {
    frontend: &'a FrontendContext,
    codegen: &'a mut CodegenContext<'ctx>,
    variables: &'a mut ScopeChain<StorageCell<'ctx>>,
    builder: Builder<'ctx>,
    function: FunctionValue<'ctx>,
    entry: BasicBlock<'ctx>,
    is_main: bool,
    trace: bool,
    pending_strings: Vec<PointerValue<'ctx>>,
    string_cells: Vec<PointerValue<'ctx>>,
}

impl<'ctx, 'a> FunctionCodegen<'ctx, 'a> {
    pub fn new(
        frontend: &'a FrontendContext,
        codegen: &'a mut CodegenContext<'ctx>,
        variables: &'a mut ScopeChain<StorageCell<'ctx>>,
        builder: Builder<'ctx>,
        function: FunctionValue<'ctx>,
        is_main: bool,
    ) -> Self {
        let entry = codegen.llvm.append_basic_block(function, "entry");
        builder.position_at_end(entry);
        Self {
            frontend,
            codegen,
            variables,
            builder,
            function,
            entry,
            is_main,
            trace: std::env::var_os("LUMEN_DEBUG_TRACE").is_some(),
            pending_strings: Vec::new(),
            string_cells: Vec::new(),
        }
    }

    pub fn generate(mut self, declaration: &FunctionDecl) -> Result<(), CodegenError> {
        self.load_parameters(declaration)?;
        self.precreate_string_cells(&declaration.body)?;
        for statement in &declaration.body {
            self.generate_statement(statement)?;
        }
        // main falls off the end into the process exit status.
        if self.is_main && !self.current_block_terminated() {
            self.free_string_cells()?;
            let status = self.codegen.llvm.i32_type().const_int(0, false);
            self.builder.build_return(Some(&status))?;
        }
        Ok(())
    }

    /// Materializes each parameter into a stack cell. String parameters are
    /// duplicated on entry so the function owns its copy and the caller stays
    /// free to release the argument.
    fn load_parameters(&mut self, declaration: &FunctionDecl) -> Result<(), CodegenError> {
        for (index, parameter) in declaration.parameters.iter().enumerate() {
            let incoming = self
                .function
                .get_nth_param(index as u32)
                .ok_or_else(|| self.unknown_variable(parameter.name))?;
            let value = if parameter.ty == ExpressionType::String {
                self.duplicate_string(incoming.into_pointer_value())?.into()
            } else {
                incoming
            };
            let cell = self.create_storage_cell(parameter.name, parameter.ty)?;
            self.builder.build_store(cell.ptr, value)?;
            self.variables.define(parameter.name, cell);
        }
        Ok(())
    }

    /// Creates the cell for every String assignment target before the first
    /// statement is lowered. A `return` inside a loop can execute after a
    /// textually later assignment has already run, so exit sweeps must cover
    /// every String cell in the body, not only the ones lowered so far.
    fn precreate_string_cells(&mut self, body: &[Statement]) -> Result<(), CodegenError> {
        for statement in body {
            match statement {
                Statement::Assign { name, value } => {
                    if value.get_type() == Some(ExpressionType::String)
                        && self.variables.lookup(*name).is_none()
                    {
                        let cell = self.create_storage_cell(*name, ExpressionType::String)?;
                        self.variables.define(*name, cell);
                    }
                }
                Statement::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.precreate_string_cells(then_body)?;
                    self.precreate_string_cells(else_body)?;
                }
                Statement::While { body, .. } | Statement::Repeat { body, .. } => {
                    self.precreate_string_cells(body)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Allocates a stack slot in the entry block. String cells start out null
    /// so the exit sweep can free them unconditionally on every path.
    fn create_storage_cell(
        &mut self,
        name: StringId,
        ty: ExpressionType,
    ) -> Result<StorageCell<'ctx>, CodegenError> {
        let storage = self.codegen.storage_type(ty);
        let temp = self.codegen.llvm.create_builder();
        match self.entry.get_first_instruction() {
            Some(first) => temp.position_before(&first),
            None => temp.position_at_end(self.entry),
        }
        let ptr = temp.build_alloca(storage, self.frontend.get_string(name))?;
        if ty == ExpressionType::String {
            let null = self
                .codegen
                .llvm
                .i8_type()
                .ptr_type(AddressSpace::default())
                .const_null();
            temp.build_store(ptr, null)?;
            self.string_cells.push(ptr);
        }
        Ok(StorageCell { ptr, ty })
    }

    fn generate_statement(&mut self, statement: &Statement) -> Result<(), CodegenError> {
        // Statements after a return are unreachable. They still lower, into a
        // detached block that the pruning pass deletes afterwards.
        if self.current_block_terminated() {
            let orphan = self
                .codegen
                .llvm
                .append_basic_block(self.function, "unreachable");
            self.builder.position_at_end(orphan);
        }
        if self.trace {
            eprintln!(
                "[codegen] {} :: {}",
                self.function.get_name().to_string_lossy(),
                statement_label(statement)
            );
        }
        match statement {
            Statement::Print(expression) => self.generate_print(expression),
            Statement::Assign { name, value } => self.generate_assign(*name, value),
            Statement::Return(expression) => self.generate_return(expression),
            Statement::If {
                condition,
                then_body,
                else_body,
            } => self.generate_if(condition, then_body, else_body),
            Statement::While { condition, body } => self.generate_while(condition, body),
            Statement::Repeat { condition, body } => self.generate_repeat(condition, body),
        }
    }

    fn generate_print(&mut self, expression: &Expression) -> Result<(), CodegenError> {
        let ty = expression
            .get_type()
            .ok_or(CodegenError::UntypedExpression)?;
        let emitted = self.generate_expression(expression)?;
        let (format, argument): (&str, BasicMetadataValueEnum) = match ty {
            ExpressionType::Number => ("%lf\n", emitted.value.into()),
            ExpressionType::String => ("%s\n", emitted.value.into()),
            ExpressionType::Boolean => (
                "%s\n",
                self.boolean_to_string(emitted.value.into_int_value())?
                    .into(),
            ),
        };
        let format = self.codegen.string_literal(&self.builder, format)?;
        let printf = self.codegen.builtins().printf;
        self.builder
            .build_call(printf, &[format.into(), argument], "printtmp")?;
        self.release_pending_strings()
    }

    fn generate_assign(&mut self, name: StringId, value: &Expression) -> Result<(), CodegenError> {
        let ty = value.get_type().ok_or(CodegenError::UntypedExpression)?;
        let emitted = self.generate_expression(value)?;
        let stored: BasicValueEnum = if ty == ExpressionType::String {
            self.claim_string(emitted)?.into()
        } else {
            emitted.value
        };
        let cell = match self.variables.lookup(name).copied() {
            Some(cell) => {
                if cell.ty != ty {
                    return Err(CodegenError::AssignTypeConflict(
                        self.frontend.get_string(name).to_owned(),
                    ));
                }
                cell
            }
            None => {
                let cell = self.create_storage_cell(name, ty)?;
                self.variables.define(name, cell);
                cell
            }
        };
        if ty == ExpressionType::String {
            // Fresh cells hold null from the entry block and free(NULL) is a
            // no-op, so the previous value can be dropped unconditionally.
            let previous = self.builder.build_load(cell.ptr, "oldstr")?;
            self.free_string(previous.into_pointer_value())?;
        }
        self.builder.build_store(cell.ptr, stored)?;
        self.release_pending_strings()
    }

    fn generate_return(&mut self, expression: &Expression) -> Result<(), CodegenError> {
        let ty = expression
            .get_type()
            .ok_or(CodegenError::UntypedExpression)?;
        let emitted = self.generate_expression(expression)?;
        let result: BasicValueEnum = if ty == ExpressionType::String {
            // The caller receives its own copy; local cells are swept below.
            self.claim_string(emitted)?.into()
        } else {
            emitted.value
        };
        self.release_pending_strings()?;
        self.free_string_cells()?;
        self.builder.build_return(Some(&result))?;
        Ok(())
    }

    fn generate_if(
        &mut self,
        condition: &Expression,
        then_body: &[Statement],
        else_body: &[Statement],
    ) -> Result<(), CodegenError> {
        let flag = self.generate_condition(condition, "ifcond")?;
        let then_block = self.codegen.llvm.append_basic_block(self.function, "then");
        let else_block = self.codegen.llvm.append_basic_block(self.function, "else");
        let merge_block = self
            .codegen
            .llvm
            .append_basic_block(self.function, "continue");
        self.builder
            .build_conditional_branch(flag, then_block, else_block)?;

        self.builder.position_at_end(then_block);
        for statement in then_body {
            self.generate_statement(statement)?;
        }
        if !self.current_block_terminated() {
            self.builder.build_unconditional_branch(merge_block)?;
        }

        self.builder.position_at_end(else_block);
        for statement in else_body {
            self.generate_statement(statement)?;
        }
        if !self.current_block_terminated() {
            self.builder.build_unconditional_branch(merge_block)?;
        }

        self.builder.position_at_end(merge_block);
        Ok(())
    }

    /// Condition first: a false condition skips the body entirely.
    fn generate_while(
        &mut self,
        condition: &Expression,
        body: &[Statement],
    ) -> Result<(), CodegenError> {
        let cond_block = self.codegen.llvm.append_basic_block(self.function, "cond");
        let loop_block = self.codegen.llvm.append_basic_block(self.function, "loop");
        let next_block = self
            .codegen
            .llvm
            .append_basic_block(self.function, "continue");
        self.builder.build_unconditional_branch(cond_block)?;

        self.builder.position_at_end(cond_block);
        let flag = self.generate_condition(condition, "loopcond")?;
        self.builder
            .build_conditional_branch(flag, loop_block, next_block)?;

        self.builder.position_at_end(loop_block);
        for statement in body {
            self.generate_statement(statement)?;
        }
        if !self.current_block_terminated() {
            self.builder.build_unconditional_branch(cond_block)?;
        }

        self.builder.position_at_end(next_block);
        Ok(())
    }

    /// Body first: the body runs at least once, then the condition decides
    /// whether to go around again.
    fn generate_repeat(
        &mut self,
        condition: &Expression,
        body: &[Statement],
    ) -> Result<(), CodegenError> {
        let loop_block = self.codegen.llvm.append_basic_block(self.function, "loop");
        let cond_block = self.codegen.llvm.append_basic_block(self.function, "cond");
        let next_block = self
            .codegen
            .llvm
            .append_basic_block(self.function, "continue");
        self.builder.build_unconditional_branch(loop_block)?;

        self.builder.position_at_end(loop_block);
        for statement in body {
            self.generate_statement(statement)?;
        }
        if !self.current_block_terminated() {
            self.builder.build_unconditional_branch(cond_block)?;
        }

        self.builder.position_at_end(cond_block);
        let flag = self.generate_condition(condition, "loopcond")?;
        self.builder
            .build_conditional_branch(flag, loop_block, next_block)?;

        self.builder.position_at_end(next_block);
        Ok(())
    }

    /// Lowers a Boolean expression to an i1 for branching. Any heap strings
    /// produced while evaluating the condition are released before the
    /// branch, while the block is still open.
    fn generate_condition(
        &mut self,
        expression: &Expression,
        name: &str,
    ) -> Result<IntValue<'ctx>, CodegenError> {
        let emitted = self.generate_expression(expression)?;
        let value = emitted.value.into_int_value();
        self.release_pending_strings()?;
        let zero = self.codegen.llvm.i8_type().const_int(0, false);
        Ok(self
            .builder
            .build_int_compare(IntPredicate::NE, value, zero, name)?)
    }

    fn generate_expression(
        &mut self,
        expression: &Expression,
    ) -> Result<EmittedValue<'ctx>, CodegenError> {
        match &expression.kind {
            ExprKind::Literal(value) => self.generate_literal(value),
            ExprKind::Variable(name) => {
                let cell = self
                    .variables
                    .lookup(*name)
                    .copied()
                    .ok_or_else(|| self.unknown_variable(*name))?;
                let value = self
                    .builder
                    .build_load(cell.ptr, self.frontend.get_string(*name))?;
                Ok(EmittedValue::borrowed(value))
            }
            ExprKind::Unary { op, operand } => {
                let emitted = self.generate_expression(operand)?;
                let number = emitted.value.into_float_value();
                let value = match op {
                    UnaryOp::Plus => number,
                    UnaryOp::Minus => self.builder.build_float_neg(number, "negtmp")?,
                };
                Ok(EmittedValue::borrowed(value.into()))
            }
            ExprKind::Binary { op, left, right } => self.generate_binary(*op, left, right),
            ExprKind::Call {
                function,
                arguments,
            } => self.generate_call(expression, *function, arguments),
        }
    }

    fn generate_literal(&mut self, value: &LiteralValue) -> Result<EmittedValue<'ctx>, CodegenError> {
        let lowered: BasicValueEnum = match value {
            LiteralValue::Boolean(flag) => self
                .codegen
                .llvm
                .i8_type()
                .const_int(u64::from(*flag), false)
                .into(),
            LiteralValue::Number(number) => {
                self.codegen.llvm.f64_type().const_float(*number).into()
            }
            LiteralValue::String(text) => self
                .codegen
                .string_literal(&self.builder, text)?
                .into(),
        };
        Ok(EmittedValue::borrowed(lowered))
    }

    fn generate_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<EmittedValue<'ctx>, CodegenError> {
        // Operands already agree on a type; the left one names it.
        let operand_type = left.get_type().ok_or(CodegenError::UntypedExpression)?;
        let lhs = self.generate_expression(left)?;
        let rhs = self.generate_expression(right)?;
        match operand_type {
            ExpressionType::Number => {
                let lhs = lhs.value.into_float_value();
                let rhs = rhs.value.into_float_value();
                let value: BasicValueEnum = match op {
                    BinaryOp::Add => self.builder.build_float_add(lhs, rhs, "addtmp")?.into(),
                    BinaryOp::Subtract => {
                        self.builder.build_float_sub(lhs, rhs, "subtmp")?.into()
                    }
                    BinaryOp::Multiply => {
                        self.builder.build_float_mul(lhs, rhs, "multmp")?.into()
                    }
                    BinaryOp::Divide => self.builder.build_float_div(lhs, rhs, "divtmp")?.into(),
                    BinaryOp::Modulo => self.builder.build_float_rem(lhs, rhs, "modtmp")?.into(),
                    BinaryOp::Less => {
                        let flag = self.builder.build_float_compare(
                            FloatPredicate::OLT,
                            lhs,
                            rhs,
                            "cmptmp",
                        )?;
                        self.widen_flag(flag)?
                    }
                    BinaryOp::Equals => {
                        let flag = self.builder.build_float_compare(
                            FloatPredicate::OEQ,
                            lhs,
                            rhs,
                            "cmptmp",
                        )?;
                        self.widen_flag(flag)?
                    }
                };
                Ok(EmittedValue::borrowed(value))
            }
            ExpressionType::Boolean => {
                let lhs = lhs.value.into_int_value();
                let rhs = rhs.value.into_int_value();
                // The checker admits only comparisons for Boolean operands.
                let predicate = match op {
                    BinaryOp::Less => IntPredicate::ULT,
                    BinaryOp::Equals => IntPredicate::EQ,
                    _ => return Err(CodegenError::UntypedExpression),
                };
                let flag = self.builder.build_int_compare(predicate, lhs, rhs, "cmptmp")?;
                Ok(EmittedValue::borrowed(self.widen_flag(flag)?))
            }
            ExpressionType::String => self.generate_string_binary(op, lhs, rhs),
        }
    }

    fn generate_string_binary(
        &mut self,
        op: BinaryOp,
        lhs: EmittedValue<'ctx>,
        rhs: EmittedValue<'ctx>,
    ) -> Result<EmittedValue<'ctx>, CodegenError> {
        let left = lhs.value.into_pointer_value();
        let right = rhs.value.into_pointer_value();
        match op {
            BinaryOp::Add => {
                let result = self.concat_strings(left, right)?;
                self.pending_strings.push(result);
                Ok(EmittedValue::owned(result.into()))
            }
            BinaryOp::Less | BinaryOp::Equals => {
                let strcmp = self.codegen.builtins().strcmp;
                let ordering = self
                    .call_builtin(strcmp, &[left.into(), right.into()], "cmptmp")?
                    .into_int_value();
                let zero = self.codegen.llvm.i32_type().const_int(0, false);
                let predicate = if op == BinaryOp::Less {
                    IntPredicate::SLT
                } else {
                    IntPredicate::EQ
                };
                let flag = self
                    .builder
                    .build_int_compare(predicate, ordering, zero, "cmptmp")?;
                Ok(EmittedValue::borrowed(self.widen_flag(flag)?))
            }
            _ => Err(CodegenError::UntypedExpression),
        }
    }

    fn generate_call(
        &mut self,
        expression: &Expression,
        name: StringId,
        arguments: &[Expression],
    ) -> Result<EmittedValue<'ctx>, CodegenError> {
        let callee = self
            .codegen
            .functions
            .lookup(name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction(self.frontend.get_string(name).to_owned()))?;
        if callee.count_params() as usize != arguments.len() {
            return Err(CodegenError::ArgumentCount {
                name: self.frontend.get_string(name).to_owned(),
                expected: callee.count_params(),
                provided: arguments.len(),
            });
        }
        // String arguments pass by pointer; the callee duplicates them on
        // entry, so ownership stays with this statement.
        let mut lowered: Vec<BasicMetadataValueEnum> = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let emitted = self.generate_expression(argument)?;
            lowered.push(emitted.value.into());
        }
        let value = self.call_builtin(callee, &lowered, "calltmp")?;
        if expression.get_type() == Some(ExpressionType::String) {
            // A returned string is a fresh allocation owned by this statement.
            self.pending_strings.push(value.into_pointer_value());
            Ok(EmittedValue::owned(value))
        } else {
            Ok(EmittedValue::borrowed(value))
        }
    }

    /// `strlen(a) + strlen(b) + 1` bytes of fresh memory, then copy and
    /// append. The caller owns the result.
    fn concat_strings(
        &mut self,
        left: PointerValue<'ctx>,
        right: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let strlen = self.codegen.builtins().strlen;
        let malloc = self.codegen.builtins().malloc;
        let strcpy = self.codegen.builtins().strcpy;
        let strcat = self.codegen.builtins().strcat;
        let left_len = self
            .call_builtin(strlen, &[left.into()], "lentmp")?
            .into_int_value();
        let right_len = self
            .call_builtin(strlen, &[right.into()], "lentmp")?
            .into_int_value();
        let total = self.builder.build_int_add(left_len, right_len, "lentmp")?;
        let one = self.codegen.llvm.i64_type().const_int(1, false);
        let size = self.builder.build_int_add(total, one, "sizetmp")?;
        let memory = self
            .call_builtin(malloc, &[size.into()], "concatmem")?
            .into_pointer_value();
        self.call_builtin(strcpy, &[memory.into(), left.into()], "copytmp")?;
        let result = self
            .call_builtin(strcat, &[memory.into(), right.into()], "concattmp")?
            .into_pointer_value();
        Ok(result)
    }

    /// Takes ownership of a string value for storing or returning. Owned
    /// values transfer as-is; borrowed ones are duplicated.
    fn claim_string(
        &mut self,
        emitted: EmittedValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let pointer = emitted.value.into_pointer_value();
        if emitted.owned {
            self.pending_strings.retain(|candidate| *candidate != pointer);
            Ok(pointer)
        } else {
            self.duplicate_string(pointer)
        }
    }

    fn duplicate_string(
        &self,
        pointer: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let strdup = self.codegen.builtins().strdup;
        Ok(self
            .call_builtin(strdup, &[pointer.into()], "duptmp")?
            .into_pointer_value())
    }

    /// Selects between pooled "true"/"false" literals on the byte value.
    fn boolean_to_string(
        &mut self,
        value: IntValue<'ctx>,
    ) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        let zero = self.codegen.llvm.i8_type().const_int(0, false);
        let flag = self
            .builder
            .build_int_compare(IntPredicate::NE, value, zero, "tobool")?;
        let on_true = self.codegen.string_literal(&self.builder, "true")?;
        let on_false = self.codegen.string_literal(&self.builder, "false")?;
        Ok(self
            .builder
            .build_select(flag, on_true, on_false, "bool2string")?)
    }

    /// Comparisons produce an i1; widen back to the i8 Boolean representation.
    fn widen_flag(&self, flag: IntValue<'ctx>) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        Ok(self
            .builder
            .build_int_z_extend(flag, self.codegen.llvm.i8_type(), "booltmp")?
            .into())
    }

    fn call_builtin(
        &self,
        function: FunctionValue<'ctx>,
        arguments: &[BasicMetadataValueEnum<'ctx>],
        name: &str,
    ) -> Result<BasicValueEnum<'ctx>, CodegenError> {
        self.builder
            .build_call(function, arguments, name)?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| {
                CodegenError::VoidCall(function.get_name().to_string_lossy().into_owned())
            })
    }

    fn free_string(&self, pointer: PointerValue<'ctx>) -> Result<(), CodegenError> {
        let free = self.codegen.builtins().free;
        self.builder.build_call(free, &[pointer.into()], "")?;
        Ok(())
    }

    /// Frees the heap strings the current statement produced and did not hand
    /// off. Runs at every statement end and before every branch.
    fn release_pending_strings(&mut self) -> Result<(), CodegenError> {
        let pending = std::mem::take(&mut self.pending_strings);
        for pointer in pending {
            self.free_string(pointer)?;
        }
        Ok(())
    }

    /// Frees every String variable cell. Emitted on each exit path; cells are
    /// null until first assignment, so the sweep is safe everywhere.
    fn free_string_cells(&self) -> Result<(), CodegenError> {
        for cell in &self.string_cells {
            let value = self.builder.build_load(*cell, "strval")?;
            self.free_string(value.into_pointer_value())?;
        }
        Ok(())
    }

    fn current_block_terminated(&self) -> bool {
        self.builder
            .get_insert_block()
            .and_then(|block| block.get_terminator())
            .is_some()
    }

    fn unknown_variable(&self, name: StringId) -> CodegenError {
        CodegenError::UnknownVariable(self.frontend.get_string(name).to_owned())
    }
}

fn statement_label(statement: &Statement) -> &'static str {
    match statement {
        Statement::Print(_) => "print",
        Statement::Assign { .. } => "assign",
        Statement::Return(_) => "return",
        Statement::If { .. } => "if",
        Statement::While { .. } => "while",
        Statement::Repeat { .. } => "repeat",
    }
}
