//! LLVM backend. Walks a type-annotated program and lowers every function
//! into a single module. Code generation is per-function fault-isolated: a
//! function that fails to verify is reported and stripped to a bare
//! declaration while its siblings keep their definitions.

mod emit;
mod runtime;

use std::collections::HashMap;

use inkwell::{
    basic_block::BasicBlock,
    builder::Builder,
    context::Context,
    module::Module,
    types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum},
    values::{BasicValueEnum, FunctionValue, PointerValue},
    AddressSpace,
};

use crate::language::{
    ast::{FunctionDecl, Program},
    context::FrontendContext,
    errors::CodegenError,
    scope::ScopeChain,
    types::ExpressionType,
};
use emit::FunctionCodegen;
use runtime::RuntimeBuiltins;

/// A stack slot holding one variable, together with the language-level type
/// stored in it. Slots are allocated in the entry block so LLVM's mem2reg can
/// promote them.
#[derive(Clone, Copy)]
pub(crate) struct StorageCell<'ctx> {
    pub ptr: PointerValue<'ctx>,
    pub ty: ExpressionType,
}

/// Everything the backend accumulates while lowering one program: the module
/// under construction, the libc declarations, the function symbol table and
/// the string literal pool.
pub(crate) struct CodegenContext<'ctx> {
    pub llvm: &'ctx Context,
    pub module: Module<'ctx>,
    pub functions: ScopeChain<FunctionValue<'ctx>>,
    string_literals: HashMap<String, PointerValue<'ctx>>,
    builtins: RuntimeBuiltins<'ctx>,
}

impl<'ctx> CodegenContext<'ctx> {
    fn new(llvm: &'ctx Context) -> Self {
        let module = llvm.create_module("main module");
        let builtins = RuntimeBuiltins::declare(llvm, &module);
        let mut functions = ScopeChain::new();
        functions.push_scope();
        Self {
            llvm,
            module,
            functions,
            string_literals: HashMap::new(),
            builtins,
        }
    }

    /// In-memory representation of each language type: Booleans travel as
    /// bytes, Numbers as doubles, Strings as C string pointers.
    pub fn storage_type(&self, ty: ExpressionType) -> BasicTypeEnum<'ctx> {
        match ty {
            ExpressionType::Boolean => self.llvm.i8_type().into(),
            ExpressionType::Number => self.llvm.f64_type().into(),
            ExpressionType::String => self
                .llvm
                .i8_type()
                .ptr_type(AddressSpace::default())
                .into(),
        }
    }

    pub fn builtins(&self) -> &RuntimeBuiltins<'ctx> {
        &self.builtins
    }

    /// Returns the pooled global for `text`, emitting it on first use. Equal
    /// literals share one global.
    pub fn string_literal(
        &mut self,
        builder: &Builder<'ctx>,
        text: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        if let Some(pointer) = self.string_literals.get(text) {
            return Ok(*pointer);
        }
        let global = builder.build_global_string_ptr(text, "strlit")?;
        let pointer = global.as_pointer_value();
        self.string_literals.insert(text.to_owned(), pointer);
        Ok(pointer)
    }
}

/// Program-level driver around [`CodegenContext`]. Declares every function
/// before emitting any body, so calls lower correctly no matter where the
/// callee is defined in the source.
pub struct Compiler<'ctx, 'f> {
    frontend: &'f mut FrontendContext,
    codegen: CodegenContext<'ctx>,
    variables: ScopeChain<StorageCell<'ctx>>,
}

impl<'ctx, 'f> Compiler<'ctx, 'f> {
    pub fn new(frontend: &'f mut FrontendContext, llvm: &'ctx Context) -> Self {
        Self {
            frontend,
            codegen: CodegenContext::new(llvm),
            variables: ScopeChain::new(),
        }
    }

    /// Lowers every function in the program. `main` gets the process entry
    /// treatment; everything else is an ordinary definition.
    pub fn compile_program(&mut self, program: &Program) {
        // Register every signature before emitting any body so definition
        // order never constrains call order.
        for declaration in &program.functions {
            let function = self.declare_function(declaration);
            self.codegen.functions.define(declaration.name, function);
        }
        for declaration in &program.functions {
            if self.frontend.get_string(declaration.name) == "main" {
                self.accept_main_function(declaration);
            } else {
                self.accept_function(declaration);
            }
        }
    }

    /// Consumes the driver and hands out the finished module.
    pub fn finish(self) -> Module<'ctx> {
        self.codegen.module
    }

    fn declare_function(&mut self, declaration: &FunctionDecl) -> FunctionValue<'ctx> {
        let name = self.frontend.get_string(declaration.name).to_owned();
        let signature = if name == "main" {
            self.codegen.llvm.i32_type().fn_type(&[], false)
        } else {
            let parameter_types: Vec<BasicMetadataTypeEnum> = declaration
                .parameters
                .iter()
                .map(|parameter| self.codegen.storage_type(parameter.ty).into())
                .collect();
            self.codegen
                .storage_type(declaration.return_type)
                .fn_type(&parameter_types, false)
        };
        let function = self.codegen.module.add_function(&name, signature, None);
        for (index, parameter) in declaration.parameters.iter().enumerate() {
            if let Some(value) = function.get_nth_param(index as u32) {
                set_value_name(value, self.frontend.get_string(parameter.name));
            }
        }
        function
    }

    /// Lowers one function and returns its handle, or None when the body was
    /// discarded.
    pub fn accept_function(&mut self, declaration: &FunctionDecl) -> Option<FunctionValue<'ctx>> {
        self.generate_definition(declaration, false)
    }

    /// `main` compiles to the C entry signature `i32 ()`. Its body falls off
    /// the end into a synthesized `ret i32 0`.
    pub fn accept_main_function(
        &mut self,
        declaration: &FunctionDecl,
    ) -> Option<FunctionValue<'ctx>> {
        self.generate_definition(declaration, true)
    }

    fn generate_definition(
        &mut self,
        declaration: &FunctionDecl,
        is_main: bool,
    ) -> Option<FunctionValue<'ctx>> {
        let function = match self.codegen.functions.lookup(declaration.name).copied() {
            Some(function) => function,
            None => {
                let function = self.declare_function(declaration);
                self.codegen.functions.define(declaration.name, function);
                function
            }
        };
        let builder = self.codegen.llvm.create_builder();
        let frontend: &FrontendContext = self.frontend;
        let codegen = &mut self.codegen;
        let outcome = self.variables.with_scope(|scope| {
            FunctionCodegen::new(frontend, codegen, scope, builder, function, is_main)
                .generate(declaration)
        });

        if let Err(error) = outcome {
            self.discard_function(function, error.to_string());
            return None;
        }

        prune_unreachable_blocks(function);
        if !function.verify(true) {
            let name = self.frontend.get_string(declaration.name).to_owned();
            let error = CodegenError::Verification(name);
            self.discard_function(function, error.to_string());
            return None;
        }
        Some(function)
    }

    /// Reports the failure and strips the broken body, degrading the function
    /// to an external declaration. Sibling bodies may already hold calls to
    /// it (every signature is declared up front), so the symbol itself must
    /// survive for the module to stay valid.
    fn discard_function(&mut self, function: FunctionValue<'ctx>, message: String) {
        self.frontend.print_error(message);
        erase_blocks(&function.get_basic_blocks());
    }
}

fn set_value_name(value: BasicValueEnum<'_>, name: &str) {
    match value {
        BasicValueEnum::IntValue(v) => v.set_name(name),
        BasicValueEnum::FloatValue(v) => v.set_name(name),
        BasicValueEnum::PointerValue(v) => v.set_name(name),
        _ => {}
    }
}

/// Deletes blocks that no path from the entry block reaches. Statement
/// lowering parks dead code (anything after a `return`) in fresh blocks with
/// no predecessors, and a branch whose arms both return leaves an empty merge
/// block behind; both would trip the verifier. Dead blocks can still branch
/// to each other (a loop after a `return`), so the live set is computed as
/// reachability from the entry block rather than from predecessor counts.
fn prune_unreachable_blocks(function: FunctionValue<'_>) {
    let blocks = function.get_basic_blocks();
    let Some(entry) = blocks.first().copied() else {
        return;
    };
    let mut reachable = vec![entry];
    let mut cursor = 0;
    while cursor < reachable.len() {
        let block = reachable[cursor];
        cursor += 1;
        let Some(terminator) = block.get_terminator() else {
            continue;
        };
        for index in 0..terminator.get_num_operands() {
            let Some(operand) = terminator.get_operand(index) else {
                continue;
            };
            if let Some(successor) = operand.right() {
                if !reachable.contains(&successor) {
                    reachable.push(successor);
                }
            }
        }
    }
    let dead: Vec<_> = blocks
        .into_iter()
        .filter(|block| !reachable.contains(block))
        .collect();
    erase_blocks(&dead);
}

/// Erases the given blocks. Instructions are dropped before any block handle
/// is deleted; dead blocks may branch to each other, so deleting a block
/// while another still jumps to it would leave a dangling reference.
fn erase_blocks(blocks: &[BasicBlock<'_>]) {
    for block in blocks.iter().rev() {
        while let Some(instruction) = block.get_last_instruction() {
            instruction.erase_from_basic_block();
        }
    }
    for block in blocks {
        let _ = unsafe { block.delete() };
    }
}
