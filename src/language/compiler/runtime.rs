use inkwell::{context::Context, module::Module, values::FunctionValue, AddressSpace};

/// Libc routines the generated code calls into. Declared once per module;
/// the JIT and the object-file backend both resolve them from the C runtime.
pub(crate) struct RuntimeBuiltins<'ctx> {
    pub printf: FunctionValue<'ctx>,
    pub strlen: FunctionValue<'ctx>,
    pub malloc: FunctionValue<'ctx>,
    pub strcpy: FunctionValue<'ctx>,
    pub strcat: FunctionValue<'ctx>,
    pub strdup: FunctionValue<'ctx>,
    pub strcmp: FunctionValue<'ctx>,
    pub free: FunctionValue<'ctx>,
}

impl<'ctx> RuntimeBuiltins<'ctx> {
    pub fn declare(llvm: &'ctx Context, module: &Module<'ctx>) -> Self {
        let c_string = llvm.i8_type().ptr_type(AddressSpace::default());
        let i32_type = llvm.i32_type();
        let i64_type = llvm.i64_type();
        let void_type = llvm.void_type();

        // i32 printf(i8* format, ...)
        let printf = module.add_function(
            "printf",
            i32_type.fn_type(&[c_string.into()], true),
            None,
        );
        // i64 strlen(i8* str)
        let strlen = module.add_function(
            "strlen",
            i64_type.fn_type(&[c_string.into()], false),
            None,
        );
        // i8* malloc(i64 size)
        let malloc = module.add_function(
            "malloc",
            c_string.fn_type(&[i64_type.into()], false),
            None,
        );
        // i8* strcpy(i8* dest, i8* src)
        let strcpy = module.add_function(
            "strcpy",
            c_string.fn_type(&[c_string.into(), c_string.into()], false),
            None,
        );
        // i8* strcat(i8* dest, i8* src)
        let strcat = module.add_function(
            "strcat",
            c_string.fn_type(&[c_string.into(), c_string.into()], false),
            None,
        );
        // i8* strdup(i8* str)
        let strdup = module.add_function(
            "strdup",
            c_string.fn_type(&[c_string.into()], false),
            None,
        );
        // i32 strcmp(i8* a, i8* b)
        let strcmp = module.add_function(
            "strcmp",
            i32_type.fn_type(&[c_string.into(), c_string.into()], false),
            None,
        );
        // void free(i8* ptr)
        let free = module.add_function(
            "free",
            void_type.fn_type(&[c_string.into()], false),
            None,
        );

        Self {
            printf,
            strlen,
            malloc,
            strcpy,
            strcat,
            strdup,
            strcmp,
            free,
        }
    }
}
