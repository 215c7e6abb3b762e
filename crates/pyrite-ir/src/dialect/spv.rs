//! SPIR-V-like device code dialect.
//!
//! Kernel bodies are converted into this dialect before serialization. Only
//! the Kernel-profile subset the GPU lowering emits is modeled: pointer
//! access chains, aligned loads/stores, device-scope atomics, barriers and
//! non-uniform group reductions.

use crate::types::{Attribute, TypeDataBuilder, TypeInterner};
use crate::{dialect, symbols, Symbol, TypeRef};

dialect! {
    mod spv {
        /// SPIR-V module shadowing a `gpu.gpu_module`.
        #[attr(sym_name: Symbol, caps: any, exts: any)]
        fn module() {
            #[region(body)] {}
        };

        #[attr(sym_name: Symbol, r#type: Type, abi?: any)]
        fn func() {
            #[region(body)] {}
        };

        /// In-bounds pointer arithmetic: `base + index` elements.
        fn ptr_access_chain(base, index) -> result;

        #[attr(alignment: u64)]
        fn load(ptr) -> result;

        #[attr(alignment: u64)]
        fn store(ptr, value);

        #[attr(scope: Symbol)]
        fn atomic_iadd(ptr, value) -> result;

        #[attr(scope: Symbol)]
        fn atomic_isub(ptr, value) -> result;

        #[attr(scope: Symbol)]
        fn atomic_fadd(ptr, value) -> result;

        fn fnegate(value) -> result;

        #[attr(exec_scope: Symbol, mem_scope: Symbol, semantics: any)]
        fn control_barrier();

        #[attr(scope: Symbol, semantics: any)]
        fn memory_barrier();

        #[attr(scope: Symbol, group_op: Symbol)]
        fn group_iadd(value) -> result;

        #[attr(scope: Symbol, group_op: Symbol)]
        fn group_fadd(value) -> result;

        fn bitcast(value) -> result;

        fn undef() -> result;

        fn r#return();
    }
}

symbols! {
    ATTR_STORAGE_CLASS => "storage_class",
    ATTR_COUNT => "count",
    SCOPE_DEVICE => "device",
    SCOPE_WORKGROUP => "workgroup",
    SCOPE_SUBGROUP => "subgroup",
    SEM_SEQ_CST => "sequentially_consistent",
    SEM_CROSS_WORKGROUP => "cross_workgroup_memory",
    SEM_WORKGROUP => "workgroup_memory",
    GROUP_REDUCE => "reduce",
    SC_CROSS_WORKGROUP => "cross_workgroup",
    SC_WORKGROUP => "workgroup",
    SC_FUNCTION => "function",
}

pub fn scope_device() -> Symbol {
    *SCOPE_DEVICE
}

pub fn scope_workgroup() -> Symbol {
    *SCOPE_WORKGROUP
}

pub fn scope_subgroup() -> Symbol {
    *SCOPE_SUBGROUP
}

pub fn group_op_reduce() -> Symbol {
    *GROUP_REDUCE
}

/// `SequentiallyConsistent | CrossWorkgroupMemory`.
pub fn semantics_global() -> Attribute {
    Attribute::List(vec![
        Attribute::Symbol(*SEM_SEQ_CST),
        Attribute::Symbol(*SEM_CROSS_WORKGROUP),
    ])
}

/// `SequentiallyConsistent | WorkgroupMemory`.
pub fn semantics_local() -> Attribute {
    Attribute::List(vec![
        Attribute::Symbol(*SEM_SEQ_CST),
        Attribute::Symbol(*SEM_WORKGROUP),
    ])
}

/// Storage classes for pointer types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageClass {
    CrossWorkgroup,
    Workgroup,
    Function,
}

impl StorageClass {
    pub fn symbol(self) -> Symbol {
        match self {
            StorageClass::CrossWorkgroup => *SC_CROSS_WORKGROUP,
            StorageClass::Workgroup => *SC_WORKGROUP,
            StorageClass::Function => *SC_FUNCTION,
        }
    }
}

pub fn ptr_ty(types: &mut TypeInterner, elem: TypeRef, storage: StorageClass) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("ptr"))
            .param(elem)
            .attr(*ATTR_STORAGE_CLASS, Attribute::Symbol(storage.symbol()))
            .build(),
    )
}

pub fn is_ptr(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("ptr"))
}

pub fn pointee(types: &TypeInterner, ty: TypeRef) -> Option<TypeRef> {
    if !is_ptr(types, ty) {
        return None;
    }
    types.get(ty).params.first().copied()
}

pub fn array_ty(types: &mut TypeInterner, elem: TypeRef, count: u64) -> TypeRef {
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("array"))
            .param(elem)
            .attr(*ATTR_COUNT, Attribute::int(count as i64))
            .build(),
    )
}

/// Default capability set attached by the capability pass.
pub fn default_capabilities() -> Attribute {
    let caps = [
        "addresses",
        "atomic_float32_add",
        "expect_assume",
        "float16",
        "float64",
        "generic_pointer",
        "group_non_uniform_arithmetic",
        "groups",
        "int16",
        "int64",
        "int8",
        "kernel",
        "linkage",
    ];
    Attribute::List(
        caps.iter()
            .map(|c| Attribute::Symbol(Symbol::new(c)))
            .collect(),
    )
}

/// Default extension set attached by the capability pass.
pub fn default_extensions() -> Attribute {
    Attribute::List(vec![
        Attribute::Symbol(Symbol::new("spv_ext_shader_atomic_float_add")),
        Attribute::Symbol(Symbol::new("spv_khr_expect_assume")),
    ])
}

/// Does a capability list contain `name`?
pub fn caps_contain(caps: &Attribute, name: &str) -> bool {
    match caps {
        Attribute::List(items) => items
            .iter()
            .any(|item| item.as_symbol().is_some_and(|s| s == name)),
        _ => false,
    }
}
