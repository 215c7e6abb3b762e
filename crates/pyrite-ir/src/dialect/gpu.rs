//! Device dialect: launch regions, kernel containers and device memory ops.

use crate::{dialect, symbols, Attribute, IrContext, Symbol, ValueRef};

dialect! {
    mod gpu {
        /// Kernel launch region. Operands are the grid and block sizes; the
        /// body block takes six index arguments: block ids x/y/z, then
        /// thread ids x/y/z. The region may capture host values until the
        /// kernel is outlined.
        fn launch(grid_x, grid_y, grid_z, block_x, block_y, block_z) {
            #[region(body)] {}
        };

        /// Terminator of `launch` and `gpu_func` bodies.
        fn terminator();

        /// Container for outlined kernels.
        #[attr(sym_name: Symbol, caps?: any, exts?: any, binary?: any)]
        fn gpu_module() {
            #[region(body)] {}
        };

        /// Outlined kernel function.
        #[attr(sym_name: Symbol, r#type: Type, kernel?: any, abi?: any)]
        fn gpu_func() {
            #[region(body)] {}
        };

        /// Launch of an outlined kernel; `kernel` is `[@module, @func]`.
        #[attr(kernel: any, device?: Symbol)]
        fn launch_func(grid_x, grid_y, grid_z, block_x, block_y, block_z, #[rest] args);

        /// Device allocation; `host_shared` maps the buffer for host access.
        #[attr(host_shared: bool, device?: Symbol)]
        fn alloc(#[rest] dyn_sizes) -> result;

        #[attr(device?: Symbol)]
        fn dealloc(source);

        /// Workgroup id along `dim` (0..2), inside an outlined kernel.
        #[attr(dim: u64)]
        fn block_id() -> result;

        /// Invocation id within the workgroup along `dim`.
        #[attr(dim: u64)]
        fn thread_id() -> result;

        fn memcpy(source, target);

        /// Ask the device for a workgroup size fitting the given grid.
        fn suggest_block_size(grid_x, grid_y, grid_z) -> (block_x, block_y, block_z);

        /// Workgroup-wide reduction; `op` names the reduction kind.
        #[attr(op: Symbol)]
        fn all_reduce(value) -> result;

        /// Subgroup-wide reduction.
        #[attr(op: Symbol)]
        fn subgroup_reduce(value) -> result;

        /// Execution barrier; `flags` selects the fenced memory (@global or
        /// @local).
        #[attr(flags: Symbol)]
        fn barrier();

        /// Memory fence without an execution barrier.
        #[attr(flags: Symbol)]
        fn mem_fence();
    }
}

symbols! {
    FENCE_GLOBAL => "global",
    FENCE_LOCAL => "local",
    REDUCE_ADD => "add",
    ATTR_KERNEL => "kernel",
}

pub fn fence_global() -> Symbol {
    *FENCE_GLOBAL
}

pub fn fence_local() -> Symbol {
    *FENCE_LOCAL
}

pub fn reduce_add() -> Symbol {
    *REDUCE_ADD
}

/// Kernel-reference attribute for `launch_func`.
pub fn kernel_ref(module: Symbol, func: Symbol) -> Attribute {
    Attribute::List(vec![Attribute::Symbol(module), Attribute::Symbol(func)])
}

/// Decompose a `launch_func` kernel reference.
pub fn kernel_ref_parts(attr: &Attribute) -> Option<(Symbol, Symbol)> {
    match attr {
        Attribute::List(items) if items.len() == 2 => {
            Some((items[0].as_symbol()?, items[1].as_symbol()?))
        }
        _ => None,
    }
}

impl Launch {
    /// Grid sizes (operands 0..3).
    pub fn grid_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[..3]
    }

    /// Block sizes (operands 3..6).
    pub fn block_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[3..6]
    }
}

impl LaunchFunc {
    pub fn grid_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[..3]
    }

    pub fn block_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[3..6]
    }

    pub fn kernel_operands<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[6..]
    }
}
