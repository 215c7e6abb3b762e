//! Device runtime dialect: the dispatch surface consumed by the device
//! launcher interface (streams, module loads, kernel launches).

use crate::{dialect, IrContext, ValueRef};

dialect! {
    mod gpu_rt {
        /// Create (or fetch) the stream for a device. Deduplicated per
        /// device in a function's entry block by the dispatch expansion.
        #[attr(device?: Symbol)]
        fn create_stream() -> result;

        fn destroy_stream(stream);

        /// Load a compiled device module onto a stream.
        #[attr(module: Symbol)]
        fn load_module(stream) -> result;

        /// Fetch a kernel handle from a loaded module.
        #[attr(kernel: Symbol)]
        fn get_kernel(module) -> result;

        /// Enqueue a kernel with explicit grid/block sizes.
        fn launch_kernel(
            stream, kernel,
            grid_x, grid_y, grid_z,
            block_x, block_y, block_z,
            #[rest] args
        );

        #[attr(host_shared: bool)]
        fn alloc(stream, #[rest] dyn_sizes) -> result;

        fn dealloc(stream, source);

        fn suggest_block_size(stream, grid_x, grid_y, grid_z)
            -> (block_x, block_y, block_z);
    }
}

impl LaunchKernel {
    pub fn grid_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[2..5]
    }

    pub fn block_sizes<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[5..8]
    }

    pub fn kernel_args<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        &ctx.op_operands(self.op_ref())[8..]
    }
}
