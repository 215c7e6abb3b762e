//! External collaborator interfaces.
//!
//! The driver consumes these; the embedding host provides them. Nothing in
//! this workspace implements a front end, an ORC JIT or a device runtime —
//! they are linked in by the host process.

use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{IrContext, OpRef};

/// Program ingestion: source text + entry point into a fresh module in the
/// high-level dialect.
pub trait Ingestion {
    fn ingest(
        &self,
        ctx: &mut IrContext,
        source: &str,
        entry_point: &str,
    ) -> Result<ModuleRef, String>;
}

/// Opaque handle to natively loaded code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// The native back end: takes a fully lowered module, returns loadable
/// code.
pub trait NativeLoader {
    fn load_module(&mut self, ctx: &IrContext, module: ModuleRef) -> Result<NativeHandle, String>;
    fn lookup(&self, handle: NativeHandle, symbol: &str) -> Result<*const u8, String>;
    fn release(&mut self, handle: NativeHandle);
    fn dump_to_object(&self, handle: NativeHandle, path: &std::path::Path)
        -> Result<(), String>;
}

/// Device-code serializer: `spv.module` into a binary blob.
pub trait AssemblyEmitter {
    fn serialize(&self, ctx: &IrContext, spv_module: OpRef) -> Result<Vec<u8>, String>;
}

/// Opaque device stream token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamToken(pub u64);

/// Opaque device kernel handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

/// The device runtime consumed by generated dispatch code.
pub trait DeviceLauncher {
    fn create_stream(&mut self, device: Option<&str>) -> Result<StreamToken, String>;
    fn destroy_stream(&mut self, stream: StreamToken);
    fn load_module(&mut self, stream: StreamToken, binary: &[u8]) -> Result<u64, String>;
    fn get_kernel(&mut self, module: u64, name: &str) -> Result<KernelHandle, String>;
    #[allow(clippy::too_many_arguments)]
    fn launch(
        &mut self,
        stream: StreamToken,
        kernel: KernelHandle,
        grid: [u64; 3],
        block: [u64; 3],
        operands: &[*mut u8],
    ) -> Result<(), String>;
    fn alloc(
        &mut self,
        stream: StreamToken,
        bytes: usize,
        host_shared: bool,
    ) -> Result<*mut u8, String>;
    fn dealloc(&mut self, stream: StreamToken, ptr: *mut u8);
}

/// Bridge so the gpu crate's serializer requirement is satisfied by the
/// host-provided emitter.
pub struct EmitterBridge<'a>(pub &'a dyn AssemblyEmitter);

impl pyrite_gpu::AssemblyEmitter for EmitterBridge<'_> {
    fn serialize(&self, ctx: &IrContext, spv_module: OpRef) -> Result<Vec<u8>, String> {
        self.0.serialize(ctx, spv_module)
    }
}
