//! The execution driver: ingest, verify, run the pipeline, hand off to the
//! native loader.

use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{printer, transforms, verifier, IrContext};
use thiserror::Error;
use tracing::{debug, info};

use crate::diagnostics::DiagnosticScope;
use crate::interfaces::{
    AssemblyEmitter, EmitterBridge, Ingestion, NativeHandle, NativeLoader,
};
use crate::options::CompileOptions;
use crate::pipeline::{stages, PipelineError, PipelineRegistry};

/// Compilation failure surfaced to the host.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("ingestion failed: {0}")]
    Ingestion(String),
    #[error("verifier rejected the ingested module:\n{0}")]
    Verifier(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("native load failed: {0}")]
    Load(String),
}

/// Per-process engine state.
///
/// Owns the one-time global initialization (native target setup lives
/// behind the loader interface, so all that remains here is the debug-type
/// configuration) and is shared by every driver in the process.
pub struct EngineHandle {
    debug_types: Vec<String>,
}

impl EngineHandle {
    pub fn new(debug_types: Vec<String>) -> Self {
        if !debug_types.is_empty() {
            debug!(?debug_types, "engine debug types enabled");
        }
        Self { debug_types }
    }

    pub fn debug_enabled(&self, name: &str) -> bool {
        self.debug_types.iter().any(|t| t == name)
    }
}

/// Drives one or more compilations against a fixed set of collaborators.
pub struct Driver<'a> {
    pub options: CompileOptions,
    pub ingestion: &'a dyn Ingestion,
    pub library: Option<&'a dyn pyrite_lower::LibraryResolver>,
    pub externals: Option<&'a dyn pyrite_lower::ExternalSymbols>,
    pub emitter: Option<&'a dyn AssemblyEmitter>,
}

impl<'a> Driver<'a> {
    pub fn new(options: CompileOptions, ingestion: &'a dyn Ingestion) -> Self {
        Self {
            options,
            ingestion,
            library: None,
            externals: None,
            emitter: None,
        }
    }

    pub fn with_library(mut self, library: &'a dyn pyrite_lower::LibraryResolver) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_externals(mut self, externals: &'a dyn pyrite_lower::ExternalSymbols) -> Self {
        self.externals = Some(externals);
        self
    }

    pub fn with_emitter(mut self, emitter: &'a dyn AssemblyEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Build the stage registry for one compilation.
    fn build_registry(&self, _engine: &EngineHandle) -> PipelineRegistry<'_> {
        let mut registry = PipelineRegistry::new();

        // Structured-control-flow normalization; also the jump target the
        // call resolution re-enters when it creates new loop forms.
        registry.register(stages::PLIER_TO_SCF, &[], &[], &[], |sc| {
            pyrite_lower::canonicalize(sc.ctx, sc.module);
            Ok(())
        });

        let library = self.library;
        let externals = self.externals;
        let force_inline = self.options.force_inline;
        registry.register(
            stages::PLIER_TO_STD,
            &[stages::PLIER_TO_SCF],
            &[stages::PLIER_TO_SCF],
            &[],
            move |sc| {
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                pyrite_lower::plier_to_std(sc.ctx, sc.module);
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                pyrite_lower::calls::lower_calls(sc.ctx, sc.module, library, externals);
                if force_inline {
                    transforms::force_inline(sc.ctx, sc.module)
                        .map_err(|e| e.to_string())?;
                }
                transforms::eliminate_dead_symbols(sc.ctx, sc.module);
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                Ok(())
            },
        );

        // Tensor-level lowering is library-driven and arrives through the
        // resolver; the stage exists as a stable pipeline point.
        registry.register(
            stages::PLIER_TO_LINALG,
            &[stages::PLIER_TO_STD],
            &[],
            &[],
            |sc| {
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                Ok(())
            },
        );

        // Host-parallel lowering is the native loader's concern; the stage
        // keeps the pipeline point and cleans up.
        registry.register(
            stages::PARALLEL_TO_TBB,
            &[stages::PLIER_TO_LINALG],
            &[],
            &[],
            |sc| {
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                Ok(())
            },
        );

        let enable_gpu = self.options.enable_gpu_pipeline;
        let emitter = self.emitter;
        registry.register(
            stages::LOWER_TO_GPU,
            &[stages::PARALLEL_TO_TBB],
            &[],
            &[],
            move |sc| {
                if !enable_gpu {
                    return Ok(());
                }
                let Some(emitter) = emitter else {
                    return Err("gpu pipeline enabled without an assembly emitter".into());
                };
                let bridge = EmitterBridge(emitter);
                pyrite_gpu::run_lower_to_gpu_stage(sc.ctx, sc.module, &bridge)
                    .map_err(|e| e.to_string())
            },
        );

        registry.register(
            stages::LOWER_TO_LLVM,
            &[stages::LOWER_TO_GPU],
            &[],
            &[],
            |sc| {
                // Final cleanup before native handoff.
                transforms::eliminate_dead_code(sc.ctx, sc.module);
                pyrite_lower::canonicalize(sc.ctx, sc.module);
                Ok(())
            },
        );

        registry
    }

    /// Compile `source` and load the result.
    pub fn compile(
        &self,
        engine: &EngineHandle,
        loader: &mut dyn NativeLoader,
        source: &str,
        entry_point: &str,
    ) -> Result<NativeHandle, DriverError> {
        let mut ctx = IrContext::new();
        let mut diagnostics = DiagnosticScope::new();

        let result =
            self.compile_module(engine, &mut ctx, &mut diagnostics, source, entry_point);

        match result {
            Ok(module) => {
                if self.options.ir_dump_stderr {
                    eprintln!("{}", printer::print_module(&ctx, module.op()));
                }
                loader
                    .load_module(&ctx, module)
                    .map_err(DriverError::Load)
            }
            Err((err, module)) => {
                self.dump_failure(&ctx, &diagnostics, module, &err);
                Err(err)
            }
        }
    }

    /// Ingest and lower; on failure returns the module (when one exists)
    /// for dumping.
    fn compile_module(
        &self,
        engine: &EngineHandle,
        ctx: &mut IrContext,
        diagnostics: &mut DiagnosticScope,
        source: &str,
        entry_point: &str,
    ) -> Result<ModuleRef, (DriverError, Option<ModuleRef>)> {
        let module = self
            .ingestion
            .ingest(ctx, source, entry_point)
            .map_err(|e| (DriverError::Ingestion(e), None))?;
        info!(entry = entry_point, "module ingested");

        if self.options.verify {
            let report = verifier::verify(ctx, module);
            if !report.is_ok() {
                return Err((
                    DriverError::Verifier(report.to_string()),
                    Some(module),
                ));
            }
        }

        let registry = self.build_registry(engine);
        registry
            .run(ctx, module, &self.options, diagnostics)
            .map_err(|e| (DriverError::Pipeline(e), Some(module)))?;

        Ok(module)
    }

    fn dump_failure(
        &self,
        ctx: &IrContext,
        diagnostics: &DiagnosticScope,
        module: Option<ModuleRef>,
        err: &DriverError,
    ) {
        if !self.options.diag_dump_stderr {
            return;
        }
        eprintln!("compilation failed: {err}");
        let rendered = diagnostics.render();
        if !rendered.is_empty() {
            eprintln!("{rendered}");
        }
        if let Some(module) = module {
            eprintln!(
                "// ----- offending module -----\n{}",
                printer::print_module(ctx, module.op()),
            );
        }
    }
}
