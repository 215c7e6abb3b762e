//! Compilation options, as consumed from the embedding host.

/// Host-facing configuration for one compilation.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Run the verifier before and between passes.
    pub verify: bool,
    /// Dump final IR to stderr.
    pub ir_dump_stderr: bool,
    /// Dump accumulated diagnostics to stderr on failure.
    pub diag_dump_stderr: bool,
    /// Print IR before these named stages.
    pub print_before: Vec<String>,
    /// Print IR after these named stages.
    pub print_after: Vec<String>,
    /// Enable the GPU lowering pipeline.
    pub enable_gpu_pipeline: bool,
    /// Native code optimization level, 0..3.
    pub opt_level: u8,
    /// Allow fast-math lowerings.
    pub fastmath: bool,
    /// Force-inline all annotated calls.
    pub force_inline: bool,
    /// Upper bound on parallel compilations the host may run.
    pub max_concurrency: u32,
    /// Debug-type flags forwarded to tracing filters.
    pub debug_types: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            verify: true,
            ir_dump_stderr: false,
            diag_dump_stderr: true,
            print_before: Vec::new(),
            print_after: Vec::new(),
            enable_gpu_pipeline: false,
            opt_level: 2,
            fastmath: false,
            force_inline: true,
            max_concurrency: 1,
            debug_types: Vec::new(),
        }
    }
}

impl CompileOptions {
    pub fn should_print_before(&self, stage: &str) -> bool {
        self.print_before.iter().any(|s| s == stage)
    }

    pub fn should_print_after(&self, stage: &str) -> bool {
        self.print_after.iter().any(|s| s == stage)
    }
}
