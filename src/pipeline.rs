//! Pipeline registry: named stages, dependency ordering, jump markers.
//!
//! Stages register as `(name, predecessors, jump_targets, successors,
//! run)`. The registry computes a deterministic topological order
//! (registration order breaks ties), refuses cyclic configurations, and
//! executes the stages in sequence. After each stage, jump markers left on
//! the module by a lowering send control back to an earlier named stage;
//! a stage revisited more than the configured cap is a fixpoint failure.

use std::collections::HashMap;

use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::{transforms, IrContext, Symbol};
use thiserror::Error;
use tracing::{debug, warn};

use crate::diagnostics::DiagnosticScope;
use crate::options::CompileOptions;

/// Everything a stage may touch while running.
pub struct StageContext<'a> {
    pub ctx: &'a mut IrContext,
    pub module: ModuleRef,
    pub options: &'a CompileOptions,
    pub diagnostics: &'a mut DiagnosticScope,
}

type StageFn<'p> = Box<dyn Fn(&mut StageContext<'_>) -> Result<(), String> + 'p>;

struct Stage<'p> {
    name: Symbol,
    predecessors: Vec<Symbol>,
    jump_targets: Vec<Symbol>,
    successors: Vec<Symbol>,
    run: StageFn<'p>,
}

/// Fatal pipeline configuration or execution failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage dependency cycle involving `{0}`")]
    Cycle(String),
    #[error("unknown stage `{0}` referenced by the registry")]
    UnknownStage(String),
    #[error("stage `{0}` was re-entered more than {1} times (jump fixpoint failure)")]
    JumpFixpoint(String, usize),
    #[error("stage `{stage}` failed: {message}")]
    StageFailed { stage: String, message: String },
    #[error("verifier failed after `{stage}`:\n{report}")]
    VerifierFailed { stage: String, report: String },
}

/// Registry of named pipeline stages.
pub struct PipelineRegistry<'p> {
    stages: Vec<Stage<'p>>,
    /// Revisit cap for jump markers.
    pub max_jumps: usize,
}

impl<'p> PipelineRegistry<'p> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            max_jumps: 4,
        }
    }

    /// Register a stage.
    pub fn register(
        &mut self,
        name: &str,
        predecessors: &[&str],
        jump_targets: &[&str],
        successors: &[&str],
        run: impl Fn(&mut StageContext<'_>) -> Result<(), String> + 'p,
    ) {
        self.stages.push(Stage {
            name: Symbol::new(name),
            predecessors: predecessors.iter().map(|s| Symbol::new(s)).collect(),
            jump_targets: jump_targets.iter().map(|s| Symbol::new(s)).collect(),
            successors: successors.iter().map(|s| Symbol::new(s)).collect(),
            run: Box::new(run),
        });
    }

    fn index_of(&self, name: Symbol) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Deterministic topological order consistent with predecessors and
    /// successors; stable by registration order among ready stages.
    pub fn total_order(&self) -> Result<Vec<usize>, PipelineError> {
        let n = self.stages.len();
        let mut in_degree = vec![0usize; n];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];

        let mut add_edge = |from: usize, to: usize, edges: &mut Vec<Vec<usize>>, in_degree: &mut Vec<usize>| {
            if !edges[from].contains(&to) {
                edges[from].push(to);
                in_degree[to] += 1;
            }
        };

        for (i, stage) in self.stages.iter().enumerate() {
            for &pred in &stage.predecessors {
                let j = self
                    .index_of(pred)
                    .ok_or_else(|| PipelineError::UnknownStage(pred.as_string()))?;
                add_edge(j, i, &mut edges, &mut in_degree);
            }
            for &succ in &stage.successors {
                let j = self
                    .index_of(succ)
                    .ok_or_else(|| PipelineError::UnknownStage(succ.as_string()))?;
                add_edge(i, j, &mut edges, &mut in_degree);
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        while let Some(&next) = ready.first() {
            ready.remove(0);
            order.push(next);
            for &to in &edges[next] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    // Keep registration order among newly ready stages.
                    let pos = ready.partition_point(|&r| r < to);
                    ready.insert(pos, to);
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n)
                .find(|&i| in_degree[i] > 0)
                .map(|i| self.stages[i].name.as_string())
                .unwrap_or_default();
            return Err(PipelineError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Run every stage over `module`, honoring jump markers.
    pub fn run(
        &self,
        ctx: &mut IrContext,
        module: ModuleRef,
        options: &CompileOptions,
        diagnostics: &mut DiagnosticScope,
    ) -> Result<(), PipelineError> {
        let order = self.total_order()?;
        let mut visits: HashMap<Symbol, usize> = HashMap::new();

        let mut pos = 0usize;
        while pos < order.len() {
            let stage = &self.stages[order[pos]];
            let stage_name = stage.name.as_string();

            let count = visits.entry(stage.name).or_insert(0);
            *count += 1;
            if *count > self.max_jumps {
                return Err(PipelineError::JumpFixpoint(stage_name, self.max_jumps));
            }

            if options.should_print_before(&stage_name) {
                eprintln!(
                    "// ----- IR before {stage_name} -----\n{}",
                    pyrite_ir::printer::print_module(ctx, module.op()),
                );
            }

            debug!(stage = %stage_name, "running pipeline stage");
            {
                let mut stage_ctx = StageContext {
                    ctx,
                    module,
                    options,
                    diagnostics,
                };
                (stage.run)(&mut stage_ctx).map_err(|message| {
                    PipelineError::StageFailed {
                        stage: stage_name.clone(),
                        message,
                    }
                })?;
            }

            if options.verify {
                let report = pyrite_ir::verifier::verify(ctx, module);
                if !report.is_ok() {
                    return Err(PipelineError::VerifierFailed {
                        stage: stage_name.clone(),
                        report: report.to_string(),
                    });
                }
            }

            if options.should_print_after(&stage_name) {
                eprintln!(
                    "// ----- IR after {stage_name} -----\n{}",
                    pyrite_ir::printer::print_module(ctx, module.op()),
                );
            }

            // Jump markers send control back to an earlier declared target.
            let markers = transforms::take_jump_markers(ctx, module);
            let mut jumped = false;
            for marker in markers {
                if !stage.jump_targets.contains(&marker) {
                    warn!(stage = %stage_name, target = %marker, "undeclared jump target ignored");
                    continue;
                }
                if let Some(target_pos) =
                    order.iter().position(|&i| self.stages[i].name == marker)
                {
                    if target_pos <= pos {
                        debug!(from = %stage_name, to = %marker, "pipeline jump");
                        pos = target_pos;
                        jumped = true;
                        break;
                    }
                }
            }
            if !jumped {
                pos += 1;
            }
        }
        Ok(())
    }
}

impl Default for PipelineRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable stage names.
pub mod stages {
    pub const PLIER_TO_SCF: &str = "plier-to-scf";
    pub const PLIER_TO_STD: &str = "plier-to-std";
    pub const PLIER_TO_LINALG: &str = "plier-to-linalg";
    pub const PARALLEL_TO_TBB: &str = "parallel-to-tbb";
    pub const LOWER_TO_GPU: &str = "lower-to-gpu";
    pub const LOWER_TO_LLVM: &str = "lower-to-llvm";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ir::rewrite::applicator::wrap_in_module;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn run_registry(registry: &PipelineRegistry<'_>) -> Result<Vec<String>, PipelineError> {
        let mut ctx = IrContext::new();
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![]);
        let options = CompileOptions {
            verify: false,
            ..CompileOptions::default()
        };
        let mut diags = DiagnosticScope::new();
        registry.run(&mut ctx, module, &options, &mut diags)?;
        Ok(Vec::new())
    }

    #[test]
    fn topological_order_respects_predecessors() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = PipelineRegistry::new();
        for (name, preds) in [
            ("c", vec!["b"]),
            ("a", vec![]),
            ("b", vec!["a"]),
        ] {
            let log = log.clone();
            let preds: Vec<&str> = preds;
            registry.register(name, &preds, &[], &[], move |_| {
                log.borrow_mut().push(name.to_owned());
                Ok(())
            });
        }
        run_registry(&registry).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycles_are_fatal() {
        let mut registry = PipelineRegistry::new();
        registry.register("x", &["y"], &[], &[], |_| Ok(()));
        registry.register("y", &["x"], &[], &[], |_| Ok(()));
        match registry.total_order() {
            Err(PipelineError::Cycle(_)) => {}
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn jump_markers_reenter_earlier_stage() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = PipelineRegistry::new();
        {
            let log = log.clone();
            registry.register("first", &[], &[], &[], move |_| {
                log.borrow_mut().push("first".to_owned());
                Ok(())
            });
        }
        {
            let log = log.clone();
            registry.register("second", &["first"], &["first"], &[], move |sc| {
                let runs = log.borrow().iter().filter(|s| *s == "second").count();
                log.borrow_mut().push("second".to_owned());
                if runs == 0 {
                    // First visit requests a re-run of the first stage.
                    transforms::add_jump_marker(sc.ctx, sc.module, Symbol::new("first"));
                }
                Ok(())
            });
        }
        run_registry(&registry).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["first", "second", "first", "second"],
        );
    }

    #[test]
    fn runaway_jumps_hit_the_cap() {
        let mut registry = PipelineRegistry::new();
        registry.register("first", &[], &[], &[], |_| Ok(()));
        registry.register("second", &["first"], &["first"], &[], |sc| {
            // Always jump back.
            transforms::add_jump_marker(sc.ctx, sc.module, Symbol::new("first"));
            Ok(())
        });
        match run_registry(&registry) {
            Err(PipelineError::JumpFixpoint(stage, 4)) => assert_eq!(stage, "first"),
            other => panic!("expected jump fixpoint failure, got {other:?}"),
        }
    }

    #[test]
    fn stable_names_are_registered_by_the_driver() {
        // The driver must keep these exact names; jump markers rely on them.
        assert_eq!(stages::PLIER_TO_SCF, "plier-to-scf");
        assert_eq!(stages::LOWER_TO_GPU, "lower-to-gpu");
    }
}
