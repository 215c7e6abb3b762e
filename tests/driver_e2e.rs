//! End-to-end driver scenarios: ingestion through the pipeline to the
//! native-loader handoff, with mock collaborators.

use std::cell::RefCell;

use pyrite::{CompileOptions, Driver, DriverError, EngineHandle, Ingestion, NativeLoader};
use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::{func, plier};
use pyrite_ir::rewrite::applicator::wrap_in_module;
use pyrite_ir::rewrite::ModuleRef;
use pyrite_ir::types::Attribute;
use pyrite_ir::{walk, BlockArgData, BlockData, IrContext, RegionData, Symbol};
use smallvec::smallvec;

// ============================================================================
// Mock collaborators
// ============================================================================

/// Ingestion producing a hand-built high-level module per entry point.
struct MockIngestion;

fn scalar_add_module(ctx: &mut IrContext) -> ModuleRef {
    let loc = ctx.unknown_loc();
    let i32_ty = core::int_ty(&mut ctx.types, 32, Signedness::Signed);
    let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, [i32_ty, i32_ty]);

    let entry = ctx.create_block(BlockData {
        location: loc,
        args: vec![BlockArgData::of(i32_ty), BlockArgData::of(i32_ty)],
        ops: smallvec![],
        parent_region: None,
    });
    let a = ctx.block_arg(entry, 0);
    let b = ctx.block_arg(entry, 1);
    let sum = plier::binop(ctx, loc, a, b, i32_ty, "+".to_owned());
    ctx.push_op(entry, sum.op_ref());
    let sum_v = sum.result(ctx);
    let ret = func::r#return(ctx, loc, [sum_v]);
    ctx.push_op(entry, ret.op_ref());

    let body = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![entry],
        parent_op: None,
    });
    let f = func::func(ctx, loc, Symbol::new("f"), fn_ty, None, None, body);
    wrap_in_module(ctx, Symbol::new("scalar_add"), vec![f.op_ref()])
}

fn force_inline_module(ctx: &mut IrContext) -> ModuleRef {
    let loc = ctx.unknown_loc();
    let i32_ty = core::int_ty(&mut ctx.types, 32, Signedness::Signed);

    // @inc(x) = x + 1, marked for forced inlining.
    let inc_ty = func::fn_ty(&mut ctx.types, i32_ty, [i32_ty]);
    let inc_entry = ctx.create_block(BlockData {
        location: loc,
        args: vec![BlockArgData::of(i32_ty)],
        ops: smallvec![],
        parent_region: None,
    });
    let x = ctx.block_arg(inc_entry, 0);
    let one = plier::r#const(&mut *ctx, loc, i32_ty, Attribute::int(1));
    ctx.push_op(inc_entry, one.op_ref());
    let one_v = one.result(ctx);
    let sum = plier::binop(ctx, loc, x, one_v, i32_ty, "+".to_owned());
    ctx.push_op(inc_entry, sum.op_ref());
    let sum_v = sum.result(ctx);
    let ret = func::r#return(ctx, loc, [sum_v]);
    ctx.push_op(inc_entry, ret.op_ref());
    let inc_body = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![inc_entry],
        parent_op: None,
    });
    let inc = func::func(
        ctx,
        loc,
        Symbol::new("inc"),
        inc_ty,
        Some(Attribute::Unit),
        None,
        inc_body,
    );

    // @main() = inc(5)
    let main_ty = func::fn_ty(&mut ctx.types, i32_ty, []);
    let main_entry = ctx.create_block(BlockData::empty(loc));
    let five = plier::r#const(&mut *ctx, loc, i32_ty, Attribute::int(5));
    ctx.push_op(main_entry, five.op_ref());
    let five_v = five.result(ctx);
    let call = func::call(
        ctx,
        loc,
        [five_v],
        [i32_ty],
        Symbol::new("inc"),
        None,
    );
    ctx.push_op(main_entry, call.op_ref());
    let call_res = call.results(ctx)[0];
    let ret = func::r#return(ctx, loc, [call_res]);
    ctx.push_op(main_entry, ret.op_ref());
    let main_body = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![main_entry],
        parent_op: None,
    });
    let main = func::func(
        ctx,
        loc,
        Symbol::new("main"),
        main_ty,
        None,
        None,
        main_body,
    );

    wrap_in_module(
        ctx,
        Symbol::new("force_inline"),
        vec![inc.op_ref(), main.op_ref()],
    )
}

fn broken_module(ctx: &mut IrContext) -> ModuleRef {
    let loc = ctx.unknown_loc();
    let i32_ty = core::int_ty(&mut ctx.types, 32, Signedness::Signed);
    let fn_ty = func::fn_ty(&mut ctx.types, i32_ty, []);

    // Function body without a terminator: the verifier must reject it.
    let entry = ctx.create_block(BlockData::empty(loc));
    let c = plier::r#const(&mut *ctx, loc, i32_ty, Attribute::int(0));
    ctx.push_op(entry, c.op_ref());
    let body = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![entry],
        parent_op: None,
    });
    let f = func::func(ctx, loc, Symbol::new("broken"), fn_ty, None, None, body);
    wrap_in_module(ctx, Symbol::new("broken"), vec![f.op_ref()])
}

impl Ingestion for MockIngestion {
    fn ingest(
        &self,
        ctx: &mut IrContext,
        _source: &str,
        entry_point: &str,
    ) -> Result<ModuleRef, String> {
        match entry_point {
            "scalar_add" => Ok(scalar_add_module(ctx)),
            "force_inline" => Ok(force_inline_module(ctx)),
            "broken" => Ok(broken_module(ctx)),
            other => Err(format!("unknown entry point `{other}`")),
        }
    }
}

/// Loader recording the op names of the module it was handed.
#[derive(Default)]
struct RecordingLoader {
    loaded_ops: RefCell<Vec<String>>,
}

impl NativeLoader for RecordingLoader {
    fn load_module(
        &mut self,
        ctx: &IrContext,
        module: ModuleRef,
    ) -> Result<pyrite::interfaces::NativeHandle, String> {
        let mut names = Vec::new();
        let _ = walk::walk_region::<std::convert::Infallible>(
            ctx,
            module.body(ctx),
            &mut |op| {
                names.push(ctx.op(op).full_name());
                std::ops::ControlFlow::Continue(walk::WalkAction::Advance)
            },
        );
        *self.loaded_ops.borrow_mut() = names;
        Ok(pyrite::interfaces::NativeHandle(1))
    }

    fn lookup(
        &self,
        _handle: pyrite::interfaces::NativeHandle,
        _symbol: &str,
    ) -> Result<*const u8, String> {
        Ok(std::ptr::null())
    }

    fn release(&mut self, _handle: pyrite::interfaces::NativeHandle) {}

    fn dump_to_object(
        &self,
        _handle: pyrite::interfaces::NativeHandle,
        _path: &std::path::Path,
    ) -> Result<(), String> {
        Ok(())
    }
}

fn quiet_options() -> CompileOptions {
    CompileOptions {
        diag_dump_stderr: false,
        ..CompileOptions::default()
    }
}

/// The library installs no subscriber; tests opt into `RUST_LOG`-style
/// output here.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scalar_add_compiles_to_one_addi() {
    init_tracing();
    let ingestion = MockIngestion;
    let driver = Driver::new(quiet_options(), &ingestion);
    let engine = EngineHandle::new(vec![]);
    let mut loader = RecordingLoader::default();

    let handle = driver
        .compile(&engine, &mut loader, "def f(a, b): return a + b", "scalar_add")
        .expect("compilation succeeds");
    assert_eq!(handle, pyrite::interfaces::NativeHandle(1));

    let ops = loader.loaded_ops.borrow();
    let addi_count = ops.iter().filter(|n| *n == "arith.addi").count();
    assert_eq!(addi_count, 1, "{ops:?}");
    assert!(ops.iter().any(|n| n == "func.return"));
    assert!(
        !ops.iter().any(|n| n.starts_with("plier.")),
        "no plier ops may reach the loader: {ops:?}",
    );
}

#[test]
fn force_inline_erases_function_and_call() {
    init_tracing();
    let ingestion = MockIngestion;
    let driver = Driver::new(quiet_options(), &ingestion);
    let engine = EngineHandle::new(vec![]);
    let mut loader = RecordingLoader::default();

    driver
        .compile(&engine, &mut loader, "", "force_inline")
        .expect("compilation succeeds");

    let ops = loader.loaded_ops.borrow();
    assert!(
        !ops.iter().any(|n| n == "func.call"),
        "all marked calls must be inlined: {ops:?}",
    );
    // @inc itself is erased, leaving @main as the only function.
    let func_count = ops.iter().filter(|n| *n == "func.func").count();
    assert_eq!(func_count, 1, "{ops:?}");
}

#[test]
fn verifier_rejects_broken_ingestion() {
    init_tracing();
    let ingestion = MockIngestion;
    let driver = Driver::new(quiet_options(), &ingestion);
    let engine = EngineHandle::new(vec![]);
    let mut loader = RecordingLoader::default();

    let err = driver
        .compile(&engine, &mut loader, "", "broken")
        .expect_err("verifier must reject");
    match err {
        DriverError::Verifier(report) => assert!(report.contains("terminator")),
        other => panic!("expected verifier failure, got {other}"),
    }
    assert!(loader.loaded_ops.borrow().is_empty());
}

#[test]
fn unknown_entry_point_is_an_ingestion_error() {
    init_tracing();
    let ingestion = MockIngestion;
    let driver = Driver::new(quiet_options(), &ingestion);
    let engine = EngineHandle::new(vec![]);
    let mut loader = RecordingLoader::default();

    let err = driver
        .compile(&engine, &mut loader, "", "nope")
        .expect_err("unknown entry point");
    assert!(matches!(err, DriverError::Ingestion(_)));
}

#[test]
fn signed_scalar_io_keeps_explicit_sign_casts() {
    init_tracing();
    let ingestion = MockIngestion;
    let driver = Driver::new(quiet_options(), &ingestion);
    let engine = EngineHandle::new(vec![]);
    let mut loader = RecordingLoader::default();
    driver
        .compile(&engine, &mut loader, "", "scalar_add")
        .expect("compilation succeeds");
    let ops = loader.loaded_ops.borrow();
    let sign_casts = ops.iter().filter(|n| *n == "util.sign_cast").count();
    assert!(sign_casts > 0, "signed i32 io keeps explicit sign casts: {ops:?}");
}
