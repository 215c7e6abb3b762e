//! Textual format round-trip properties over the public API.

use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::{arith, func};
use pyrite_ir::rewrite::applicator::wrap_in_module;
use pyrite_ir::types::Attribute;
use pyrite_ir::{parser, printer, BlockArgData, BlockData, IrContext, RegionData, Symbol};
use smallvec::smallvec;

fn sample_module(ctx: &mut IrContext) -> pyrite_ir::rewrite::ModuleRef {
    let loc = ctx.unknown_loc();
    let i64_ty = core::int_ty(&mut ctx.types, 64, Signedness::Signed);
    let fn_ty = func::fn_ty(&mut ctx.types, i64_ty, [i64_ty]);

    let entry = ctx.create_block(BlockData {
        location: loc,
        args: vec![BlockArgData::of(i64_ty)],
        ops: smallvec![],
        parent_region: None,
    });
    let x = ctx.block_arg(entry, 0);
    let c = arith::r#const(ctx, loc, i64_ty, Attribute::int(2));
    ctx.push_op(entry, c.op_ref());
    let c_v = c.result(ctx);
    let mul = arith::muli(ctx, loc, x, c_v, i64_ty);
    ctx.push_op(entry, mul.op_ref());
    let mul_v = mul.result(ctx);
    let ret = func::r#return(ctx, loc, [mul_v]);
    ctx.push_op(entry, ret.op_ref());

    let body = ctx.create_region(RegionData {
        location: loc,
        blocks: smallvec![entry],
        parent_op: None,
    });
    let f = func::func(ctx, loc, Symbol::new("double"), fn_ty, None, None, body);
    wrap_in_module(ctx, Symbol::new("sample"), vec![f.op_ref()])
}

#[test]
fn parse_of_print_is_identity_up_to_renaming() {
    let mut ctx = IrContext::new();
    let module = sample_module(&mut ctx);
    let printed = printer::print_module(&ctx, module.op());

    let mut ctx2 = IrContext::new();
    let reparsed = parser::parse_module(&mut ctx2, &printed).expect("parses back");
    let reprinted = printer::print_module(&ctx2, reparsed.op());

    assert_eq!(printed, reprinted);
}

#[test]
fn printed_sample_is_stable() {
    let mut ctx = IrContext::new();
    let module = sample_module(&mut ctx);
    let printed = printer::print_module(&ctx, module.op());
    insta::assert_snapshot!(printed, @r###"
    core.module {sym_name = @sample} {
      func.func {sym_name = @double, type = func.fn(core.int() {signedness = @signed, width = 64}, core.int() {signedness = @signed, width = 64})} {
        ^bb0(%0: core.int() {signedness = @signed, width = 64}):
          %1 = arith.const {value = 2} : core.int() {signedness = @signed, width = 64}
          %2 = arith.muli %0, %1 : core.int() {signedness = @signed, width = 64}
          func.return %2
      }
    }
    "###);
}

#[test]
fn verifier_accepts_reparsed_module() {
    let mut ctx = IrContext::new();
    let module = sample_module(&mut ctx);
    let printed = printer::print_module(&ctx, module.op());

    let mut ctx2 = IrContext::new();
    let reparsed = parser::parse_module(&mut ctx2, &printed).expect("parses back");
    let report = pyrite_ir::verifier::verify(&ctx2, reparsed);
    assert!(report.is_ok(), "{report}");
}
