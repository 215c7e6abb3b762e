//! Dialect definitions.
//!
//! Each module declares its ops with the [`crate::dialect!`] macro and adds
//! hand-written helpers where the declarative form falls short (segmented
//! operands, type constructors). Trait assignments for these ops live in
//! [`crate::traits`].

pub mod arith;
pub mod cf;
pub mod cmplx;
pub mod core;
pub mod func;
pub mod gpu;
pub mod gpu_rt;
pub mod math;
pub mod mem;
pub mod plier;
pub mod scf;
pub mod spv;
pub mod util;

#[cfg(test)]
mod tests {
    use crate::dialect::core::Signedness;
    use crate::dialect::{arith, core, func, scf};
    use crate::{Attribute, BlockData, DialectOp, IrContext, RegionData, Symbol};
    use smallvec::smallvec;

    #[test]
    fn const_round_trip() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(42));
        let viewed = arith::Const::from_op(&ctx, c.op_ref()).expect("arith.const");
        assert_eq!(viewed.op_ref(), c.op_ref());
        assert_eq!(c.value(&ctx), Attribute::int(42));
        assert_eq!(ctx.value_ty(c.result(&ctx)), i32_ty);
        assert_eq!(c.result_ty(&ctx), i32_ty);
    }

    #[test]
    fn binary_op_operand_accessors() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);

        let a = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        let b = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(2));
        let va = a.result(&ctx);
        let vb = b.result(&ctx);

        let add = arith::addi(&mut ctx, loc, va, vb, i32_ty);
        assert_eq!(add.lhs(&ctx), va);
        assert_eq!(add.rhs(&ctx), vb);
        assert!(arith::Addi::matches(&ctx, add.op_ref()));
        assert!(!arith::Subi::matches(&ctx, add.op_ref()));
    }

    #[test]
    fn variadic_call_and_attrs() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i64_ty = core::int_ty(&mut ctx.types, 64, Signedness::Signed);

        let a = arith::r#const(&mut ctx, loc, i64_ty, Attribute::int(1));
        let va = a.result(&ctx);

        let call = func::call(
            &mut ctx,
            loc,
            [va, va],
            [i64_ty],
            Symbol::new("callee_fn"),
            None,
        );
        assert_eq!(call.callee(&ctx), Symbol::new("callee_fn"));
        assert_eq!(call.args(&ctx), &[va, va]);
        assert_eq!(call.results(&ctx).len(), 1);
        assert_eq!(call.force_inline(&ctx), None);
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(0));
        assert!(func::Call::from_op(&ctx, c.op_ref()).is_err());
    }

    #[test]
    fn regions_and_results_on_scf_if() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i1_ty = core::bool_ty(&mut ctx.types);
        let i32_ty = core::signless(&mut ctx.types, 32);

        let cond = arith::r#const(&mut ctx, loc, i1_ty, Attribute::int(1));
        let cond_v = cond.result(&ctx);

        let then_block = ctx.create_block(BlockData::empty(loc));
        let then_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![then_block],
            parent_op: None,
        });
        let else_block = ctx.create_block(BlockData::empty(loc));
        let else_region = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![else_block],
            parent_op: None,
        });

        let if_op = scf::r#if(&mut ctx, loc, cond_v, [i32_ty], then_region, else_region);
        assert_eq!(if_op.cond(&ctx), cond_v);
        assert_eq!(if_op.then_region(&ctx), then_region);
        assert_eq!(if_op.else_region(&ctx), else_region);
        assert_eq!(if_op.results(&ctx).len(), 1);
    }

    #[test]
    fn multi_result_constructor() {
        use crate::dialect::gpu;
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let idx = core::index_ty(&mut ctx.types);
        let one = arith::r#const(&mut ctx, loc, idx, Attribute::int(1));
        let v = one.result(&ctx);

        let suggest = gpu::suggest_block_size(&mut ctx, loc, v, v, v, idx, idx, idx);
        assert_eq!(suggest.block_x(&ctx), ctx.op_result(suggest.op_ref(), 0));
        assert_eq!(suggest.block_z(&ctx), ctx.op_result(suggest.op_ref(), 2));
    }

    #[test]
    fn dialect_name_constants() {
        assert_eq!(arith::Const::DIALECT, "arith");
        assert_eq!(arith::Const::NAME, "const");
        assert_eq!(func::Return::NAME, "return");
        assert_eq!(scf::If::NAME, "if");
        assert_eq!(core::DIALECT_NAME(), Symbol::new("core"));
    }
}
