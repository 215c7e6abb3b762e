//! Unstructured control flow: branch terminators with block successors.

use crate::{dialect, Attribute, IrContext, ValueRef};

dialect! {
    mod cf {
        /// Unconditional branch; operands feed the successor's block args.
        fn br(#[rest] dest_args) {
            #[successor(dest)]
        };

        /// Conditional branch. Operands are `cond` followed by the true and
        /// false successor arguments; `segments` holds the two group sizes.
        #[attr(segments: any)]
        fn cond_br(cond, #[rest] args) {
            #[successor(true_dest)]
            #[successor(false_dest)]
        };
    }
}

impl CondBr {
    fn segment_sizes(&self, ctx: &IrContext) -> (usize, usize) {
        let attr = self.segments(ctx);
        let sizes = attr.as_dense_ints().expect("cond_br segments attribute");
        (sizes[0] as usize, sizes[1] as usize)
    }

    pub fn true_args<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        let (t, _) = self.segment_sizes(ctx);
        &ctx.op_operands(self.op_ref())[1..1 + t]
    }

    pub fn false_args<'a>(&self, ctx: &'a IrContext) -> &'a [ValueRef] {
        let (t, f) = self.segment_sizes(ctx);
        &ctx.op_operands(self.op_ref())[1 + t..1 + t + f]
    }
}

/// Segment attribute for a `cond_br` with the given argument group sizes.
pub fn cond_br_segments(true_args: usize, false_args: usize) -> Attribute {
    Attribute::DenseInts(vec![true_args as i64, false_args as i64])
}
