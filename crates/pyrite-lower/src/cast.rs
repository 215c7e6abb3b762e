//! Numeric cast synthesis.
//!
//! `do_convert` builds the op sequence turning a value of one numeric type
//! into another: sign-aware integer extension/truncation, int/float and
//! index conversions, float widening/narrowing, and real-to-complex
//! promotion. Signed/unsigned integers route through their signless
//! carrier via `util.sign_cast`; narrowing to `i1` is a compare against
//! zero rather than a bit truncation.

use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::{arith, cmplx, util};
use pyrite_ir::{OpBuilder, TypeInterner, TypeRef, ValueRef};

fn is_int(types: &TypeInterner, ty: TypeRef) -> bool {
    core::is_int(types, ty)
}

fn is_float(types: &TypeInterner, ty: TypeRef) -> bool {
    core::is_float(types, ty)
}

fn is_index(types: &TypeInterner, ty: TypeRef) -> bool {
    core::is_index(types, ty)
}

fn is_float_complex(types: &TypeInterner, ty: TypeRef) -> bool {
    core::complex_elem(types, ty).is_some_and(|elem| core::is_float(types, elem))
}

/// Can `do_convert` produce `dst` from `src`?
pub fn can_convert(types: &TypeInterner, src: TypeRef, dst: TypeRef) -> bool {
    if src == dst {
        return true;
    }
    (is_int(types, src) && is_int(types, dst))
        || (is_int(types, src) && is_float(types, dst))
        || (is_float(types, src) && is_int(types, dst))
        || (is_index(types, src) && (is_int(types, dst) || is_float(types, dst)))
        || ((is_int(types, src) || is_float(types, src)) && is_index(types, dst))
        || (is_float(types, src) && is_float(types, dst))
        || (is_int(types, src) && is_float_complex(types, dst))
        || (is_float(types, src) && is_float_complex(types, dst))
}

/// Emit the cast sequence; `None` when the pair is unsupported.
pub fn do_convert(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> Option<ValueRef> {
    let src = b.ctx.value_ty(val);
    if src == dst {
        return Some(val);
    }
    let types = &b.ctx.types;
    if is_int(types, src) && is_int(types, dst) {
        return Some(int_cast(b, val, dst));
    }
    if is_int(types, src) && is_float(types, dst) {
        return Some(int_float_cast(b, val, dst));
    }
    if is_float(types, src) && is_int(types, dst) {
        return Some(float_int_cast(b, val, dst));
    }
    if is_index(types, src) || is_index(types, dst) {
        if is_float(types, src) || is_float(types, dst) {
            return Some(index_float_cast(b, val, dst));
        }
        if is_int(types, src) || is_int(types, dst) || src == dst {
            return Some(index_cast(b, val, dst));
        }
        return None;
    }
    if is_float(types, src) && is_float(types, dst) {
        return Some(float_cast(b, val, dst));
    }
    if is_float_complex(types, dst) && (is_int(types, src) || is_float(types, src)) {
        return Some(to_complex_cast(b, val, dst));
    }
    None
}

/// Strip signedness with an explicit `util.sign_cast` when needed.
pub fn to_signless(b: &mut OpBuilder<'_>, val: ValueRef) -> ValueRef {
    let ty = b.ctx.value_ty(val);
    let signless = core::make_signless(&mut b.ctx.types, ty);
    if signless == ty {
        return val;
    }
    let cast = util::sign_cast(b.ctx, b.loc, val, signless);
    b.track(cast).result(b.ctx)
}

fn sign_cast_to(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    if b.ctx.value_ty(val) == dst {
        return val;
    }
    let cast = util::sign_cast(b.ctx, b.loc, val, dst);
    b.track(cast).result(b.ctx)
}

/// Integer-to-integer cast with sign-aware widening and bool narrowing.
pub fn int_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let src = b.ctx.value_ty(val);
    let src_bits = core::int_width(&b.ctx.types, src).expect("int_cast: integer source");
    let dst_bits = core::int_width(&b.ctx.types, dst).expect("int_cast: integer target");
    let src_signed = core::signedness(&b.ctx.types, src) == Some(Signedness::Signed);

    let dst_signless = core::make_signless(&mut b.ctx.types, dst);
    let mut v = to_signless(b, val);

    if dst_bits > src_bits {
        let op = if src_signed {
            arith::extsi(b.ctx, b.loc, v, dst_signless).op_ref()
        } else {
            arith::extui(b.ctx, b.loc, v, dst_signless).op_ref()
        };
        b.track_op(op);
        v = b.ctx.op_result(op, 0);
    } else if dst_bits < src_bits {
        if dst_bits == 1 {
            // Truthiness, not truncation.
            let src_signless = b.ctx.value_ty(v);
            let zero = b.const_int(src_signless, 0);
            let cmp = arith::cmpi(b.ctx, b.loc, v, zero, dst_signless, arith::pred::eq());
            b.track(cmp);
            let cmp_v = cmp.result(b.ctx);
            let t = b.const_int(dst_signless, 1);
            let f = b.const_int(dst_signless, 0);
            let sel = arith::select(b.ctx, b.loc, cmp_v, f, t, dst_signless);
            v = b.track(sel).result(b.ctx);
        } else {
            let op = arith::trunci(b.ctx, b.loc, v, dst_signless);
            v = b.track(op).result(b.ctx);
        }
    }

    sign_cast_to(b, v, dst)
}

fn int_float_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let src = b.ctx.value_ty(val);
    let signed = core::signedness(&b.ctx.types, src) == Some(Signedness::Signed);
    let v = to_signless(b, val);
    let op = if signed {
        arith::sitofp(b.ctx, b.loc, v, dst).op_ref()
    } else {
        arith::uitofp(b.ctx, b.loc, v, dst).op_ref()
    };
    b.track_op(op);
    b.ctx.op_result(op, 0)
}

fn float_int_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let dst_bits = core::int_width(&b.ctx.types, dst).expect("float_int_cast: integer target");
    let dst_signless = core::make_signless(&mut b.ctx.types, dst);
    let signed = core::signedness(&b.ctx.types, dst) == Some(Signedness::Signed);

    let v = if dst_bits == 1 {
        let src = b.ctx.value_ty(val);
        let zero = b.const_float(src, 0.0);
        let cmp = arith::cmpf(b.ctx, b.loc, val, zero, dst_signless, arith::pred::oeq());
        b.track(cmp);
        let cmp_v = cmp.result(b.ctx);
        let t = b.const_int(dst_signless, 1);
        let f = b.const_int(dst_signless, 0);
        let sel = arith::select(b.ctx, b.loc, cmp_v, f, t, dst_signless);
        b.track(sel).result(b.ctx)
    } else if signed {
        let op = arith::fptosi(b.ctx, b.loc, val, dst_signless);
        b.track(op).result(b.ctx)
    } else {
        let op = arith::fptoui(b.ctx, b.loc, val, dst_signless);
        b.track(op).result(b.ctx)
    };

    sign_cast_to(b, v, dst)
}

/// Cast through `core.index` in either direction.
pub fn index_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let src = b.ctx.value_ty(val);
    if src == dst {
        return val;
    }
    let mut v = to_signless(b, val);
    let dst_signless = core::make_signless(&mut b.ctx.types, dst);
    let op = arith::index_cast(b.ctx, b.loc, v, dst_signless);
    v = b.track(op).result(b.ctx);
    sign_cast_to(b, v, dst)
}

fn index_float_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let types = &b.ctx.types;
    let mut v = val;
    if is_float(types, b.ctx.value_ty(v)) {
        // float -> index goes through i64.
        let i64_ty = core::signless(&mut b.ctx.types, 64);
        let op = arith::fptosi(b.ctx, b.loc, v, i64_ty);
        v = b.track(op).result(b.ctx);
    }
    if is_float(&b.ctx.types, dst) {
        let i64_ty = core::signless(&mut b.ctx.types, 64);
        v = index_cast(b, v, i64_ty);
        let op = arith::sitofp(b.ctx, b.loc, v, dst);
        return b.track(op).result(b.ctx);
    }
    index_cast(b, v, dst)
}

fn float_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let src = b.ctx.value_ty(val);
    let src_w = core::float_width(&b.ctx.types, src).expect("float_cast: float source");
    let dst_w = core::float_width(&b.ctx.types, dst).expect("float_cast: float target");
    let op = if dst_w > src_w {
        arith::extf(b.ctx, b.loc, val, dst).op_ref()
    } else {
        arith::truncf(b.ctx, b.loc, val, dst).op_ref()
    };
    b.track_op(op);
    b.ctx.op_result(op, 0)
}

fn to_complex_cast(b: &mut OpBuilder<'_>, val: ValueRef, dst: TypeRef) -> ValueRef {
    let elem = core::complex_elem(&b.ctx.types, dst).expect("complex target");
    let src = b.ctx.value_ty(val);
    let re = if is_int(&b.ctx.types, src) {
        int_float_cast(b, val, elem)
    } else if src != elem {
        float_cast(b, val, elem)
    } else {
        val
    };
    let im = b.const_float(elem, 0.0);
    let op = cmplx::create(b.ctx, b.loc, re, im, dst);
    b.track(op).result(b.ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ir::{DialectOp, IrContext};

    fn with_builder<R>(f: impl FnOnce(&mut OpBuilder<'_>) -> R) -> R {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let mut b = OpBuilder::new(&mut ctx, loc);
        f(&mut b)
    }

    #[test]
    fn widening_signed_uses_extsi() {
        with_builder(|b| {
            let i32_s = core::int_ty(&mut b.ctx.types, 32, Signedness::Signed);
            let i64_s = core::int_ty(&mut b.ctx.types, 64, Signedness::Signed);
            let v = b.const_int(i32_s, -3);
            let out = do_convert(b, v, i64_s).unwrap();
            assert_eq!(b.ctx.value_ty(out), i64_s);
            // signless src cast, extsi, sign cast back.
            let def = match b.ctx.value_def(out) {
                pyrite_ir::ValueDef::OpResult(op, _) => op,
                _ => panic!(),
            };
            assert!(util::SignCast::matches(b.ctx, def));
        });
    }

    #[test]
    fn narrow_to_bool_is_truthiness() {
        with_builder(|b| {
            let i64_ty = core::signless(&mut b.ctx.types, 64);
            let i1_ty = core::bool_ty(&mut b.ctx.types);
            let v = b.const_int(i64_ty, 2);
            let out = do_convert(b, v, i1_ty).unwrap();
            assert_eq!(b.ctx.value_ty(out), i1_ty);
            let def = match b.ctx.value_def(out) {
                pyrite_ir::ValueDef::OpResult(op, _) => op,
                _ => panic!(),
            };
            // 2 -> true via cmp/select, not trunci (which would give 0).
            assert!(arith::Select::matches(b.ctx, def));
        });
    }

    #[test]
    fn unsigned_to_float_uses_uitofp() {
        with_builder(|b| {
            let u32_ty = core::int_ty(&mut b.ctx.types, 32, Signedness::Unsigned);
            let f64_ty = core::float_ty(&mut b.ctx.types, 64);
            let v = b.const_int(u32_ty, 7);
            let out = do_convert(b, v, f64_ty).unwrap();
            let def = match b.ctx.value_def(out) {
                pyrite_ir::ValueDef::OpResult(op, _) => op,
                _ => panic!(),
            };
            assert!(arith::Uitofp::matches(b.ctx, def));
        });
    }

    #[test]
    fn unsupported_pair_is_none() {
        with_builder(|b| {
            let f64_ty = core::float_ty(&mut b.ctx.types, 64);
            let none = core::none_ty(&mut b.ctx.types);
            let v = b.const_float(f64_ty, 1.0);
            assert!(do_convert(b, v, none).is_none());
            assert!(!can_convert(&b.ctx.types, f64_ty, none));
        });
    }

    #[test]
    fn real_to_complex_promotes() {
        with_builder(|b| {
            let f64_ty = core::float_ty(&mut b.ctx.types, 64);
            let c128 = core::complex_ty(&mut b.ctx.types, f64_ty);
            let v = b.const_float(f64_ty, 2.0);
            let out = do_convert(b, v, c128).unwrap();
            assert_eq!(b.ctx.value_ty(out), c128);
        });
    }
}
