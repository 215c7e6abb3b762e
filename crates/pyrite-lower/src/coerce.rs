//! Binary operand type coercion.
//!
//! Complex beats float beats integer; between two integers (or two floats)
//! the wider type wins, where float width is measured in mantissa bits.

use pyrite_ir::dialect::core;
use pyrite_ir::{TypeInterner, TypeRef};

/// Significant bits of a numeric type: integer width, or mantissa width
/// for floats (f16: 11, f32: 24, f64: 53). Complex measures its element.
pub fn bits_count(types: &TypeInterner, ty: TypeRef) -> Option<u32> {
    if let Some(w) = core::int_width(types, ty) {
        return Some(w);
    }
    if let Some(w) = core::float_width(types, ty) {
        return Some(match w {
            16 => 11,
            32 => 24,
            64 => 53,
            other => other,
        });
    }
    if let Some(elem) = core::complex_elem(types, ty) {
        return bits_count(types, elem);
    }
    if core::is_index(types, ty) {
        return Some(64);
    }
    None
}

/// Result type of a mixed binary op over `t0` and `t1`.
pub fn coerce(types: &TypeInterner, t0: TypeRef, t1: TypeRef) -> TypeRef {
    if t0 == t1 {
        return t0;
    }
    let c0 = core::is_complex(types, t0);
    let c1 = core::is_complex(types, t1);
    if c0 && !c1 {
        return t0;
    }
    if !c0 && c1 {
        return t1;
    }
    let f0 = core::is_float(types, t0);
    let f1 = core::is_float(types, t1);
    if f0 && !f1 {
        return t0;
    }
    if !f0 && f1 {
        return t1;
    }
    let b0 = bits_count(types, t0).unwrap_or(0);
    let b1 = bits_count(types, t1).unwrap_or(0);
    if b0 < b1 {
        t1
    } else {
        t0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_ir::dialect::core::Signedness;
    use pyrite_ir::IrContext;

    #[test]
    fn float_beats_int() {
        let mut ctx = IrContext::new();
        let i64_ty = core::int_ty(&mut ctx.types, 64, Signedness::Signed);
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        assert_eq!(coerce(&ctx.types, i64_ty, f32_ty), f32_ty);
        assert_eq!(coerce(&ctx.types, f32_ty, i64_ty), f32_ty);
    }

    #[test]
    fn complex_beats_float() {
        let mut ctx = IrContext::new();
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        let c128 = core::complex_ty(&mut ctx.types, f64_ty);
        assert_eq!(coerce(&ctx.types, f64_ty, c128), c128);
    }

    #[test]
    fn wider_int_wins() {
        let mut ctx = IrContext::new();
        let i16_ty = core::int_ty(&mut ctx.types, 16, Signedness::Signed);
        let i64_ty = core::int_ty(&mut ctx.types, 64, Signedness::Signed);
        assert_eq!(coerce(&ctx.types, i16_ty, i64_ty), i64_ty);
    }

    #[test]
    fn mantissa_width_orders_floats() {
        let ctx = &mut IrContext::new();
        let f16_ty = core::float_ty(&mut ctx.types, 16);
        let f64_ty = core::float_ty(&mut ctx.types, 64);
        assert_eq!(bits_count(&ctx.types, f16_ty), Some(11));
        assert_eq!(bits_count(&ctx.types, f64_ty), Some(53));
        assert_eq!(coerce(&ctx.types, f16_ty, f64_ty), f64_ty);
    }
}
