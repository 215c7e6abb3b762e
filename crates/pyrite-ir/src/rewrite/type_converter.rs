//! Type conversion across dialect boundaries.
//!
//! A [`TypeConverter`] holds an ordered list of type-to-type mappings
//! (first match wins) and three materialization callbacks that build cast
//! ops wherever a value of the wrong type crosses a region boundary or a
//! pattern edge. When no callback produces a cast, the default
//! materialization applies: identity for equal types, `util.sign_cast` for
//! signedness-only integer changes, `core.unrealized_cast` otherwise.

use crate::context::IrContext;
use crate::dialect::{core, util};
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::types::{Location, TypeInterner};

/// Where a materialization is requested from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterializationKind {
    /// Converting a block argument (producer side changed).
    Argument,
    /// Bridging a converted value back to a yet-unconverted consumer.
    Source,
    /// Bridging an unconverted value into a converted consumer.
    Target,
}

/// A materialized cast: the new value plus the ops that compute it.
pub struct MaterializeResult {
    pub value: ValueRef,
    pub ops: Vec<OpRef>,
}

type ConversionFn = dyn Fn(&mut TypeInterner, TypeRef) -> Option<TypeRef>;
type MaterializerFn =
    dyn Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult>;

/// Ordered type mappings plus materialization callbacks.
#[derive(Default)]
pub struct TypeConverter {
    conversions: Vec<Box<ConversionFn>>,
    argument_materializer: Option<Box<MaterializerFn>>,
    source_materializer: Option<Box<MaterializerFn>>,
    target_materializer: Option<Box<MaterializerFn>>,
}

impl TypeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a conversion; earlier registrations win.
    pub fn add_conversion(
        &mut self,
        f: impl Fn(&mut TypeInterner, TypeRef) -> Option<TypeRef> + 'static,
    ) {
        self.conversions.push(Box::new(f));
    }

    pub fn set_argument_materializer(
        &mut self,
        f: impl Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult>
            + 'static,
    ) {
        self.argument_materializer = Some(Box::new(f));
    }

    pub fn set_source_materializer(
        &mut self,
        f: impl Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult>
            + 'static,
    ) {
        self.source_materializer = Some(Box::new(f));
    }

    pub fn set_target_materializer(
        &mut self,
        f: impl Fn(&mut IrContext, Location, ValueRef, TypeRef) -> Option<MaterializeResult>
            + 'static,
    ) {
        self.target_materializer = Some(Box::new(f));
    }

    /// Convert a type; `None` means no registered mapping applies.
    pub fn convert_type(&self, types: &mut TypeInterner, ty: TypeRef) -> Option<TypeRef> {
        for conv in &self.conversions {
            if let Some(converted) = conv(types, ty) {
                return Some(converted);
            }
        }
        None
    }

    /// Convert a type, falling back to the type itself.
    pub fn convert_type_or_self(&self, types: &mut TypeInterner, ty: TypeRef) -> TypeRef {
        self.convert_type(types, ty).unwrap_or(ty)
    }

    /// Is the type already in the target universe?
    pub fn is_legal_type(&self, types: &mut TypeInterner, ty: TypeRef) -> bool {
        match self.convert_type(types, ty) {
            None => true,
            Some(converted) => converted == ty,
        }
    }

    /// Build a cast turning `value` into `target_ty`.
    ///
    /// Identity conversions return the value unchanged with no ops. The
    /// registered callback for `kind` is consulted first; on `None` the
    /// default materialization applies.
    pub fn materialize(
        &self,
        ctx: &mut IrContext,
        kind: MaterializationKind,
        loc: Location,
        value: ValueRef,
        target_ty: TypeRef,
    ) -> MaterializeResult {
        let from_ty = ctx.value_ty(value);
        if from_ty == target_ty {
            return MaterializeResult {
                value,
                ops: Vec::new(),
            };
        }

        let callback = match kind {
            MaterializationKind::Argument => &self.argument_materializer,
            MaterializationKind::Source => &self.source_materializer,
            MaterializationKind::Target => &self.target_materializer,
        };
        if let Some(f) = callback {
            if let Some(result) = f(ctx, loc, value, target_ty) {
                return result;
            }
        }

        default_materialize(ctx, loc, value, target_ty)
    }
}

/// Default cast synthesis: sign-cast for signedness-only integer changes,
/// unrealized cast for anything else.
pub fn default_materialize(
    ctx: &mut IrContext,
    loc: Location,
    value: ValueRef,
    target_ty: TypeRef,
) -> MaterializeResult {
    let from_ty = ctx.value_ty(value);

    let signedness_only = core::int_width(&ctx.types, from_ty).is_some()
        && core::int_width(&ctx.types, from_ty) == core::int_width(&ctx.types, target_ty)
        && core::signedness(&ctx.types, from_ty) != core::signedness(&ctx.types, target_ty);

    if signedness_only {
        let cast = util::sign_cast(ctx, loc, value, target_ty);
        return MaterializeResult {
            value: cast.result(ctx),
            ops: vec![cast.op_ref()],
        };
    }

    let cast = core::unrealized_cast(ctx, loc, value, target_ty);
    MaterializeResult {
        value: cast.result(ctx),
        ops: vec![cast.op_ref()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::arith;
    use crate::dialect::core::Signedness;
    use crate::types::Attribute;
    use crate::DialectOp;

    #[test]
    fn first_conversion_wins() {
        let mut ctx = IrContext::new();
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        let f64_ty = core::float_ty(&mut ctx.types, 64);

        let mut converter = TypeConverter::new();
        converter.add_conversion(move |types, ty| {
            core::float_width(types, ty)
                .filter(|&w| w == 64)
                .map(|_| core::float_ty(types, 32))
        });
        converter.add_conversion(move |types, ty| {
            // Never reached for f64.
            core::float_width(types, ty).map(|_| core::float_ty(types, 16))
        });

        assert_eq!(converter.convert_type(&mut ctx.types, f64_ty), Some(f32_ty));
        let f16_ty = core::float_ty(&mut ctx.types, 16);
        assert_eq!(converter.convert_type(&mut ctx.types, f32_ty), Some(f16_ty));
    }

    #[test]
    fn identity_materialization_is_noop() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(0));
        let v = c.result(&ctx);

        let converter = TypeConverter::new();
        let result =
            converter.materialize(&mut ctx, MaterializationKind::Source, loc, v, i32_ty);
        assert_eq!(result.value, v);
        assert!(result.ops.is_empty());
    }

    #[test]
    fn signedness_change_uses_sign_cast() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let signed = core::int_ty(&mut ctx.types, 32, Signedness::Signed);
        let signless = core::signless(&mut ctx.types, 32);
        let c = arith::r#const(&mut ctx, loc, signed, Attribute::int(-1));
        let v = c.result(&ctx);

        let converter = TypeConverter::new();
        let result =
            converter.materialize(&mut ctx, MaterializationKind::Target, loc, v, signless);
        assert_eq!(result.ops.len(), 1);
        assert!(util::SignCast::matches(&ctx, result.ops[0]));
        assert_eq!(ctx.value_ty(result.value), signless);
    }

    #[test]
    fn width_change_uses_unrealized_cast() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let i32_ty = core::signless(&mut ctx.types, 32);
        let i64_ty = core::signless(&mut ctx.types, 64);
        let c = arith::r#const(&mut ctx, loc, i32_ty, Attribute::int(1));
        let v = c.result(&ctx);

        let converter = TypeConverter::new();
        let result =
            converter.materialize(&mut ctx, MaterializationKind::Target, loc, v, i64_ty);
        assert_eq!(result.ops.len(), 1);
        assert!(core::UnrealizedCast::matches(&ctx, result.ops[0]));
    }
}
