//! Rewrite pattern traits.

use super::rewriter::PatternRewriter;
use super::type_converter::TypeConverter;
use crate::context::IrContext;
use crate::refs::OpRef;
use crate::Symbol;

/// A local rewrite keyed by a root op kind.
///
/// Return `true` from [`RewritePattern::match_and_rewrite`] after recording
/// mutations on the rewriter; return `false` to decline. Mutating the
/// context outside the rewriter protocol while matching is not supported.
pub trait RewritePattern {
    /// Root op kind `(dialect, name)`; `None` matches any op.
    fn root(&self) -> Option<(Symbol, Symbol)> {
        None
    }

    /// Relative priority; higher-benefit patterns are tried first.
    fn benefit(&self) -> u16 {
        1
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A rewrite that produces legally typed IR under a [`TypeConverter`].
///
/// Identical contract to [`RewritePattern`], with the converter available
/// for type translation and materialization decisions.
pub trait ConversionPattern {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        None
    }

    fn benefit(&self) -> u16 {
        1
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
