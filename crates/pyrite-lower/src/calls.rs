//! Call resolution for `plier.pycall`.
//!
//! Three tiers, tried in order:
//!
//! 1. hard-coded builtins (`range`, `slice`, plus the scalar helpers
//!    `abs`, `min`, `max`, `bool`, `int`, `float`),
//! 2. a pluggable [`LibraryResolver`] lowering library-backed calls into
//!    algorithmic IR,
//! 3. an external-symbol resolver that mangles `(name, operand types)`
//!    into a function symbol declared in the module and linked at load
//!    time.
//!
//! Builtins that produce new loop forms attach the `plier-to-scf` jump
//! marker so the structured-control-flow stage re-runs.

use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::{arith, func, plier};
use pyrite_ir::rewrite::{ModuleRef, PatternRewriter, RewritePattern};
use pyrite_ir::{
    transforms, DialectOp, IrContext, OpBuilder, OpRef, Symbol, TypeRef, ValueRef,
};

use crate::cast;

/// External collaborator lowering library calls into algorithmic IR.
///
/// Implementations emit their ops through the builder and return the call's
/// replacement values (matching the call's result arity).
pub trait LibraryResolver {
    fn resolve(
        &self,
        b: &mut OpBuilder<'_>,
        name: &str,
        args: &[ValueRef],
    ) -> Option<Vec<ValueRef>>;
}

/// External collaborator resolving a `(name, operand types)` pair to a
/// linkable function signature.
pub trait ExternalSymbols {
    /// Result type of the external function, if one exists.
    fn lookup(&self, ctx: &IrContext, name: &str, arg_types: &[TypeRef]) -> Option<TypeRef>;
}

/// Mangle a call name and its operand types into a linker symbol.
pub fn mangle(ctx: &IrContext, name: &str, arg_types: &[TypeRef]) -> Option<String> {
    let mut out = String::from("_pyr_");
    out.push_str(&name.replace('.', "_"));
    for &ty in arg_types {
        out.push('_');
        out.push_str(&type_code(ctx, ty)?);
    }
    Some(out)
}

fn type_code(ctx: &IrContext, ty: TypeRef) -> Option<String> {
    if let Some(w) = core::int_width(&ctx.types, ty) {
        let prefix = match core::signedness(&ctx.types, ty) {
            Some(Signedness::Unsigned) => "u",
            _ => "i",
        };
        return Some(format!("{prefix}{w}"));
    }
    if let Some(w) = core::float_width(&ctx.types, ty) {
        return Some(format!("f{w}"));
    }
    if core::is_index(&ctx.types, ty) {
        return Some("idx".to_owned());
    }
    if let Some(elem) = core::complex_elem(&ctx.types, ty) {
        return Some(format!("c{}", type_code(ctx, elem)?));
    }
    None
}

// ============================================================================
// Builtin handlers
// ============================================================================

type BuiltinHandler =
    fn(&mut OpBuilder<'_>, &[ValueRef], TypeRef) -> Option<(Vec<ValueRef>, bool)>;

/// `slice(begin, end[, stride])`; the missing stride defaults to 1.
fn lower_slice(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    if args.len() != 2 && args.len() != 3 {
        return None;
    }
    let begin = args[0];
    let end = args[1];
    let stride = match args.get(2) {
        Some(&s) => s,
        None => b.const_index(1),
    };
    let slice = plier::build_slice(b.ctx, b.loc, begin, end, stride, res_ty);
    let out = b.track(slice).result(b.ctx);
    Some((vec![out], true))
}

/// `range(end)` / `range(begin, end[, step])` as a slice triple; the loop
/// structuring stage consumes it.
fn lower_range(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    if args.is_empty() || args.len() > 3 {
        return None;
    }
    let (begin, end) = if args.len() == 1 {
        (b.const_index(0), args[0])
    } else {
        (args[0], args[1])
    };
    let step = match args.get(2) {
        Some(&s) => s,
        None => b.const_index(1),
    };
    let slice = plier::build_slice(b.ctx, b.loc, begin, end, step, res_ty);
    let out = b.track(slice).result(b.ctx);
    Some((vec![out], true))
}

fn lower_abs(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    if args.len() != 1 {
        return None;
    }
    let x = cast::do_convert(b, args[0], res_ty)?;
    let out = if core::is_float(&b.ctx.types, res_ty) {
        let zero = b.const_float(res_ty, 0.0);
        let bool_ty = core::bool_ty(&mut b.ctx.types);
        let lt = arith::cmpf(b.ctx, b.loc, x, zero, bool_ty, arith::pred::olt());
        let cond = b.track(lt).result(b.ctx);
        let neg = arith::negf(b.ctx, b.loc, x, res_ty);
        let neg_v = b.track(neg).result(b.ctx);
        let sel = arith::select(b.ctx, b.loc, cond, neg_v, x, res_ty);
        b.track(sel).result(b.ctx)
    } else {
        let signless = core::make_signless(&mut b.ctx.types, res_ty);
        let v = cast::to_signless(b, x);
        let zero = b.const_int(signless, 0);
        let i1 = core::bool_ty(&mut b.ctx.types);
        let lt = arith::cmpi(b.ctx, b.loc, v, zero, i1, arith::pred::slt());
        let cond = b.track(lt).result(b.ctx);
        let neg = arith::subi(b.ctx, b.loc, zero, v, signless);
        let neg_v = b.track(neg).result(b.ctx);
        let sel = arith::select(b.ctx, b.loc, cond, neg_v, v, signless);
        let out = b.track(sel).result(b.ctx);
        cast::do_convert(b, out, res_ty)?
    };
    Some((vec![out], false))
}

fn lower_min_max(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
    is_min: bool,
) -> Option<(Vec<ValueRef>, bool)> {
    if args.len() != 2 {
        return None;
    }
    let l = cast::do_convert(b, args[0], res_ty)?;
    let r = cast::do_convert(b, args[1], res_ty)?;
    let i1 = core::bool_ty(&mut b.ctx.types);
    let cond = if core::is_float(&b.ctx.types, res_ty) {
        let pred = if is_min {
            arith::pred::olt()
        } else {
            arith::pred::ogt()
        };
        let cmp = arith::cmpf(b.ctx, b.loc, l, r, i1, pred);
        b.track(cmp).result(b.ctx)
    } else {
        let unsigned = core::signedness(&b.ctx.types, res_ty) == Some(Signedness::Unsigned);
        let pred = match (is_min, unsigned) {
            (true, false) => arith::pred::slt(),
            (true, true) => arith::pred::ult(),
            (false, false) => arith::pred::sgt(),
            (false, true) => arith::pred::ugt(),
        };
        let lv = cast::to_signless(b, l);
        let rv = cast::to_signless(b, r);
        let cmp = arith::cmpi(b.ctx, b.loc, lv, rv, i1, pred);
        b.track(cmp).result(b.ctx)
    };
    let sel = arith::select(b.ctx, b.loc, cond, l, r, res_ty);
    let out = b.track(sel).result(b.ctx);
    Some((vec![out], false))
}

fn lower_min(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    lower_min_max(b, args, res_ty, true)
}

fn lower_max(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    lower_min_max(b, args, res_ty, false)
}

/// `bool`/`int`/`float` conversions ride on `do_convert`.
fn lower_convert(
    b: &mut OpBuilder<'_>,
    args: &[ValueRef],
    res_ty: TypeRef,
) -> Option<(Vec<ValueRef>, bool)> {
    if args.len() != 1 {
        return None;
    }
    let out = cast::do_convert(b, args[0], res_ty)?;
    Some((vec![out], false))
}

const BUILTINS: &[(&str, BuiltinHandler)] = &[
    ("range", lower_range),
    ("slice", lower_slice),
    ("abs", lower_abs),
    ("min", lower_min),
    ("max", lower_max),
    ("bool", lower_convert),
    ("int", lower_convert),
    ("float", lower_convert),
];

// ============================================================================
// The pattern
// ============================================================================

/// Resolves `plier.pycall` through the three tiers.
pub struct CallLowering<'a> {
    pub module: ModuleRef,
    pub library: Option<&'a dyn LibraryResolver>,
    pub externals: Option<&'a dyn ExternalSymbols>,
}

impl<'a> RewritePattern for CallLowering<'a> {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("pycall")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(call) = plier::Pycall::from_op(ctx, op) else {
            return false;
        };
        let name = call.func_name(ctx);
        let args: Vec<ValueRef> = call.args(ctx).to_vec();
        let res_ty = ctx.op_result_types(op)[0];
        let loc = ctx.op(op).location;

        // Tier 1: builtins.
        if let Some(&(_, handler)) = BUILTINS.iter().find(|(n, _)| *n == name) {
            let mut b = OpBuilder::new(ctx, loc);
            if let Some((results, rerun_scf)) = handler(&mut b, &args, res_ty) {
                for emitted in b.into_ops() {
                    rewriter.insert_op(emitted);
                }
                rewriter.erase_op(results);
                if rerun_scf {
                    transforms::add_jump_marker(ctx, self.module, Symbol::new("plier-to-scf"));
                }
                return true;
            }
        }

        // Tier 2: library resolver.
        if let Some(library) = self.library {
            let mut b = OpBuilder::new(ctx, loc);
            if let Some(mut results) = library.resolve(&mut b, &name, &args) {
                if results.len() == 1 && b.ctx.value_ty(results[0]) != res_ty {
                    match cast::do_convert(&mut b, results[0], res_ty) {
                        Some(v) => results[0] = v,
                        None => return false,
                    }
                }
                for emitted in b.into_ops() {
                    rewriter.insert_op(emitted);
                }
                rewriter.erase_op(results);
                transforms::add_jump_marker(ctx, self.module, Symbol::new("plier-to-scf"));
                return true;
            }
        }

        // Tier 3: external symbol.
        let Some(externals) = self.externals else {
            return false;
        };
        let arg_types: Vec<TypeRef> = args.iter().map(|&v| ctx.value_ty(v)).collect();
        let Some(ret_ty) = externals.lookup(ctx, &name, &arg_types) else {
            return false;
        };
        let Some(mangled) = mangle(ctx, &name, &arg_types) else {
            return false;
        };
        let mangled_sym = Symbol::new(&mangled);

        // Declare the external function once.
        if self.module.symbol_table(ctx).lookup(mangled_sym).is_none() {
            let fn_ty = func::fn_ty(&mut ctx.types, ret_ty, arg_types.iter().copied());
            let empty = ctx.create_block(pyrite_ir::BlockData::empty(loc));
            let body = ctx.create_region(pyrite_ir::RegionData {
                location: loc,
                blocks: pyrite_ir::smallvec::smallvec![empty],
                parent_op: None,
            });
            let decl = func::func(
                ctx,
                loc,
                mangled_sym,
                fn_ty,
                None,
                Some(func::private_visibility()),
                body,
            );
            rewriter.add_module_op(decl.op_ref());
        }

        let mut b = OpBuilder::new(ctx, loc);
        let new_call = func::call(b.ctx, b.loc, args, [ret_ty], mangled_sym, None);
        b.track(new_call);
        let mut out = new_call.results(b.ctx)[0];
        if b.ctx.value_ty(out) != res_ty {
            match cast::do_convert(&mut b, out, res_ty) {
                Some(v) => out = v,
                None => return false,
            }
        }
        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        transforms::add_jump_marker(ctx, self.module, Symbol::new("plier-to-scf"));
        true
    }

    fn name(&self) -> &'static str {
        "CallLowering"
    }
}

/// Resolve all `plier.pycall` ops in the module.
pub fn lower_calls(
    ctx: &mut IrContext,
    module: ModuleRef,
    library: Option<&dyn LibraryResolver>,
    externals: Option<&dyn ExternalSymbols>,
) {
    // The pattern borrows resolvers, so the applicator is scoped here.
    let mut applicator = pyrite_ir::rewrite::PatternApplicator::new()
        .without_folding()
        .add_pattern(CallLowering {
            module,
            library,
            externals,
        });
    applicator.apply(ctx, module);
}
