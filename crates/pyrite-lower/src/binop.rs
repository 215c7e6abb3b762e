//! Binary operator lowering table.
//!
//! Each Python opcode row carries up to three handlers (integer, float,
//! complex), selected by the coerced operand type. Handlers emit standard
//! arithmetic through the tracked builder; integer ops run on the signless
//! carrier with sign casts at the edges, and Python `%` / `//` semantics
//! are spelled out explicitly.

use pyrite_ir::dialect::core::{self, Signedness};
use pyrite_ir::dialect::{arith, cmplx, math, plier};
use pyrite_ir::rewrite::{ConversionPattern, PatternRewriter, TypeConverter};
use pyrite_ir::{
    DialectOp, IrContext, Location, OpBuilder, OpRef, Symbol, TypeRef, ValueRef,
};

use crate::cast;
use crate::coerce::coerce;

type BinHandler = fn(&mut OpBuilder<'_>, ValueRef, ValueRef, TypeRef) -> Option<ValueRef>;

struct OpDesc {
    token: &'static str,
    iop: Option<BinHandler>,
    fop: Option<BinHandler>,
    cop: Option<BinHandler>,
}

macro_rules! std_ctor {
    ($name:ident, $ctor:path) => {
        fn $name(
            ctx: &mut IrContext,
            loc: Location,
            a: ValueRef,
            b: ValueRef,
            ty: TypeRef,
        ) -> (OpRef, ValueRef) {
            let op = $ctor(ctx, loc, a, b, ty);
            let v = ctx.op_result(op.op_ref(), 0);
            (op.op_ref(), v)
        }
    };
}

std_ctor!(mk_addi, arith::addi);
std_ctor!(mk_subi, arith::subi);
std_ctor!(mk_muli, arith::muli);
std_ctor!(mk_andi, arith::andi);
std_ctor!(mk_ori, arith::ori);
std_ctor!(mk_xori, arith::xori);
std_ctor!(mk_shli, arith::shli);
std_ctor!(mk_shrsi, arith::shrsi);
std_ctor!(mk_addf, arith::addf);
std_ctor!(mk_subf, arith::subf);
std_ctor!(mk_mulf, arith::mulf);
std_ctor!(mk_divf, arith::divf);
std_ctor!(mk_powf, math::powf);
std_ctor!(mk_cadd, cmplx::add);
std_ctor!(mk_csub, cmplx::sub);
std_ctor!(mk_cmul, cmplx::mul);
std_ctor!(mk_cdiv, cmplx::div);
std_ctor!(mk_cpow, cmplx::pow);

/// Convert both operands to the signless carrier of `res_ty`, apply the
/// ctor, convert the result back.
fn via_std(
    b: &mut OpBuilder<'_>,
    mk: fn(&mut IrContext, Location, ValueRef, ValueRef, TypeRef) -> (OpRef, ValueRef),
    lhs: ValueRef,
    rhs: ValueRef,
    res_ty: TypeRef,
) -> Option<ValueRef> {
    let signless = core::make_signless(&mut b.ctx.types, res_ty);
    let l = cast::do_convert(b, lhs, signless)?;
    let r = cast::do_convert(b, rhs, signless)?;
    let (op, v) = mk(b.ctx, b.loc, l, r, signless);
    b.track_op(op);
    cast::do_convert(b, v, res_ty)
}

macro_rules! std_handler {
    ($name:ident, $mk:ident) => {
        fn $name(
            b: &mut OpBuilder<'_>,
            lhs: ValueRef,
            rhs: ValueRef,
            res_ty: TypeRef,
        ) -> Option<ValueRef> {
            via_std(b, $mk, lhs, rhs, res_ty)
        }
    };
}

std_handler!(iadd, mk_addi);
std_handler!(isub, mk_subi);
std_handler!(imul, mk_muli);
std_handler!(iand, mk_andi);
std_handler!(ior, mk_ori);
std_handler!(ixor, mk_xori);
std_handler!(ishl, mk_shli);
std_handler!(ishr, mk_shrsi);
std_handler!(fadd, mk_addf);
std_handler!(fsub, mk_subf);
std_handler!(fmul, mk_mulf);
std_handler!(fdiv, mk_divf);
std_handler!(fpow, mk_powf);
std_handler!(cadd, mk_cadd);
std_handler!(csub, mk_csub);
std_handler!(cmul, mk_cmul);
std_handler!(cdiv, mk_cdiv);
std_handler!(cpow, mk_cpow);

/// `a ** b` on integers: run through f64 and cast back.
fn ipow(b: &mut OpBuilder<'_>, lhs: ValueRef, rhs: ValueRef, res_ty: TypeRef) -> Option<ValueRef> {
    let f64_ty = core::float_ty(&mut b.ctx.types, 64);
    let l = cast::do_convert(b, lhs, f64_ty)?;
    let r = cast::do_convert(b, rhs, f64_ty)?;
    let pow = math::powf(b.ctx, b.loc, l, r, f64_ty);
    let v = b.track(pow).result(b.ctx);
    cast::do_convert(b, v, res_ty)
}

/// `a / b` on integers: true division, result type must be float.
fn itruediv(
    b: &mut OpBuilder<'_>,
    lhs: ValueRef,
    rhs: ValueRef,
    res_ty: TypeRef,
) -> Option<ValueRef> {
    if !core::is_float(&b.ctx.types, res_ty) {
        return None;
    }
    let l = cast::do_convert(b, lhs, res_ty)?;
    let r = cast::do_convert(b, rhs, res_ty)?;
    let div = arith::divf(b.ctx, b.loc, l, r, res_ty);
    Some(b.track(div).result(b.ctx))
}

/// `a // b` on integers: signed floor division, unsigned plain division.
fn ifloordiv(
    b: &mut OpBuilder<'_>,
    lhs: ValueRef,
    rhs: ValueRef,
    res_ty: TypeRef,
) -> Option<ValueRef> {
    let signed = core::signedness(&b.ctx.types, res_ty) != Some(Signedness::Unsigned);
    let signless = core::make_signless(&mut b.ctx.types, res_ty);
    let l = cast::do_convert(b, lhs, signless)?;
    let r = cast::do_convert(b, rhs, signless)?;
    let v = if signed {
        let op = arith::floordivi(b.ctx, b.loc, l, r, signless);
        b.track(op).result(b.ctx)
    } else {
        let op = arith::divui(b.ctx, b.loc, l, r, signless);
        b.track(op).result(b.ctx)
    };
    cast::do_convert(b, v, res_ty)
}

/// `a // b` on floats: `floor(a / b)`.
fn ffloordiv(
    b: &mut OpBuilder<'_>,
    lhs: ValueRef,
    rhs: ValueRef,
    res_ty: TypeRef,
) -> Option<ValueRef> {
    let l = cast::do_convert(b, lhs, res_ty)?;
    let r = cast::do_convert(b, rhs, res_ty)?;
    let div = arith::divf(b.ctx, b.loc, l, r, res_ty);
    let div_v = b.track(div).result(b.ctx);
    let floor = math::floor(b.ctx, b.loc, div_v, res_ty);
    Some(b.track(floor).result(b.ctx))
}

/// Python `%` on integers: `((a rem b) + b) rem b`.
fn imod(b: &mut OpBuilder<'_>, lhs: ValueRef, rhs: ValueRef, res_ty: TypeRef) -> Option<ValueRef> {
    let src_ty = b.ctx.value_ty(lhs);
    let signless = core::make_signless(&mut b.ctx.types, src_ty);
    let a = cast::do_convert(b, lhs, signless)?;
    let m = cast::do_convert(b, rhs, signless)?;
    let v1 = {
        let op = arith::remi(b.ctx, b.loc, a, m, signless);
        b.track(op).result(b.ctx)
    };
    let v2 = {
        let op = arith::addi(b.ctx, b.loc, v1, m, signless);
        b.track(op).result(b.ctx)
    };
    let v3 = {
        let op = arith::remi(b.ctx, b.loc, v2, m, signless);
        b.track(op).result(b.ctx)
    };
    cast::do_convert(b, v3, res_ty)
}

/// Python `%` on floats: same renormalization on `remf`.
fn fmod(b: &mut OpBuilder<'_>, lhs: ValueRef, rhs: ValueRef, _res_ty: TypeRef) -> Option<ValueRef> {
    let ty = b.ctx.value_ty(lhs);
    let v1 = {
        let op = arith::remf(b.ctx, b.loc, lhs, rhs, ty);
        b.track(op).result(b.ctx)
    };
    let v2 = {
        let op = arith::addf(b.ctx, b.loc, v1, rhs, ty);
        b.track(op).result(b.ctx)
    };
    let op = arith::remf(b.ctx, b.loc, v2, rhs, ty);
    Some(b.track(op).result(b.ctx))
}

/// Integer comparison picking the signed or unsigned predicate from the
/// declared operand signedness.
fn icmp(
    b: &mut OpBuilder<'_>,
    signed_pred: Symbol,
    unsigned_pred: Symbol,
    lhs: ValueRef,
    rhs: ValueRef,
) -> Option<ValueRef> {
    let ty = b.ctx.value_ty(lhs);
    let pred = if signed_pred == unsigned_pred
        || core::signedness(&b.ctx.types, ty) != Some(Signedness::Unsigned)
    {
        signed_pred
    } else {
        unsigned_pred
    };
    let l = cast::to_signless(b, lhs);
    let r = cast::to_signless(b, rhs);
    let i1 = core::bool_ty(&mut b.ctx.types);
    let op = arith::cmpi(b.ctx, b.loc, l, r, i1, pred);
    Some(b.track(op).result(b.ctx))
}

fn fcmp(b: &mut OpBuilder<'_>, pred: Symbol, lhs: ValueRef, rhs: ValueRef) -> Option<ValueRef> {
    let i1 = core::bool_ty(&mut b.ctx.types);
    let op = arith::cmpf(b.ctx, b.loc, lhs, rhs, i1, pred);
    Some(b.track(op).result(b.ctx))
}

macro_rules! cmp_handlers {
    ($iname:ident => ($spred:ident, $upred:ident), $fname:ident => $fpred:ident) => {
        fn $iname(
            b: &mut OpBuilder<'_>,
            lhs: ValueRef,
            rhs: ValueRef,
            _res_ty: TypeRef,
        ) -> Option<ValueRef> {
            icmp(b, arith::pred::$spred(), arith::pred::$upred(), lhs, rhs)
        }

        fn $fname(
            b: &mut OpBuilder<'_>,
            lhs: ValueRef,
            rhs: ValueRef,
            _res_ty: TypeRef,
        ) -> Option<ValueRef> {
            fcmp(b, arith::pred::$fpred(), lhs, rhs)
        }
    };
}

cmp_handlers!(icmp_gt => (sgt, ugt), fcmp_gt => ogt);
cmp_handlers!(icmp_ge => (sge, uge), fcmp_ge => oge);
cmp_handlers!(icmp_lt => (slt, ult), fcmp_lt => olt);
cmp_handlers!(icmp_le => (sle, ule), fcmp_le => ole);
cmp_handlers!(icmp_eq => (eq, eq), fcmp_eq => oeq);
cmp_handlers!(icmp_ne => (ne, ne), fcmp_ne => one);

const HANDLERS: &[OpDesc] = &[
    OpDesc { token: "+", iop: Some(iadd), fop: Some(fadd), cop: Some(cadd) },
    OpDesc { token: "-", iop: Some(isub), fop: Some(fsub), cop: Some(csub) },
    OpDesc { token: "*", iop: Some(imul), fop: Some(fmul), cop: Some(cmul) },
    OpDesc { token: "**", iop: Some(ipow), fop: Some(fpow), cop: Some(cpow) },
    OpDesc { token: "/", iop: Some(itruediv), fop: Some(fdiv), cop: Some(cdiv) },
    OpDesc { token: "//", iop: Some(ifloordiv), fop: Some(ffloordiv), cop: None },
    OpDesc { token: "%", iop: Some(imod), fop: Some(fmod), cop: None },
    OpDesc { token: "&", iop: Some(iand), fop: None, cop: None },
    OpDesc { token: "|", iop: Some(ior), fop: None, cop: None },
    OpDesc { token: "^", iop: Some(ixor), fop: None, cop: None },
    OpDesc { token: "<<", iop: Some(ishl), fop: None, cop: None },
    OpDesc { token: ">>", iop: Some(ishr), fop: None, cop: None },
    OpDesc { token: ">", iop: Some(icmp_gt), fop: Some(fcmp_gt), cop: None },
    OpDesc { token: ">=", iop: Some(icmp_ge), fop: Some(fcmp_ge), cop: None },
    OpDesc { token: "<", iop: Some(icmp_lt), fop: Some(fcmp_lt), cop: None },
    OpDesc { token: "<=", iop: Some(icmp_le), fop: Some(fcmp_le), cop: None },
    OpDesc { token: "==", iop: Some(icmp_eq), fop: Some(fcmp_eq), cop: None },
    OpDesc { token: "!=", iop: Some(icmp_ne), fop: Some(fcmp_ne), cop: None },
];

/// Is this a type the scalar lowering handles?
pub fn is_supported(types: &pyrite_ir::TypeInterner, ty: TypeRef) -> bool {
    core::is_int(types, ty)
        || core::is_float(types, ty)
        || core::is_complex(types, ty)
        || core::is_index(types, ty)
}

/// Shared lowering for `plier.binop` and `plier.inplace_binop`.
fn lower_binop(
    ctx: &mut IrContext,
    op: OpRef,
    token: String,
    lhs: ValueRef,
    rhs: ValueRef,
    converter: &TypeConverter,
    rewriter: &mut PatternRewriter,
) -> bool {
    let t0 = ctx.value_ty(lhs);
    let t1 = ctx.value_ty(rhs);
    if !is_supported(&ctx.types, t0) || !is_supported(&ctx.types, t1) {
        return false;
    }
    let __orig_result_ty = ctx.op_result_types(op)[0];

    let res_ty = converter.convert_type_or_self(&mut ctx.types, __orig_result_ty);
    if !is_supported(&ctx.types, res_ty) {
        return false;
    }

    let Some(desc) = HANDLERS.iter().find(|h| h.token == token) else {
        return false;
    };

    let final_ty = coerce(&ctx.types, t0, t1);
    let handler = if core::is_complex(&ctx.types, final_ty) {
        desc.cop
    } else if core::is_float(&ctx.types, final_ty) {
        desc.fop
    } else {
        desc.iop
    };
    let Some(handler) = handler else {
        return false;
    };

    let loc = ctx.op(op).location;
    let mut b = OpBuilder::new(ctx, loc);
    let Some(l) = cast::do_convert(&mut b, lhs, final_ty) else {
        return false;
    };
    let Some(r) = cast::do_convert(&mut b, rhs, final_ty) else {
        return false;
    };
    let Some(mut out) = handler(&mut b, l, r, res_ty) else {
        return false;
    };
    if b.ctx.value_ty(out) != res_ty {
        let sc = pyrite_ir::dialect::util::sign_cast(b.ctx, b.loc, out, res_ty);
        out = b.track(sc).result(b.ctx);
    }
    for emitted in b.into_ops() {
        rewriter.insert_op(emitted);
    }
    rewriter.erase_op(vec![out]);
    true
}

/// Lowers `plier.binop` into standard arithmetic.
pub struct BinOpLowering;

impl ConversionPattern for BinOpLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("binop")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(binop) = plier::Binop::from_op(ctx, op) else {
            return false;
        };
        let token = binop.op(ctx);
        let (lhs, rhs) = (binop.lhs(ctx), binop.rhs(ctx));
        lower_binop(ctx, op, token, lhs, rhs, converter, rewriter)
    }

    fn name(&self) -> &'static str {
        "BinOpLowering"
    }
}

/// Lowers `plier.inplace_binop` through the same table.
pub struct InplaceBinOpLowering;

impl ConversionPattern for InplaceBinOpLowering {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("plier"), Symbol::new("inplace_binop")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(binop) = plier::InplaceBinop::from_op(ctx, op) else {
            return false;
        };
        let token = binop.op(ctx);
        let (lhs, rhs) = (binop.lhs(ctx), binop.rhs(ctx));
        lower_binop(ctx, op, token, lhs, rhs, converter, rewriter)
    }

    fn name(&self) -> &'static str {
        "InplaceBinOpLowering"
    }
}
