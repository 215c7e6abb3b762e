//! f64 degrade for targets without the Float64 capability.
//!
//! Kernel-side f64 values become f32; f64 buffers become buffers of
//! two-lane i32 vectors, with loads and stores packing and unpacking the
//! wide float by explicit mantissa/exponent/sign manipulation (denormals,
//! NaN and infinity are unsupported and flush to zero). Host-side launch
//! sites truncate f64 scalar arguments and bitcast buffer arguments.

use pyrite_ir::dialect::{arith, core, gpu, mem, util};
use pyrite_ir::rewrite::{
    ConversionPattern, ConversionTarget, Legality, ModuleRef, PatternRewriter, TypeConverter,
};
use pyrite_ir::{DialectOp, IrContext, OpBuilder, OpRef, Symbol, TypeRef, ValueRef};

fn is_f64(types: &pyrite_ir::TypeInterner, ty: TypeRef) -> bool {
    core::float_width(types, ty) == Some(64)
}

fn is_f64_buffer(types: &pyrite_ir::TypeInterner, ty: TypeRef) -> bool {
    mem::elem_ty(types, ty).is_some_and(|elem| is_f64(types, elem))
}

/// The degrade converter: f64 -> f32, buffer(f64) -> buffer(vec<2xi32>).
pub fn degrade_converter() -> TypeConverter {
    let mut converter = TypeConverter::new();
    converter.add_conversion(|types, ty| {
        is_f64(types, ty).then(|| core::float_ty(types, 32))
    });
    converter.add_conversion(|types, ty| {
        if !is_f64_buffer(types, ty) {
            return None;
        }
        let i32_ty = core::signless(types, 32);
        let packed = core::vec_ty(types, i32_ty, 2);
        mem::with_elem(types, ty, packed)
    });
    converter
}

// ============================================================================
// Bit-level conversion chains
// ============================================================================

type BinCtor = fn(&mut IrContext, pyrite_ir::Location, ValueRef, ValueRef, TypeRef) -> OpRef;

fn emit2(b: &mut OpBuilder<'_>, mk: BinCtor, lhs: ValueRef, rhs: ValueRef, ty: TypeRef) -> ValueRef {
    let op = mk(b.ctx, b.loc, lhs, rhs, ty);
    b.track_op(op);
    b.ctx.op_result(op, 0)
}

macro_rules! bin_ctor {
    ($name:ident) => {
        fn $name(
            ctx: &mut IrContext,
            loc: pyrite_ir::Location,
            a: ValueRef,
            b: ValueRef,
            ty: TypeRef,
        ) -> OpRef {
            arith::$name(ctx, loc, a, b, ty).op_ref()
        }
    };
}

bin_ctor!(shrui);
bin_ctor!(shli);
bin_ctor!(andi);
bin_ctor!(ori);
bin_ctor!(subi);
bin_ctor!(addi);

/// Unpack an f64 bit pattern (as `i64`) into an f32 value.
///
/// Straight-line field surgery: shift out sign/exponent/mantissa, rebias
/// the exponent from 1023 to 127, keep the 23 mantissa MSBs. A zero input
/// short-circuits through a select; denormals, NaN and infinity come out
/// wrong by design and flush toward zero.
pub fn f64_bits_to_f32(b: &mut OpBuilder<'_>, src_i64: ValueRef) -> ValueRef {
    let i64_ty = core::signless(&mut b.ctx.types, 64);
    let i32_ty = core::signless(&mut b.ctx.types, 32);
    let f32_ty = core::float_ty(&mut b.ctx.types, 32);
    let i1_ty = core::bool_ty(&mut b.ctx.types);

    let zero = b.const_int(i64_ty, 0);
    let abs_mask = b.const_int(i64_ty, 0x7FFF_FFFF_FFFF_FFFF);
    let abs_val = emit2(b, andi, src_i64, abs_mask, i64_ty);
    let is_zero = {
        let cmp = arith::cmpi(b.ctx, b.loc, abs_val, zero, i1_ty, arith::pred::eq());
        b.track(cmp).result(b.ctx)
    };

    let sign_shift = b.const_int(i64_ty, 63);
    let exp_shift = b.const_int(i64_ty, 52);
    let exp_mask = b.const_int(i64_ty, 0x7FF);
    let man_mask = b.const_int(i64_ty, 0x000F_FFFF_FFFF_FFFF);
    let bias_diff = b.const_int(i64_ty, 1023 - 127);
    let ff = b.const_int(i64_ty, 0xFF);
    let c29 = b.const_int(i64_ty, 29);
    let c23 = b.const_int(i64_ty, 23);
    let c31 = b.const_int(i64_ty, 31);

    let sign = emit2(b, shrui, src_i64, sign_shift, i64_ty);
    let mut exponent = emit2(b, shrui, src_i64, exp_shift, i64_ty);
    exponent = emit2(b, andi, exponent, exp_mask, i64_ty);
    let mut mantissa = emit2(b, andi, src_i64, man_mask, i64_ty);
    exponent = emit2(b, subi, exponent, bias_diff, i64_ty);

    exponent = emit2(b, andi, exponent, ff, i64_ty);
    mantissa = emit2(b, shrui, mantissa, c29, i64_ty);

    exponent = emit2(b, shli, exponent, c23, i64_ty);
    let sign_shifted = emit2(b, shli, sign, c31, i64_ty);

    let mut res = emit2(b, ori, mantissa, exponent, i64_ty);
    res = emit2(b, ori, res, sign_shifted, i64_ty);

    let sel = arith::select(b.ctx, b.loc, is_zero, src_i64, res, i64_ty);
    let res = b.track(sel).result(b.ctx);

    let trunc = arith::trunci(b.ctx, b.loc, res, i32_ty);
    let res = b.track(trunc).result(b.ctx);
    let cast = arith::bitcast(b.ctx, b.loc, res, f32_ty);
    b.track(cast).result(b.ctx)
}

/// Pack an f32 value into an f64 bit pattern (as `i64`).
pub fn f32_to_f64_bits(b: &mut OpBuilder<'_>, src_f32: ValueRef) -> ValueRef {
    let i64_ty = core::signless(&mut b.ctx.types, 64);
    let i32_ty = core::signless(&mut b.ctx.types, 32);
    let i1_ty = core::bool_ty(&mut b.ctx.types);

    let as_i32 = {
        let cast = arith::bitcast(b.ctx, b.loc, src_f32, i32_ty);
        b.track(cast).result(b.ctx)
    };
    let src_i64 = {
        let ext = arith::extui(b.ctx, b.loc, as_i32, i64_ty);
        b.track(ext).result(b.ctx)
    };

    let zero = b.const_int(i64_ty, 0);
    let abs_mask = b.const_int(i64_ty, 0x7FFF_FFFF_FFFF_FFFF);
    let abs_val = emit2(b, andi, src_i64, abs_mask, i64_ty);
    let is_zero = {
        let cmp = arith::cmpi(b.ctx, b.loc, abs_val, zero, i1_ty, arith::pred::eq());
        b.track(cmp).result(b.ctx)
    };

    let sign_shift = b.const_int(i64_ty, 31);
    let exp_shift = b.const_int(i64_ty, 23);
    let exp_mask = b.const_int(i64_ty, 0xFF);
    let man_mask = b.const_int(i64_ty, 0x7F_FFFF);
    let bias_diff = b.const_int(i64_ty, 1023 - 127);
    let c29 = b.const_int(i64_ty, 29);
    let c52 = b.const_int(i64_ty, 52);
    let c63 = b.const_int(i64_ty, 63);

    let sign = emit2(b, shrui, src_i64, sign_shift, i64_ty);
    let mut exponent = emit2(b, shrui, src_i64, exp_shift, i64_ty);
    exponent = emit2(b, andi, exponent, exp_mask, i64_ty);
    let mut mantissa = emit2(b, andi, src_i64, man_mask, i64_ty);

    mantissa = emit2(b, shli, mantissa, c29, i64_ty);
    exponent = emit2(b, addi, exponent, bias_diff, i64_ty);

    exponent = emit2(b, shli, exponent, c52, i64_ty);
    let sign_shifted = emit2(b, shli, sign, c63, i64_ty);

    let mut res = emit2(b, ori, mantissa, exponent, i64_ty);
    res = emit2(b, ori, res, sign_shifted, i64_ty);

    let sel = arith::select(b.ctx, b.loc, is_zero, src_i64, res, i64_ty);
    b.track(sel).result(b.ctx)
}

// ============================================================================
// Conversion patterns
// ============================================================================

/// Values typed vec<2xi32> that bridge back to packed buffers.
fn packed_vec_ty(ctx: &mut IrContext) -> TypeRef {
    let i32_ty = core::signless(&mut ctx.types, 32);
    core::vec_ty(&mut ctx.types, i32_ty, 2)
}

/// `mem.load` of f64 from a degraded buffer: load the packed lanes and
/// unpack to f32.
struct DegradeLoad;

impl ConversionPattern for DegradeLoad {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("load")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(load) = mem::Load::from_op(ctx, op) else {
            return false;
        };
        if !is_f64(&ctx.types, ctx.op_result_types(op)[0]) {
            return false;
        }
        let source = load.source(ctx);
        let source = resolve_packed_buffer(ctx, source);
        let Some(source) = source else {
            return false;
        };
        let indices: Vec<ValueRef> = load.indices(ctx).to_vec();
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let packed = packed_vec_ty(b.ctx);
        let raw = mem::load(b.ctx, b.loc, source, indices, packed);
        let raw_v = b.track(raw).result(b.ctx);
        let i64_ty = core::signless(&mut b.ctx.types, 64);
        let bits = arith::bitcast(b.ctx, b.loc, raw_v, i64_ty);
        let bits_v = b.track(bits).result(b.ctx);
        let out = f64_bits_to_f32(&mut b, bits_v);

        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![out]);
        true
    }

    fn name(&self) -> &'static str {
        "DegradeLoad"
    }
}

/// `mem.store` of f64 into a degraded buffer: pack f32 into the lanes.
struct DegradeStore;

impl ConversionPattern for DegradeStore {
    fn root(&self) -> Option<(Symbol, Symbol)> {
        Some((Symbol::new("mem"), Symbol::new("store")))
    }

    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        _converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(store) = mem::Store::from_op(ctx, op) else {
            return false;
        };
        let value = store.value(ctx);
        let value_ty = ctx.value_ty(value);
        // The stored value is f64 (pre-conversion) or already f32 with a
        // degraded target buffer.
        let target = store.target(ctx);
        let Some(target) = resolve_packed_buffer(ctx, target) else {
            return false;
        };
        let indices: Vec<ValueRef> = store.indices(ctx).to_vec();
        let loc = ctx.op(op).location;

        let mut b = OpBuilder::new(ctx, loc);
        let f32_value = if is_f64(&b.ctx.types, value_ty) {
            let f32_ty = core::float_ty(&mut b.ctx.types, 32);
            let t = arith::truncf(b.ctx, b.loc, value, f32_ty);
            b.track(t).result(b.ctx)
        } else if core::float_width(&b.ctx.types, value_ty) == Some(32) {
            value
        } else {
            return false;
        };
        let bits = f32_to_f64_bits(&mut b, f32_value);
        let packed = packed_vec_ty(b.ctx);
        let vec_bits = arith::bitcast(b.ctx, b.loc, bits, packed);
        let vec_v = b.track(vec_bits).result(b.ctx);
        let new_store = mem::store(b.ctx, b.loc, vec_v, target, indices);
        b.track(new_store);

        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.erase_op(vec![]);
        true
    }

    fn name(&self) -> &'static str {
        "DegradeStore"
    }
}

/// Follow an unrealized cast back to a packed-buffer value.
fn resolve_packed_buffer(ctx: &IrContext, v: ValueRef) -> Option<ValueRef> {
    let ty = ctx.value_ty(v);
    if mem::elem_ty(&ctx.types, ty).is_some_and(|e| core::is_vec(&ctx.types, e)) {
        return Some(v);
    }
    if !is_f64_buffer(&ctx.types, ty) {
        return None;
    }
    if let pyrite_ir::ValueDef::OpResult(def, 0) = ctx.value_def(v) {
        if core::UnrealizedCast::matches(ctx, def) {
            let src = ctx.op_operands(def)[0];
            let src_ty = ctx.value_ty(src);
            if mem::elem_ty(&ctx.types, src_ty)
                .is_some_and(|e| core::is_vec(&ctx.types, e))
            {
                return Some(src);
            }
        }
    }
    None
}

/// Retype pure float ops (arith/math) whose f64 types degrade to f32.
struct RetypeFloatOps;

impl ConversionPattern for RetypeFloatOps {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        converter: &TypeConverter,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let data = ctx.op(op);
        let dialect = data.dialect;
        if dialect != Symbol::new("arith") && dialect != Symbol::new("math") {
            return false;
        }
        let result_tys: Vec<TypeRef> = ctx.op_result_types(op).to_vec();
        if !result_tys.iter().any(|&ty| is_f64(&ctx.types, ty)) {
            return false;
        }

        let loc = ctx.op(op).location;
        let name = ctx.op(op).name;
        let attrs = ctx.op(op).attributes.clone();
        let operands: Vec<ValueRef> = ctx.op_operands(op).to_vec();

        let mut b = OpBuilder::new(ctx, loc);
        let mut new_operands = Vec::with_capacity(operands.len());
        for v in operands {
            let ty = b.ctx.value_ty(v);
            if is_f64(&b.ctx.types, ty) {
                let f32_ty = core::float_ty(&mut b.ctx.types, 32);
                let t = arith::truncf(b.ctx, b.loc, v, f32_ty);
                new_operands.push(b.track(t).result(b.ctx));
            } else {
                new_operands.push(v);
            }
        }
        let new_result_tys: Vec<TypeRef> = result_tys
            .iter()
            .map(|&ty| converter.convert_type_or_self(&mut b.ctx.types, ty))
            .collect();

        let mut builder = pyrite_ir::OperationDataBuilder::new(loc, dialect, name);
        builder = builder.operands(new_operands).results(new_result_tys);
        let mut op_data = builder.build(b.ctx);
        op_data.attributes = attrs;
        let new_op = b.ctx.create_op(op_data);

        for emitted in b.into_ops() {
            rewriter.insert_op(emitted);
        }
        rewriter.replace_op(new_op);
        true
    }

    fn name(&self) -> &'static str {
        "RetypeFloatOps"
    }
}

// ============================================================================
// The pass
// ============================================================================

/// Degrade f64 inside every gpu module lacking the Float64 capability,
/// then fix up host-side launch operands.
pub fn truncate_f64(ctx: &mut IrContext, module: ModuleRef) {
    let caps_key = Symbol::new("caps");
    let converter = degrade_converter();

    let gpu_modules: Vec<OpRef> = module
        .ops(ctx)
        .into_iter()
        .filter(|&op| gpu::GpuModule::matches(ctx, op))
        .collect();

    for gpu_module_op in gpu_modules {
        let has_f64 = ctx
            .op(gpu_module_op)
            .attributes
            .get(&caps_key)
            .map(|caps| spv_caps_contain_f64(caps))
            .unwrap_or(true);
        if has_f64 {
            continue;
        }

        // Signatures + block args, then the load/store/arith patterns.
        let body = ctx.op(gpu_module_op).regions[0];
        pyrite_ir::rewrite::signature::convert_region_signatures(ctx, body, &converter);
        let target = degrade_target();
        let patterns: Vec<Box<dyn ConversionPattern>> = vec![
            Box::new(DegradeLoad),
            Box::new(DegradeStore),
            Box::new(RetypeFloatOps),
        ];
        pyrite_ir::rewrite::conversion::region_conversion(
            ctx, body, &target, &converter, patterns,
        );

        fixup_launch_sites(ctx, module, gpu_module_op);
    }
}

fn spv_caps_contain_f64(caps: &pyrite_ir::Attribute) -> bool {
    pyrite_ir::dialect::spv::caps_contain(caps, "float64")
}

fn degrade_target() -> ConversionTarget {
    let mut target = ConversionTarget::new();
    target.add_dynamic_check(|ctx, op| {
        // Illegal: any op producing a live f64, or storing into a buffer
        // whose element type is still f64 (the store value may already be
        // f32 once the producing load has been rewritten).
        let f64_result = ctx
            .op_result_types(op)
            .iter()
            .any(|&ty| core::float_width(&ctx.types, ty) == Some(64));
        let f64_store = mem::Store::matches(ctx, op)
            && (core::float_width(&ctx.types, ctx.value_ty(ctx.op_operands(op)[0]))
                == Some(64)
                || is_f64_buffer(&ctx.types, ctx.value_ty(ctx.op_operands(op)[1])));
        Some(if f64_result || f64_store {
            Legality::Illegal
        } else {
            Legality::Legal
        })
    });
    target
}

/// Cast mismatched operands at each launch site of a degraded kernel.
fn fixup_launch_sites(ctx: &mut IrContext, module: ModuleRef, gpu_module_op: OpRef) {
    let gpu_module = gpu::GpuModule::from_op(ctx, gpu_module_op).expect("gpu module");
    let module_name = gpu_module.sym_name(ctx);

    // Kernel name -> parameter types.
    let mut kernel_params: Vec<(Symbol, Vec<TypeRef>)> = Vec::new();
    if let Some(block) = ctx.entry_block(gpu_module.body(ctx)) {
        for &op in &ctx.block(block).ops {
            if let Ok(kernel) = gpu::GpuFunc::from_op(ctx, op) {
                let fn_ty = kernel.r#type(ctx);
                if let Some(params) =
                    pyrite_ir::dialect::func::fn_param_tys(&ctx.types, fn_ty)
                {
                    kernel_params.push((kernel.sym_name(ctx), params));
                }
            }
        }
    }

    let launches: Vec<OpRef> = {
        let mut out = Vec::new();
        let body = module.body(ctx);
        let _ = pyrite_ir::walk::walk_region::<std::convert::Infallible>(
            ctx,
            body,
            &mut |op| {
                if gpu::LaunchFunc::matches(ctx, op) {
                    out.push(op);
                }
                std::ops::ControlFlow::Continue(pyrite_ir::WalkAction::Advance)
            },
        );
        out
    };

    for launch_op in launches {
        let launch = gpu::LaunchFunc::from_op(ctx, launch_op).expect("collected");
        let Some((kmod, kfn)) = gpu::kernel_ref_parts(&launch.kernel(ctx)) else {
            continue;
        };
        if kmod != module_name {
            continue;
        }
        let Some((_, params)) = kernel_params.iter().find(|(name, _)| *name == kfn) else {
            continue;
        };
        let params = params.clone();

        let args: Vec<ValueRef> = launch.kernel_operands(ctx).to_vec();
        let loc = ctx.op(launch_op).location;
        let parent = ctx.op(launch_op).parent_block.expect("attached launch");
        for (i, (&arg, &want)) in args.iter().zip(params.iter()).enumerate() {
            let have = ctx.value_ty(arg);
            if have == want {
                continue;
            }
            let new_val = if is_f64(&ctx.types, have) && core::float_width(&ctx.types, want) == Some(32) {
                let t = arith::truncf(ctx, loc, arg, want);
                ctx.insert_op_before(parent, launch_op, t.op_ref());
                t.result(ctx)
            } else if mem::is_buffer(&ctx.types, have) && mem::is_buffer(&ctx.types, want) {
                let c = util::memref_bitcast(ctx, loc, arg, want);
                ctx.insert_op_before(parent, launch_op, c.op_ref());
                c.result(ctx)
            } else {
                continue;
            };
            // Operand 6 + i (after grid/block sizes).
            ctx.set_operand(launch_op, (6 + i) as u32, new_val);
        }
    }
}
