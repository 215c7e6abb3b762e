//! IR text format printer.
//!
//! Every op prints in the generic form
//!
//! ```text
//! %r = dialect.name %a, %b [^bb1] {attr = value} : type { region }
//! ```
//!
//! Value names are assigned in print order and unique across the whole
//! module, so [`crate::parser`] can rebuild the module with a single flat
//! name map; `parse(print(m))` is `m` up to value renaming.

use std::collections::HashMap;
use std::fmt::{self, Write};

use crate::context::IrContext;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::Attribute;
use crate::Symbol;

struct PrintState<'a> {
    ctx: &'a IrContext,
    value_names: HashMap<ValueRef, String>,
    block_labels: HashMap<BlockRef, String>,
    next_value: usize,
    next_block: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a IrContext) -> Self {
        Self {
            ctx,
            value_names: HashMap::new(),
            block_labels: HashMap::new(),
            next_value: 0,
            next_block: 0,
        }
    }

    fn assign_value(&mut self, v: ValueRef) -> String {
        let name = format!("%{}", self.next_value);
        self.next_value += 1;
        self.value_names.insert(v, name.clone());
        name
    }

    fn value_name(&self, v: ValueRef) -> &str {
        self.value_names.get(&v).map(String::as_str).unwrap_or("%?")
    }

    fn assign_block(&mut self, b: BlockRef) -> String {
        let label = format!("^bb{}", self.next_block);
        self.next_block += 1;
        self.block_labels.insert(b, label.clone());
        label
    }

    fn block_label(&self, b: BlockRef) -> &str {
        self.block_labels
            .get(&b)
            .map(String::as_str)
            .unwrap_or("^bb?")
    }
}

/// Print a single op (with nested regions) as IR text.
pub fn print_op(ctx: &IrContext, op: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    let mut out = String::new();
    write_operation(&mut state, &mut out, op, 0).expect("fmt::Write to String");
    out
}

/// Print a module as IR text.
pub fn print_module(ctx: &IrContext, root: OpRef) -> String {
    print_op(ctx, root)
}

/// Print a type as IR text.
pub fn print_type(ctx: &IrContext, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String");
    out
}

// ============================================================================
// Types and attributes
// ============================================================================

fn write_type(ctx: &IrContext, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    let data = ctx.types.get(ty);
    write!(f, "{}.{}", data.dialect, data.name)?;
    if !data.params.is_empty() {
        f.write_char('(')?;
        for (i, &param) in data.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(ctx, f, param)?;
        }
        f.write_char(')')?;
    } else if !data.attrs.is_empty() {
        // Parens disambiguate a following attr dict from a region brace.
        f.write_str("()")?;
    }
    if !data.attrs.is_empty() {
        f.write_str(" {")?;
        for (i, (key, val)) in data.attrs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = ")?;
            write_attribute(ctx, f, val)?;
        }
        f.write_char('}')?;
    }
    Ok(())
}

fn write_attribute(ctx: &IrContext, f: &mut impl Write, attr: &Attribute) -> fmt::Result {
    match attr {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::IntBits(v) => write!(f, "{v}"),
        Attribute::FloatBits(bits) => {
            let v = f64::from_bits(*bits);
            if v.is_nan() {
                return f.write_str("nan");
            }
            if v.is_infinite() {
                return f.write_str(if v > 0.0 { "inf" } else { "-inf" });
            }
            let s = format!("{v}");
            f.write_str(&s)?;
            if !s.contains('.') && !s.contains('e') && !s.contains('E') {
                f.write_str(".0")?;
            }
            Ok(())
        }
        Attribute::String(s) => {
            f.write_char('"')?;
            write_escaped(f, s)?;
            f.write_char('"')
        }
        Attribute::Bytes(bytes) => {
            f.write_str("bytes(")?;
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{b}")?;
            }
            f.write_char(')')
        }
        Attribute::DenseInts(values) => {
            f.write_str("dense(")?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{v}")?;
            }
            f.write_char(')')
        }
        Attribute::Symbol(sym) => write_symbol(f, *sym),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::List(list) => {
            f.write_char('[')?;
            for (i, item) in list.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item)?;
            }
            f.write_char(']')
        }
        Attribute::Location(loc) => {
            let path = ctx.paths.get(loc.path);
            f.write_str("loc(\"")?;
            write_escaped(f, path)?;
            write!(f, "\" {}:{})", loc.span.start, loc.span.end)
        }
    }
}

fn write_escaped(f: &mut impl Write, s: &str) -> fmt::Result {
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

fn write_symbol(f: &mut impl Write, sym: Symbol) -> fmt::Result {
    sym.with_str(|s| {
        let bare = !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if bare {
            write!(f, "@{s}")
        } else {
            f.write_str("@\"")?;
            write_escaped(f, s)?;
            f.write_char('"')
        }
    })
}

// ============================================================================
// Operations
// ============================================================================

fn write_operation(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let pad = " ".repeat(indent);
    f.write_str(&pad)?;

    let results: Vec<ValueRef> = state.ctx.op_results(op).to_vec();
    if !results.is_empty() {
        for (i, &v) in results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let name = state.assign_value(v);
            f.write_str(&name)?;
        }
        f.write_str(" = ")?;
    }

    let data = state.ctx.op(op);
    write!(f, "{}.{}", data.dialect, data.name)?;

    let operands = state.ctx.op_operands(op);
    if !operands.is_empty() {
        f.write_char(' ')?;
        for (i, &v) in operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.value_name(v))?;
        }
    }

    let successors = &state.ctx.op(op).successors;
    if !successors.is_empty() {
        f.write_str(" [")?;
        for (i, &b) in successors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(state.block_label(b))?;
        }
        f.write_char(']')?;
    }

    let attrs = &state.ctx.op(op).attributes;
    if !attrs.is_empty() {
        f.write_str(" {")?;
        for (i, (key, val)) in attrs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = ")?;
            write_attribute(state.ctx, f, val)?;
        }
        f.write_char('}')?;
    }

    let result_types = state.ctx.op_result_types(op);
    if !result_types.is_empty() {
        f.write_str(" : ")?;
        for (i, &ty) in result_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(state.ctx, f, ty)?;
        }
    }

    let regions: Vec<RegionRef> = state.ctx.op(op).regions.to_vec();
    for region in regions {
        f.write_str(" {\n")?;
        write_region(state, f, region, indent + 2)?;
        write!(f, "{pad}}}")?;
    }

    f.write_char('\n')
}

fn write_region(
    state: &mut PrintState<'_>,
    f: &mut impl Write,
    region: RegionRef,
    indent: usize,
) -> fmt::Result {
    let blocks: Vec<BlockRef> = state.ctx.region(region).blocks.to_vec();

    let elide_label =
        blocks.len() == 1 && state.ctx.block_args(blocks[0]).is_empty();

    if !elide_label {
        for &block in &blocks {
            state.assign_block(block);
        }
    }

    for (i, &block) in blocks.iter().enumerate() {
        if !elide_label {
            let pad = " ".repeat(indent);
            let label = state.block_label(block).to_owned();
            write!(f, "{pad}{label}")?;
            let args: Vec<ValueRef> = state.ctx.block_args(block).to_vec();
            if !args.is_empty() {
                f.write_char('(')?;
                for (j, &arg) in args.iter().enumerate() {
                    if j > 0 {
                        f.write_str(", ")?;
                    }
                    let name = state.assign_value(arg);
                    let ty = state.ctx.value_ty(arg);
                    write!(f, "{name}: ")?;
                    write_type(state.ctx, f, ty)?;
                }
                f.write_char(')')?;
            }
            f.write_str(":\n")?;
        }

        let op_indent = if elide_label { indent } else { indent + 2 };
        let ops: Vec<OpRef> = state.ctx.block(block).ops.to_vec();
        for op in ops {
            write_operation(state, f, op, op_indent)?;
        }
        if i + 1 < blocks.len() {
            f.write_char('\n')?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BlockArgData, BlockData, RegionData};
    use crate::dialect::core::Signedness;
    use crate::dialect::{arith, core, func};
    use crate::rewrite::applicator::wrap_in_module;
    use smallvec::smallvec;

    #[test]
    fn type_with_attrs_prints_parens() {
        let mut ctx = IrContext::new();
        let i32_ty = core::int_ty(&mut ctx.types, 32, Signedness::Signless);
        let printed = print_type(&ctx, i32_ty);
        assert_eq!(printed, "core.int() {signedness = @signless, width = 32}");
    }

    #[test]
    fn parameterized_type() {
        let mut ctx = IrContext::new();
        let f32_ty = core::float_ty(&mut ctx.types, 32);
        let tup = core::tuple_ty(&mut ctx.types, [f32_ty, f32_ty]);
        let printed = print_type(&ctx, tup);
        assert_eq!(
            printed,
            "core.tuple(core.float() {width = 32}, core.float() {width = 32})"
        );
    }

    #[test]
    fn simple_op_form() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let idx = core::index_ty(&mut ctx.types);
        let c = arith::r#const(&mut ctx, loc, idx, Attribute::int(42));
        let printed = print_op(&ctx, c.op_ref());
        assert_eq!(printed, "%0 = arith.const {value = 42} : core.index\n");
    }

    #[test]
    fn float_attrs_keep_a_dot() {
        let ctx = IrContext::new();
        let mut out = String::new();
        write_attribute(&ctx, &mut out, &Attribute::float(2.0)).unwrap();
        assert_eq!(out, "2.0");
        out.clear();
        write_attribute(&ctx, &mut out, &Attribute::float(0.5)).unwrap();
        assert_eq!(out, "0.5");
    }

    #[test]
    fn dense_ints_attr() {
        let ctx = IrContext::new();
        let mut out = String::new();
        write_attribute(&ctx, &mut out, &Attribute::DenseInts(vec![4, -1])).unwrap();
        assert_eq!(out, "dense(4, -1)");
    }

    #[test]
    fn function_in_module() {
        let mut ctx = IrContext::new();
        let loc = ctx.unknown_loc();
        let idx = core::index_ty(&mut ctx.types);
        let fn_ty = func::fn_ty(&mut ctx.types, idx, [idx, idx]);

        let entry = ctx.create_block(BlockData {
            location: loc,
            args: vec![BlockArgData::of(idx), BlockArgData::of(idx)],
            ops: smallvec![],
            parent_region: None,
        });
        let x = ctx.block_arg(entry, 0);
        let y = ctx.block_arg(entry, 1);
        let add = arith::addi(&mut ctx, loc, x, y, idx);
        ctx.push_op(entry, add.op_ref());
        let add_v = add.result(&ctx);
        let ret = func::r#return(&mut ctx, loc, [add_v]);
        ctx.push_op(entry, ret.op_ref());
        let body = ctx.create_region(RegionData {
            location: loc,
            blocks: smallvec![entry],
            parent_op: None,
        });
        let f = func::func(&mut ctx, loc, Symbol::new("add"), fn_ty, None, None, body);
        let module = wrap_in_module(&mut ctx, Symbol::new("m"), vec![f.op_ref()]);

        let printed = print_module(&ctx, module.op());
        insta::assert_snapshot!(printed, @r###"
        core.module {sym_name = @m} {
          func.func {sym_name = @add, type = func.fn(core.index, core.index, core.index)} {
            ^bb0(%0: core.index, %1: core.index):
              %2 = arith.addi %0, %1 : core.index
              func.return %2
          }
        }
        "###);
    }
}
