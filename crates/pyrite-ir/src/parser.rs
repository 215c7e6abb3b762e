//! IR text format parser.
//!
//! Two stages: winnow combinators parse text into `Raw*` structures, and a
//! builder turns those into arena IR. The grammar is exactly what
//! [`crate::printer`] emits; `parse(print(m))` rebuilds `m` up to value
//! renaming.

use std::collections::HashMap;

use smallvec::SmallVec;
use winnow::ascii;
use winnow::combinator::{alt, delimited, opt, preceded, separated};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::context::{BlockArgData, BlockData, IrContext, OperationDataBuilder, RegionData};
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::rewrite::ModuleRef;
use crate::types::{Attribute, Location, Span, TypeDataBuilder};
use crate::Symbol;

// ============================================================================
// Errors
// ============================================================================

/// Parse failure with a byte offset into the input.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at offset {offset}: {message}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

// ============================================================================
// Raw structures
// ============================================================================

#[derive(Debug, Clone)]
struct RawOperation<'a> {
    results: Vec<&'a str>,
    dialect: &'a str,
    op_name: &'a str,
    operands: Vec<&'a str>,
    successors: Vec<&'a str>,
    attributes: Vec<(&'a str, RawAttribute<'a>)>,
    result_types: Vec<RawType<'a>>,
    regions: Vec<RawRegion<'a>>,
}

#[derive(Debug, Clone)]
struct RawRegion<'a> {
    blocks: Vec<RawBlock<'a>>,
}

#[derive(Debug, Clone)]
struct RawBlock<'a> {
    label: &'a str,
    args: Vec<(&'a str, RawType<'a>)>,
    ops: Vec<RawOperation<'a>>,
}

#[derive(Debug, Clone)]
struct RawType<'a> {
    dialect: &'a str,
    name: &'a str,
    params: Vec<RawType<'a>>,
    attrs: Vec<(&'a str, RawAttribute<'a>)>,
}

#[derive(Debug, Clone)]
enum RawAttribute<'a> {
    Unit,
    Bool(bool),
    Int(u64),
    Float(f64),
    String(String),
    Symbol(String),
    Type(RawType<'a>),
    List(Vec<RawAttribute<'a>>),
    Bytes(Vec<u8>),
    DenseInts(Vec<i64>),
    Location(String, u32, u32),
}

// ============================================================================
// Combinators
// ============================================================================

fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_ascii_whitespace())
        .void()
        .parse_next(input)
}

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn value_ref<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(
        '%',
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
    .parse_next(input)
}

fn block_label<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(
        '^',
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
    .parse_next(input)
}

fn symbol_ref(input: &mut &str) -> ModalResult<String> {
    '@'.parse_next(input)?;
    if input.starts_with('"') {
        string_lit.parse_next(input)
    } else {
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_')
            .map(|s: &str| s.to_owned())
            .parse_next(input)
    }
}

fn qualified_name<'a>(input: &mut &'a str) -> ModalResult<(&'a str, &'a str)> {
    (ident, '.', ident)
        .map(|(d, _, n)| (d, n))
        .parse_next(input)
}

fn backtrack() -> winnow::error::ErrMode<winnow::error::ContextError> {
    winnow::error::ErrMode::Backtrack(winnow::error::ContextError::new())
}

/// Unsigned or negative (two's complement) integer literal.
fn integer_lit(input: &mut &str) -> ModalResult<u64> {
    let negative = opt('-').parse_next(input)?.is_some();
    let value: u64 = ascii::dec_uint(input)?;
    if negative {
        let min_magnitude = i64::MAX as u64 + 1;
        if value > min_magnitude {
            return Err(backtrack());
        }
        if value == min_magnitude {
            Ok(u64::from_ne_bytes(i64::MIN.to_ne_bytes()))
        } else {
            Ok(u64::from_ne_bytes((-(value as i64)).to_ne_bytes()))
        }
    } else {
        Ok(value)
    }
}

fn signed_lit(input: &mut &str) -> ModalResult<i64> {
    integer_lit
        .map(|bits| i64::from_ne_bytes(bits.to_ne_bytes()))
        .parse_next(input)
}

/// Float literal that must contain a dot (keeps `42` an integer).
fn float_with_dot(input: &mut &str) -> ModalResult<f64> {
    let s = (
        opt('-'),
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt((
            one_of(['e', 'E']),
            opt(one_of(['+', '-'])),
            take_while(1.., |c: char| c.is_ascii_digit()),
        )),
    )
        .take()
        .parse_next(input)?;
    s.parse::<f64>().map_err(|_| backtrack())
}

fn string_lit(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut result = String::new();
    loop {
        let c = any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let escaped = any.parse_next(input)?;
                match escaped {
                    '"' => result.push('"'),
                    '\\' => result.push('\\'),
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '0' => result.push('\0'),
                    'x' => {
                        let h1 = any.parse_next(input)?;
                        let h2 = any.parse_next(input)?;
                        let hex = format!("{h1}{h2}");
                        match u8::from_str_radix(&hex, 16) {
                            Ok(code) => result.push(code as char),
                            Err(_) => {
                                result.push('\\');
                                result.push('x');
                                result.push(h1);
                                result.push(h2);
                            }
                        }
                    }
                    other => {
                        result.push('\\');
                        result.push(other);
                    }
                }
            }
            other => result.push(other),
        }
    }
    Ok(result)
}

fn raw_type<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    let (dialect, name) = qualified_name.parse_next(input)?;

    let opt_params = opt(delimited(
        ('(', ws),
        separated(0.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
        (ws, ')'),
    ))
    .parse_next(input)?;
    let has_parens = opt_params.is_some();
    let params = opt_params.unwrap_or_default();

    // A `{...}` after a bare type name would swallow a region brace; only
    // parse type attrs after explicit parens.
    let attrs = if has_parens {
        opt(preceded(ws, raw_attr_dict))
            .parse_next(input)?
            .unwrap_or_default()
    } else {
        vec![]
    };

    Ok(RawType {
        dialect,
        name,
        params,
        attrs,
    })
}

fn raw_attr_value<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    alt((
        "true".value(RawAttribute::Bool(true)),
        "false".value(RawAttribute::Bool(false)),
        "unit".value(RawAttribute::Unit),
        "nan".value(RawAttribute::Float(f64::NAN)),
        "inf".value(RawAttribute::Float(f64::INFINITY)),
        "-inf".value(RawAttribute::Float(f64::NEG_INFINITY)),
        raw_location_attr,
        raw_bytes_attr,
        raw_dense_attr,
        string_lit.map(RawAttribute::String),
        symbol_ref.map(RawAttribute::Symbol),
        delimited(
            ('[', ws),
            separated(0.., (ws, raw_attr_value, ws).map(|(_, a, _)| a), ','),
            (ws, ']'),
        )
        .map(RawAttribute::List),
        float_with_dot.map(RawAttribute::Float),
        integer_lit.map(RawAttribute::Int),
        raw_type.map(RawAttribute::Type),
    ))
    .parse_next(input)
}

fn raw_location_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    "loc".parse_next(input)?;
    ws.parse_next(input)?;
    '('.parse_next(input)?;
    ws.parse_next(input)?;
    let path = string_lit.parse_next(input)?;
    ws.parse_next(input)?;
    let start: u32 = ascii::dec_uint(input)?;
    ':'.parse_next(input)?;
    let end: u32 = ascii::dec_uint(input)?;
    ws.parse_next(input)?;
    ')'.parse_next(input)?;
    Ok(RawAttribute::Location(path, start, end))
}

fn raw_bytes_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    "bytes".parse_next(input)?;
    ws.parse_next(input)?;
    let bytes: Vec<u8> = delimited(
        ('(', ws),
        separated(
            0..,
            (ws, ascii::dec_uint::<_, u8, _>, ws).map(|(_, b, _)| b),
            ',',
        ),
        (ws, ')'),
    )
    .parse_next(input)?;
    Ok(RawAttribute::Bytes(bytes))
}

fn raw_dense_attr<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    "dense".parse_next(input)?;
    ws.parse_next(input)?;
    let values: Vec<i64> = delimited(
        ('(', ws),
        separated(0.., (ws, signed_lit, ws).map(|(_, v, _)| v), ','),
        (ws, ')'),
    )
    .parse_next(input)?;
    Ok(RawAttribute::DenseInts(values))
}

fn raw_attr_dict<'a>(input: &mut &'a str) -> ModalResult<Vec<(&'a str, RawAttribute<'a>)>> {
    delimited(
        ('{', ws),
        separated(
            0..,
            (ws, ident, ws, '=', ws, raw_attr_value, ws).map(|(_, k, _, _, _, v, _)| (k, v)),
            ',',
        ),
        (ws, '}'),
    )
    .parse_next(input)
}

fn result_list<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str>> {
    let results: Vec<&str> =
        separated(1.., (ws, value_ref, ws).map(|(_, v, _)| v), ',').parse_next(input)?;
    ws.parse_next(input)?;
    '='.parse_next(input)?;
    Ok(results)
}

fn raw_operation<'a>(input: &mut &'a str) -> ModalResult<RawOperation<'a>> {
    ws.parse_next(input)?;

    let results = opt(result_list).parse_next(input)?.unwrap_or_default();
    ws.parse_next(input)?;

    let (dialect, op_name) = qualified_name.parse_next(input)?;

    ws.parse_next(input)?;
    let operands = if input.starts_with('%') {
        separated(1.., (ws, value_ref, ws).map(|(_, v, _)| v), ',').parse_next(input)?
    } else {
        Vec::new()
    };

    let successors = opt(preceded(
        ws,
        delimited(
            ('[', ws),
            separated(1.., (ws, block_label, ws).map(|(_, l, _)| l), ','),
            (ws, ']'),
        ),
    ))
    .parse_next(input)?
    .unwrap_or_default();

    let attributes = opt(preceded(ws, raw_attr_dict))
        .parse_next(input)?
        .unwrap_or_default();

    let result_types = opt(preceded(
        (ws, ':', ws),
        separated(1.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
    ))
    .parse_next(input)?
    .unwrap_or_default();

    let mut regions = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('{') {
            regions.push(raw_region.parse_next(input)?);
        } else {
            break;
        }
    }

    Ok(RawOperation {
        results,
        dialect,
        op_name,
        operands,
        successors,
        attributes,
        result_types,
        regions,
    })
}

fn raw_block<'a>(input: &mut &'a str) -> ModalResult<RawBlock<'a>> {
    ws.parse_next(input)?;
    let label = block_label.parse_next(input)?;

    let args = opt(delimited(
        ('(', ws),
        separated(
            0..,
            (ws, value_ref, ws, ':', ws, raw_type, ws).map(|(_, name, _, _, _, ty, _)| (name, ty)),
            ',',
        ),
        (ws, ')'),
    ))
    .parse_next(input)?
    .unwrap_or_default();

    ws.parse_next(input)?;
    ':'.parse_next(input)?;

    let mut ops = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('^') || input.starts_with('}') || input.is_empty() {
            break;
        }
        ops.push(raw_operation.parse_next(input)?);
    }

    Ok(RawBlock { label, args, ops })
}

fn raw_region<'a>(input: &mut &'a str) -> ModalResult<RawRegion<'a>> {
    '{'.parse_next(input)?;
    ws.parse_next(input)?;

    let mut blocks = Vec::new();
    if input.starts_with('^') {
        loop {
            ws.parse_next(input)?;
            if input.starts_with('}') {
                break;
            }
            blocks.push(raw_block.parse_next(input)?);
        }
    } else if !input.starts_with('}') {
        // Implicit single unlabeled block.
        let mut ops = Vec::new();
        loop {
            ws.parse_next(input)?;
            if input.starts_with('}') || input.is_empty() {
                break;
            }
            ops.push(raw_operation.parse_next(input)?);
        }
        blocks.push(RawBlock {
            label: "",
            args: vec![],
            ops,
        });
    }

    ws.parse_next(input)?;
    '}'.parse_next(input)?;
    Ok(RawRegion { blocks })
}

// ============================================================================
// Builder: Raw -> arena IR
// ============================================================================

struct IrBuilder<'a> {
    ctx: &'a mut IrContext,
    location: Location,
    values: HashMap<String, ValueRef>,
    blocks: HashMap<String, BlockRef>,
}

impl<'a> IrBuilder<'a> {
    fn new(ctx: &'a mut IrContext) -> Self {
        let path = ctx.paths.intern("<textual-ir>".to_owned());
        let location = Location::new(path, Span::default());
        Self {
            ctx,
            location,
            values: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            offset: 0,
        }
    }

    fn build_type(&mut self, raw: &RawType<'_>) -> Result<TypeRef, ParseError> {
        let mut builder =
            TypeDataBuilder::new(Symbol::new(raw.dialect), Symbol::new(raw.name));
        for param in &raw.params {
            let ty = self.build_type(param)?;
            builder = builder.param(ty);
        }
        for (key, value) in &raw.attrs {
            let attr = self.build_attr(value)?;
            builder = builder.attr(Symbol::new(key), attr);
        }
        Ok(self.ctx.types.intern(builder.build()))
    }

    fn build_attr(&mut self, raw: &RawAttribute<'_>) -> Result<Attribute, ParseError> {
        Ok(match raw {
            RawAttribute::Unit => Attribute::Unit,
            RawAttribute::Bool(b) => Attribute::Bool(*b),
            RawAttribute::Int(bits) => Attribute::IntBits(*bits),
            RawAttribute::Float(v) => Attribute::float(*v),
            RawAttribute::String(s) => Attribute::String(s.clone()),
            RawAttribute::Symbol(s) => Attribute::Symbol(Symbol::new(s)),
            RawAttribute::Type(ty) => Attribute::Type(self.build_type(ty)?),
            RawAttribute::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.build_attr(item)?);
                }
                Attribute::List(out)
            }
            RawAttribute::Bytes(bytes) => Attribute::Bytes(bytes.iter().copied().collect()),
            RawAttribute::DenseInts(values) => Attribute::DenseInts(values.clone()),
            RawAttribute::Location(path, start, end) => {
                let path = self.ctx.paths.intern(path.clone());
                Attribute::Location(Location::new(path, Span::new(*start, *end)))
            }
        })
    }

    fn build_region(&mut self, raw: &RawRegion<'_>) -> Result<RegionRef, ParseError> {
        // Blocks first, so successor labels and block args resolve.
        let mut block_refs: SmallVec<[BlockRef; 4]> = SmallVec::new();
        for raw_block in &raw.blocks {
            let mut args = Vec::with_capacity(raw_block.args.len());
            for (_, ty) in &raw_block.args {
                let ty = self.build_type(ty)?;
                args.push(BlockArgData::of(ty));
            }
            let block = self.ctx.create_block(BlockData {
                location: self.location,
                args,
                ops: SmallVec::new(),
                parent_region: None,
            });
            for (i, (name, _)) in raw_block.args.iter().enumerate() {
                let v = self.ctx.block_arg(block, i as u32);
                self.values.insert((*name).to_owned(), v);
            }
            if !raw_block.label.is_empty() {
                self.blocks.insert(raw_block.label.to_owned(), block);
            }
            block_refs.push(block);
        }

        for (raw_block, &block) in raw.blocks.iter().zip(block_refs.iter()) {
            for raw_op in &raw_block.ops {
                let op = self.build_op(raw_op)?;
                self.ctx.push_op(block, op);
            }
        }

        Ok(self.ctx.create_region(RegionData {
            location: self.location,
            blocks: block_refs,
            parent_op: None,
        }))
    }

    fn build_op(&mut self, raw: &RawOperation<'_>) -> Result<OpRef, ParseError> {
        let mut builder = OperationDataBuilder::new(
            self.location,
            Symbol::new(raw.dialect),
            Symbol::new(raw.op_name),
        );

        for name in &raw.operands {
            let v = self
                .values
                .get(*name)
                .copied()
                .ok_or_else(|| self.err(format!("unknown value %{name}")))?;
            builder = builder.operand(v);
        }

        for ty in &raw.result_types {
            let ty = self.build_type(ty)?;
            builder = builder.result(ty);
        }

        for (key, value) in &raw.attributes {
            let attr = self.build_attr(value)?;
            builder = builder.attr(Symbol::new(key), attr);
        }

        for region in &raw.regions {
            let r = self.build_region(region)?;
            builder = builder.region(r);
        }

        for label in &raw.successors {
            let b = self
                .blocks
                .get(*label)
                .copied()
                .ok_or_else(|| self.err(format!("unknown block ^{label}")))?;
            builder = builder.successor(b);
        }

        let data = builder.build(self.ctx);
        let op = self.ctx.create_op(data);

        for (i, name) in raw.results.iter().enumerate() {
            let v = self.ctx.op_result(op, i as u32);
            self.values.insert((*name).to_owned(), v);
        }

        Ok(op)
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a single op (typically a `core.module`) from IR text.
pub fn parse_op(ctx: &mut IrContext, text: &str) -> Result<OpRef, ParseError> {
    let mut input = text;
    let raw = raw_operation.parse_next(&mut input).map_err(|e| ParseError {
        message: e.to_string(),
        offset: text.len() - input.len(),
    })?;
    let mut rest = input;
    let _ = ws(&mut rest);
    if !rest.is_empty() {
        return Err(ParseError {
            message: format!("trailing input: {:?}", &rest[..rest.len().min(24)]),
            offset: text.len() - rest.len(),
        });
    }
    IrBuilder::new(ctx).build_op(&raw)
}

/// Parse IR text that must be a `core.module`.
pub fn parse_module(ctx: &mut IrContext, text: &str) -> Result<ModuleRef, ParseError> {
    let op = parse_op(ctx, text)?;
    ModuleRef::new(ctx, op).ok_or(ParseError {
        message: "top-level op is not a core.module".into(),
        offset: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer;

    #[test]
    fn parse_simple_const() {
        let mut ctx = IrContext::new();
        let op = parse_op(&mut ctx, "%0 = arith.const {value = 42} : core.index\n").unwrap();
        assert_eq!(ctx.op(op).dialect, Symbol::new("arith"));
        assert_eq!(
            ctx.op(op).attributes.get(&Symbol::new("value")),
            Some(&Attribute::IntBits(42)),
        );
    }

    #[test]
    fn unknown_operand_is_an_error() {
        let mut ctx = IrContext::new();
        let err = parse_op(&mut ctx, "test.use %7\n").unwrap_err();
        assert!(err.to_string().contains("unknown value"));
    }

    #[test]
    fn round_trip_module() {
        let text = "\
core.module {sym_name = @m} {
  func.func {sym_name = @add, type = func.fn(core.index, core.index, core.index)} {
    ^bb0(%0: core.index, %1: core.index):
      %2 = arith.addi %0, %1 : core.index
      func.return %2
  }
}
";
        let mut ctx = IrContext::new();
        let module = parse_module(&mut ctx, text).unwrap();
        let printed = printer::print_module(&ctx, module.op());

        // Print -> parse -> print is a fixpoint.
        let mut ctx2 = IrContext::new();
        let module2 = parse_module(&mut ctx2, &printed).unwrap();
        let printed2 = printer::print_module(&ctx2, module2.op());
        assert_eq!(printed, printed2);
    }

    #[test]
    fn round_trip_branches_and_dense_attrs() {
        let text = "\
core.module {sym_name = @m} {
  func.func {sym_name = @f, type = func.fn(core.index)} {
    ^bb0:
      %0 = arith.const {value = 1} : core.int() {signedness = @signless, width = 1}
      %1 = arith.const {value = 7} : core.index
      cf.cond_br %0 [^bb1, ^bb2] {segments = dense(0, 0)}

    ^bb1:
      cf.br %1 [^bb3]

    ^bb2:
      cf.br %1 [^bb3]

    ^bb3(%2: core.index):
      func.return %2
  }
}
";
        let mut ctx = IrContext::new();
        let module = parse_module(&mut ctx, text).unwrap();
        let printed = printer::print_module(&ctx, module.op());
        let mut ctx2 = IrContext::new();
        let module2 = parse_module(&mut ctx2, &printed).unwrap();
        assert_eq!(printed, printer::print_module(&ctx2, module2.op()));
    }

    #[test]
    fn float_and_symbol_attrs_survive() {
        let text = "%0 = arith.const {value = 2.5} : core.float() {width = 64}\n";
        let mut ctx = IrContext::new();
        let op = parse_op(&mut ctx, text).unwrap();
        let printed = printer::print_op(&ctx, op);
        assert_eq!(printed, text);
    }
}
