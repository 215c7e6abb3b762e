//! Interned types, attributes and source locations.
//!
//! Types are structural: `TypeData { dialect, name, params, attrs }`, interned
//! so that equal data yields equal [`TypeRef`]s. The concrete taxonomy
//! (integers with signedness, floats, tuples, buffers, ...) is built by the
//! dialect modules on top of this substrate.

use std::collections::BTreeMap;
use std::collections::HashMap;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::refs::{PathRef, TypeRef};
use crate::Symbol;

// ============================================================================
// Span / Location
// ============================================================================

/// Byte range in a source buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Source location: interned path plus span. `Copy`, no lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub path: PathRef,
    pub span: Span,
}

impl Location {
    pub const fn new(path: PathRef, span: Span) -> Self {
        Self { path, span }
    }
}

// ============================================================================
// Attribute
// ============================================================================

/// Immutable attribute value attached to ops and types.
///
/// Numeric constants are stored as raw bits (signless); signedness lives in
/// the value's type, not the attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Unit,
    Bool(bool),
    /// Integer constant as raw bits.
    IntBits(u64),
    /// Float constant as raw `f64` bits.
    FloatBits(u64),
    String(String),
    Bytes(SmallVec<[u8; 16]>),
    Type(TypeRef),
    Symbol(Symbol),
    List(Vec<Attribute>),
    /// Dense array of i64, for shapes and operand segment sizes.
    DenseInts(Vec<i64>),
    Location(Location),
}

impl Attribute {
    pub fn int(value: i64) -> Self {
        Attribute::IntBits(u64::from_ne_bytes(value.to_ne_bytes()))
    }

    pub fn float(value: f64) -> Self {
        Attribute::FloatBits(value.to_bits())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::IntBits(bits) => Some(i64::from_ne_bytes(bits.to_ne_bytes())),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Attribute::FloatBits(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Attribute::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeRef> {
        match self {
            Attribute::Type(ty) => Some(*ty),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Attribute::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dense_ints(&self) -> Option<&[i64]> {
        match self {
            Attribute::DenseInts(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::int(value)
    }
}

impl From<u64> for Attribute {
    fn from(value: u64) -> Self {
        Attribute::IntBits(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::float(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<Symbol> for Attribute {
    fn from(value: Symbol) -> Self {
        Attribute::Symbol(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_owned())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::String(value)
    }
}

impl From<TypeRef> for Attribute {
    fn from(value: TypeRef) -> Self {
        Attribute::Type(value)
    }
}

impl From<Vec<Attribute>> for Attribute {
    fn from(value: Vec<Attribute>) -> Self {
        Attribute::List(value)
    }
}

// ============================================================================
// TypeData
// ============================================================================

/// Structural data of an interned type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeData {
    pub dialect: Symbol,
    pub name: Symbol,
    pub params: SmallVec<[TypeRef; 4]>,
    pub attrs: BTreeMap<Symbol, Attribute>,
}

/// Fluent builder for [`TypeData`]; empty params/attrs by default.
pub struct TypeDataBuilder {
    dialect: Symbol,
    name: Symbol,
    params: SmallVec<[TypeRef; 4]>,
    attrs: BTreeMap<Symbol, Attribute>,
}

impl TypeDataBuilder {
    pub fn new(dialect: Symbol, name: Symbol) -> Self {
        Self {
            dialect,
            name,
            params: SmallVec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn param(mut self, ty: TypeRef) -> Self {
        self.params.push(ty);
        self
    }

    pub fn params(mut self, tys: impl IntoIterator<Item = TypeRef>) -> Self {
        self.params.extend(tys);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, val: Attribute) -> Self {
        self.attrs.insert(key.into(), val);
        self
    }

    pub fn build(self) -> TypeData {
        TypeData {
            dialect: self.dialect,
            name: self.name,
            params: self.params,
            attrs: self.attrs,
        }
    }
}

// ============================================================================
// TypeInterner
// ============================================================================

/// Deduplicating type interner: equal `TypeData` yields the same `TypeRef`.
pub struct TypeInterner {
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: HashMap<TypeData, TypeRef>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            dedup: HashMap::new(),
        }
    }

    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let Some(&existing) = self.dedup.get(&data) {
            return existing;
        }
        let r = self.types.push(data.clone());
        self.dedup.insert(data, r);
        r
    }

    pub fn get(&self, r: TypeRef) -> &TypeData {
        &self.types[r]
    }

    /// Does `r` name `dialect.name`?
    pub fn is(&self, r: TypeRef, dialect: Symbol, name: Symbol) -> bool {
        let data = &self.types[r];
        data.dialect == dialect && data.name == name
    }

    /// Integer attribute of the type, if present.
    pub fn int_attr(&self, r: TypeRef, key: Symbol) -> Option<i64> {
        self.types[r].attrs.get(&key).and_then(Attribute::as_int)
    }

    /// Symbol attribute of the type, if present.
    pub fn symbol_attr(&self, r: TypeRef, key: Symbol) -> Option<Symbol> {
        self.types[r].attrs.get(&key).and_then(Attribute::as_symbol)
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PathInterner
// ============================================================================

/// Deduplicating interner for source paths.
pub struct PathInterner {
    paths: PrimaryMap<PathRef, String>,
    dedup: HashMap<String, PathRef>,
}

impl PathInterner {
    pub fn new() -> Self {
        Self {
            paths: PrimaryMap::new(),
            dedup: HashMap::new(),
        }
    }

    pub fn intern(&mut self, path: String) -> PathRef {
        if let Some(&existing) = self.dedup.get(&path) {
            return existing;
        }
        let r = self.paths.push(path.clone());
        self.dedup.insert(path, r);
        r
    }

    pub fn get(&self, r: PathRef) -> &str {
        &self.paths[r]
    }
}

impl Default for PathInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedups() {
        let mut interner = TypeInterner::new();
        let data = TypeDataBuilder::new(Symbol::new("core"), Symbol::new("index")).build();
        let a = interner.intern(data.clone());
        let b = interner.intern(data);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_attrs_distinct_types() {
        let mut interner = TypeInterner::new();
        let i32_ty = interner.intern(
            TypeDataBuilder::new(Symbol::new("core"), Symbol::new("int"))
                .attr("width", Attribute::int(32))
                .build(),
        );
        let i64_ty = interner.intern(
            TypeDataBuilder::new(Symbol::new("core"), Symbol::new("int"))
                .attr("width", Attribute::int(64))
                .build(),
        );
        assert_ne!(i32_ty, i64_ty);
        assert_eq!(interner.int_attr(i32_ty, Symbol::new("width")), Some(32));
    }

    #[test]
    fn attribute_bit_round_trip() {
        assert_eq!(Attribute::int(-5).as_int(), Some(-5));
        assert_eq!(Attribute::float(-0.5).as_float(), Some(-0.5));
        let nan = Attribute::float(f64::NAN);
        assert!(nan.as_float().unwrap().is_nan());
    }

    #[test]
    fn path_interner_round_trip() {
        let mut interner = PathInterner::new();
        let a = interner.intern("kernel.py".to_owned());
        let b = interner.intern("kernel.py".to_owned());
        assert_eq!(a, b);
        assert_eq!(interner.get(a), "kernel.py");
    }
}
