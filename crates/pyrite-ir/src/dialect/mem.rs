//! Buffer dialect: shaped memory references with layout and memory space.
//!
//! The buffer type is `mem.buffer(elem) {shape, layout, space}` where
//! `shape` is a dense-int list (`-1` marks a dynamic extent), `layout` is
//! `@identity` or `@strided`, and `space` is `@host`, `@device` or
//! `@private`.

use crate::types::{Attribute, TypeDataBuilder, TypeInterner};
use crate::{dialect, symbols, Symbol, TypeRef};

dialect! {
    mod mem {
        /// Allocate a buffer; one operand per dynamic extent.
        fn alloc(#[rest] dyn_sizes) -> result;

        fn dealloc(source);

        fn load(source, #[rest] indices) -> result;

        fn store(value, target, #[rest] indices);

        fn copy(source, target);

        /// Extent of dimension `index` (an index operand).
        fn dim(source, index) -> result;

        /// Rectangular sub-view; operands are `num_dims` offsets, then
        /// sizes, then strides.
        #[attr(num_dims: u64)]
        fn subview(source, #[rest] operands) -> result;

        /// Reinterpret a buffer as rank-1 with explicit offset/size/stride.
        fn reinterpret_cast(source, offset, size, stride) -> result;

        /// Layout-compatible buffer type change.
        fn cast(source) -> result;

        /// Module-level buffer definition.
        #[attr(sym_name: Symbol, value?: any)]
        fn global();

        /// Reference to a `mem.global` by name.
        #[attr(name: Symbol)]
        fn get_global() -> result;
    }
}

symbols! {
    ATTR_SHAPE => "shape",
    ATTR_LAYOUT => "layout",
    ATTR_SPACE => "space",
    SYM_IDENTITY => "identity",
    SYM_STRIDED => "strided",
    SYM_HOST => "host",
    SYM_DEVICE => "device",
    SYM_PRIVATE => "private",
}

/// A buffer dimension is dynamic when its extent is this sentinel.
pub const DYNAMIC: i64 = -1;

/// Buffer layout kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Identity,
    Strided,
}

/// Buffer memory space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Space {
    Host,
    Device,
    Private,
}

impl Space {
    pub fn symbol(self) -> Symbol {
        match self {
            Space::Host => *SYM_HOST,
            Space::Device => *SYM_DEVICE,
            Space::Private => *SYM_PRIVATE,
        }
    }
}

// ============================================================================
// Buffer type
// ============================================================================

pub fn buffer_ty(
    types: &mut TypeInterner,
    elem: TypeRef,
    shape: &[i64],
    layout: Layout,
    space: Space,
) -> TypeRef {
    let layout_sym = match layout {
        Layout::Identity => *SYM_IDENTITY,
        Layout::Strided => *SYM_STRIDED,
    };
    types.intern(
        TypeDataBuilder::new(DIALECT_NAME(), Symbol::new("buffer"))
            .param(elem)
            .attr(*ATTR_SHAPE, Attribute::DenseInts(shape.to_vec()))
            .attr(*ATTR_LAYOUT, Attribute::Symbol(layout_sym))
            .attr(*ATTR_SPACE, Attribute::Symbol(space.symbol()))
            .build(),
    )
}

pub fn is_buffer(types: &TypeInterner, ty: TypeRef) -> bool {
    types.is(ty, DIALECT_NAME(), Symbol::new("buffer"))
}

pub fn elem_ty(types: &TypeInterner, ty: TypeRef) -> Option<TypeRef> {
    if !is_buffer(types, ty) {
        return None;
    }
    types.get(ty).params.first().copied()
}

pub fn shape(types: &TypeInterner, ty: TypeRef) -> Option<Vec<i64>> {
    if !is_buffer(types, ty) {
        return None;
    }
    types
        .get(ty)
        .attrs
        .get(&*ATTR_SHAPE)
        .and_then(|a| a.as_dense_ints().map(<[i64]>::to_vec))
}

pub fn rank(types: &TypeInterner, ty: TypeRef) -> Option<usize> {
    shape(types, ty).map(|s| s.len())
}

pub fn layout(types: &TypeInterner, ty: TypeRef) -> Option<Layout> {
    let sym = types.symbol_attr(ty, *ATTR_LAYOUT)?;
    if sym == *SYM_IDENTITY {
        Some(Layout::Identity)
    } else if sym == *SYM_STRIDED {
        Some(Layout::Strided)
    } else {
        None
    }
}

pub fn space(types: &TypeInterner, ty: TypeRef) -> Option<Space> {
    let sym = types.symbol_attr(ty, *ATTR_SPACE)?;
    if sym == *SYM_HOST {
        Some(Space::Host)
    } else if sym == *SYM_DEVICE {
        Some(Space::Device)
    } else if sym == *SYM_PRIVATE {
        Some(Space::Private)
    } else {
        None
    }
}

pub fn has_identity_layout(types: &TypeInterner, ty: TypeRef) -> bool {
    layout(types, ty) == Some(Layout::Identity)
}

/// Same shape/layout, different memory space.
pub fn with_space(types: &mut TypeInterner, ty: TypeRef, new_space: Space) -> Option<TypeRef> {
    let elem = elem_ty(types, ty)?;
    let shp = shape(types, ty)?;
    let lay = layout(types, ty)?;
    Some(buffer_ty(types, elem, &shp, lay, new_space))
}

/// Same shape/space, different element type.
pub fn with_elem(types: &mut TypeInterner, ty: TypeRef, new_elem: TypeRef) -> Option<TypeRef> {
    let shp = shape(types, ty)?;
    let lay = layout(types, ty)?;
    let spc = space(types, ty)?;
    Some(buffer_ty(types, new_elem, &shp, lay, spc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::core;

    #[test]
    fn buffer_type_queries() {
        let mut types = TypeInterner::new();
        let f32_ty = core::float_ty(&mut types, 32);
        let buf = buffer_ty(&mut types, f32_ty, &[4, DYNAMIC], Layout::Identity, Space::Host);
        assert!(is_buffer(&types, buf));
        assert_eq!(elem_ty(&types, buf), Some(f32_ty));
        assert_eq!(shape(&types, buf), Some(vec![4, DYNAMIC]));
        assert_eq!(rank(&types, buf), Some(2));
        assert!(has_identity_layout(&types, buf));
        assert_eq!(space(&types, buf), Some(Space::Host));
    }

    #[test]
    fn with_space_changes_only_space() {
        let mut types = TypeInterner::new();
        let f32_ty = core::float_ty(&mut types, 32);
        let host = buffer_ty(&mut types, f32_ty, &[8], Layout::Identity, Space::Host);
        let dev = with_space(&mut types, host, Space::Device).unwrap();
        assert_ne!(host, dev);
        assert_eq!(shape(&types, dev), Some(vec![8]));
        assert_eq!(space(&types, dev), Some(Space::Device));
    }
}
