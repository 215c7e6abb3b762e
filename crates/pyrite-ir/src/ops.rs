//! Dialect operation wrappers and the `dialect!` definition macro.
//!
//! Each op kind gets a `Copy` newtype over [`OpRef`] with typed accessors for
//! operands, results, attributes, regions and successors, plus a constructor
//! function. The macro normalizes the declaration into descriptor lists and
//! emits everything in one pass; see `dialect/` for the actual definitions.

use thiserror::Error;

use crate::context::IrContext;
use crate::refs::OpRef;
use crate::Symbol;

/// Failure to view a generic op through a typed wrapper.
#[derive(Debug, Error)]
pub enum OpMatchError {
    #[error("expected {expected}, found {actual}")]
    WrongOperation {
        expected: &'static str,
        actual: String,
    },
    #[error("missing required attribute `{0}`")]
    MissingAttribute(&'static str),
    #[error("attribute `{0}` has the wrong kind")]
    WrongAttributeKind(&'static str),
}

/// Typed view over an operation of a known dialect and name.
pub trait DialectOp: Sized + Copy {
    const DIALECT: &'static str;
    const NAME: &'static str;

    /// Wrap `op` if it is a `DIALECT.NAME` operation.
    fn from_op(ctx: &IrContext, op: OpRef) -> Result<Self, OpMatchError>;

    /// The underlying op handle.
    fn op_ref(&self) -> OpRef;

    fn matches(ctx: &IrContext, op: OpRef) -> bool {
        let data = ctx.op(op);
        data.dialect == Symbol::new(Self::DIALECT) && data.name == Symbol::new(Self::NAME)
    }
}

// ============================================================================
// Counting helper
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __count_idents {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + $crate::__count_idents!($($tail)*) };
}

// ============================================================================
// Attribute type mapping
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __attr_value {
    (@rust any) => { $crate::Attribute };
    (@rust bool) => { bool };
    (@rust i64) => { i64 };
    (@rust u64) => { u64 };
    (@rust f64) => { f64 };
    (@rust str) => { ::std::string::String };
    (@rust Symbol) => { $crate::Symbol };
    (@rust Type) => { $crate::TypeRef };

    (@to any, $v:expr) => { $v };
    (@to bool, $v:expr) => { $crate::Attribute::Bool($v) };
    (@to i64, $v:expr) => { $crate::Attribute::int($v) };
    (@to u64, $v:expr) => { $crate::Attribute::IntBits($v) };
    (@to f64, $v:expr) => { $crate::Attribute::float($v) };
    (@to str, $v:expr) => { $crate::Attribute::String($v) };
    (@to Symbol, $v:expr) => { $crate::Attribute::Symbol($v) };
    (@to Type, $v:expr) => { $crate::Attribute::Type($v) };

    (@from any, $attr:expr) => { $attr.clone() };
    (@from bool, $attr:expr) => {
        match $attr {
            $crate::Attribute::Bool(v) => *v,
            other => panic!("expected Bool attribute, found {other:?}"),
        }
    };
    (@from i64, $attr:expr) => {
        $attr.as_int().expect("expected integer attribute")
    };
    (@from u64, $attr:expr) => {
        match $attr {
            $crate::Attribute::IntBits(v) => *v,
            other => panic!("expected IntBits attribute, found {other:?}"),
        }
    };
    (@from f64, $attr:expr) => {
        $attr.as_float().expect("expected float attribute")
    };
    (@from str, $attr:expr) => {
        match $attr {
            $crate::Attribute::String(v) => v.clone(),
            other => panic!("expected String attribute, found {other:?}"),
        }
    };
    (@from Symbol, $attr:expr) => {
        $attr.as_symbol().expect("expected Symbol attribute")
    };
    (@from Type, $attr:expr) => {
        $attr.as_type().expect("expected Type attribute")
    };
}

// ============================================================================
// Accessor generators
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __operand_accessors {
    ($idx:expr;) => {};
    ($idx:expr; $name:ident $($rest:ident)*) => {
        pub fn $name(&self, ctx: &$crate::IrContext) -> $crate::ValueRef {
            ctx.op_operands(self.op_ref())[$idx]
        }
        $crate::__operand_accessors!($idx + 1usize; $($rest)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __result_accessors {
    ($idx:expr;) => {};
    ($idx:expr; $name:ident $($rest:ident)*) => {
        pub fn $name(&self, ctx: &$crate::IrContext) -> $crate::ValueRef {
            ctx.op_result(self.op_ref(), $idx as u32)
        }
        $crate::__result_accessors!($idx + 1usize; $($rest)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __region_accessors {
    ($idx:expr;) => {};
    ($idx:expr; $name:ident $($rest:ident)*) => {
        pub fn $name(&self, ctx: &$crate::IrContext) -> $crate::RegionRef {
            ctx.op(self.op_ref()).regions[$idx]
        }
        $crate::__region_accessors!($idx + 1usize; $($rest)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __successor_accessors {
    ($idx:expr;) => {};
    ($idx:expr; $name:ident $($rest:ident)*) => {
        pub fn $name(&self, ctx: &$crate::IrContext) -> $crate::BlockRef {
            ctx.op(self.op_ref()).successors[$idx]
        }
        $crate::__successor_accessors!($idx + 1usize; $($rest)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __attr_accessors {
    () => {};
    ({req $name:ident $ty:ident} $($rest:tt)*) => {
        pub fn $name(&self, ctx: &$crate::IrContext) -> $crate::__attr_value!(@rust $ty) {
            let attr = ctx
                .op(self.op_ref())
                .attributes
                .get(&$crate::Symbol::new($crate::ident_str!($name)))
                .expect(concat!("missing attribute: ", $crate::ident_str!($name)));
            $crate::__attr_value!(@from $ty, attr)
        }
        $crate::__attr_accessors!($($rest)*);
    };
    ({opt $name:ident $ty:ident} $($rest:tt)*) => {
        pub fn $name(
            &self,
            ctx: &$crate::IrContext,
        ) -> Option<$crate::__attr_value!(@rust $ty)> {
            ctx.op(self.op_ref())
                .attributes
                .get(&$crate::Symbol::new($crate::ident_str!($name)))
                .map(|attr| $crate::__attr_value!(@from $ty, attr))
        }
        $crate::__attr_accessors!($($rest)*);
    };
}

// ============================================================================
// dialect! — top-level item parser
// ============================================================================

/// Define a dialect module's operations.
///
/// ```ignore
/// dialect! {
///     mod arith {
///         /// Integer/float constant; `value` carries the raw bits.
///         #[attr(value: any)]
///         fn r#const() -> result;
///
///         fn addi(lhs, rhs) -> result;
///
///         fn r#if(cond) -> #[rest] results {
///             #[region(then_region)] {}
///             #[region(else_region)] {}
///         };
///     }
/// }
/// ```
///
/// Operands are fixed idents optionally followed by `#[rest] name`; results
/// are a single ident, a tuple `(a, b)`, or `#[rest] name`; `#[attr(...)]`
/// declares attributes (`name: kind`, `name?: kind` for optional); a `{...}`
/// body declares `#[region(name)] {}` and `#[successor(name)]` slots.
#[macro_export]
macro_rules! dialect {
    (mod $dialect:ident { $($body:tt)* }) => {
        #[allow(non_snake_case)]
        #[inline]
        pub fn DIALECT_NAME() -> $crate::Symbol {
            $crate::Symbol::new($crate::ident_str!($dialect))
        }

        $crate::dialect!(@items $dialect [$($body)*]);
    };

    (@items $dialect:ident []) => {};

    // variadic results, with body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) -> #[rest] $res:ident { $($rt:tt)* };
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [rest $res],
            body: [$($rt)*],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // variadic results, no body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) -> #[rest] $res:ident;
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [rest $res],
            body: [],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // multiple results, no body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) -> ($($res:ident),+);
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [many $($res)+],
            body: [],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // single result, with body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) -> $res:ident { $($rt:tt)* };
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [one $res],
            body: [$($rt)*],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // single result, no body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) -> $res:ident;
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [one $res],
            body: [],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // no results, with body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*) { $($rt:tt)* };
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [],
            body: [$($rt)*],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };

    // no results, no body
    (@items $dialect:ident
        [$(#[doc = $doc:literal])*
         $(#[attr($($attrs:tt)*)])?
         fn $op:ident ($($operands:tt)*);
         $($rest:tt)*]
    ) => {
        $crate::def_op! {
            dialect: $dialect, op: $op,
            attrs: [$($($attrs)*)?],
            operands: [$($operands)*],
            results: [],
            body: [],
        }
        $crate::dialect!(@items $dialect [$($rest)*]);
    };
}

// ============================================================================
// def_op! — normalization phases
// ============================================================================

/// Normalizes one op declaration into descriptor lists, then emits the
/// wrapper struct, trait impl, accessors and constructor.
#[doc(hidden)]
#[macro_export]
macro_rules! def_op {
    // Entry: normalize operands.
    (
        dialect: $dialect:ident, op: $op:ident,
        attrs: [$($attrs:tt)*],
        operands: [$($operands:tt)*],
        results: [$($results:tt)*],
        body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@operands
            dialect: $dialect, op: $op,
            attrs: [$($attrs)*],
            pending: [$($operands)*],
            fixed: [], var: [],
            results: [$($results)*],
            body: [$($body)*],
        );
    };

    // --- operand normalization ---
    (@operands
        dialect: $dialect:ident, op: $op:ident, attrs: [$($attrs:tt)*],
        pending: [], fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@attrs
            dialect: $dialect, op: $op,
            pending: [$($attrs)*], req: [], opt: [],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*], body: [$($body)*],
        );
    };
    (@operands
        dialect: $dialect:ident, op: $op:ident, attrs: [$($attrs:tt)*],
        pending: [#[rest] $name:ident], fixed: [$($fixed:ident)*], var: [],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@operands
            dialect: $dialect, op: $op, attrs: [$($attrs)*],
            pending: [], fixed: [$($fixed)*], var: [$name],
            results: [$($results)*], body: [$($body)*],
        );
    };
    (@operands
        dialect: $dialect:ident, op: $op:ident, attrs: [$($attrs:tt)*],
        pending: [$name:ident, $($tail:tt)*], fixed: [$($fixed:ident)*], var: [],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@operands
            dialect: $dialect, op: $op, attrs: [$($attrs)*],
            pending: [$($tail)*], fixed: [$($fixed)* $name], var: [],
            results: [$($results)*], body: [$($body)*],
        );
    };
    (@operands
        dialect: $dialect:ident, op: $op:ident, attrs: [$($attrs:tt)*],
        pending: [$name:ident], fixed: [$($fixed:ident)*], var: [],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@operands
            dialect: $dialect, op: $op, attrs: [$($attrs)*],
            pending: [], fixed: [$($fixed)* $name], var: [],
            results: [$($results)*], body: [$($body)*],
        );
    };

    // --- attribute normalization ---
    (@attrs
        dialect: $dialect:ident, op: $op:ident,
        pending: [], req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@body
            dialect: $dialect, op: $op,
            pending: [$($body)*], regions: [], succs: [],
            req: [$($req)*], opt: [$($opt)*],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*],
        );
    };
    (@attrs
        dialect: $dialect:ident, op: $op:ident,
        pending: [$name:ident ?: $ty:ident $(, $($tail:tt)*)?],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@attrs
            dialect: $dialect, op: $op,
            pending: [$($($tail)*)?],
            req: [$($req)*], opt: [$($opt)* {opt $name $ty}],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*], body: [$($body)*],
        );
    };
    (@attrs
        dialect: $dialect:ident, op: $op:ident,
        pending: [$name:ident : $ty:ident $(, $($tail:tt)*)?],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*], body: [$($body:tt)*],
    ) => {
        $crate::def_op!(@attrs
            dialect: $dialect, op: $op,
            pending: [$($($tail)*)?],
            req: [$($req)* {req $name $ty}], opt: [$($opt)*],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*], body: [$($body)*],
        );
    };

    // --- region/successor normalization ---
    (@body
        dialect: $dialect:ident, op: $op:ident,
        pending: [], regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*],
    ) => {
        $crate::def_op!(@emit
            dialect: $dialect, op: $op,
            regions: [$($region)*], succs: [$($succ)*],
            req: [$($req)*], opt: [$($opt)*],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*],
        );
    };
    (@body
        dialect: $dialect:ident, op: $op:ident,
        pending: [#[region($name:ident)] {} $($tail:tt)*],
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*],
    ) => {
        $crate::def_op!(@body
            dialect: $dialect, op: $op,
            pending: [$($tail)*],
            regions: [$($region)* $name], succs: [$($succ)*],
            req: [$($req)*], opt: [$($opt)*],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*],
        );
    };
    (@body
        dialect: $dialect:ident, op: $op:ident,
        pending: [#[successor($name:ident)] $($tail:tt)*],
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [$($results:tt)*],
    ) => {
        $crate::def_op!(@body
            dialect: $dialect, op: $op,
            pending: [$($tail)*],
            regions: [$($region)*], succs: [$($succ)* $name],
            req: [$($req)*], opt: [$($opt)*],
            fixed: [$($fixed)*], var: [$($var)?],
            results: [$($results)*],
        );
    };

    // --- shared emission: struct, trait impl, accessors ---
    (@common
        dialect: $dialect:ident, op: $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$($req:tt)*], opt: [$($opt:tt)*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        extra_accessors: { $($extra:tt)* },
    ) => {
        $crate::paste::paste! {
            #[allow(non_snake_case)]
            #[inline]
            pub fn [<$op:upper>]() -> $crate::Symbol {
                $crate::Symbol::new($crate::ident_str!($op))
            }

            /// Typed wrapper over an op of this kind.
            #[derive(Clone, Copy, Debug, PartialEq, Eq)]
            pub struct [<$op:camel>]($crate::OpRef);

            impl $crate::DialectOp for [<$op:camel>] {
                const DIALECT: &'static str = $crate::ident_str!($dialect);
                const NAME: &'static str = $crate::ident_str!($op);

                fn from_op(
                    ctx: &$crate::IrContext,
                    op: $crate::OpRef,
                ) -> Result<Self, $crate::OpMatchError> {
                    if !<Self as $crate::DialectOp>::matches(ctx, op) {
                        return Err($crate::OpMatchError::WrongOperation {
                            expected: concat!(
                                $crate::ident_str!($dialect), ".", $crate::ident_str!($op)
                            ),
                            actual: ctx.op(op).full_name(),
                        });
                    }
                    Ok(Self(op))
                }

                fn op_ref(&self) -> $crate::OpRef {
                    self.0
                }
            }

            impl [<$op:camel>] {
                pub fn op_ref(&self) -> $crate::OpRef {
                    self.0
                }

                $crate::__operand_accessors!(0usize; $($fixed)*);
                #[allow(dead_code)]
                const __FIXED_OPERAND_COUNT: usize = $crate::__count_idents!($($fixed)*);
                $(
                    pub fn $var<'a>(
                        &self,
                        ctx: &'a $crate::IrContext,
                    ) -> &'a [$crate::ValueRef] {
                        &ctx.op_operands(self.0)[Self::__FIXED_OPERAND_COUNT..]
                    }
                )?
                $crate::__attr_accessors!($($req)* $($opt)*);
                $crate::__region_accessors!(0usize; $($region)*);
                $crate::__successor_accessors!(0usize; $($succ)*);
                $($extra)*
            }
        }
    };

    // --- constructor body fragment shared by all @emit arms ---
    (@ctor_body
        $ctx:ident, $location:ident, $dialect:ident, $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$({req $rname:ident $rty:ident})*],
        opt: [$({opt $oname:ident $oty:ident})*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: ($($resexpr:tt)*)
    ) => {{
        #[allow(unused_mut)]
        let mut builder = $crate::OperationDataBuilder::new(
            $location,
            $crate::Symbol::new($crate::ident_str!($dialect)),
            $crate::Symbol::new($crate::ident_str!($op)),
        );
        $( builder = builder.operand($fixed); )*
        $( builder = builder.operands($var); )?
        builder = $crate::def_op!(@push_results builder, $($resexpr)*);
        $(
            builder = builder.attr(
                $crate::Symbol::new($crate::ident_str!($rname)),
                $crate::__attr_value!(@to $rty, $rname),
            );
        )*
        $(
            if let Some(value) = $oname {
                builder = builder.attr(
                    $crate::Symbol::new($crate::ident_str!($oname)),
                    $crate::__attr_value!(@to $oty, value),
                );
            }
        )*
        $( builder = builder.region($region); )*
        $( builder = builder.successor($succ); )*
        let data = builder.build($ctx);
        $ctx.create_op(data)
    }};

    (@push_results $builder:ident, none) => { $builder };
    (@push_results $builder:ident, one $ty:ident) => { $builder.result($ty) };
    (@push_results $builder:ident, iter $tys:ident) => { $builder.results($tys) };
    (@push_results $builder:ident, list [$($ty:ident)*]) => {{
        #[allow(unused_mut)]
        let mut b = $builder;
        $( b = b.result($ty); )*
        b
    }};

    // --- emit: no results ---
    (@emit
        dialect: $dialect:ident, op: $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$({req $rname:ident $rty:ident})*], opt: [$({opt $oname:ident $oty:ident})*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [],
    ) => {
        $crate::def_op!(@common
            dialect: $dialect, op: $op,
            regions: [$($region)*], succs: [$($succ)*],
            req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
            fixed: [$($fixed)*], var: [$($var)?],
            extra_accessors: {},
        );
        $crate::paste::paste! {
            #[allow(clippy::too_many_arguments)]
            pub fn $op(
                ctx: &mut $crate::IrContext,
                location: $crate::Location,
                $($fixed: $crate::ValueRef,)*
                $($var: impl IntoIterator<Item = $crate::ValueRef>,)?
                $($rname: $crate::__attr_value!(@rust $rty),)*
                $($oname: Option<$crate::__attr_value!(@rust $oty)>,)*
                $($region: $crate::RegionRef,)*
                $($succ: $crate::BlockRef,)*
            ) -> [<$op:camel>] {
                let op_ref = $crate::def_op!(@ctor_body
                    ctx, location, $dialect, $op,
                    regions: [$($region)*], succs: [$($succ)*],
                    req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
                    fixed: [$($fixed)*], var: [$($var)?],
                    results: (none)
                );
                [<$op:camel>](op_ref)
            }
        }
    };

    // --- emit: single result ---
    (@emit
        dialect: $dialect:ident, op: $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$({req $rname:ident $rty:ident})*], opt: [$({opt $oname:ident $oty:ident})*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [one $res:ident],
    ) => {
        $crate::def_op!(@common
            dialect: $dialect, op: $op,
            regions: [$($region)*], succs: [$($succ)*],
            req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
            fixed: [$($fixed)*], var: [$($var)?],
            extra_accessors: {
                pub fn $res(&self, ctx: &$crate::IrContext) -> $crate::ValueRef {
                    ctx.op_result(self.0, 0)
                }
                pub fn result_ty(&self, ctx: &$crate::IrContext) -> $crate::TypeRef {
                    ctx.op_result_types(self.0)[0]
                }
            },
        );
        $crate::paste::paste! {
            #[allow(clippy::too_many_arguments)]
            pub fn $op(
                ctx: &mut $crate::IrContext,
                location: $crate::Location,
                $($fixed: $crate::ValueRef,)*
                $($var: impl IntoIterator<Item = $crate::ValueRef>,)?
                result_ty: $crate::TypeRef,
                $($rname: $crate::__attr_value!(@rust $rty),)*
                $($oname: Option<$crate::__attr_value!(@rust $oty)>,)*
                $($region: $crate::RegionRef,)*
                $($succ: $crate::BlockRef,)*
            ) -> [<$op:camel>] {
                let op_ref = $crate::def_op!(@ctor_body
                    ctx, location, $dialect, $op,
                    regions: [$($region)*], succs: [$($succ)*],
                    req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
                    fixed: [$($fixed)*], var: [$($var)?],
                    results: (one result_ty)
                );
                [<$op:camel>](op_ref)
            }
        }
    };

    // --- emit: variadic results ---
    (@emit
        dialect: $dialect:ident, op: $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$({req $rname:ident $rty:ident})*], opt: [$({opt $oname:ident $oty:ident})*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [rest $res:ident],
    ) => {
        $crate::def_op!(@common
            dialect: $dialect, op: $op,
            regions: [$($region)*], succs: [$($succ)*],
            req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
            fixed: [$($fixed)*], var: [$($var)?],
            extra_accessors: {
                pub fn $res<'a>(
                    &self,
                    ctx: &'a $crate::IrContext,
                ) -> &'a [$crate::ValueRef] {
                    ctx.op_results(self.0)
                }
            },
        );
        $crate::paste::paste! {
            #[allow(clippy::too_many_arguments)]
            pub fn $op(
                ctx: &mut $crate::IrContext,
                location: $crate::Location,
                $($fixed: $crate::ValueRef,)*
                $($var: impl IntoIterator<Item = $crate::ValueRef>,)?
                result_types: impl IntoIterator<Item = $crate::TypeRef>,
                $($rname: $crate::__attr_value!(@rust $rty),)*
                $($oname: Option<$crate::__attr_value!(@rust $oty)>,)*
                $($region: $crate::RegionRef,)*
                $($succ: $crate::BlockRef,)*
            ) -> [<$op:camel>] {
                let op_ref = $crate::def_op!(@ctor_body
                    ctx, location, $dialect, $op,
                    regions: [$($region)*], succs: [$($succ)*],
                    req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
                    fixed: [$($fixed)*], var: [$($var)?],
                    results: (iter result_types)
                );
                [<$op:camel>](op_ref)
            }
        }
    };

    // --- emit: multiple fixed results ---
    (@emit
        dialect: $dialect:ident, op: $op:ident,
        regions: [$($region:ident)*], succs: [$($succ:ident)*],
        req: [$({req $rname:ident $rty:ident})*], opt: [$({opt $oname:ident $oty:ident})*],
        fixed: [$($fixed:ident)*], var: [$($var:ident)?],
        results: [many $($res:ident)+],
    ) => {
        $crate::def_op!(@common
            dialect: $dialect, op: $op,
            regions: [$($region)*], succs: [$($succ)*],
            req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
            fixed: [$($fixed)*], var: [$($var)?],
            extra_accessors: {
                $crate::__result_accessors!(0usize; $($res)*);
            },
        );
        $crate::paste::paste! {
            #[allow(clippy::too_many_arguments)]
            pub fn $op(
                ctx: &mut $crate::IrContext,
                location: $crate::Location,
                $($fixed: $crate::ValueRef,)*
                $($var: impl IntoIterator<Item = $crate::ValueRef>,)?
                $([<$res _ty>]: $crate::TypeRef,)+
                $($rname: $crate::__attr_value!(@rust $rty),)*
                $($oname: Option<$crate::__attr_value!(@rust $oty)>,)*
                $($region: $crate::RegionRef,)*
                $($succ: $crate::BlockRef,)*
            ) -> [<$op:camel>] {
                let op_ref = $crate::def_op!(@ctor_body
                    ctx, location, $dialect, $op,
                    regions: [$($region)*], succs: [$($succ)*],
                    req: [$({req $rname $rty})*], opt: [$({opt $oname $oty})*],
                    fixed: [$($fixed)*], var: [$($var)?],
                    results: (list [$([<$res _ty>])+])
                );
                [<$op:camel>](op_ref)
            }
        }
    };
}
