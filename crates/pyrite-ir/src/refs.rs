//! Entity handles for the arena IR.
//!
//! Each handle is a `u32` newtype indexing a `PrimaryMap` in [`crate::IrContext`].
//! Handles are `Copy` and carry no lifetime; dangling handles are possible
//! after erasure and are the caller's responsibility (the verifier checks).

use std::fmt;

use cranelift_entity::entity_impl;

/// Handle to an operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpRef(u32);
entity_impl!(OpRef, "op");

/// Handle to an SSA value (op result or block argument).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(u32);
entity_impl!(ValueRef, "v");

/// Handle to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);
entity_impl!(BlockRef, "bb");

/// Handle to a region (ordered list of blocks owned by an op).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionRef(u32);
entity_impl!(RegionRef, "region");

/// Handle to an interned type.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "ty");

/// Handle to an interned source path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathRef(u32);
entity_impl!(PathRef, "path");

/// Definition site of a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// The `index`-th result of an operation.
    OpResult(OpRef, u32),
    /// The `index`-th argument of a block.
    BlockArg(BlockRef, u32),
}

impl fmt::Display for ValueDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDef::OpResult(op, idx) => write!(f, "{op}#{idx}"),
            ValueDef::BlockArg(block, idx) => write!(f, "{block}#{idx}"),
        }
    }
}
