//! Standard scalar arithmetic over signless integers, floats and index.
//!
//! Integer ops operate on signless types; signedness is resolved by the
//! lowering that produces them (signed/unsigned variants are distinct op
//! kinds or predicates, as in the operator tables of `pyrite-lower`).

use crate::{dialect, symbols, Symbol};

dialect! {
    mod arith {
        /// Scalar constant; `value` carries signless raw bits.
        #[attr(value: any)]
        fn r#const() -> result;

        fn addi(lhs, rhs) -> result;
        fn subi(lhs, rhs) -> result;
        fn muli(lhs, rhs) -> result;
        /// Signed floor division (rounds toward negative infinity).
        fn floordivi(lhs, rhs) -> result;
        fn divui(lhs, rhs) -> result;
        fn ceildivui(lhs, rhs) -> result;
        /// Signed remainder with the sign of the dividend.
        fn remi(lhs, rhs) -> result;

        fn addf(lhs, rhs) -> result;
        fn subf(lhs, rhs) -> result;
        fn mulf(lhs, rhs) -> result;
        fn divf(lhs, rhs) -> result;
        fn remf(lhs, rhs) -> result;
        fn negf(value) -> result;

        fn andi(lhs, rhs) -> result;
        fn ori(lhs, rhs) -> result;
        fn xori(lhs, rhs) -> result;
        fn shli(lhs, rhs) -> result;
        fn shrsi(lhs, rhs) -> result;
        fn shrui(lhs, rhs) -> result;

        /// Integer comparison; `pred` is one of `eq ne slt sle sgt sge ult
        /// ule ugt uge`.
        #[attr(pred: Symbol)]
        fn cmpi(lhs, rhs) -> result;
        /// Ordered float comparison; `pred` is one of `oeq one olt ole ogt oge`.
        #[attr(pred: Symbol)]
        fn cmpf(lhs, rhs) -> result;

        fn select(cond, true_value, false_value) -> result;

        fn trunci(value) -> result;
        fn extsi(value) -> result;
        fn extui(value) -> result;
        fn truncf(value) -> result;
        fn extf(value) -> result;
        fn sitofp(value) -> result;
        fn uitofp(value) -> result;
        fn fptosi(value) -> result;
        fn fptoui(value) -> result;
        fn bitcast(value) -> result;
        fn index_cast(value) -> result;
    }
}

symbols! {
    PRED_EQ => "eq",
    PRED_NE => "ne",
    PRED_SLT => "slt",
    PRED_SLE => "sle",
    PRED_SGT => "sgt",
    PRED_SGE => "sge",
    PRED_ULT => "ult",
    PRED_ULE => "ule",
    PRED_UGT => "ugt",
    PRED_UGE => "uge",
    PRED_OEQ => "oeq",
    PRED_ONE => "one",
    PRED_OLT => "olt",
    PRED_OLE => "ole",
    PRED_OGT => "ogt",
    PRED_OGE => "oge",
}

/// Integer comparison predicates.
pub mod pred {
    use crate::Symbol;

    pub fn eq() -> Symbol {
        *super::PRED_EQ
    }
    pub fn ne() -> Symbol {
        *super::PRED_NE
    }
    pub fn slt() -> Symbol {
        *super::PRED_SLT
    }
    pub fn sle() -> Symbol {
        *super::PRED_SLE
    }
    pub fn sgt() -> Symbol {
        *super::PRED_SGT
    }
    pub fn sge() -> Symbol {
        *super::PRED_SGE
    }
    pub fn ult() -> Symbol {
        *super::PRED_ULT
    }
    pub fn ule() -> Symbol {
        *super::PRED_ULE
    }
    pub fn ugt() -> Symbol {
        *super::PRED_UGT
    }
    pub fn uge() -> Symbol {
        *super::PRED_UGE
    }
    pub fn oeq() -> Symbol {
        *super::PRED_OEQ
    }
    pub fn one() -> Symbol {
        *super::PRED_ONE
    }
    pub fn olt() -> Symbol {
        *super::PRED_OLT
    }
    pub fn ole() -> Symbol {
        *super::PRED_OLE
    }
    pub fn ogt() -> Symbol {
        *super::PRED_OGT
    }
    pub fn oge() -> Symbol {
        *super::PRED_OGE
    }
}
