//! The basic-block IR in modified SSA form (§3.3, §3.4), its builder
//! (§4.7), and the dominator-tree analysis the SSA-promotion pass and
//! `konpeito-opt`'s loop-invariant code motion both need.

pub mod builder;
pub mod dominators;
pub mod ir;
pub mod ssa;

pub use builder::IRBuilder;
pub use dominators::Dominators;
pub use ir::{
    BasicBlock, BinOp, BlockId, ClassLayout, ExceptionRegion, FieldSlot, Function, InstKind,
    Instruction, ParamSlot, PhiEdge, Program, SlotId, Terminator, UnOp, ValueId,
};
pub use ssa::promote_to_ssa;
