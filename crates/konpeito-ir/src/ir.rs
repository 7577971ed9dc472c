//! The basic-block IR itself (§3.3): `Program` -> `Function` ->
//! `BasicBlock` -> `Instruction`, in modified SSA form.
//!
//! Every handle (`ValueId`, `BlockId`, `SlotId`) is a small `Copy`
//! index into a flat `Vec` owned by the enclosing `Function`, the same
//! arena-and-handle convention `konpeito-ast::NodeArena` and
//! `konpeito-types::TypeInterner` already use.

use konpeito_common::{Atom, Span};
use konpeito_types::TypeId;

/// The result of one instruction, unique within its function. Before
/// SSA promotion a `ValueId` still only identifies the instruction
/// that produced it — it is `LoadLocal`/`StoreLocal` pairs, not
/// `ValueId` reuse, that make pre-promotion locals addressable rather
/// than single-assignment (§3.3 "modified SSA discipline").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    pub const fn from_usize(index: usize) -> Self {
        ValueId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A local-variable slot, addressable via `LoadLocal`/`StoreLocal`
/// until the SSA-promotion pass rewrites slot traffic into direct
/// value flow with Phis.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    pub const fn from_usize(index: usize) -> Self {
        SlotId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A basic block within one function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn from_usize(index: usize) -> Self {
        BlockId(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The entry block is always the first one a `Function` allocates.
    pub const ENTRY: BlockId = BlockId(0);
}

/// Arithmetic/comparison operator a `BinOp` instruction performs. This
/// mirrors `konpeito_ast::BinaryOperator` but excludes `And`/`Or`,
/// which lower as branch+phi rather than a single instruction (§4.7
/// "short-circuit logical operators... no dedicated instruction
/// kind").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Cmp,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// One incoming edge of a `Phi`: the predecessor block and the value
/// it supplies. Order matters (§3.4: "inputs are ordered by
/// predecessor identity").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PhiEdge {
    pub from: BlockId,
    pub value: ValueId,
}

/// The closed instruction-tag set (§3.3). Every instruction carries a
/// result type at the `Instruction` level, even tags like `StoreLocal`
/// whose "result" is conventionally `Nil` — keeping the result slot
/// uniform means the IR never needs a separate void/non-void
/// instruction split.
#[derive(Clone, Debug)]
pub enum InstKind {
    // --- Literals ---
    ConstInt(i64),
    ConstFloat(f64),
    ConstBool(bool),
    ConstNil,
    ConstString(Atom),
    ConstSymbol(Atom),
    ArrayLiteral(Vec<ValueId>),
    HashLiteral(Vec<(ValueId, ValueId)>),
    RangeLiteral { low: ValueId, high: ValueId, inclusive: bool },
    RegexpLiteral(Atom),

    // --- Variable ops ---
    LoadSelf,
    LoadLocal(SlotId),
    StoreLocal(SlotId, ValueId),
    LoadField { receiver: ValueId, field: Atom },
    StoreField { receiver: ValueId, field: Atom, value: ValueId },
    LoadClassVar { class: Atom, name: Atom },
    StoreClassVar { class: Atom, name: Atom, value: ValueId },
    LoadGlobal(Atom),
    StoreGlobal(Atom, ValueId),
    LoadConstant(Atom),

    // --- Arithmetic / comparisons ---
    BinOp { op: BinOp, lhs: ValueId, rhs: ValueId },
    UnOp { op: UnOp, operand: ValueId },

    // --- Phi ---
    Phi(Vec<PhiEdge>),

    // --- Call forms ---
    /// Materializes a `Block` node as a first-class value: a reference
    /// to a separately-lowered `Function` (named by a synthesized,
    /// caller-unique `Atom`) plus the enclosing locals it closes over.
    MakeClosure { function: Atom, captures: Vec<ValueId> },
    MethodCall { receiver: ValueId, method: Atom, args: Vec<ValueId>, block: Option<ValueId> },
    /// A call whose receiver type never resolved to anything concrete
    /// (§9 "Dynamic method dispatch and open classes") — backends must
    /// emit a runtime dispatch rather than a direct call.
    DynamicCall { receiver: ValueId, method: Atom, args: Vec<ValueId> },
    BlockInvoke { block: ValueId, args: Vec<ValueId> },
    Yield { args: Vec<ValueId> },
    SuperCall { args: Vec<ValueId> },
    NativeStructCall { receiver: ValueId, method: Atom, args: Vec<ValueId> },
    NativeFieldGet { receiver: ValueId, field: Atom },
    NativeFieldSet { receiver: ValueId, field: Atom, value: ValueId },
    NativeArrayGet { array: ValueId, index: ValueId },
    NativeArraySet { array: ValueId, index: ValueId, value: ValueId },
    NativeArrayNew { length: ValueId },

    // --- Type ops ---
    Box(ValueId),
    Unbox(ValueId),
    CheckedDowncast { value: ValueId, class: Atom },
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub result: ValueId,
    pub ty: TypeId,
    pub kind: InstKind,
    pub span: Span,
}

/// A block's single terminator (§3.4: "exactly one terminator").
#[derive(Clone, Debug)]
pub enum Terminator {
    Branch { predicate: ValueId, then_block: BlockId, else_block: BlockId },
    Jump(BlockId),
    Return(Option<ValueId>),
    /// No static row of a pattern-match matched and no `else` arm was
    /// present (§4.7 "the final fall-through... raises a no-match
    /// exception").
    RaiseNoMatch,
}

#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), instructions: Vec::new(), terminator: None }
    }
}

/// One parameter of a lowered function.
#[derive(Clone, Debug)]
pub struct ParamSlot {
    pub name: Atom,
    pub slot: SlotId,
    pub ty: TypeId,
}

/// One lowered method or top-level function body.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Atom,
    pub params: Vec<ParamSlot>,
    pub return_type: TypeId,
    pub blocks: Vec<BasicBlock>,
    /// Every local-variable slot this function allocated, parameters
    /// included, keyed by the order `SlotId`s were minted in.
    pub slot_types: Vec<TypeId>,
    /// Handler label table for exception regions (§4.7 "a region with
    /// an associated handler label table"): a protected range of
    /// blocks paired with the handler block entered on an exception,
    /// and whether an `ensure` continuation follows every exit path.
    pub handlers: Vec<ExceptionRegion>,
}

#[derive(Clone, Debug)]
pub struct ExceptionRegion {
    pub protected: Vec<BlockId>,
    pub handler: BlockId,
    pub ensure: Option<BlockId>,
}

impl Function {
    pub fn new(name: Atom) -> Self {
        let mut function = Self {
            name,
            params: Vec::new(),
            return_type: TypeId::UNTYPED,
            blocks: Vec::new(),
            slot_types: Vec::new(),
            handlers: Vec::new(),
        };
        function.alloc_block("entry");
        function
    }

    pub fn alloc_block(&mut self, label: impl Into<String>) -> BlockId {
        let id = BlockId::from_usize(self.blocks.len());
        self.blocks.push(BasicBlock::new(label));
        id
    }

    pub fn alloc_slot(&mut self, ty: TypeId) -> SlotId {
        let id = SlotId::from_usize(self.slot_types.len());
        self.slot_types.push(ty);
        id
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Every predecessor of every block, derived from terminators
    /// rather than stored redundantly — the CFG's edges are exactly
    /// what each block's terminator names as its successor(s).
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (i, block) in self.blocks.iter().enumerate() {
            let from = BlockId::from_usize(i);
            for successor in self.successors_of(block) {
                preds[successor.index()].push(from);
            }
        }
        preds
    }

    #[must_use]
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.successors_of(self.block(id))
    }

    fn successors_of(&self, block: &BasicBlock) -> Vec<BlockId> {
        match &block.terminator {
            Some(Terminator::Branch { then_block, else_block, .. }) => vec![*then_block, *else_block],
            Some(Terminator::Jump(target)) => vec![*target],
            Some(Terminator::Return(_)) | Some(Terminator::RaiseNoMatch) | None => Vec::new(),
        }
    }
}

/// A field's slot within a `ClassLayout`.
#[derive(Clone, Debug)]
pub struct FieldSlot {
    pub name: Atom,
    pub ty: TypeId,
}

/// Field layout, inheritance, and virtual-dispatch metadata for one
/// class (§3.3 "Program owns... a registry of ClassLayout records").
#[derive(Clone, Debug, Default)]
pub struct ClassLayout {
    pub fields: Vec<FieldSlot>,
    pub parent: Option<Atom>,
    pub mixins: Vec<Atom>,
    /// Method names in virtual-dispatch slot order, populated only for
    /// classes that have more than one concrete implementation of a
    /// name reachable through the hierarchy.
    pub vtable: Vec<Atom>,
}

/// The whole compile's lowered output (§3.3, §6 "Exposed to backends").
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: rustc_hash::FxHashMap<Atom, ClassLayout>,
}

impl Program {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_named(&self, name: Atom) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predecessors_follow_branch_terminator() {
        let mut strings = konpeito_common::Interner::new();
        let name = strings.intern("f");
        let mut function = Function::new(name);
        let then_block = function.alloc_block("then");
        let else_block = function.alloc_block("else");
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Branch {
            predicate: ValueId::from_usize(0),
            then_block,
            else_block,
        });

        let preds = function.predecessors();
        assert_eq!(preds[then_block.index()], vec![BlockId::ENTRY]);
        assert_eq!(preds[else_block.index()], vec![BlockId::ENTRY]);
    }
}
