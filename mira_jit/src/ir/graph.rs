//! The SSA graph.
//!
//! Values and blocks live in arenas and refer to each other by id. The
//! graph keeps two explicit adjacency structures next to the arenas:
//!
//! - per-value use lists (`user`, `slot`) kept symmetric with operand
//!   edges by [`Graph::connect`] and [`Graph::replace_all_uses`];
//! - per-block terminator-use lists: a jump or branch naming a block is a
//!   use of that block, and a block's predecessors are derived from this
//!   list in insertion order. Phi operands are indexed by that same order.
//!
//! Deleting nothing is deliberate: a value that loses its last use simply
//! goes dark, and the whole graph is dropped at once when compilation ends
//! (successfully or not).

use std::fmt::Write as _;
use std::rc::Rc;

use smallvec::SmallVec;

use mira_runtime::Range;

use crate::ir::arena::{Arena, Id, SecondaryMap};
use crate::typeinfo::{FnRef, TypeId, TypeInfo};

pub type ValueId = Id<ValueData>;
pub type BlockId = Id<BlockData>;

// ============================================================================
// Values
// ============================================================================

/// A literal embedded in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Scalar(f64),
    Bool(bool),
    Index(i64),
    Range(Range),
    Str(Rc<str>),
}

impl Constant {
    pub fn ty(&self, ti: &TypeInfo) -> TypeId {
        match self {
            Constant::Scalar(_) => ti.scalar,
            Constant::Bool(_) => ti.boolean,
            Constant::Index(_) => ti.index,
            Constant::Range(_) => ti.range,
            Constant::Str(_) => ti.string,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Const(Constant),
    /// A named variable before renaming. Operands point at these until SSA
    /// construction replaces them with real definitions.
    Var(String),
    /// Typed load of argument slot `n` at function entry.
    ExtractArg(u16),
    /// Store of `args[0]` back into argument slot `n` at function exit.
    StoreArg(u16),
    /// Definition of a variable: a copy of `args[0]`.
    Assign,
    /// Call into an overload table; resolved during inference.
    Call(FnRef),
    /// Merge point; one operand per predecessor, in predecessor order.
    Phi,
    Jump {
        target: BlockId,
    },
    /// `args[0]` is the boolean condition.
    Branch {
        then_: BlockId,
        else_: BlockId,
    },
}

#[derive(Debug)]
pub struct ValueData {
    pub kind: ValueKind,
    pub args: SmallVec<[ValueId; 2]>,
    pub ty: Option<TypeId>,
    pub block: Option<BlockId>,
    /// The `Var` value this instruction defines, if it defines one
    /// (assigns, phis and extracts).
    pub tag: Option<ValueId>,
}

impl ValueData {
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, ValueKind::Phi)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self.kind, ValueKind::Jump { .. } | ValueKind::Branch { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self.kind, ValueKind::StoreArg(_))
    }
}

/// One operand edge, seen from the producer's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: ValueId,
    pub slot: usize,
}

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug)]
pub struct BlockData {
    pub name: String,
    /// Instructions in order; the terminator, once present, is last.
    pub insts: Vec<ValueId>,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Default)]
pub struct Graph {
    values: Arena<ValueData>,
    uses: SecondaryMap<ValueData, Vec<Use>>,
    blocks: Arena<BlockData>,
    /// Terminators naming each block, in creation order.
    block_uses: SecondaryMap<BlockData, Vec<ValueId>>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.blocks.alloc(BlockData { name: name.into(), insts: Vec::new() });
        self.block_uses.set(id, Vec::new());
        id
    }

    fn create(&mut self, kind: ValueKind, args: SmallVec<[ValueId; 2]>, ty: Option<TypeId>) -> ValueId {
        let id = self.values.alloc(ValueData { kind, args, ty, block: None, tag: None });
        self.uses.set(id, Vec::new());
        for slot in 0..self.values[id].args.len() {
            let arg = self.values[id].args[slot];
            self.uses[arg].push(Use { user: id, slot });
        }
        match self.values[id].kind {
            ValueKind::Jump { target } => self.block_uses[target].push(id),
            ValueKind::Branch { then_, else_ } => {
                self.block_uses[then_].push(id);
                self.block_uses[else_].push(id);
            }
            _ => {}
        }
        id
    }

    pub fn constant(&mut self, c: Constant, ti: &TypeInfo) -> ValueId {
        let ty = c.ty(ti);
        self.create(ValueKind::Const(c), SmallVec::new(), Some(ty))
    }

    pub fn var(&mut self, name: impl Into<String>) -> ValueId {
        self.create(ValueKind::Var(name.into()), SmallVec::new(), None)
    }

    pub fn extract_arg(&mut self, index: u16, ty: TypeId, tag: ValueId) -> ValueId {
        let v = self.create(ValueKind::ExtractArg(index), SmallVec::new(), Some(ty));
        self.values[v].tag = Some(tag);
        v
    }

    pub fn store_arg(&mut self, index: u16, value: ValueId) -> ValueId {
        self.create(ValueKind::StoreArg(index), SmallVec::from_slice(&[value]), None)
    }

    pub fn assign(&mut self, tag: ValueId, src: ValueId) -> ValueId {
        let v = self.create(ValueKind::Assign, SmallVec::from_slice(&[src]), None);
        self.values[v].tag = Some(tag);
        v
    }

    pub fn call(&mut self, f: FnRef, args: &[ValueId]) -> ValueId {
        self.create(ValueKind::Call(f), SmallVec::from_slice(args), None)
    }

    /// A phi for `tag` with one operand per predecessor, each initially the
    /// variable placeholder; renaming connects the real definitions.
    pub fn phi(&mut self, tag: ValueId, npreds: usize) -> ValueId {
        let args: SmallVec<[ValueId; 2]> = (0..npreds).map(|_| tag).collect();
        let v = self.create(ValueKind::Phi, args, None);
        self.values[v].tag = Some(tag);
        v
    }

    pub fn jump(&mut self, target: BlockId) -> ValueId {
        self.create(ValueKind::Jump { target }, SmallVec::new(), None)
    }

    pub fn branch(&mut self, cond: ValueId, then_: BlockId, else_: BlockId) -> ValueId {
        self.create(ValueKind::Branch { then_, else_ }, SmallVec::from_slice(&[cond]), None)
    }

    // ------------------------------------------------------------------
    // Block contents
    // ------------------------------------------------------------------

    pub fn append(&mut self, block: BlockId, value: ValueId) {
        self.values[value].block = Some(block);
        self.blocks[block].insts.push(value);
    }

    pub fn prepend(&mut self, block: BlockId, value: ValueId) {
        self.values[value].block = Some(block);
        self.blocks[block].insts.insert(0, value);
    }

    /// Insert `value` directly after `anchor` in `anchor`'s block.
    pub fn insert_after(&mut self, anchor: ValueId, value: ValueId) {
        let block = match self.values[anchor].block {
            Some(b) => b,
            None => return,
        };
        self.values[value].block = Some(block);
        let insts = &mut self.blocks[block].insts;
        match insts.iter().position(|&v| v == anchor) {
            Some(pos) => insts.insert(pos + 1, value),
            None => insts.push(value),
        }
    }

    /// Insert `value` directly before `anchor` in `anchor`'s block.
    pub fn insert_before(&mut self, anchor: ValueId, value: ValueId) {
        let block = match self.values[anchor].block {
            Some(b) => b,
            None => return,
        };
        self.values[value].block = Some(block);
        let insts = &mut self.blocks[block].insts;
        match insts.iter().position(|&v| v == anchor) {
            Some(pos) => insts.insert(pos, value),
            None => insts.push(value),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v]
    }

    #[inline]
    pub fn block(&self, b: BlockId) -> &BlockData {
        &self.blocks[b]
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        self.values.ids()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        self.blocks.ids()
    }

    pub fn set_ty(&mut self, v: ValueId, ty: TypeId) {
        self.values[v].ty = Some(ty);
    }

    #[inline]
    pub fn ty(&self, v: ValueId) -> Option<TypeId> {
        self.values[v].ty
    }

    pub fn uses(&self, v: ValueId) -> &[Use] {
        &self.uses[v]
    }

    pub fn use_count(&self, v: ValueId) -> usize {
        self.uses[v].len()
    }

    /// Successor blocks of `b`, from its terminator.
    pub fn succs(&self, b: BlockId) -> SmallVec<[BlockId; 2]> {
        let mut out = SmallVec::new();
        if let Some(&last) = self.blocks[b].insts.last() {
            match self.values[last].kind {
                ValueKind::Jump { target } => out.push(target),
                ValueKind::Branch { then_, else_ } => {
                    out.push(then_);
                    out.push(else_);
                }
                _ => {}
            }
        }
        out
    }

    /// Predecessor blocks of `b`: the blocks of the terminators that name
    /// it, in terminator creation order.
    pub fn preds(&self, b: BlockId) -> SmallVec<[BlockId; 2]> {
        self.block_uses[b]
            .iter()
            .filter_map(|&term| self.values[term].block)
            .collect()
    }

    /// Position of `pred` in `b`'s predecessor order.
    pub fn pred_index(&self, b: BlockId, pred: BlockId) -> Option<usize> {
        self.preds(b).iter().position(|&p| p == pred)
    }

    // ------------------------------------------------------------------
    // Edge maintenance
    // ------------------------------------------------------------------

    fn remove_use(&mut self, producer: ValueId, user: ValueId, slot: usize) {
        let list = &mut self.uses[producer];
        if let Some(pos) = list.iter().position(|u| u.user == user && u.slot == slot) {
            list.swap_remove(pos);
        }
    }

    /// Point operand `slot` of `user` at `producer`, keeping both use
    /// lists consistent.
    pub fn connect(&mut self, user: ValueId, slot: usize, producer: ValueId) {
        let old = self.values[user].args[slot];
        if old == producer {
            return;
        }
        self.remove_use(old, user, slot);
        self.values[user].args[slot] = producer;
        self.uses[producer].push(Use { user, slot });
    }

    /// Remove `v` from its block and drop its operand edges. The value
    /// stays allocated (arenas never free) but nothing references it and
    /// it references nothing.
    pub fn detach(&mut self, v: ValueId) {
        if let Some(b) = self.values[v].block.take() {
            self.blocks[b].insts.retain(|&i| i != v);
        }
        for slot in 0..self.values[v].args.len() {
            let arg = self.values[v].args[slot];
            self.remove_use(arg, v, slot);
        }
        self.values[v].args.clear();
    }

    /// Rewrite every use of `old` to use `new`. Afterwards `old` has no
    /// uses and every moved edge points back at its user correctly.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let moved = std::mem::take(&mut self.uses[old]);
        for u in &moved {
            self.values[u.user].args[u.slot] = new;
        }
        self.uses[new].extend(moved);
    }

    // ------------------------------------------------------------------
    // Checking and dumping
    // ------------------------------------------------------------------

    /// Structural invariants: operand/use symmetry, phi arity against
    /// predecessor counts, terminators last in their block.
    pub fn verify(&self) -> Result<(), String> {
        for v in self.values.ids() {
            for (slot, &arg) in self.values[v].args.iter().enumerate() {
                let listed = self.uses[arg].iter().any(|u| u.user == v && u.slot == slot);
                if !listed {
                    return Err(format!("operand edge {v:?}[{slot}] -> {arg:?} missing from use list"));
                }
            }
            for u in &self.uses[v] {
                if self.values[u.user].args.get(u.slot) != Some(&v) {
                    return Err(format!("stale use {u:?} on {v:?}"));
                }
            }
        }
        for b in self.blocks.ids() {
            let insts = &self.blocks[b].insts;
            for (i, &v) in insts.iter().enumerate() {
                if self.values[v].is_terminator() && i + 1 != insts.len() {
                    return Err(format!("terminator {v:?} not last in {}", self.blocks[b].name));
                }
            }
            let npreds = self.preds(b).len();
            for &v in insts {
                if self.values[v].is_phi() && self.values[v].args.len() != npreds {
                    return Err(format!(
                        "phi {v:?} arity {} != {} preds in {}",
                        self.values[v].args.len(),
                        npreds,
                        self.blocks[b].name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Human-readable dump, one block per paragraph.
    pub fn dump(&self, ti: &TypeInfo) -> String {
        let mut out = String::new();
        for b in self.blocks.ids() {
            let _ = writeln!(out, "{}: ; preds {:?}", self.blocks[b].name, self.preds(b));
            for &v in &self.blocks[b].insts {
                let data = &self.values[v];
                let ty = match data.ty {
                    Some(t) => ti.name(t),
                    None => "?",
                };
                let _ = match &data.kind {
                    ValueKind::Const(c) => writeln!(out, "  {v:?}: {ty} = const {c:?}"),
                    ValueKind::Var(name) => writeln!(out, "  {v:?}: {ty} = var {name}"),
                    ValueKind::ExtractArg(i) => writeln!(out, "  {v:?}: {ty} = extract arg{i}"),
                    ValueKind::StoreArg(i) => {
                        writeln!(out, "  {v:?}: store arg{i} <- {:?}", data.args[0])
                    }
                    ValueKind::Assign => writeln!(out, "  {v:?}: {ty} = {:?}", data.args[0]),
                    ValueKind::Call(f) => {
                        writeln!(out, "  {v:?}: {ty} = {} {:?}", ti.fn_name(*f), data.args)
                    }
                    ValueKind::Phi => writeln!(out, "  {v:?}: {ty} = phi {:?}", data.args),
                    ValueKind::Jump { target } => writeln!(out, "  jump {target:?}"),
                    ValueKind::Branch { then_, else_ } => {
                        writeln!(out, "  branch {:?} ? {then_:?} : {else_:?}", data.args[0])
                    }
                };
            }
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
