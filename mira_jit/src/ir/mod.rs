//! Intermediate representation: arenas, the SSA graph and dominance.

pub mod arena;
pub mod dom;
pub mod graph;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use dom::DomTree;
pub use graph::{BlockId, Constant, Graph, Use, ValueId, ValueKind};
