//! Per-site compilation cache and dispatch.
//!
//! Each `for` statement in a program is a compilation site, keyed by its
//! [`SiteId`]. The first time a site is dispatched, the loop is compiled
//! against the types currently in scope and the result is cached together
//! with its signature: the full list of captured variables and the exact
//! type each had at compile time. Later dispatches run the cached code
//! only when every captured slot still has its signature type; anything
//! else is a guard miss and the caller interprets that occurrence, the
//! entry staying cached for when the original types come back.
//!
//! A site whose compilation bails out is marked failed permanently;
//! re-dispatching it is a single map lookup that says "interpret".

use rustc_hash::FxHashMap;

use mira_parser::{ForStmt, SiteId};
use mira_runtime::{RuntimeFault, Scope, Value};

use crate::backend::NativeFunction;
use crate::codegen;
use crate::convert;
use crate::error::Bailout;
use crate::infer;
use crate::typeinfo::{TypeId, TypeInfo};

// ============================================================================
// Signatures
// ============================================================================

/// One guarded capture: the variable's name and the type it must still
/// have for the compiled code to be valid.
#[derive(Debug, Clone)]
pub struct SigSlot {
    pub name: String,
    pub ty: TypeId,
}

/// The guard for a compiled entry. Absent bindings classify as boxed, so
/// a variable that was unbound at compile time is still unbound-or-boxed
/// compatible at reuse.
#[derive(Debug, Clone)]
pub struct Signature {
    slots: Vec<SigSlot>,
}

impl Signature {
    pub fn new(slots: Vec<SigSlot>) -> Signature {
        Signature { slots }
    }

    pub fn slots(&self) -> &[SigSlot] {
        &self.slots
    }

    /// Exact type equality on every slot. Pure: looks, never touches.
    pub fn matches(&self, ti: &TypeInfo, scope: &Scope) -> bool {
        self.slots.iter().all(|slot| {
            let current = match scope.get(&slot.name) {
                Some(v) => ti.type_of(v),
                None => Some(ti.any),
            };
            current == Some(slot.ty)
        })
    }
}

// ============================================================================
// Entries
// ============================================================================

struct CompiledEntry {
    function: NativeFunction,
    sig: Signature,
    /// Reused marshalling buffer; cleared after every run.
    staging: Vec<Value>,
}

impl CompiledEntry {
    /// Marshal the captures in, run, and write the results back. A slot
    /// that comes back `Undef` was never written (a zero-trip loop) and
    /// the binding is left alone.
    fn execute(&mut self, scope: &mut Scope) -> Result<(), RuntimeFault> {
        self.staging.clear();
        for slot in self.sig.slots() {
            self.staging
                .push(scope.get(&slot.name).cloned().unwrap_or(Value::Undef));
        }
        let result = self.function.invoke(&mut self.staging);
        if result.is_ok() {
            for (slot, value) in self.sig.slots().iter().zip(self.staging.drain(..)) {
                if !value.is_undef() {
                    scope.set(&slot.name, value);
                }
            }
        } else {
            self.staging.clear();
        }
        result
    }
}

enum SiteState {
    Compiled(CompiledEntry),
    /// Compilation bailed out; never retried.
    Failed,
}

// ============================================================================
// Dispatch
// ============================================================================

/// Dispatch counters, exposed for diagnostics and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Loops offered to the specializer.
    pub attempts: u64,
    /// Runs of already-cached code.
    pub hits: u64,
    /// Cached code rejected by its signature.
    pub guard_misses: u64,
    pub compiles: u64,
    pub bailouts: u64,
}

impl DispatchStats {
    pub fn hit_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            (self.hits + self.compiles) as f64 / self.attempts as f64
        }
    }
}

/// The specializer: owns the type registry, the per-site cache and the
/// counters. The evaluator offers every `for` statement here first and
/// interprets whenever the answer is `false`.
pub struct TreeJit {
    typeinfo: TypeInfo,
    sites: FxHashMap<SiteId, SiteState>,
    stats: DispatchStats,
}

impl TreeJit {
    pub fn new() -> TreeJit {
        TreeJit {
            typeinfo: TypeInfo::new(),
            sites: FxHashMap::default(),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn typeinfo(&self) -> &TypeInfo {
        &self.typeinfo
    }

    /// Try to run `stmt` natively against `scope`. `Ok(true)` means the
    /// loop ran to completion (bindings updated); `Ok(false)` means the
    /// caller must interpret it; a fault is a language-level error that
    /// interpretation of the same loop would also have raised.
    pub fn try_execute(&mut self, scope: &mut Scope, stmt: &ForStmt) -> Result<bool, RuntimeFault> {
        self.stats.attempts += 1;
        match self.sites.get_mut(&stmt.site) {
            Some(SiteState::Failed) => Ok(false),
            Some(SiteState::Compiled(entry)) => {
                if entry.sig.matches(&self.typeinfo, scope) {
                    self.stats.hits += 1;
                    entry.execute(scope)?;
                    Ok(true)
                } else {
                    self.stats.guard_misses += 1;
                    log::debug!("site {}: signature mismatch, interpreting", stmt.site);
                    Ok(false)
                }
            }
            None => match self.compile(scope, stmt) {
                Ok(entry) => {
                    self.stats.compiles += 1;
                    let state = self
                        .sites
                        .entry(stmt.site)
                        .or_insert(SiteState::Compiled(entry));
                    if let SiteState::Compiled(entry) = state {
                        entry.execute(scope)?;
                    }
                    Ok(true)
                }
                Err(bailout) => {
                    self.stats.bailouts += 1;
                    if bailout.is_internal() {
                        log::warn!("site {}: {bailout}", stmt.site);
                    } else {
                        log::debug!("site {}: bailout: {bailout}", stmt.site);
                    }
                    self.sites.insert(stmt.site, SiteState::Failed);
                    Ok(false)
                }
            },
        }
    }

    fn compile(&self, scope: &Scope, stmt: &ForStmt) -> Result<CompiledEntry, Bailout> {
        let mut ssa = convert::build(&self.typeinfo, scope, stmt)?;
        infer::infer(&self.typeinfo, &mut ssa.graph)?;
        let program = codegen::lower(&self.typeinfo, &ssa)?;
        let function = NativeFunction::new(program);
        log::debug!(
            "site {}: compiled {} captures into {} ops",
            stmt.site,
            ssa.args.len(),
            function.num_ops()
        );
        let slots = ssa
            .args
            .iter()
            .map(|a| SigSlot { name: a.name.clone(), ty: a.ty })
            .collect();
        Ok(CompiledEntry {
            function,
            sig: Signature::new(slots),
            staging: Vec::new(),
        })
    }
}

impl Default for TreeJit {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
