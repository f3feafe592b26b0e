//! Typed-connector adjacency index.
//!
//! Connectors are registered per owning element under an additive signature
//! code computed from up to four type components. Registration fans a
//! connector out under every component-subset code (power set), so a later
//! query constrained on any axis combination resolves to exactly one code and
//! reads one slot chain. Slots are fixed-capacity runs of handles written
//! through to the backing channel; the in-memory chain keeps shared slot
//! cells so every subset list references the same physical slots.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::channel::FileChannel;
use crate::types::{
    Constancy, ElementId, ElementType, Kind, Persistence, Polarity, Result, StoreError,
};

/// Largest signature code any connector type can produce
/// (common-edge 3 + neg 8 + var 14 + temp 22).
pub(crate) const MAX_CONNECTOR_TYPE_CODE: u16 = 47;

fn syntactic_component(t: &ElementType) -> u16 {
    match t.kind() {
        Some(Kind::AccessArc) => 1,
        Some(Kind::CommonArc) => 2,
        Some(Kind::CommonEdge) => 3,
        _ => 0,
    }
}

fn polarity_component(t: &ElementType) -> u16 {
    match t.polarity() {
        Some(Polarity::Pos) => 4,
        Some(Polarity::Fuz) => 6,
        Some(Polarity::Neg) => 8,
        None => 0,
    }
}

fn constancy_component(t: &ElementType) -> u16 {
    match t.constancy() {
        Some(Constancy::Const) => 10,
        Some(Constancy::Var) => 14,
        None => 0,
    }
}

fn persistence_component(t: &ElementType) -> u16 {
    match t.persistence() {
        Some(Persistence::Perm) => 18,
        Some(Persistence::Temp) => 22,
        None => 0,
    }
}

fn components(t: &ElementType) -> SmallVec<[u16; 4]> {
    let mut out = SmallVec::new();
    for part in [
        syntactic_component(t),
        polarity_component(t),
        constancy_component(t),
        persistence_component(t),
    ] {
        if part != 0 {
            out.push(part);
        }
    }
    out
}

/// Signature code of a query mask: sum of the components of its constrained
/// axes. The unconstrained mask maps to code 0, the catch-all bucket.
pub(crate) fn connector_type_code(t: &ElementType) -> u16 {
    let code = components(t).iter().sum();
    debug_assert!(code <= MAX_CONNECTOR_TYPE_CODE);
    code
}

/// All subset codes a concrete connector type registers under, the catch-all
/// code 0 included.
pub(crate) fn connector_subtype_codes(t: &ElementType) -> SmallVec<[u16; 16]> {
    let parts = components(t);
    let mut out = SmallVec::new();
    for mask in 0u32..(1 << parts.len()) {
        let mut code = 0u16;
        for (i, part) in parts.iter().enumerate() {
            if mask & (1 << i) != 0 {
                code += part;
            }
        }
        if !out.contains(&code) {
            out.push(code);
        }
    }
    out
}

struct Slot {
    file_off: u64,
    capacity: usize,
    handles: Mutex<Vec<ElementId>>,
}

impl Slot {
    fn is_full(&self) -> bool {
        self.handles.lock().len() >= self.capacity
    }
}

type Chain = Vec<Arc<Slot>>;

/// One direction (input or output) of the typed-connector index.
pub(crate) struct AdjacencyIndex {
    channel: Arc<FileChannel>,
    chains: Mutex<FxHashMap<ElementId, FxHashMap<u16, Chain>>>,
    connectors_per_slot: usize,
    max_slots: u64,
    allocated_slots: Mutex<u64>,
}

impl AdjacencyIndex {
    pub(crate) fn new(
        channel: Arc<FileChannel>,
        connectors_per_slot: usize,
        max_slots: u64,
    ) -> Self {
        AdjacencyIndex {
            channel,
            chains: Mutex::new(FxHashMap::default()),
            connectors_per_slot,
            max_slots,
            allocated_slots: Mutex::new(0),
        }
    }

    fn alloc_slot(&self) -> Result<Arc<Slot>> {
        let mut allocated = self.allocated_slots.lock();
        if *allocated >= self.max_slots {
            return Err(StoreError::Internal("connector slot capacity exhausted"));
        }
        *allocated += 1;
        let bytes = (self.connectors_per_slot as u64) * 8;
        Ok(Arc::new(Slot {
            file_off: self.channel.reserve(bytes),
            capacity: self.connectors_per_slot,
            handles: Mutex::new(Vec::with_capacity(self.connectors_per_slot)),
        }))
    }

    /// Registers `connector` of concrete type `t` under `owner`. The slot
    /// write goes through to the backing channel.
    pub(crate) fn push(
        &self,
        owner: ElementId,
        connector: ElementId,
        t: &ElementType,
    ) -> Result<()> {
        let full = connector_type_code(t);
        let codes = connector_subtype_codes(t);
        let (slot, pos) = {
            let mut chains = self.chains.lock();
            let typed = chains.entry(owner).or_default();
            let tail_full = typed
                .get(&full)
                .and_then(|c| c.last())
                .map(|s| s.is_full())
                .unwrap_or(true);
            if tail_full {
                let slot = self.alloc_slot()?;
                for code in &codes {
                    typed.entry(*code).or_default().push(Arc::clone(&slot));
                }
            }
            let slot = match typed.get(&full).and_then(|c| c.last()) {
                Some(s) => Arc::clone(s),
                None => return Err(StoreError::Internal("typed connector chain vanished")),
            };
            let mut handles = slot.handles.lock();
            handles.push(connector);
            let pos = handles.len() - 1;
            drop(handles);
            (slot, pos)
        };
        self.channel
            .write_at(slot.file_off + (pos as u64) * 8, &connector.0.to_le_bytes())
    }

    /// Snapshot cursor over the chain of `owner` for the code of `mask`.
    pub(crate) fn cursor(&self, owner: ElementId, mask: &ElementType) -> ChainCursor {
        let code = connector_type_code(mask);
        let chains = self.chains.lock();
        let slots = chains
            .get(&owner)
            .and_then(|typed| typed.get(&code))
            .cloned()
            .unwrap_or_default();
        ChainCursor {
            slots,
            slot: 0,
            pos: 0,
        }
    }
}

/// Resumable position in a slot chain snapshot.
pub(crate) struct ChainCursor {
    slots: Chain,
    slot: usize,
    pos: usize,
}

impl ChainCursor {
    pub(crate) fn next(&mut self) -> Option<ElementId> {
        while let Some(slot) = self.slots.get(self.slot) {
            let handles = slot.handles.lock();
            if self.pos < handles.len() {
                let id = handles[self.pos];
                self.pos += 1;
                return Some(id);
            }
            if handles.len() < slot.capacity && self.slot + 1 == self.slots.len() {
                // Tail slot still filling; nothing more to see right now.
                // Mid-chain slots of a subset-code chain can be non-full too
                // (they fill at the pace of their own full-code chain), so
                // only the final slot ends the walk early.
                return None;
            }
            drop(handles);
            self.slot += 1;
            self.pos = 0;
        }
        None
    }
}
