//! Concurrent element reference protocol.
//!
//! Every element owns a cell in a segmented arena: a state word (lock,
//! pending-deletion and retired bits), a pin counter and the hot record
//! fields as atomics. Readers pin a cell to keep its record observable;
//! deletion marks the cell pending and the last unpin retires it. The arena
//! only grows, so a cell address stays valid for the store's lifetime.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{ElementId, Result, StoreError};

const LOCKED: u32 = 0x1;
const LIVE: u32 = 0x2;
const PENDING: u32 = 0x4;
const RETIRED: u32 = 0x8;

/// Bounded spin budget for the per-cell lock bit.
const LOCK_ATTEMPTS: u32 = 1000;

/// Per-element cell: state word, pin counter and record fields.
pub(crate) struct ElementCell {
    state: AtomicU32,
    pins: AtomicU32,
    /// Serialized type mask (see `ElementType::to_bits`).
    bits: AtomicU32,
    /// Offset of the endpoint pair record for connectors, 0 otherwise.
    pair_off: AtomicU64,
    begin: AtomicU64,
    end: AtomicU64,
    out_count: AtomicU32,
}

impl ElementCell {
    fn unused() -> Self {
        ElementCell {
            state: AtomicU32::new(0),
            pins: AtomicU32::new(0),
            bits: AtomicU32::new(0),
            pair_off: AtomicU64::new(0),
            begin: AtomicU64::new(0),
            end: AtomicU64::new(0),
            out_count: AtomicU32::new(0),
        }
    }

    fn try_lock(&self) -> bool {
        for _ in 0..LOCK_ATTEMPTS {
            let state = self.state.load(Ordering::Acquire);
            if state & LOCKED == 0
                && self
                    .state
                    .compare_exchange_weak(
                        state,
                        state | LOCKED,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    fn unlock(&self) {
        self.state.fetch_and(!LOCKED, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        let state = self.state.load(Ordering::Acquire);
        state & LIVE != 0 && state & (PENDING | RETIRED) == 0
    }

    pub(crate) fn type_bits(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    pub(crate) fn set_type_bits(&self, bits: u32) {
        self.bits.store(bits, Ordering::Release);
    }

    pub(crate) fn pair_off(&self) -> u64 {
        self.pair_off.load(Ordering::Acquire)
    }

    pub(crate) fn begin(&self) -> ElementId {
        ElementId(self.begin.load(Ordering::Acquire))
    }

    pub(crate) fn end(&self) -> ElementId {
        ElementId(self.end.load(Ordering::Acquire))
    }

    pub(crate) fn bump_out_count(&self) {
        self.out_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn out_count(&self) -> u32 {
        self.out_count.load(Ordering::Acquire)
    }
}

struct CellSegment {
    cells: Vec<ElementCell>,
}

/// Shared handle to one cell; keeps its segment alive.
#[derive(Clone)]
pub(crate) struct CellRef {
    seg: Arc<CellSegment>,
    idx: usize,
}

impl std::ops::Deref for CellRef {
    type Target = ElementCell;

    fn deref(&self) -> &ElementCell {
        &self.seg.cells[self.idx]
    }
}

/// Hard-free hook invoked with the element index once the last pin drains
/// from a pending-deletion cell.
pub(crate) type Retirer = Box<dyn Fn(usize) + Send + Sync>;

/// RAII pin on a live element cell. While held, the cell's record fields
/// stay observable even if the element is freed concurrently.
pub(crate) struct PinGuard {
    table: Arc<RefTable>,
    cell: CellRef,
    index: usize,
}

impl std::ops::Deref for PinGuard {
    type Target = ElementCell;

    fn deref(&self) -> &ElementCell {
        &self.cell
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        let prev = self.cell.pins.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            // Last pin out: finish a deferred free.
            let state = self.cell.state.load(Ordering::Acquire);
            if state & PENDING != 0 && state & RETIRED == 0 {
                self.cell.state.fetch_or(RETIRED, Ordering::AcqRel);
                (self.table.retire)(self.index);
            }
        }
    }
}

/// Segmented cell arena indexed by dense element index.
pub(crate) struct RefTable {
    segments: RwLock<Vec<Arc<CellSegment>>>,
    seg_size: usize,
    retire: Retirer,
}

impl RefTable {
    pub(crate) fn new(seg_size: usize, retire: Retirer) -> Self {
        RefTable {
            segments: RwLock::new(Vec::new()),
            seg_size,
            retire,
        }
    }

    fn cell(&self, index: usize) -> Option<CellRef> {
        let segments = self.segments.read();
        let seg = segments.get(index / self.seg_size)?.clone();
        Some(CellRef {
            seg,
            idx: index % self.seg_size,
        })
    }

    /// Marks the cell at `index` live with the given record fields,
    /// growing the arena as needed.
    pub(crate) fn create(&self, index: usize, bits: u32, begin: ElementId, end: ElementId, pair_off: u64) {
        {
            let mut segments = self.segments.write();
            while segments.len() <= index / self.seg_size {
                let mut cells = Vec::with_capacity(self.seg_size);
                cells.resize_with(self.seg_size, ElementCell::unused);
                segments.push(Arc::new(CellSegment { cells }));
            }
        }
        let cell = match self.cell(index) {
            Some(c) => c,
            None => return,
        };
        cell.bits.store(bits, Ordering::Release);
        cell.pair_off.store(pair_off, Ordering::Release);
        cell.begin.store(begin.0, Ordering::Release);
        cell.end.store(end.0, Ordering::Release);
        cell.state.fetch_or(LIVE, Ordering::AcqRel);
    }

    /// True when the cell exists, is live and not pending deletion.
    pub(crate) fn is_live(&self, index: usize) -> bool {
        self.cell(index).map(|c| c.is_live()).unwrap_or(false)
    }

    /// Pins a live cell, returning `None` for absent, freed or
    /// lock-contended cells.
    pub(crate) fn pin(self: &Arc<Self>, index: usize) -> Option<PinGuard> {
        let cell = self.cell(index)?;
        if !cell.try_lock() {
            return None;
        }
        let live = cell.is_live();
        if live {
            cell.pins.fetch_add(1, Ordering::AcqRel);
        }
        cell.unlock();
        live.then(|| PinGuard {
            table: Arc::clone(self),
            cell,
            index,
        })
    }

    /// Runs `f` with the cell locked; the cell must be live.
    pub(crate) fn with_locked<T>(
        &self,
        index: usize,
        id: ElementId,
        f: impl FnOnce(&ElementCell) -> Result<T>,
    ) -> Result<T> {
        let cell = self
            .cell(index)
            .ok_or(StoreError::NotAnElement(id))?;
        if !cell.try_lock() {
            return Err(StoreError::Internal("element lock attempts exhausted"));
        }
        let out = if cell.is_live() {
            f(&cell)
        } else {
            Err(StoreError::NotAnElement(id))
        };
        cell.unlock();
        out
    }

    /// Marks the cell pending deletion. Returns `Ok(true)` when the cell had
    /// no pins and was retired on the spot, `Ok(false)` when the retire is
    /// deferred to the last unpin.
    pub(crate) fn free(&self, index: usize, id: ElementId) -> Result<bool> {
        let freed_now = self.with_locked(index, id, |cell| {
            cell.state.fetch_or(PENDING, Ordering::AcqRel);
            let pinned = cell.pins.load(Ordering::Acquire) > 0;
            if !pinned {
                cell.state.fetch_or(RETIRED, Ordering::AcqRel);
            }
            Ok(!pinned)
        })?;
        if freed_now {
            (self.retire)(index);
        }
        Ok(freed_now)
    }
}
