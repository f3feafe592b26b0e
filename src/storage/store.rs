//! Element store: the explicitly constructed service object owning the
//! channel files, the cell arena, both adjacency directions and the content
//! dictionaries.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::adjacency::{AdjacencyIndex, ChainCursor};
use super::channel::FileChannel;
use super::content::ContentStore;
use super::options::StoreOptions;
use super::refs::{PinGuard, RefTable};
use crate::types::{ElementId, ElementType, Kind, Result, StoreError};

const ELEMENTS_FILE: &str = "elements_types.scdb";
const PAIRS_FILE: &str = "connectors_elements.scdb";
const INPUT_FILE: &str = "input_connectors.scdb";
const OUTPUT_FILE: &str = "output_connectors.scdb";

/// Serialized element record: handle, type bits, endpoint-pair offset and
/// the two adjacency-channel marks at creation time.
const RECORD_LEN: usize = 36;

fn encode_record(handle: u64, bits: u32, pair_off: u64, in_mark: u64, out_mark: u64) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..8].copy_from_slice(&handle.to_le_bytes());
    buf[8..12].copy_from_slice(&bits.to_le_bytes());
    buf[12..20].copy_from_slice(&pair_off.to_le_bytes());
    buf[20..28].copy_from_slice(&in_mark.to_le_bytes());
    buf[28..36].copy_from_slice(&out_mark.to_le_bytes());
    buf
}

struct RecordView {
    handle: u64,
    bits: u32,
    pair_off: u64,
}

fn decode_record(buf: &[u8; RECORD_LEN]) -> RecordView {
    RecordView {
        handle: u64::from_le_bytes(buf[0..8].try_into().unwrap_or([0; 8])),
        bits: u32::from_le_bytes(buf[8..12].try_into().unwrap_or([0; 4])),
        pair_off: u64::from_le_bytes(buf[12..20].try_into().unwrap_or([0; 8])),
    }
}

/// Semantic graph store.
///
/// All operations take `&self` and are safe to call from multiple threads;
/// per-element consistency comes from the cell lock and pin protocol, table
/// growth from the channel append cursors.
pub struct Store {
    opts: StoreOptions,
    elements: Arc<FileChannel>,
    pairs: Arc<FileChannel>,
    input: AdjacencyIndex,
    output: AdjacencyIndex,
    cells: Arc<RefTable>,
    content: RwLock<ContentStore>,
}

impl Store {
    /// Opens (creating if needed) the repository described by `opts`,
    /// replaying any existing records.
    pub fn open(opts: StoreOptions) -> Result<Store> {
        let dir = opts.path.clone();
        if dir.exists() && !dir.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a directory", dir.display()),
            )));
        }
        fs::create_dir_all(&dir)?;

        let clear = opts.clear_on_open;
        let elements = Arc::new(FileChannel::open(&dir.join(ELEMENTS_FILE), clear)?);
        let pairs = Arc::new(FileChannel::open(&dir.join(PAIRS_FILE), clear)?);
        // Adjacency channels are derived from the connector records and
        // rebuilt on every open.
        let input_ch = Arc::new(FileChannel::open(&dir.join(INPUT_FILE), true)?);
        let output_ch = Arc::new(FileChannel::open(&dir.join(OUTPUT_FILE), true)?);

        let max_slots = opts.max_segments as u64 * opts.slots_per_segment as u64;
        let per_slot = opts.connectors_per_slot as usize;
        let input = AdjacencyIndex::new(Arc::clone(&input_ch), per_slot, max_slots);
        let output = AdjacencyIndex::new(Arc::clone(&output_ch), per_slot, max_slots);

        let tomb_channel = Arc::clone(&elements);
        let cells = Arc::new(RefTable::new(
            opts.cell_segment_size,
            Box::new(move |index| {
                let off = 1 + (index as u64) * RECORD_LEN as u64;
                debug!(offset = off, "retiring element record");
                if let Err(err) = tomb_channel.write_at(off, &0u64.to_le_bytes()) {
                    warn!(%err, offset = off, "failed to tombstone element record");
                }
            }),
        ));

        let content = if clear {
            ContentStore::default()
        } else {
            ContentStore::load(&dir)?
        };

        let store = Store {
            opts,
            elements,
            pairs,
            input,
            output,
            cells,
            content: RwLock::new(content),
        };
        let replayed = store.replay()?;
        info!(
            path = %dir.display(),
            elements = replayed,
            links = store.content.read().len(),
            "opened store"
        );
        Ok(store)
    }

    fn replay(&self) -> Result<usize> {
        let end = self.elements.end();
        let mut off = 1u64;
        let mut count = 0usize;
        let mut buf = [0u8; RECORD_LEN];
        while off + RECORD_LEN as u64 <= end {
            self.elements.read_at(off, &mut buf)?;
            let rec = decode_record(&buf);
            if rec.handle != 0 {
                if rec.handle != off {
                    return Err(StoreError::Read("element record out of place"));
                }
                let t = ElementType::from_bits(rec.bits)?;
                let (begin, end_id) = if t.is_connector() && rec.pair_off != 0 {
                    let mut pair = [0u8; 16];
                    self.pairs.read_at(rec.pair_off, &mut pair)?;
                    (
                        ElementId(u64::from_le_bytes(pair[0..8].try_into().unwrap_or([0; 8]))),
                        ElementId(u64::from_le_bytes(pair[8..16].try_into().unwrap_or([0; 8]))),
                    )
                } else {
                    (ElementId::EMPTY, ElementId::EMPTY)
                };
                let index = (off - 1) as usize / RECORD_LEN;
                self.cells.create(index, rec.bits, begin, end_id, rec.pair_off);
                if t.is_connector() && begin.is_valid() && end_id.is_valid() {
                    self.output.push(begin, ElementId(off), &t)?;
                    self.input.push(end_id, ElementId(off), &t)?;
                    if let Some(cell) = self.index_of(begin).and_then(|i| self.cells.pin(i)) {
                        cell.bump_out_count();
                    }
                }
                count += 1;
            }
            off += RECORD_LEN as u64;
        }
        Ok(count)
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        if !id.is_valid() || (id.0 - 1) % RECORD_LEN as u64 != 0 {
            return None;
        }
        Some((id.0 - 1) as usize / RECORD_LEN)
    }

    pub(crate) fn pin(&self, id: ElementId) -> Option<PinGuard> {
        self.index_of(id).and_then(|i| self.cells.pin(i))
    }

    pub(crate) fn output_cursor(&self, id: ElementId, mask: &ElementType) -> ChainCursor {
        self.output.cursor(id, mask)
    }

    pub(crate) fn input_cursor(&self, id: ElementId, mask: &ElementType) -> ChainCursor {
        self.input.cursor(id, mask)
    }

    /// Every handle ever allocated, live or not, in record order.
    pub(crate) fn all_handles(&self) -> impl Iterator<Item = ElementId> {
        let count = (self.elements.end() - 1) / RECORD_LEN as u64;
        (0..count).map(|i| ElementId(1 + i * RECORD_LEN as u64))
    }

    fn create_element(&self, t: &ElementType, begin: ElementId, end: ElementId, pair_off: u64) -> Result<ElementId> {
        let off = self.elements.reserve(RECORD_LEN as u64);
        let bits = t.to_bits();
        // Adjacency marks stay zero; both directions are rebuilt from the
        // connector records on open.
        let record = encode_record(off, bits, pair_off, 0, 0);
        self.elements.write_at(off, &record)?;
        let index = (off - 1) as usize / RECORD_LEN;
        self.cells.create(index, bits, begin, end, pair_off);
        Ok(ElementId(off))
    }

    /// Creates a node element. The kind axis is filled with `Node` when
    /// unset; any other kind is rejected.
    pub fn create_node(&self, t: ElementType) -> Result<ElementId> {
        let t = match t.kind() {
            None => t.with_kind(Kind::Node),
            Some(Kind::Node) => t,
            Some(_) => {
                return Err(StoreError::InvalidParams(
                    "node type must be node-kinded".into(),
                ))
            }
        };
        t.check_axes()?;
        self.create_element(&t, ElementId::EMPTY, ElementId::EMPTY, 0)
    }

    /// Creates a link element able to carry content.
    pub fn create_link(&self, t: ElementType) -> Result<ElementId> {
        let t = match t.kind() {
            None => t.with_kind(Kind::Link),
            Some(Kind::Link) => t,
            Some(_) => {
                return Err(StoreError::InvalidParams(
                    "link type must be link-kinded".into(),
                ))
            }
        };
        t.check_axes()?;
        self.create_element(&t, ElementId::EMPTY, ElementId::EMPTY, 0)
    }

    /// Creates a connector of type `t` from `begin` to `end` and registers
    /// it in both adjacency directions.
    pub fn create_connector(
        &self,
        t: ElementType,
        begin: ElementId,
        end: ElementId,
    ) -> Result<ElementId> {
        if !t.is_connector() {
            return Err(StoreError::InvalidParams(
                "connector type must name a connector kind".into(),
            ));
        }
        // Endpoints stay pinned until both directions are registered.
        let begin_pin = self.pin(begin).ok_or(StoreError::NotAnElement(begin))?;
        let _end_pin = self.pin(end).ok_or(StoreError::NotAnElement(end))?;

        let mut pair = [0u8; 16];
        pair[0..8].copy_from_slice(&begin.0.to_le_bytes());
        pair[8..16].copy_from_slice(&end.0.to_le_bytes());
        let pair_off = self.pairs.append(&pair)?;

        let id = self.create_element(&t, begin, end, pair_off)?;
        self.output.push(begin, id, &t)?;
        self.input.push(end, id, &t)?;
        begin_pin.bump_out_count();
        Ok(id)
    }

    /// True when `id` names a live element.
    pub fn is_element(&self, id: ElementId) -> bool {
        self.index_of(id)
            .map(|i| self.cells.is_live(i))
            .unwrap_or(false)
    }

    /// The concrete type of a live element.
    pub fn element_type(&self, id: ElementId) -> Result<ElementType> {
        let pin = self.pin(id).ok_or(StoreError::NotAnElement(id))?;
        ElementType::from_bits(pin.type_bits())
    }

    /// Narrows the element's type with `extra` and writes the refined mask
    /// back to the record. Idempotent for already-present axes.
    pub fn change_element_subtype(&self, id: ElementId, extra: ElementType) -> Result<ElementType> {
        let index = self.index_of(id).ok_or(StoreError::NotAnElement(id))?;
        let refined = self.cells.with_locked(index, id, |cell| {
            let current = ElementType::from_bits(cell.type_bits())?;
            let refined = current.refine(&extra)?;
            cell.set_type_bits(refined.to_bits());
            Ok(refined)
        })?;
        self.elements
            .write_at(id.0 + 8, &refined.to_bits().to_le_bytes())?;
        Ok(refined)
    }

    /// Both endpoints of a connector.
    pub fn arc_info(&self, id: ElementId) -> Result<(ElementId, ElementId)> {
        let pin = self.pin(id).ok_or(StoreError::NotAnElement(id))?;
        if pin.pair_off() == 0 {
            return Err(StoreError::Read("element has no connector record"));
        }
        Ok((pin.begin(), pin.end()))
    }

    /// Source endpoint of a connector.
    pub fn arc_begin(&self, id: ElementId) -> Result<ElementId> {
        Ok(self.arc_info(id)?.0)
    }

    /// Target endpoint of a connector.
    pub fn arc_end(&self, id: ElementId) -> Result<ElementId> {
        Ok(self.arc_info(id)?.1)
    }

    /// Logically deletes an element. Visible immediately; the record
    /// tombstone is deferred while pins are held. Adjacency entries stay and
    /// are filtered lazily by traversals.
    pub fn free_element(&self, id: ElementId) -> Result<()> {
        let index = self.index_of(id).ok_or(StoreError::NotAnElement(id))?;
        let is_link = self
            .element_type(id)
            .map(|t| t.kind() == Some(Kind::Link))
            .unwrap_or(false);
        let freed_now = self.cells.free(index, id)?;
        if is_link {
            self.content.write().remove(id);
        }
        debug!(element = %id, immediate = freed_now, "freed element");
        Ok(())
    }

    /// Sets the content of a link element.
    pub fn set_link_content(&self, id: ElementId, content: &[u8]) -> Result<()> {
        let t = self.element_type(id)?;
        if t.kind() != Some(Kind::Link) {
            return Err(StoreError::InvalidParams(
                "content can only be set on link elements".into(),
            ));
        }
        self.content.write().set(id, content);
        Ok(())
    }

    /// Content of a link element; `NotFound` when it has none.
    pub fn link_content(&self, id: ElementId) -> Result<Vec<u8>> {
        if !self.is_element(id) {
            return Err(StoreError::NotAnElement(id));
        }
        self.content
            .read()
            .get(id)
            .map(|c| c.as_ref().clone())
            .ok_or(StoreError::NotFound)
    }

    /// Links whose content equals `content`.
    pub fn find_links_by_content(&self, content: &[u8]) -> Vec<ElementId> {
        self.content.read().find_exact(content)
    }

    /// Links whose content contains `pattern`; patterns no longer than
    /// `max_prefix` are answered as a trie prefix walk.
    pub fn find_links_by_substring(&self, pattern: &[u8], max_prefix: usize) -> Vec<ElementId> {
        self.content.read().find_by_substring(pattern, max_prefix)
    }

    /// Distinct contents containing `pattern`, under the same prefix rule.
    pub fn find_contents_by_substring(&self, pattern: &[u8], max_prefix: usize) -> Vec<Vec<u8>> {
        self.content
            .read()
            .find_contents_by_substring(pattern, max_prefix)
    }

    /// Number of outgoing connectors ever attached to `id` (tombstoned ones
    /// included); used by the search planner as a fan-out estimate.
    pub fn output_connector_count(&self, id: ElementId) -> u64 {
        self.pin(id).map(|p| p.out_count() as u64).unwrap_or(0)
    }

    /// Flushes all channels and persists the content dictionaries.
    pub fn save(&self) -> Result<()> {
        self.elements.sync()?;
        self.pairs.sync()?;
        self.content.read().save(&self.opts.path)?;
        info!(path = %self.opts.path.display(), "saved store");
        Ok(())
    }

    /// Repository directory.
    pub fn path(&self) -> &Path {
        &self.opts.path
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        debug!(path = %self.opts.path.display(), "closing store");
    }
}
