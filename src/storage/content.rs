//! Content store for link payloads.
//!
//! Two coupled dictionaries: a byte trie keyed by content whose terminal
//! nodes carry the list of links holding that content, and a handle map from
//! link to its content. Updating a link's content removes it from the old
//! terminal first (dropping the terminal when its list empties), so every
//! content value is stored once no matter how many links share it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::{ElementId, Result, StoreError};

const STRINGS_FILE: &str = "strings.scdb";
const LINKS_FILE: &str = "links.scdb";

#[derive(Default)]
struct TrieNode {
    children: FxHashMap<u8, Box<TrieNode>>,
    handles: Vec<ElementId>,
    terminal: bool,
}

impl TrieNode {
    fn is_dead(&self) -> bool {
        !self.terminal && self.children.is_empty()
    }
}

/// In-memory content dictionary with scdb persistence.
#[derive(Default)]
pub(crate) struct ContentStore {
    root: TrieNode,
    links: FxHashMap<ElementId, Arc<Vec<u8>>>,
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

impl ContentStore {
    /// Number of links carrying content.
    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }

    /// Sets or replaces the content of `id`.
    pub(crate) fn set(&mut self, id: ElementId, content: &[u8]) {
        if let Some(old) = self.links.get(&id) {
            if old.as_slice() == content {
                return;
            }
            let old = Arc::clone(old);
            remove_handle(&mut self.root, &old, 0, id);
        }
        let mut node = &mut self.root;
        for byte in content {
            node = node.children.entry(*byte).or_default();
        }
        node.terminal = true;
        if !node.handles.contains(&id) {
            node.handles.push(id);
        }
        self.links.insert(id, Arc::new(content.to_vec()));
    }

    /// Content of `id`, if any.
    pub(crate) fn get(&self, id: ElementId) -> Option<Arc<Vec<u8>>> {
        self.links.get(&id).cloned()
    }

    /// Drops the content of `id` (no-op when it has none).
    pub(crate) fn remove(&mut self, id: ElementId) {
        if let Some(old) = self.links.remove(&id) {
            remove_handle(&mut self.root, &old, 0, id);
        }
    }

    /// Links whose content equals `content` exactly.
    pub(crate) fn find_exact(&self, content: &[u8]) -> Vec<ElementId> {
        let mut node = &self.root;
        for byte in content {
            match node.children.get(byte) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        if node.terminal {
            node.handles.clone()
        } else {
            Vec::new()
        }
    }

    /// Links whose content contains `pattern`. Patterns no longer than
    /// `max_prefix` are answered from the trie as a prefix walk; longer ones
    /// fall back to a full scan.
    pub(crate) fn find_by_substring(&self, pattern: &[u8], max_prefix: usize) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        if pattern.len() <= max_prefix {
            let mut node = &self.root;
            for byte in pattern {
                match node.children.get(byte) {
                    Some(child) => node = child,
                    None => return out,
                }
            }
            collect_handles(node, &mut |id| {
                if seen.insert(id) {
                    out.push(id);
                }
            });
        } else {
            self.for_each_entry(&mut |content, handles| {
                if contains(content, pattern) {
                    for id in handles {
                        if seen.insert(*id) {
                            out.push(*id);
                        }
                    }
                }
            });
        }
        out
    }

    /// Distinct contents containing `pattern`, under the same prefix rule as
    /// [`ContentStore::find_by_substring`].
    pub(crate) fn find_contents_by_substring(
        &self,
        pattern: &[u8],
        max_prefix: usize,
    ) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.for_each_entry(&mut |content, _| {
            let hit = if pattern.len() <= max_prefix {
                content.len() >= pattern.len() && &content[..pattern.len()] == pattern
            } else {
                contains(content, pattern)
            };
            if hit {
                out.push(content.to_vec());
            }
        });
        out
    }

    fn for_each_entry(&self, f: &mut impl FnMut(&[u8], &[ElementId])) {
        fn walk(node: &TrieNode, buf: &mut Vec<u8>, f: &mut impl FnMut(&[u8], &[ElementId])) {
            if node.terminal {
                f(buf, &node.handles);
            }
            let mut keys: Vec<u8> = node.children.keys().copied().collect();
            keys.sort_unstable();
            for key in keys {
                if let Some(child) = node.children.get(&key) {
                    buf.push(key);
                    walk(child, buf, f);
                    buf.pop();
                }
            }
        }
        let mut buf = Vec::new();
        walk(&self.root, &mut buf, f);
    }

    /// Writes both dictionary files under `dir`, replacing them atomically.
    pub(crate) fn save(&self, dir: &Path) -> Result<()> {
        let mut strings = Vec::new();
        let mut links = Vec::new();
        let mut index = FxHashMap::default();
        let mut string_count = 0u32;
        let mut link_count = 0u32;
        for (id, content) in &self.links {
            let slot = *index.entry(Arc::clone(content)).or_insert_with(|| {
                let slot = string_count;
                string_count += 1;
                strings.extend_from_slice(&(content.len() as u32).to_le_bytes());
                strings.extend_from_slice(content);
                slot
            });
            links.extend_from_slice(&id.0.to_le_bytes());
            links.extend_from_slice(&slot.to_le_bytes());
            link_count += 1;
        }

        write_atomic(&dir.join(STRINGS_FILE), string_count, &strings)?;
        write_atomic(&dir.join(LINKS_FILE), link_count, &links)?;
        Ok(())
    }

    /// Rebuilds the store from the dictionary files under `dir`. Missing
    /// files yield an empty store.
    pub(crate) fn load(dir: &Path) -> Result<Self> {
        let strings_path = dir.join(STRINGS_FILE);
        let links_path = dir.join(LINKS_FILE);
        if !strings_path.exists() || !links_path.exists() {
            return Ok(ContentStore::default());
        }

        let raw = fs::read(&strings_path)?;
        let mut cur = Cursor::new(&raw);
        let count = cur.u32()?;
        let mut table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cur.u32()? as usize;
            table.push(cur.bytes(len)?.to_vec());
        }

        let raw = fs::read(&links_path)?;
        let mut cur = Cursor::new(&raw);
        let count = cur.u32()?;
        let mut store = ContentStore::default();
        for _ in 0..count {
            let id = ElementId(cur.u64()?);
            let slot = cur.u32()? as usize;
            let content = table
                .get(slot)
                .ok_or(StoreError::Read("link references missing string slot"))?;
            store.set(id, content);
        }
        Ok(store)
    }
}

fn collect_handles(node: &TrieNode, f: &mut impl FnMut(ElementId)) {
    if node.terminal {
        for id in &node.handles {
            f(*id);
        }
    }
    for child in node.children.values() {
        collect_handles(child, f);
    }
}

/// Unlinks `id` from the terminal of `content`, pruning dead branches.
/// Returns true when the visited node became prunable.
fn remove_handle(node: &mut TrieNode, content: &[u8], depth: usize, id: ElementId) -> bool {
    if depth == content.len() {
        node.handles.retain(|h| *h != id);
        if node.handles.is_empty() {
            node.terminal = false;
        }
    } else {
        let byte = content[depth];
        let prune = match node.children.get_mut(&byte) {
            Some(child) => remove_handle(child, content, depth + 1, id),
            None => false,
        };
        if prune {
            node.children.remove(&byte);
        }
    }
    node.is_dead()
}

fn write_atomic(path: &Path, count: u32, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("scdb.tmp");
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(&count.to_le_bytes());
    data.extend_from_slice(body);
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

struct Cursor<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Cursor { raw, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.raw.len())
            .ok_or(StoreError::Read("dictionary file truncated"))?;
        let out = &self.raw[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}
