//! Backtracking template search.
//!
//! The static plan buckets triples by how selective their access path is and
//! records which triples share each replacement name. At run time the engine
//! walks the triples in plan order, resolves each position against the
//! current bindings, iterates the matching store shape and recurses; a fully
//! bound template emits one result row. Bindings are restored on every dead
//! branch, so rows never leak partial state into each other.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::{ItemValue, ResultRow, Template, TemplateItem};
use crate::storage::{Store, Triple, TripleIter};
use crate::types::{ElementId, ElementType, Result, StoreError};

/// Row delivery decision of a search callback.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SearchFlow {
    /// Keep searching.
    Continue,
    /// Halt after the current row; what was found so far is kept.
    Stop,
    /// Abort the whole search with an error.
    Error,
}

/// All rows matched by one search.
pub struct SearchResult {
    rows: Vec<Vec<ElementId>>,
    replacements: FxHashMap<String, usize>,
}

impl SearchResult {
    /// Number of matched rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing matched.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row accessor.
    pub fn row(&self, i: usize) -> Option<ResultRow<'_>> {
        self.rows.get(i).map(|addrs| ResultRow {
            addrs,
            replacements: &self.replacements,
        })
    }

    /// Iterates all rows.
    pub fn iter(&self) -> impl Iterator<Item = ResultRow<'_>> {
        self.rows.iter().map(|addrs| ResultRow {
            addrs,
            replacements: &self.replacements,
        })
    }
}

/// Priority buckets, most selective first.
const AFA: usize = 0;
const FAF: usize = 1;
const AAF: usize = 2;
/// Fixed source, target type known and node-like.
const FAN: usize = 3;
/// Fixed source, target shape unknown.
const FAE: usize = 4;
const AAA: usize = 5;

/// Store-independent search plan, cached on the template.
pub(crate) struct StaticPlan {
    /// Triple indices per priority bucket, template order within a bucket.
    pub(crate) buckets: [Vec<usize>; 6],
    /// Per triple and item position: other triples sharing the item's name.
    pub(crate) deps: Vec<[Vec<usize>; 3]>,
    /// Equality group of each triple (same item values).
    pub(crate) groups: Vec<usize>,
    pub(crate) group_count: usize,
}

fn statically_fixed(item: &TemplateItem) -> bool {
    item.is_fixed_addr()
}

fn effective_type(template: &Template, item: &TemplateItem) -> Option<ElementType> {
    match &item.value {
        ItemValue::Type(t) => Some(*t),
        ItemValue::Replacement => item
            .name
            .as_ref()
            .and_then(|n| template.named_types.get(n))
            .copied(),
        ItemValue::Addr(_) => None,
    }
}

fn priority(template: &Template, items: &[TemplateItem; 3]) -> usize {
    let s = statically_fixed(&items[0]);
    let c = statically_fixed(&items[1]);
    let t = statically_fixed(&items[2]);
    if c {
        AFA
    } else if s && t {
        FAF
    } else if t {
        AAF
    } else if s {
        match effective_type(template, &items[2]) {
            Some(tt) if tt.kind().is_some() && !tt.is_connector() => FAN,
            _ => FAE,
        }
    } else {
        AAA
    }
}

fn value_signature(item: &TemplateItem) -> ItemValue {
    item.value.clone()
}

impl StaticPlan {
    pub(crate) fn build(template: &Template) -> StaticPlan {
        let n = template.triples.len();
        let mut buckets: [Vec<usize>; 6] = Default::default();
        for (i, items) in template.triples.iter().enumerate() {
            buckets[priority(template, items)].push(i);
        }

        // Name -> triples containing it.
        let mut by_name: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for (name, positions) in &template.name_positions {
            let entry = by_name.entry(name.as_str()).or_default();
            for pos in positions {
                let t = pos / 3;
                if !entry.contains(&t) {
                    entry.push(t);
                }
            }
        }
        let mut deps: Vec<[Vec<usize>; 3]> = vec![Default::default(); n];
        for (i, items) in template.triples.iter().enumerate() {
            for (j, item) in items.iter().enumerate() {
                if let Some(name) = &item.name {
                    if let Some(sharing) = by_name.get(name.as_str()) {
                        deps[i][j] = sharing.iter().copied().filter(|t| *t != i).collect();
                    }
                }
            }
        }

        // A fixed-source triple reachable from its own dependents forms a
        // cycle; drop its first-position dependency edge so ordering stays
        // acyclic along that chain.
        for i in 0..n {
            if statically_fixed(&template.triples[i][0]) && reaches_back(&deps, i) {
                deps[i][0].clear();
            }
        }

        // Group structurally equal triples for used-edge suppression.
        let mut groups = vec![0usize; n];
        let mut signatures: Vec<[ItemValue; 3]> = Vec::new();
        for (i, items) in template.triples.iter().enumerate() {
            let sig = [
                value_signature(&items[0]),
                value_signature(&items[1]),
                value_signature(&items[2]),
            ];
            match signatures.iter().position(|s| *s == sig) {
                Some(g) => groups[i] = g,
                None => {
                    groups[i] = signatures.len();
                    signatures.push(sig);
                }
            }
        }
        StaticPlan {
            buckets,
            deps,
            groups,
            group_count: signatures.len(),
        }
    }

    /// Processing order: the seed triple, its dependency closure, then every
    /// remaining triple in bucket order.
    fn order(&self, seed: usize, n: usize) -> Vec<usize> {
        let mut order = Vec::with_capacity(n);
        let mut seen = vec![false; n];
        let mut queue = VecDeque::new();
        let mut seeds = vec![seed];
        for bucket in &self.buckets {
            seeds.extend(bucket.iter().copied());
        }
        for s in seeds {
            queue.push_back(s);
            while let Some(i) = queue.pop_front() {
                if seen[i] {
                    continue;
                }
                seen[i] = true;
                order.push(i);
                for slot in &self.deps[i] {
                    for dep in slot {
                        if !seen[*dep] {
                            queue.push_back(*dep);
                        }
                    }
                }
            }
        }
        order
    }
}

fn reaches_back(deps: &[[Vec<usize>; 3]], origin: usize) -> bool {
    let mut seen = FxHashSet::default();
    let mut queue: VecDeque<usize> = deps[origin]
        .iter()
        .flatten()
        .copied()
        .collect();
    while let Some(i) = queue.pop_front() {
        if i == origin {
            return true;
        }
        if seen.insert(i) {
            queue.extend(deps[i].iter().flatten().copied());
        }
    }
    false
}

enum Resolved {
    Fixed(ElementId),
    Mask(ElementType),
}

/// Candidate rows for one triple under the current bindings.
enum TripleSource<'s> {
    Iter(TripleIter<'s>),
    /// All positions variable: scan every connector record.
    Scan {
        store: &'s Store,
        handles: std::vec::IntoIter<ElementId>,
        source: ElementType,
        connector: ElementType,
        target: ElementType,
    },
}

impl TripleSource<'_> {
    fn next(&mut self) -> Option<Triple> {
        match self {
            TripleSource::Iter(it) => it.next(),
            TripleSource::Scan {
                store,
                handles,
                source,
                connector,
                target,
            } => loop {
                let c = handles.next()?;
                let Ok(ct) = store.element_type(c) else {
                    continue;
                };
                if !ct.is_connector() || !connector.subsumes(&ct) {
                    continue;
                }
                let Ok((b, e)) = store.arc_info(c) else {
                    continue;
                };
                let Ok(bt) = store.element_type(b) else {
                    continue;
                };
                let Ok(et) = store.element_type(e) else {
                    continue;
                };
                if source.subsumes(&bt) && target.subsumes(&et) {
                    return Some([b, c, e]);
                }
            },
        }
    }
}

struct Engine<'s, 'cb> {
    store: &'s Store,
    template: &'s Template,
    order: Vec<usize>,
    bound: Vec<ElementId>,
    used: Vec<FxHashSet<ElementId>>,
    groups: Vec<usize>,
    in_struct: Option<ElementId>,
    membership: FxHashMap<ElementId, bool>,
    rows: Vec<Vec<ElementId>>,
    callback: Option<&'cb mut dyn FnMut(&ResultRow<'_>) -> SearchFlow>,
    flow: SearchFlow,
}

fn resolve(template: &Template, bound: &[ElementId], item: &TemplateItem) -> Resolved {
    if let ItemValue::Addr(id) = item.value {
        return Resolved::Fixed(id);
    }
    if let Some(name) = &item.name {
        if let Some(positions) = template.name_positions.get(name) {
            for pos in positions {
                if let Some(id) = bound.get(*pos) {
                    if id.is_valid() {
                        return Resolved::Fixed(*id);
                    }
                }
            }
        }
        if let Some(id) = template.named_addrs.get(name) {
            return Resolved::Fixed(*id);
        }
    }
    let mask = effective_type(template, item)
        .map(|t| t.searchable())
        .unwrap_or(ElementType::UNKNOWN);
    Resolved::Mask(mask)
}

fn source_for<'s>(
    store: &'s Store,
    template: &Template,
    bound: &[ElementId],
    t: usize,
) -> TripleSource<'s> {
    let items = &template.triples[t];
    let (s, c, g) = (
        resolve(template, bound, &items[0]),
        resolve(template, bound, &items[1]),
        resolve(template, bound, &items[2]),
    );
    use Resolved::{Fixed, Mask};
    match (s, c, g) {
        (Fixed(s), Mask(c), Mask(g)) => TripleSource::Iter(TripleIter::f_a_a(store, s, c, g)),
        (Mask(s), Mask(c), Fixed(g)) => TripleSource::Iter(TripleIter::a_a_f(store, s, c, g)),
        (Fixed(s), Mask(c), Fixed(g)) => TripleSource::Iter(TripleIter::f_a_f(store, s, c, g)),
        (Mask(s), Fixed(c), Mask(g)) => TripleSource::Iter(TripleIter::a_f_a(store, s, c, g)),
        (Fixed(s), Fixed(c), Mask(g)) => TripleSource::Iter(TripleIter::f_f_a(store, s, c, g)),
        (Mask(s), Fixed(c), Fixed(g)) => TripleSource::Iter(TripleIter::a_f_f(store, s, c, g)),
        (Fixed(s), Fixed(c), Fixed(g)) => TripleSource::Iter(TripleIter::f_f_f(store, s, c, g)),
        (Mask(s), Mask(c), Mask(g)) => TripleSource::Scan {
            store,
            handles: store.all_handles().collect::<Vec<_>>().into_iter(),
            source: s,
            connector: c,
            target: g,
        },
    }
}

impl Engine<'_, '_> {
    fn in_bounding_struct(&mut self, id: ElementId) -> bool {
        let Some(struct_id) = self.in_struct else {
            return true;
        };
        if let Some(known) = self.membership.get(&id) {
            return *known;
        }
        let member = TripleIter::f_a_f(
            self.store,
            struct_id,
            ElementType::EDGE_ACCESS_CONST_POS_PERM,
            id,
        )
        .next()
        .is_some();
        self.membership.insert(id, member);
        member
    }

    fn emit(&mut self) {
        let row = self.bound.clone();
        let template = self.template;
        if let Some(cb) = self.callback.as_mut() {
            let view = ResultRow {
                addrs: &row,
                replacements: &template.replacements,
            };
            self.flow = cb(&view);
        }
        self.rows.push(row);
    }

    fn search_depth(&mut self, depth: usize) {
        if self.flow != SearchFlow::Continue {
            return;
        }
        if depth == self.order.len() {
            self.emit();
            return;
        }
        let t = self.order[depth];
        let group = self.groups[t];
        let mut source = source_for(self.store, self.template, &self.bound, t);
        while let Some(m) = source.next() {
            if self.flow != SearchFlow::Continue {
                break;
            }
            if self.used[group].contains(&m[1]) {
                continue;
            }
            if !(self.in_bounding_struct(m[0])
                && self.in_bounding_struct(m[1])
                && self.in_bounding_struct(m[2]))
            {
                continue;
            }
            let base = t * 3;
            let snapshot = [self.bound[base], self.bound[base + 1], self.bound[base + 2]];
            self.bound[base..base + 3].copy_from_slice(&m);
            self.used[group].insert(m[1]);
            self.search_depth(depth + 1);
            self.used[group].remove(&m[1]);
            self.bound[base..base + 3].copy_from_slice(&snapshot);
        }
    }
}

/// Seed triple for the processing order: first occupant of the best bucket;
/// FAN/FAE buckets tie-break on the smallest current fan-out of the fixed
/// source.
fn pick_seed(plan: &StaticPlan, template: &Template, store: &Store) -> Option<usize> {
    for (bucket_id, bucket) in plan.buckets.iter().enumerate() {
        let Some(first) = bucket.first() else {
            continue;
        };
        if bucket_id != FAN && bucket_id != FAE {
            return Some(*first);
        }
        let fan_out = |t: usize| match template.triples[t][0].value {
            ItemValue::Addr(id) => store.output_connector_count(id),
            _ => u64::MAX,
        };
        return bucket.iter().copied().min_by_key(|t| fan_out(*t));
    }
    None
}

pub(crate) fn run(
    template: &Template,
    store: &Store,
    in_struct: Option<ElementId>,
    callback: Option<&mut dyn FnMut(&ResultRow<'_>) -> SearchFlow>,
) -> Result<SearchResult> {
    let empty = SearchResult {
        rows: Vec::new(),
        replacements: template.replacements.clone(),
    };
    if template.is_empty() {
        return Ok(empty);
    }
    let plan = template.plan();
    let Some(seed) = pick_seed(&plan, template, store) else {
        return Ok(empty);
    };
    let order = plan.order(seed, template.triples.len());
    trace!(?order, "template search order");

    let mut engine = Engine {
        store,
        template,
        order,
        bound: vec![ElementId::EMPTY; template.triples.len() * 3],
        used: vec![FxHashSet::default(); plan.group_count],
        groups: plan.groups.clone(),
        in_struct,
        membership: FxHashMap::default(),
        rows: Vec::new(),
        callback,
        flow: SearchFlow::Continue,
    };
    engine.search_depth(0);
    if engine.flow == SearchFlow::Error {
        return Err(StoreError::Internal("search aborted by callback"));
    }
    Ok(SearchResult {
        rows: engine.rows,
        replacements: template.replacements.clone(),
    })
}
