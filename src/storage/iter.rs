//! Basic triple iteration over (source, connector, target).
//!
//! Seven shapes, named by which positions are fixed (`f`) versus typed
//! wildcards (`a`). The shape decides the access path: a fixed source walks
//! its output chain, a fixed target its input chain, and a fixed connector
//! resolves in O(1) from its endpoint pair. Iteration is resumable plain
//! state, and elements freed mid-iteration are filtered silently through the
//! pin protocol.

use super::adjacency::ChainCursor;
use super::store::Store;
use crate::types::{ElementId, ElementType, Result, StoreError};

/// One matched (source, connector, target) row.
pub type Triple = [ElementId; 3];

/// A triple-position parameter: a concrete handle or a type mask.
#[derive(Copy, Clone, Debug)]
pub enum IterParam {
    /// Concrete element handle.
    Fixed(ElementId),
    /// Type mask wildcard.
    Typed(ElementType),
}

impl IterParam {
    fn fixed(&self) -> Option<ElementId> {
        match self {
            IterParam::Fixed(id) => Some(*id),
            IterParam::Typed(_) => None,
        }
    }

    fn mask(&self) -> Option<ElementType> {
        match self {
            IterParam::Fixed(_) => None,
            IterParam::Typed(t) => Some(*t),
        }
    }
}

/// Which positions of the triple are fixed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TripleKind {
    /// Fixed source, typed connector and target.
    Faa,
    /// Typed source and connector, fixed target.
    Aaf,
    /// Fixed source and target, typed connector.
    Faf,
    /// Fixed connector, typed endpoints.
    Afa,
    /// Fixed source and connector.
    Ffa,
    /// Fixed connector and target.
    Aff,
    /// All three fixed.
    Fff,
}

enum IterState {
    /// Walking a slot chain of the anchoring element.
    Scan(ChainCursor),
    /// Fixed-connector shapes: at most one row.
    Single,
    Done,
}

/// Resumable iterator over matching triples.
pub struct TripleIter<'s> {
    store: &'s Store,
    kind: TripleKind,
    source: IterParam,
    connector: IterParam,
    target: IterParam,
    state: IterState,
    last: Option<Triple>,
}

impl<'s> TripleIter<'s> {
    /// Builds an iterator, validating that the parameter shapes match the
    /// requested kind.
    pub fn new(
        store: &'s Store,
        kind: TripleKind,
        p1: IterParam,
        p2: IterParam,
        p3: IterParam,
    ) -> Result<TripleIter<'s>> {
        let shape = |p: &IterParam| matches!(p, IterParam::Fixed(_));
        let expected = match kind {
            TripleKind::Faa => (true, false, false),
            TripleKind::Aaf => (false, false, true),
            TripleKind::Faf => (true, false, true),
            TripleKind::Afa => (false, true, false),
            TripleKind::Ffa => (true, true, false),
            TripleKind::Aff => (false, true, true),
            TripleKind::Fff => (true, true, true),
        };
        if (shape(&p1), shape(&p2), shape(&p3)) != expected {
            return Err(StoreError::InvalidParams(format!(
                "parameter shape does not match iterator kind {kind:?}"
            )));
        }
        Ok(Self::build(store, kind, p1, p2, p3))
    }

    fn build(
        store: &'s Store,
        kind: TripleKind,
        source: IterParam,
        connector: IterParam,
        target: IterParam,
    ) -> TripleIter<'s> {
        let state = match kind {
            TripleKind::Faa => match source.fixed() {
                Some(src) if store.is_element(src) => {
                    let mask = connector.mask().unwrap_or(ElementType::UNKNOWN);
                    IterState::Scan(store.output_cursor(src, &mask))
                }
                _ => IterState::Done,
            },
            TripleKind::Aaf | TripleKind::Faf => match target.fixed() {
                Some(tgt)
                    if store.is_element(tgt)
                        && source.fixed().map(|s| store.is_element(s)).unwrap_or(true) =>
                {
                    let mask = connector.mask().unwrap_or(ElementType::UNKNOWN);
                    IterState::Scan(store.input_cursor(tgt, &mask))
                }
                _ => IterState::Done,
            },
            TripleKind::Afa | TripleKind::Ffa | TripleKind::Aff | TripleKind::Fff => {
                let anchors_live = connector
                    .fixed()
                    .map(|c| store.is_element(c))
                    .unwrap_or(false)
                    && source.fixed().map(|s| store.is_element(s)).unwrap_or(true)
                    && target.fixed().map(|t| store.is_element(t)).unwrap_or(true);
                if anchors_live {
                    IterState::Single
                } else {
                    IterState::Done
                }
            }
        };
        TripleIter {
            store,
            kind,
            source,
            connector,
            target,
            state,
            last: None,
        }
    }

    /// Fixed source, typed connector and target.
    pub fn f_a_a(store: &'s Store, src: ElementId, conn: ElementType, tgt: ElementType) -> Self {
        Self::build(
            store,
            TripleKind::Faa,
            IterParam::Fixed(src),
            IterParam::Typed(conn),
            IterParam::Typed(tgt),
        )
    }

    /// Typed source and connector, fixed target.
    pub fn a_a_f(store: &'s Store, src: ElementType, conn: ElementType, tgt: ElementId) -> Self {
        Self::build(
            store,
            TripleKind::Aaf,
            IterParam::Typed(src),
            IterParam::Typed(conn),
            IterParam::Fixed(tgt),
        )
    }

    /// Fixed source and target, typed connector.
    pub fn f_a_f(store: &'s Store, src: ElementId, conn: ElementType, tgt: ElementId) -> Self {
        Self::build(
            store,
            TripleKind::Faf,
            IterParam::Fixed(src),
            IterParam::Typed(conn),
            IterParam::Fixed(tgt),
        )
    }

    /// Fixed connector, typed endpoints.
    pub fn a_f_a(store: &'s Store, src: ElementType, conn: ElementId, tgt: ElementType) -> Self {
        Self::build(
            store,
            TripleKind::Afa,
            IterParam::Typed(src),
            IterParam::Fixed(conn),
            IterParam::Typed(tgt),
        )
    }

    /// Fixed source and connector, typed target.
    pub fn f_f_a(store: &'s Store, src: ElementId, conn: ElementId, tgt: ElementType) -> Self {
        Self::build(
            store,
            TripleKind::Ffa,
            IterParam::Fixed(src),
            IterParam::Fixed(conn),
            IterParam::Typed(tgt),
        )
    }

    /// Typed source, fixed connector and target.
    pub fn a_f_f(store: &'s Store, src: ElementType, conn: ElementId, tgt: ElementId) -> Self {
        Self::build(
            store,
            TripleKind::Aff,
            IterParam::Typed(src),
            IterParam::Fixed(conn),
            IterParam::Fixed(tgt),
        )
    }

    /// All three positions fixed.
    pub fn f_f_f(store: &'s Store, src: ElementId, conn: ElementId, tgt: ElementId) -> Self {
        Self::build(
            store,
            TripleKind::Fff,
            IterParam::Fixed(src),
            IterParam::Fixed(conn),
            IterParam::Fixed(tgt),
        )
    }

    /// Position of the last matched triple.
    pub fn value(&self, pos: usize) -> Option<ElementId> {
        self.last.and_then(|t| t.get(pos).copied())
    }

    fn type_of_live(&self, id: ElementId) -> Option<ElementType> {
        let pin = self.store.pin(id)?;
        ElementType::from_bits(pin.type_bits()).ok()
    }

    /// Source/target position test: fixed equality or live mask match.
    fn endpoint_matches(&self, param: &IterParam, id: ElementId) -> bool {
        match param {
            IterParam::Fixed(want) => *want == id && self.store.is_element(id),
            IterParam::Typed(mask) => self
                .type_of_live(id)
                .map(|t| mask.subsumes(&t))
                .unwrap_or(false),
        }
    }

    fn check_connector(&self, c: ElementId) -> Option<(ElementId, ElementId)> {
        let pin = self.store.pin(c)?;
        if pin.pair_off() == 0 {
            return None;
        }
        let concrete = ElementType::from_bits(pin.type_bits()).ok()?;
        if let Some(mask) = self.connector.mask() {
            // Signature codes can collide across component subsets; the
            // concrete type is always re-checked here.
            if !mask.subsumes(&concrete) {
                return None;
            }
        }
        Some((pin.begin(), pin.end()))
    }

    fn next_scan(&mut self) -> Option<Triple> {
        loop {
            let c = match &mut self.state {
                IterState::Scan(cursor) => cursor.next()?,
                _ => return None,
            };
            let (begin, end) = match self.check_connector(c) {
                Some(pair) => pair,
                None => continue,
            };
            let (source_ok, target_ok) = (
                self.endpoint_matches(&self.source, begin),
                self.endpoint_matches(&self.target, end),
            );
            if source_ok && target_ok {
                return Some([begin, c, end]);
            }
        }
    }

    fn next_single(&mut self) -> Option<Triple> {
        self.state = IterState::Done;
        let c = self.connector.fixed()?;
        let (begin, end) = self.check_connector(c)?;
        if self.endpoint_matches(&self.source, begin) && self.endpoint_matches(&self.target, end) {
            Some([begin, c, end])
        } else {
            None
        }
    }
}

impl Iterator for TripleIter<'_> {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        let found = match self.state {
            IterState::Scan(_) => self.next_scan(),
            IterState::Single => self.next_single(),
            IterState::Done => None,
        };
        if found.is_none() {
            self.state = IterState::Done;
        } else {
            self.last = found;
        }
        found
    }
}
