//! Core identifier, type and error definitions shared by the whole crate.

use std::fmt;
use std::io;

/// Stable opaque handle of a graph element.
///
/// The value is the byte offset of the element record inside the
/// `elements_types` channel; `0` is the "no element" sentinel. Handles are
/// never reused for a different element while any pin on them exists.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ElementId(pub u64);

impl ElementId {
    /// The "no element" sentinel.
    pub const EMPTY: ElementId = ElementId(0);

    /// Returns true for the empty sentinel.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true for any non-sentinel handle.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural kind of an element.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Kind {
    /// Plain node.
    Node,
    /// Node that can carry content.
    Link,
    /// Membership arc.
    AccessArc,
    /// Directed common arc.
    CommonArc,
    /// Non-oriented common edge.
    CommonEdge,
}

impl Kind {
    /// Returns true for the three connector kinds.
    pub fn is_connector(self) -> bool {
        matches!(self, Kind::AccessArc | Kind::CommonArc | Kind::CommonEdge)
    }
}

/// Constancy axis: constant or variable element.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Constancy {
    /// Constant element.
    Const,
    /// Variable element (template side).
    Var,
}

/// Polarity axis of access arcs.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Polarity {
    /// Positive membership.
    Pos,
    /// Negative membership.
    Neg,
    /// Fuzzy membership.
    Fuz,
}

/// Persistence axis of access arcs.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Persistence {
    /// Permanent connector.
    Perm,
    /// Temporary connector.
    Temp,
}

const BIT_NODE: u32 = 0x1;
const BIT_LINK: u32 = 0x2;
const BIT_ACCESS_ARC: u32 = 0x4;
const BIT_COMMON_ARC: u32 = 0x8;
const BIT_COMMON_EDGE: u32 = 0x10;
const BIT_CONST: u32 = 0x20;
const BIT_VAR: u32 = 0x40;
const BIT_POS: u32 = 0x80;
const BIT_NEG: u32 = 0x100;
const BIT_FUZ: u32 = 0x200;
const BIT_PERM: u32 = 0x400;
const BIT_TEMP: u32 = 0x800;

/// Element type as a tagged set of four independent axes.
///
/// `None` on an axis means "unconstrained": a wildcard when the value is used
/// as a query mask, an unset axis when it describes a concrete element. The
/// packed bitmask form exists only at the serialization boundary
/// ([`ElementType::to_bits`] / [`ElementType::from_bits`]).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ElementType {
    kind: Option<Kind>,
    constancy: Option<Constancy>,
    polarity: Option<Polarity>,
    persistence: Option<Persistence>,
}

impl ElementType {
    /// Fully unconstrained type (matches everything).
    pub const UNKNOWN: ElementType = ElementType {
        kind: None,
        constancy: None,
        polarity: None,
        persistence: None,
    };

    /// Any node.
    pub const NODE: ElementType = ElementType::UNKNOWN.with_kind(Kind::Node);
    /// Constant node.
    pub const NODE_CONST: ElementType = ElementType::NODE.with_constancy(Constancy::Const);
    /// Variable node.
    pub const NODE_VAR: ElementType = ElementType::NODE.with_constancy(Constancy::Var);
    /// Any link.
    pub const LINK: ElementType = ElementType::UNKNOWN.with_kind(Kind::Link);
    /// Constant link.
    pub const LINK_CONST: ElementType = ElementType::LINK.with_constancy(Constancy::Const);
    /// Variable link.
    pub const LINK_VAR: ElementType = ElementType::LINK.with_constancy(Constancy::Var);
    /// Any access arc.
    pub const EDGE_ACCESS: ElementType = ElementType::UNKNOWN.with_kind(Kind::AccessArc);
    /// Constant positive permanent access arc.
    pub const EDGE_ACCESS_CONST_POS_PERM: ElementType = ElementType::EDGE_ACCESS
        .with_constancy(Constancy::Const)
        .with_polarity(Polarity::Pos)
        .with_persistence(Persistence::Perm);
    /// Variable positive permanent access arc.
    pub const EDGE_ACCESS_VAR_POS_PERM: ElementType = ElementType::EDGE_ACCESS
        .with_constancy(Constancy::Var)
        .with_polarity(Polarity::Pos)
        .with_persistence(Persistence::Perm);
    /// Constant negative permanent access arc.
    pub const EDGE_ACCESS_CONST_NEG_PERM: ElementType = ElementType::EDGE_ACCESS
        .with_constancy(Constancy::Const)
        .with_polarity(Polarity::Neg)
        .with_persistence(Persistence::Perm);
    /// Any common arc.
    pub const ARC_COMMON: ElementType = ElementType::UNKNOWN.with_kind(Kind::CommonArc);
    /// Constant common arc.
    pub const ARC_COMMON_CONST: ElementType =
        ElementType::ARC_COMMON.with_constancy(Constancy::Const);
    /// Variable common arc.
    pub const ARC_COMMON_VAR: ElementType = ElementType::ARC_COMMON.with_constancy(Constancy::Var);
    /// Any common edge.
    pub const EDGE_COMMON: ElementType = ElementType::UNKNOWN.with_kind(Kind::CommonEdge);
    /// Constancy-only constant mask.
    pub const CONST: ElementType = ElementType::UNKNOWN.with_constancy(Constancy::Const);
    /// Constancy-only variable mask.
    pub const VAR: ElementType = ElementType::UNKNOWN.with_constancy(Constancy::Var);

    /// Sets the structural kind axis.
    pub const fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the constancy axis.
    pub const fn with_constancy(mut self, constancy: Constancy) -> Self {
        self.constancy = Some(constancy);
        self
    }

    /// Sets the polarity axis.
    pub const fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = Some(polarity);
        self
    }

    /// Sets the persistence axis.
    pub const fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Structural kind, if set.
    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    /// Constancy, if set.
    pub fn constancy(&self) -> Option<Constancy> {
        self.constancy
    }

    /// Polarity, if set.
    pub fn polarity(&self) -> Option<Polarity> {
        self.polarity
    }

    /// Persistence, if set.
    pub fn persistence(&self) -> Option<Persistence> {
        self.persistence
    }

    /// Returns true when no axis is constrained.
    pub fn is_unknown(&self) -> bool {
        *self == ElementType::UNKNOWN
    }

    /// Returns true when the kind axis names a connector.
    pub fn is_connector(&self) -> bool {
        self.kind.map(Kind::is_connector).unwrap_or(false)
    }

    /// Returns true for node-kinded types (plain node or link).
    pub fn is_node_like(&self) -> bool {
        matches!(self.kind, Some(Kind::Node) | Some(Kind::Link))
    }

    /// Returns true when the constancy axis is `Var`.
    pub fn is_var(&self) -> bool {
        self.constancy == Some(Constancy::Var)
    }

    /// Used as a query mask: true when every constrained axis of `self`
    /// matches the concrete type.
    pub fn subsumes(&self, concrete: &ElementType) -> bool {
        fn axis<T: PartialEq>(mask: &Option<T>, value: &Option<T>) -> bool {
            match mask {
                None => true,
                Some(m) => value.as_ref() == Some(m),
            }
        }
        axis(&self.kind, &concrete.kind)
            && axis(&self.constancy, &concrete.constancy)
            && axis(&self.polarity, &concrete.polarity)
            && axis(&self.persistence, &concrete.persistence)
    }

    /// Narrows this type with `extra` bits: unset axes are filled, set axes
    /// may only be restated identically. Idempotent.
    pub fn refine(&self, extra: &ElementType) -> Result<ElementType> {
        fn merge<T: Copy + PartialEq>(
            base: Option<T>,
            extra: Option<T>,
            what: &'static str,
        ) -> Result<Option<T>> {
            match (base, extra) {
                (Some(b), Some(e)) if b != e => Err(StoreError::InvalidParams(format!(
                    "subtype change would alter the {what} axis"
                ))),
                (Some(b), _) => Ok(Some(b)),
                (None, e) => Ok(e),
            }
        }
        let merged = ElementType {
            kind: merge(self.kind, extra.kind, "kind")?,
            constancy: merge(self.constancy, extra.constancy, "constancy")?,
            polarity: merge(self.polarity, extra.polarity, "polarity")?,
            persistence: merge(self.persistence, extra.persistence, "persistence")?,
        };
        merged.check_axes()?;
        Ok(merged)
    }

    /// Rejects axis combinations no concrete element can carry: the polarity
    /// and persistence axes only exist on connectors.
    pub fn check_axes(&self) -> Result<()> {
        if self.is_node_like() && (self.polarity.is_some() || self.persistence.is_some()) {
            return Err(StoreError::InvalidParams(
                "polarity and persistence axes apply only to connectors".into(),
            ));
        }
        Ok(())
    }

    /// Converts a template-side mask into its searchable form: variable
    /// constancy is lifted to constant, everything else passes through.
    pub fn searchable(&self) -> ElementType {
        let mut out = *self;
        if out.constancy == Some(Constancy::Var) {
            out.constancy = Some(Constancy::Const);
        }
        out
    }

    /// Packs the type into its serialized bitmask form.
    pub fn to_bits(&self) -> u32 {
        let mut bits = 0u32;
        bits |= match self.kind {
            None => 0,
            Some(Kind::Node) => BIT_NODE,
            Some(Kind::Link) => BIT_LINK,
            Some(Kind::AccessArc) => BIT_ACCESS_ARC,
            Some(Kind::CommonArc) => BIT_COMMON_ARC,
            Some(Kind::CommonEdge) => BIT_COMMON_EDGE,
        };
        bits |= match self.constancy {
            None => 0,
            Some(Constancy::Const) => BIT_CONST,
            Some(Constancy::Var) => BIT_VAR,
        };
        bits |= match self.polarity {
            None => 0,
            Some(Polarity::Pos) => BIT_POS,
            Some(Polarity::Neg) => BIT_NEG,
            Some(Polarity::Fuz) => BIT_FUZ,
        };
        bits |= match self.persistence {
            None => 0,
            Some(Persistence::Perm) => BIT_PERM,
            Some(Persistence::Temp) => BIT_TEMP,
        };
        bits
    }

    /// Decodes the serialized bitmask form, rejecting conflicting axis bits.
    pub fn from_bits(bits: u32) -> Result<ElementType> {
        fn pick<T: Copy>(bits: u32, table: &[(u32, T)]) -> Result<Option<T>> {
            let mut found = None;
            for (bit, value) in table {
                if bits & bit != 0 {
                    if found.is_some() {
                        return Err(StoreError::Read("conflicting type axis bits"));
                    }
                    found = Some(*value);
                }
            }
            Ok(found)
        }
        Ok(ElementType {
            kind: pick(
                bits,
                &[
                    (BIT_NODE, Kind::Node),
                    (BIT_LINK, Kind::Link),
                    (BIT_ACCESS_ARC, Kind::AccessArc),
                    (BIT_COMMON_ARC, Kind::CommonArc),
                    (BIT_COMMON_EDGE, Kind::CommonEdge),
                ],
            )?,
            constancy: pick(bits, &[(BIT_CONST, Constancy::Const), (BIT_VAR, Constancy::Var)])?,
            polarity: pick(
                bits,
                &[
                    (BIT_POS, Polarity::Pos),
                    (BIT_NEG, Polarity::Neg),
                    (BIT_FUZ, Polarity::Fuz),
                ],
            )?,
            persistence: pick(
                bits,
                &[
                    (BIT_PERM, Persistence::Perm),
                    (BIT_TEMP, Persistence::Temp),
                ],
            )?,
        })
    }
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// File channel or filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A record read back in an unexpected shape.
    #[error("read error: {0}")]
    Read(&'static str),
    /// The handle does not name a live element.
    #[error("element {0} does not exist")]
    NotAnElement(ElementId),
    /// Content lookup miss, distinct from an I/O failure.
    #[error("content not found")]
    NotFound,
    /// Malformed template, iterator or generation input.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// The search engine reached an inconsistent state.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;
