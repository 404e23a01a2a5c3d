//! Structured identifiers for counted quantities.
//!
//! A [`CountKey`] is a closed set of kinds, each with a fixed number of token
//! slots. The derived `Ord` and the byte encoding agree: comparing two encoded
//! keys with `memcmp` yields the same ordering as comparing the keys
//! themselves, which is what the on-disk layout relies on.

use std::fmt;
use std::str::FromStr;

use crate::primitives::bytes::ord;
use crate::types::{CountsError, LabelId, PropId, Result, TypeId};

/// Encoded size of a key in bytes.
pub const KEY_LEN: usize = 16;

const KIND_OFF: usize = 0;
const SLOT_LEN: usize = 5;
const SLOTS_OFF: usize = 1;
const MAX_SLOTS: usize = 3;

/// Discriminant of a [`CountKey`]. The numeric value is the on-disk tag.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum KeyKind {
    /// Nodes carrying a label.
    NodeLabel = 1,
    /// Relationships of a type.
    RelationshipType = 2,
    /// Relationships of a type whose start and/or end node carries a label.
    RelationshipTypeByEndpointLabels = 3,
    /// Entries in a (label, property) index.
    IndexStatistic = 4,
}

impl KeyKind {
    /// All kinds in ordinal order.
    pub const ALL: [KeyKind; 4] = [
        KeyKind::NodeLabel,
        KeyKind::RelationshipType,
        KeyKind::RelationshipTypeByEndpointLabels,
        KeyKind::IndexStatistic,
    ];

    /// On-disk tag of the kind.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps an on-disk tag back to its kind.
    pub fn from_u8(tag: u8) -> Option<KeyKind> {
        Self::ALL.into_iter().find(|kind| kind.as_u8() == tag)
    }

    /// Number of token slots used by keys of this kind.
    pub const fn arity(self) -> usize {
        match self {
            KeyKind::NodeLabel | KeyKind::RelationshipType => 1,
            KeyKind::RelationshipTypeByEndpointLabels => 3,
            KeyKind::IndexStatistic => 2,
        }
    }

    /// Stable short name used by tooling.
    pub const fn name(self) -> &'static str {
        match self {
            KeyKind::NodeLabel => "node",
            KeyKind::RelationshipType => "rel",
            KeyKind::RelationshipTypeByEndpointLabels => "rel-labels",
            KeyKind::IndexStatistic => "index",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KeyKind {
    type Err = CountsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or(CountsError::InvalidKey("unknown key kind"))
    }
}

/// Identifier of one counted quantity. `None` tokens stand for "any".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CountKey {
    /// Number of nodes with `label`, or of all nodes.
    NodeLabel {
        /// Label filter.
        label: Option<LabelId>,
    },
    /// Number of relationships of `rel_type`, or of all relationships.
    RelationshipType {
        /// Type filter.
        rel_type: Option<TypeId>,
    },
    /// Number of `(start)-[rel_type]->(end)` relationships.
    RelationshipTypeByEndpointLabels {
        /// Start node label filter.
        start: Option<LabelId>,
        /// Type filter.
        rel_type: Option<TypeId>,
        /// End node label filter.
        end: Option<LabelId>,
    },
    /// Number of entries in the index on `(label, property)`.
    IndexStatistic {
        /// Indexed label.
        label: LabelId,
        /// Indexed property key.
        property: PropId,
    },
}

impl CountKey {
    /// Count of nodes carrying `label`.
    pub const fn node_label(label: LabelId) -> Self {
        CountKey::NodeLabel { label: Some(label) }
    }

    /// Count of all nodes.
    pub const fn all_nodes() -> Self {
        CountKey::NodeLabel { label: None }
    }

    /// Count of relationships of `rel_type`.
    pub const fn relationship_type(rel_type: TypeId) -> Self {
        CountKey::RelationshipType {
            rel_type: Some(rel_type),
        }
    }

    /// Count of all relationships.
    pub const fn all_relationships() -> Self {
        CountKey::RelationshipType { rel_type: None }
    }

    /// Count of relationships filtered by endpoint labels and type.
    pub const fn relationship(
        start: Option<LabelId>,
        rel_type: Option<TypeId>,
        end: Option<LabelId>,
    ) -> Self {
        CountKey::RelationshipTypeByEndpointLabels {
            start,
            rel_type,
            end,
        }
    }

    /// Count of entries in the index on `(label, property)`.
    pub const fn index_statistic(label: LabelId, property: PropId) -> Self {
        CountKey::IndexStatistic { label, property }
    }

    /// Builds a key from its kind and raw tokens.
    ///
    /// Fails with [`CountsError::InvalidKey`] when the number of tokens does not
    /// match the kind's arity or a mandatory token is absent.
    pub fn from_parts(kind: KeyKind, tokens: &[Option<u32>]) -> Result<Self> {
        if tokens.len() != kind.arity() {
            return Err(CountsError::InvalidKey("token count does not match key kind"));
        }
        let key = match kind {
            KeyKind::NodeLabel => CountKey::NodeLabel {
                label: tokens[0].map(LabelId),
            },
            KeyKind::RelationshipType => CountKey::RelationshipType {
                rel_type: tokens[0].map(TypeId),
            },
            KeyKind::RelationshipTypeByEndpointLabels => {
                CountKey::RelationshipTypeByEndpointLabels {
                    start: tokens[0].map(LabelId),
                    rel_type: tokens[1].map(TypeId),
                    end: tokens[2].map(LabelId),
                }
            }
            KeyKind::IndexStatistic => match (tokens[0], tokens[1]) {
                (Some(label), Some(property)) => CountKey::IndexStatistic {
                    label: LabelId(label),
                    property: PropId(property),
                },
                _ => {
                    return Err(CountsError::InvalidKey(
                        "index statistic keys require label and property",
                    ))
                }
            },
        };
        Ok(key)
    }

    /// Kind of this key.
    pub const fn kind(&self) -> KeyKind {
        match self {
            CountKey::NodeLabel { .. } => KeyKind::NodeLabel,
            CountKey::RelationshipType { .. } => KeyKind::RelationshipType,
            CountKey::RelationshipTypeByEndpointLabels { .. } => {
                KeyKind::RelationshipTypeByEndpointLabels
            }
            CountKey::IndexStatistic { .. } => KeyKind::IndexStatistic,
        }
    }

    /// Raw tokens in field order; slots past the kind's arity are `None`.
    pub fn tokens(&self) -> [Option<u32>; MAX_SLOTS] {
        match *self {
            CountKey::NodeLabel { label } => [label.map(u32::from), None, None],
            CountKey::RelationshipType { rel_type } => [rel_type.map(u32::from), None, None],
            CountKey::RelationshipTypeByEndpointLabels {
                start,
                rel_type,
                end,
            } => [
                start.map(u32::from),
                rel_type.map(u32::from),
                end.map(u32::from),
            ],
            CountKey::IndexStatistic { label, property } => {
                [Some(label.0), Some(property.0), None]
            }
        }
    }

    /// Encodes the key into its fixed-size, order-preserving form.
    pub fn encode(&self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        out[KIND_OFF] = self.kind().as_u8();
        for (idx, token) in self.tokens().iter().enumerate() {
            if let Some(id) = token {
                let off = SLOTS_OFF + idx * SLOT_LEN;
                out[off] = 1;
                ord::put_u32_be(&mut out[off + 1..off + SLOT_LEN], *id);
            }
        }
        out
    }

    /// Decodes a key produced by [`CountKey::encode`].
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < KEY_LEN {
            return Err(CountsError::InvalidKey("encoded key truncated"));
        }
        let kind = KeyKind::from_u8(src[KIND_OFF])
            .ok_or(CountsError::InvalidKey("unknown key kind tag"))?;
        let mut tokens = [None; MAX_SLOTS];
        for (idx, token) in tokens.iter_mut().enumerate() {
            let off = SLOTS_OFF + idx * SLOT_LEN;
            let slot = &src[off..off + SLOT_LEN];
            match slot[0] {
                0 => {
                    if slot[1..].iter().any(|b| *b != 0) {
                        return Err(CountsError::InvalidKey("absent token slot not zeroed"));
                    }
                }
                1 if idx < kind.arity() => *token = Some(ord::get_u32_be(&slot[1..])),
                1 => return Err(CountsError::InvalidKey("token beyond key arity")),
                _ => return Err(CountsError::InvalidKey("invalid token presence byte")),
            }
        }
        Self::from_parts(kind, &tokens[..kind.arity()])
    }
}

fn token(f: &mut fmt::Formatter<'_>, prefix: &str, value: Option<u32>) -> fmt::Result {
    match value {
        Some(id) => write!(f, "{prefix}{id}"),
        None => f.write_str("*"),
    }
}

impl fmt::Display for CountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CountKey::NodeLabel { label } => {
                f.write_str("node(")?;
                token(f, ":", label.map(u32::from))?;
                f.write_str(")")
            }
            CountKey::RelationshipType { rel_type } => {
                f.write_str("rel[")?;
                token(f, ":", rel_type.map(u32::from))?;
                f.write_str("]")
            }
            CountKey::RelationshipTypeByEndpointLabels {
                start,
                rel_type,
                end,
            } => {
                f.write_str("(")?;
                token(f, ":", start.map(u32::from))?;
                f.write_str(")-[")?;
                token(f, ":", rel_type.map(u32::from))?;
                f.write_str("]->(")?;
                token(f, ":", end.map(u32::from))?;
                f.write_str(")")
            }
            CountKey::IndexStatistic { label, property } => {
                write!(f, "index(:{label}.{property})")
            }
        }
    }
}
