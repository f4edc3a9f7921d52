#![forbid(unsafe_code)]

//! Rows of the grid body and the identities used to address them.
//!
//! Two identities coexist:
//!
//! - [`RowKey`] is object identity. A fresh key is allocated every time a row
//!   is materialized from an endpoint response, so a full reload yields new
//!   keys even for rows that represent the same entity.
//! - [`BreakdownId`] is the stable domain id carried by the endpoint. It is
//!   what cross-generation reconciliation matches on.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated statistics of one row, keyed by stat field.
pub type Stats = BTreeMap<String, serde_json::Value>;

/// Object identity of one materialized row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(u64);

impl RowKey {
    /// Wrap a raw key value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw key value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic [`RowKey`] source. Keys are never reused within one allocator.
#[derive(Debug)]
pub struct RowKeyAllocator {
    next: Cell<u64>,
}

impl Default for RowKeyAllocator {
    fn default() -> Self {
        Self { next: Cell::new(1) }
    }
}

impl RowKeyAllocator {
    /// Create an allocator starting at key 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next key.
    pub fn allocate(&self) -> RowKey {
        let key = self.next.get();
        self.next.set(key + 1);
        RowKey(key)
    }
}

/// Stable domain id of a row, e.g. `"12||340"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakdownId(String);

impl BreakdownId {
    /// Create an id from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BreakdownId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BreakdownId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for BreakdownId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of a body row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowKind {
    /// A row of aggregated stats.
    #[default]
    Stats,
    /// Pagination placeholder closing a node that has more rows to load.
    Breakdown,
    /// Synthetic aggregate holding the rows listed in its group.
    Group,
}

/// Address of a breakdown node. The root node has level 0 and no id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// Level of the row that owns the node (0 for the root).
    pub level: usize,
    /// Breakdown id of the owning row (`None` for the root).
    pub breakdown_id: Option<BreakdownId>,
}

impl NodeRef {
    /// The root node.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            level: 0,
            breakdown_id: None,
        }
    }

    /// The node expanded under the row `id` at `level`.
    #[must_use]
    pub fn child_of(level: usize, id: BreakdownId) -> Self {
        Self {
            level,
            breakdown_id: Some(id),
        }
    }

    /// Whether this addresses the root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.level == 0 && self.breakdown_id.is_none()
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.breakdown_id {
            Some(id) => write!(f, "{id}@{}", self.level),
            None => write!(f, "root@{}", self.level),
        }
    }
}

/// Per-node pagination counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Offset of the last loaded page.
    pub offset: usize,
    /// Size of the last loaded page.
    pub limit: usize,
    /// Total rows available on the server, when known.
    #[serde(default)]
    pub count: Option<usize>,
    /// No more rows to load.
    #[serde(default)]
    pub complete: bool,
}

impl Pagination {
    /// Offset of the next page.
    #[must_use]
    pub const fn next_offset(&self) -> usize {
        self.offset + self.limit
    }

    /// Whether another page can be requested.
    #[must_use]
    pub fn has_more(&self) -> bool {
        if self.complete {
            return false;
        }
        self.count.is_none_or(|count| self.next_offset() < count)
    }
}

/// Pagination details attached to a [`RowKind::Breakdown`] row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node the placeholder closes.
    pub node: NodeRef,
    /// Its pagination counters at flatten time.
    pub pagination: Pagination,
    /// Rows currently loaded in the node.
    pub loaded: usize,
}

/// One row of the flat, depth-ordered body list.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// Object identity.
    pub key: RowKey,
    /// Stable domain id (`None` for the footer and pagination rows).
    pub id: Option<BreakdownId>,
    /// Depth in the tree; 0 is reserved for the footer.
    pub level: usize,
    /// Row kind.
    pub kind: RowKind,
    /// Key of the parent row, `None` for top-level rows and the footer.
    pub parent: Option<RowKey>,
    /// Whether the row's descendants are hidden.
    pub collapsed: bool,
    /// Whether the row is shown (no collapsed ancestor).
    pub visible: bool,
    /// Mirror of the selection state, refreshed by the selection extension.
    pub selected: bool,
    /// Aggregated stats.
    pub stats: Stats,
    /// Whether the entity behind the row is archived.
    pub archived: bool,
    /// Pagination details for [`RowKind::Breakdown`] rows.
    pub node: Option<NodeInfo>,
}

impl GridRow {
    /// Create a visible stats row.
    #[must_use]
    pub fn new(key: RowKey, id: Option<BreakdownId>, level: usize) -> Self {
        Self {
            key,
            id,
            level,
            kind: RowKind::Stats,
            parent: None,
            collapsed: false,
            visible: true,
            selected: false,
            stats: Stats::new(),
            archived: false,
            node: None,
        }
    }

    /// Create the level-0 totals row.
    #[must_use]
    pub fn footer(key: RowKey, stats: Stats) -> Self {
        Self {
            stats,
            ..Self::new(key, None, 0)
        }
    }

    /// Set the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: RowKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the parent.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<RowKey>) -> Self {
        self.parent = parent;
        self
    }

    /// Set the stats.
    #[must_use]
    pub fn with_stats(mut self, stats: Stats) -> Self {
        self.stats = stats;
        self
    }

    /// Whether this is the totals row.
    #[must_use]
    pub fn is_footer(&self) -> bool {
        self.level == 0
    }

    /// Look up a stat value.
    #[must_use]
    pub fn stat(&self, field: &str) -> Option<&serde_json::Value> {
        self.stats.get(field)
    }

    /// Identity snapshot used by exception lists.
    #[must_use]
    pub fn to_ref(&self) -> RowRef {
        RowRef {
            key: self.key,
            id: self.id.clone(),
            level: self.level,
        }
    }
}

/// Identity snapshot of a row: object key plus the stable id for
/// cross-generation matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowRef {
    /// Object identity at the time the snapshot was taken.
    pub key: RowKey,
    /// Stable domain id.
    pub id: Option<BreakdownId>,
    /// Row level.
    pub level: usize,
}
