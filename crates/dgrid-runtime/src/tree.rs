#![forbid(unsafe_code)]

//! The data source's nested breakdown tree and its flattening into grid rows.
//!
//! # Levels
//!
//! The root node has level 0 and holds the level-1 rows. A row at level `n`
//! owns at most one child node, also at level `n`, holding level `n + 1`
//! rows. The root's totals become the level-0 footer.
//!
//! Rows folded under a group row keep the level they were loaded at, so
//! their nodes stay addressable by the endpoint's coordinates. Only the
//! flattened display level reflects the extra nesting.
//!
//! # Merge rules
//!
//! - A root payload on an empty tree becomes the root.
//! - A payload for a node that exists has its rows appended and its
//!   pagination replaced.
//! - A payload for a row without a node is inserted as that row's breakdown.
//! - A payload whose owner cannot be found is logged and dropped.

use std::collections::{HashMap, HashSet};

use dgrid_core::{
    BreakdownId, GridRow, NodeInfo, NodeRef, Pagination, RowKey, RowKeyAllocator, RowKind, Stats,
};

use crate::endpoint::{NodePayload, RowPayload};

/// One node: the rows of one expansion plus its pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownNode {
    /// Id of the owning row; `None` for the root.
    pub breakdown_id: Option<BreakdownId>,
    /// Level of the owning row.
    pub level: usize,
    pub pagination: Pagination,
    pub rows: Vec<DataRow>,
    pub totals: Option<Stats>,
    /// Key of the pagination placeholder row.
    pub more_key: RowKey,
}

impl BreakdownNode {
    /// Address of this node.
    #[must_use]
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            level: self.level,
            breakdown_id: self.breakdown_id.clone(),
        }
    }

    /// Ids of the node's rows, in order.
    #[must_use]
    pub fn row_ids(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter_map(|r| r.breakdown_id.as_ref().map(BreakdownId::as_str))
            .collect()
    }

    fn materialize(payload: NodePayload, level: usize, keys: &RowKeyAllocator) -> Self {
        Self {
            breakdown_id: payload.breakdown_id,
            level,
            pagination: payload.pagination,
            rows: DataRow::materialize_all(payload.rows, level, keys),
            totals: payload.totals,
            more_key: keys.allocate(),
        }
    }

    fn append(&mut self, payload: NodePayload, keys: &RowKeyAllocator) -> usize {
        let added = payload.rows.len();
        self.rows
            .extend(DataRow::materialize_all(payload.rows, self.level, keys));
        self.pagination = payload.pagination;
        if payload.totals.is_some() {
            self.totals = payload.totals;
        }
        added
    }

    fn find(&self, node: &NodeRef) -> Option<&BreakdownNode> {
        if self.level == node.level && self.breakdown_id == node.breakdown_id {
            return Some(self);
        }
        self.rows
            .iter()
            .filter_map(|r| r.breakdown.as_ref())
            .find_map(|child| child.find(node))
    }

    fn find_mut(&mut self, node: &NodeRef) -> Option<&mut BreakdownNode> {
        if self.level == node.level && self.breakdown_id == node.breakdown_id {
            return Some(self);
        }
        self.rows
            .iter_mut()
            .filter_map(|r| r.breakdown.as_mut())
            .find_map(|child| child.find_mut(node))
    }

    /// Row owning `node`: the row with `node.breakdown_id` at `node.level`.
    ///
    /// `row_level` is the level of this node's rows.
    fn owner_mut(&mut self, node: &NodeRef, row_level: usize) -> Option<&mut DataRow> {
        for row in &mut self.rows {
            if row_level == node.level && row.breakdown_id == node.breakdown_id {
                return Some(row);
            }
            let child_level = if row.group.is_some() {
                row_level
            } else {
                row_level + 1
            };
            if child_level <= node.level
                && let Some(child) = row.breakdown.as_mut()
                && let Some(found) = child.owner_mut(node, child_level)
            {
                return Some(found);
            }
        }
        None
    }

    fn path_to(&self, node: &NodeRef, path: &mut Vec<BreakdownId>) -> bool {
        if self.level == node.level && self.breakdown_id == node.breakdown_id {
            return true;
        }
        for row in &self.rows {
            let Some(child) = row.breakdown.as_ref() else {
                continue;
            };
            // Group rows are not a dimension value.
            let pushed = match &child.breakdown_id {
                Some(id) if row.group.is_none() => {
                    path.push(id.clone());
                    true
                }
                _ => false,
            };
            if child.path_to(node, path) {
                return true;
            }
            if pushed {
                path.pop();
            }
        }
        false
    }

    fn row_mut(&mut self, key: RowKey) -> Option<&mut DataRow> {
        for row in &mut self.rows {
            if row.key == key {
                return Some(row);
            }
            if let Some(found) = row.breakdown.as_mut().and_then(|c| c.row_mut(key)) {
                return Some(found);
            }
        }
        None
    }

    /// Fold rows listed in a group row's ids under that group row.
    fn apply_grouping(&mut self, keys: &RowKeyAllocator) {
        let groups: Vec<(usize, HashSet<BreakdownId>)> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                r.group
                    .as_ref()
                    .map(|ids| (i, ids.iter().cloned().collect::<HashSet<_>>()))
            })
            .collect();

        if !groups.is_empty() {
            let group_keys: Vec<RowKey> = groups.iter().map(|(i, _)| self.rows[*i].key).collect();
            let mut moved: HashMap<RowKey, Vec<DataRow>> = HashMap::new();
            let mut remaining = Vec::with_capacity(self.rows.len());
            for row in self.rows.drain(..) {
                let target = groups.iter().zip(&group_keys).find(|((_, ids), gk)| {
                    **gk != row.key
                        && row.group.is_none()
                        && row.breakdown_id.as_ref().is_some_and(|id| ids.contains(id))
                });
                match target {
                    Some((_, gk)) => moved.entry(*gk).or_default().push(row),
                    None => remaining.push(row),
                }
            }
            self.rows = remaining;

            let level = self.level + 1;
            for row in &mut self.rows {
                let Some(members) = moved.remove(&row.key) else {
                    continue;
                };
                tracing::debug!(group = ?row.breakdown_id, members = members.len(), "grouped rows");
                let node = row.breakdown.get_or_insert_with(|| BreakdownNode {
                    breakdown_id: row.breakdown_id.clone(),
                    level,
                    pagination: Pagination {
                        complete: true,
                        ..Pagination::default()
                    },
                    rows: Vec::new(),
                    totals: None,
                    more_key: keys.allocate(),
                });
                node.pagination.count = Some(node.rows.len() + members.len());
                node.rows.extend(members);
            }
        }

        for row in &mut self.rows {
            if let Some(child) = row.breakdown.as_mut() {
                child.apply_grouping(keys);
            }
        }
    }

    /// Append this node's rows, displayed at `level`, to `out`.
    fn flatten_into(
        &self,
        parent: Option<RowKey>,
        level: usize,
        previous: &HashMap<RowKey, bool>,
        out: &mut Vec<GridRow>,
    ) {
        for row in &self.rows {
            let kind = if row.group.is_some() {
                RowKind::Group
            } else {
                RowKind::Stats
            };
            let mut grid_row = GridRow::new(row.key, row.breakdown_id.clone(), level)
                .with_kind(kind)
                .with_parent(parent)
                .with_stats(row.stats.clone());
            grid_row.archived = row.archived;
            grid_row.collapsed = previous.get(&row.key).copied().unwrap_or(false);
            out.push(grid_row);
            if let Some(child) = &row.breakdown {
                child.flatten_into(Some(row.key), level + 1, previous, out);
            }
        }
        if self.pagination.has_more() {
            let mut more = GridRow::new(self.more_key, None, level)
                .with_kind(RowKind::Breakdown)
                .with_parent(parent);
            more.node = Some(NodeInfo {
                node: self.node_ref(),
                pagination: self.pagination,
                loaded: self.rows.len(),
            });
            out.push(more);
        }
    }
}

/// One row of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub key: RowKey,
    pub breakdown_id: Option<BreakdownId>,
    pub stats: Stats,
    /// Expanded child node.
    pub breakdown: Option<BreakdownNode>,
    /// Ids folded under this row when it is a group row.
    pub group: Option<Vec<BreakdownId>>,
    pub archived: bool,
}

impl DataRow {
    fn materialize_all(rows: Vec<RowPayload>, node_level: usize, keys: &RowKeyAllocator) -> Vec<Self> {
        rows.into_iter()
            .map(|row| Self {
                key: keys.allocate(),
                breakdown_id: row.breakdown_id,
                stats: row.stats,
                breakdown: row
                    .breakdown
                    .map(|child| BreakdownNode::materialize(child, node_level + 1, keys)),
                group: row.group.map(|g| g.ids),
                archived: row.archived,
            })
            .collect()
    }
}

/// Result of merging one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The payload became the root.
    Root,
    /// Rows were appended to an existing node.
    Appended { rows: usize },
    /// The payload was attached as a row's child node.
    Inserted,
    /// No owner was found; nothing changed.
    Dropped,
}

/// The whole tree held by the data source.
#[derive(Debug, Default)]
pub struct BreakdownTree {
    root: Option<BreakdownNode>,
    footer_key: Option<RowKey>,
}

impl BreakdownTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.root = None;
        self.footer_key = None;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    #[must_use]
    pub fn root(&self) -> Option<&BreakdownNode> {
        self.root.as_ref()
    }

    /// Node addressed by `node`.
    #[must_use]
    pub fn node(&self, node: &NodeRef) -> Option<&BreakdownNode> {
        self.root.as_ref()?.find(node)
    }

    /// Breakdown ids from the root down to `node`, or `None` if absent.
    #[must_use]
    pub fn path_to(&self, node: &NodeRef) -> Option<Vec<BreakdownId>> {
        let mut path = Vec::new();
        self.root.as_ref()?.path_to(node, &mut path).then_some(path)
    }

    /// Merge one payload, then re-run grouping.
    pub fn merge(&mut self, payload: NodePayload, keys: &RowKeyAllocator) -> MergeOutcome {
        let target = NodeRef {
            level: payload.level,
            breakdown_id: payload.breakdown_id.clone(),
        };

        let outcome = if let Some(root) = self.root.as_mut() {
            if let Some(existing) = root.find_mut(&target) {
                MergeOutcome::Appended {
                    rows: existing.append(payload, keys),
                }
            } else if let Some(owner) = root.owner_mut(&target, root.level + 1) {
                owner.breakdown = Some(BreakdownNode::materialize(payload, target.level, keys));
                MergeOutcome::Inserted
            } else {
                MergeOutcome::Dropped
            }
        } else if target.is_root() {
            self.root = Some(BreakdownNode::materialize(payload, 0, keys));
            MergeOutcome::Root
        } else {
            MergeOutcome::Dropped
        };

        match outcome {
            MergeOutcome::Dropped => {
                tracing::warn!(node = %target, "response node has no owner in the tree, dropped");
            }
            _ => {
                if let Some(root) = self.root.as_mut() {
                    root.apply_grouping(keys);
                }
                if self.footer_key.is_none() && self.root.as_ref().is_some_and(|r| r.totals.is_some()) {
                    self.footer_key = Some(keys.allocate());
                }
            }
        }
        outcome
    }

    /// Patch `stats` into the row with `key` (or the footer).
    ///
    /// Returns `false` if no such row exists.
    pub fn patch_stats(&mut self, key: RowKey, stats: &Stats) -> bool {
        if self.footer_key == Some(key) {
            if let Some(totals) = self.root.as_mut().and_then(|r| r.totals.as_mut()) {
                totals.extend(stats.iter().map(|(k, v)| (k.clone(), v.clone())));
                return true;
            }
            return false;
        }
        match self.root.as_mut().and_then(|r| r.row_mut(key)) {
            Some(row) => {
                row.stats
                    .extend(stats.iter().map(|(k, v)| (k.clone(), v.clone())));
                true
            }
            None => false,
        }
    }

    /// Flatten into depth-ordered body rows plus the footer.
    ///
    /// `previous` carries collapsed flags to keep for rows that survive.
    #[must_use]
    pub fn flatten(&self, previous: &HashMap<RowKey, bool>) -> (Vec<GridRow>, Option<GridRow>) {
        let Some(root) = &self.root else {
            return (Vec::new(), None);
        };
        let mut rows = Vec::new();
        root.flatten_into(None, root.level + 1, previous, &mut rows);
        let footer = self
            .footer_key
            .zip(root.totals.clone())
            .map(|(key, totals)| GridRow::footer(key, totals));
        (rows, footer)
    }
}
