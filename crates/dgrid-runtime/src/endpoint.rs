#![forbid(unsafe_code)]

//! Contract of the external aggregation endpoint and its payload shapes.
//!
//! The endpoint owns transport and wire conversion. What crosses this seam is
//! already in the internal shape: [`NodePayload`] trees mirroring the server's
//! nested breakdown response.

use std::collections::BTreeMap;

use dgrid_core::{BreakdownId, EndpointError, GridRow, MetaData, Pagination, SaveError, Stats};
use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of an endpoint fetch.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Stat values returned after a successful save, merged into the row.
pub type UpdatedStatFragment = Stats;

/// Inclusive reporting period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day, ISO formatted.
    pub start: String,
    /// Last day, ISO formatted.
    pub end: String,
}

impl DateRange {
    #[must_use]
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// One data request.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RequestConfig {
    /// Level of the requested rows (1 for the base level).
    pub level: usize,
    /// Offset of the first requested row within the node.
    pub offset: usize,
    /// Number of rows requested.
    pub limit: usize,
    /// Page size for nested levels embedded in the response.
    pub child_limit: Option<usize>,
    /// Breakdown dimension path.
    pub breakdown: Vec<String>,
    /// Breakdown ids from the root down to the paged node.
    pub parents: Vec<BreakdownId>,
    /// Signed order string.
    pub order: Option<String>,
    pub date_range: Option<DateRange>,
    pub filters: BTreeMap<String, Value>,
}

impl RequestConfig {
    /// Whether this reloads the base level from scratch.
    #[must_use]
    pub fn is_full_load(&self) -> bool {
        self.parents.is_empty() && self.level <= 1 && self.offset == 0
    }
}

/// A node of the server's breakdown tree.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct NodePayload {
    /// Id of the row the node belongs to; `None` for the root.
    #[serde(default)]
    pub breakdown_id: Option<BreakdownId>,
    /// Level of the owning row; 0 for the root.
    #[serde(default)]
    pub level: usize,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub rows: Vec<RowPayload>,
    /// Totals of the node; the root's become the footer.
    #[serde(default)]
    pub totals: Option<Stats>,
}

impl NodePayload {
    /// Root node carrying `rows`.
    #[must_use]
    pub fn root(rows: Vec<RowPayload>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Node expanded under row `id` at `level`.
    #[must_use]
    pub fn child(level: usize, id: impl Into<BreakdownId>, rows: Vec<RowPayload>) -> Self {
        Self {
            breakdown_id: Some(id.into()),
            level,
            rows,
            ..Self::default()
        }
    }

    /// Set the pagination counters.
    #[must_use]
    pub fn paginated(mut self, offset: usize, limit: usize, count: Option<usize>) -> Self {
        self.pagination = Pagination {
            offset,
            limit,
            count,
            complete: count.is_some_and(|count| offset + limit >= count),
        };
        self
    }

    /// Set the totals.
    #[must_use]
    pub fn with_totals(mut self, totals: Stats) -> Self {
        self.totals = Some(totals);
        self
    }
}

/// Grouping descriptor of a synthetic aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct GroupPayload {
    /// Ids of the sibling rows folded under the group row.
    #[serde(default)]
    pub ids: Vec<BreakdownId>,
}

/// A row of a [`NodePayload`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RowPayload {
    #[serde(default)]
    pub breakdown_id: Option<BreakdownId>,
    #[serde(default)]
    pub stats: Stats,
    /// Embedded child node.
    #[serde(default)]
    pub breakdown: Option<NodePayload>,
    #[serde(default)]
    pub group: Option<GroupPayload>,
    #[serde(default)]
    pub archived: bool,
}

impl RowPayload {
    /// Row with id `id` and no stats.
    #[must_use]
    pub fn new(id: impl Into<BreakdownId>) -> Self {
        Self {
            breakdown_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Add one stat.
    #[must_use]
    pub fn stat(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.stats.insert(field.into(), value.into());
        self
    }

    /// Embed a child node.
    #[must_use]
    pub fn with_breakdown(mut self, node: NodePayload) -> Self {
        self.breakdown = Some(node);
        self
    }

    /// Make this a group row folding `ids`.
    #[must_use]
    pub fn grouping<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<BreakdownId>,
    {
        self.group = Some(GroupPayload {
            ids: ids.into_iter().map(Into::into).collect(),
        });
        self
    }
}

/// The aggregation service the data source talks to.
pub trait AggregationEndpoint {
    /// Column catalog and entity level.
    fn get_meta_data(&self) -> LocalBoxFuture<'static, EndpointResult<MetaData>>;

    /// Breakdown nodes answering `config`.
    fn get_data(&self, config: RequestConfig) -> LocalBoxFuture<'static, EndpointResult<Vec<NodePayload>>>;

    /// Persist an edited cell. On success returns the row's updated stats.
    fn save_data(
        &self,
        value: Value,
        row: &GridRow,
        field: &str,
    ) -> LocalBoxFuture<'static, Result<UpdatedStatFragment, SaveError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_deserializes_nested_nodes() {
        let nodes: Vec<NodePayload> = serde_json::from_str(
            r#"[{
                "pagination": {"offset": 0, "limit": 2, "count": 10},
                "totals": {"clicks": 40},
                "rows": [
                    {"breakdown_id": "1", "stats": {"clicks": 30},
                     "breakdown": {"breakdown_id": "1", "level": 1,
                                   "pagination": {"offset": 0, "limit": 5, "complete": true},
                                   "rows": [{"breakdown_id": "1||7"}]}},
                    {"breakdown_id": "g", "group": {"ids": ["2"]}},
                    {"breakdown_id": "2", "archived": true}
                ]
            }]"#,
        )
        .unwrap();
        let root = &nodes[0];
        assert!(root.breakdown_id.is_none());
        assert_eq!(root.pagination.count, Some(10));
        let child = root.rows[0].breakdown.as_ref().unwrap();
        assert!(child.pagination.complete);
        assert_eq!(child.rows[0].breakdown_id, Some(BreakdownId::new("1||7")));
        assert_eq!(root.rows[1].group.as_ref().unwrap().ids.len(), 1);
        assert!(root.rows[2].archived);
    }

    #[test]
    fn builders_mark_last_page_complete() {
        let node = NodePayload::root(vec![RowPayload::new("1")]).paginated(0, 20, Some(1));
        assert!(node.pagination.complete);
        let open = NodePayload::root(Vec::new()).paginated(0, 2, None);
        assert!(!open.pagination.complete);
    }

    #[test]
    fn full_load_detection() {
        let full = RequestConfig {
            level: 1,
            limit: 20,
            ..RequestConfig::default()
        };
        assert!(full.is_full_load());
        let page = RequestConfig {
            offset: 20,
            ..full.clone()
        };
        assert!(!page.is_full_load());
    }
}
