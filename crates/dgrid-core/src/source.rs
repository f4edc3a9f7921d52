#![forbid(unsafe_code)]

//! The data-source seam consumed by the extensions.

use futures_util::future::LocalBoxFuture;

use crate::error::GridResult;

/// How a load request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response was merged into the tree.
    Applied,
    /// A newer request replaced this one; nothing was applied.
    Superseded,
}

impl LoadOutcome {
    /// Whether the response was merged.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// What the extensions need from the data source.
pub trait GridDataSource {
    /// Configured breakdown dimension path.
    fn breakdown(&self) -> Vec<String>;

    /// Number of configured breakdown levels.
    fn breakdown_depth(&self) -> usize {
        self.breakdown().len()
    }

    /// First dimension of the path.
    fn primary_breakdown(&self) -> Option<String> {
        self.breakdown().into_iter().next()
    }

    /// Current signed order string (e.g. `"-cpc"`).
    fn order(&self) -> Option<String>;

    /// Replace the order string without reloading.
    fn set_order(&self, order: Option<String>);

    /// Full reload of the base level.
    fn reload(&self) -> LocalBoxFuture<'static, GridResult<LoadOutcome>>;
}
