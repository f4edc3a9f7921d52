#![forbid(unsafe_code)]

//! Header columns and the catalog entries they are built from.
//!
//! Columns are created once per metadata load and afterwards only toggled:
//! `shown` is the permission gate, `visible` the user's choice, `disabled`
//! the availability in the current level/breakdown context, and `order` the
//! column's share of the single active sort.

use serde::Deserialize;

use crate::permission::{PermissionFlag, PermissionOracle};

/// Field name of the synthetic selection column.
pub const CHECKBOX_FIELD: &str = "_checkbox";

/// Sort direction of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Not sorted.
    #[default]
    None,
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Whether this is a real direction.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }

    /// The opposite direction; `None` stays `None`.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Split a signed order string (`"-cpc"`) into field and direction.
///
/// Returns `None` for an empty string.
#[must_use]
pub fn parse_order(order: &str) -> Option<(&str, SortOrder)> {
    let (field, direction) = match order.strip_prefix('-') {
        Some(field) => (field, SortOrder::Desc),
        None => (order, SortOrder::Asc),
    };
    if field.is_empty() {
        None
    } else {
        Some((field, direction))
    }
}

/// Inverse of [`parse_order`]. `SortOrder::None` has no string form.
#[must_use]
pub fn format_order(field: &str, direction: SortOrder) -> Option<String> {
    match direction {
        SortOrder::None => None,
        SortOrder::Asc => Some(field.to_owned()),
        SortOrder::Desc => Some(format!("-{field}")),
    }
}

/// Value kind rendered by a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Currency,
    Percent,
    DateTime,
    Breakdown,
    Status,
    Checkbox,
}

/// A `(level, breakdown)` override of a column's availability.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomException {
    /// Entity level the override applies to (e.g. `"campaigns"`).
    pub level: String,
    /// Primary breakdown the override applies to.
    pub breakdown: String,
    /// Availability when the override matches.
    pub shown: bool,
}

/// Availability rules of a column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ColumnExceptions {
    /// Breakdowns the column is limited to, if any.
    #[serde(default)]
    pub breakdowns: Option<Vec<String>>,
    /// Overrides that win over everything else.
    #[serde(default)]
    pub custom: Vec<CustomException>,
}

/// Static catalog entry describing one column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    /// Stat field rendered by the column.
    pub field: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Value kind.
    #[serde(rename = "type", default)]
    pub kind: ColumnType,
    /// Permission gate.
    #[serde(default)]
    pub shown: PermissionFlag,
    /// Field sent to the endpoint when ordering by this column.
    #[serde(default)]
    pub order_field: Option<String>,
    /// Direction applied when the column is first ordered.
    #[serde(default)]
    pub initial_order: SortOrder,
    /// Whether the footer renders this column.
    #[serde(default = "default_true")]
    pub total_row: bool,
    /// Cannot be hidden by the user.
    #[serde(default)]
    pub permanent: bool,
    /// Visible when no preference was stored.
    #[serde(default)]
    pub default: bool,
    /// Cells accept edits.
    #[serde(default)]
    pub editable: bool,
    /// Availability rules.
    #[serde(default)]
    pub exceptions: ColumnExceptions,
}

fn default_true() -> bool {
    true
}

impl ColumnDef {
    /// Create a text column shown to everyone.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
            kind: ColumnType::Text,
            shown: PermissionFlag::Bool(true),
            order_field: None,
            initial_order: SortOrder::None,
            total_row: true,
            permanent: false,
            default: false,
            editable: false,
            exceptions: ColumnExceptions::default(),
        }
    }
}

/// Static column data carried over from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnData {
    pub name: String,
    pub exceptions: ColumnExceptions,
    pub order_field: Option<String>,
    pub initial_order: SortOrder,
    pub total_row: bool,
    pub permanent: bool,
    pub default: bool,
    pub editable: bool,
}

/// One header column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Stat field rendered by the column.
    pub field: String,
    /// Value kind.
    pub kind: ColumnType,
    /// Permission-gated availability.
    pub shown: bool,
    /// Shown only through an internal permission.
    pub internal: bool,
    /// User-chosen visibility.
    pub visible: bool,
    /// Unavailable in the current level/breakdown context.
    pub disabled: bool,
    /// Share of the single active sort.
    pub order: SortOrder,
    /// Catalog data.
    pub data: ColumnData,
}

impl Column {
    /// Build a column from its catalog entry, resolving permission flags.
    #[must_use]
    pub fn from_def(def: &ColumnDef, oracle: &dyn PermissionOracle) -> Self {
        Self {
            field: def.field.clone(),
            kind: def.kind,
            shown: def.shown.evaluate(oracle),
            internal: def.shown.is_internal(oracle),
            visible: def.default || def.permanent,
            disabled: false,
            order: SortOrder::None,
            data: ColumnData {
                name: def.name.clone(),
                exceptions: def.exceptions.clone(),
                order_field: def.order_field.clone(),
                initial_order: def.initial_order,
                total_row: def.total_row,
                permanent: def.permanent,
                default: def.default,
                editable: def.editable,
            },
        }
    }

    /// The selection pseudo-column.
    #[must_use]
    pub fn checkbox() -> Self {
        Self {
            field: CHECKBOX_FIELD.to_owned(),
            kind: ColumnType::Checkbox,
            shown: true,
            internal: false,
            visible: true,
            disabled: false,
            order: SortOrder::None,
            data: ColumnData {
                permanent: true,
                ..ColumnData::default()
            },
        }
    }

    /// Field used in the endpoint order parameter.
    #[must_use]
    pub fn order_key(&self) -> &str {
        self.data.order_field.as_deref().unwrap_or(&self.field)
    }

    /// Whether the column is currently rendered.
    #[must_use]
    pub fn is_displayed(&self) -> bool {
        self.shown && self.visible && !self.disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{AllowAll, StaticPermissions};

    #[test]
    fn order_string_round_trip_rules() {
        assert_eq!(parse_order("-cpc"), Some(("cpc", SortOrder::Desc)));
        assert_eq!(parse_order("clicks"), Some(("clicks", SortOrder::Asc)));
        assert_eq!(parse_order(""), None);
        assert_eq!(parse_order("-"), None);
        assert_eq!(format_order("cpc", SortOrder::Desc).as_deref(), Some("-cpc"));
        assert_eq!(format_order("cpc", SortOrder::None), None);
    }

    #[test]
    fn catalog_entry_deserializes_with_defaults() {
        let def: ColumnDef = serde_json::from_str(
            r#"{
                "field": "cost",
                "type": "currency",
                "shown": "!hide_cost",
                "order_field": null,
                "exceptions": {"breakdowns": ["publisher"]}
            }"#,
        )
        .unwrap();
        assert_eq!(def.kind, ColumnType::Currency);
        assert!(def.total_row);
        assert_eq!(
            def.exceptions.breakdowns.as_deref(),
            Some(&["publisher".to_owned()][..])
        );
    }

    #[test]
    fn from_def_resolves_permissions() {
        let mut def = ColumnDef::new("margin");
        def.shown = PermissionFlag::parse("see_margin");
        let denied = Column::from_def(&def, &StaticPermissions::new());
        assert!(!denied.shown);

        let internal = Column::from_def(
            &def,
            &StaticPermissions::new().grant_internal("see_margin"),
        );
        assert!(internal.shown);
        assert!(internal.internal);
    }

    #[test]
    fn order_key_prefers_order_field() {
        let mut def = ColumnDef::new("breakdown_name");
        def.order_field = Some("name".into());
        let col = Column::from_def(&def, &AllowAll);
        assert_eq!(col.order_key(), "name");
        assert_eq!(Column::from_def(&ColumnDef::new("cpc"), &AllowAll).order_key(), "cpc");
    }
}
