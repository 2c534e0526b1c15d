//! Catalog Query Builder.
//!
//! Assembles structured catalog queries without touching the transport:
//! a set of selected columns, an ordered conjunction of conditions, an
//! optional pagination cursor, and keyed qualifiers (e.g. zone).

use std::collections::HashMap;

use crate::column::CatalogColumn;
use crate::errors::ExecutorError;

/// One `(column, operator, literal)` triple. Rendered on the wire as
/// `<operator> '<literal>'`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: CatalogColumn,
    pub operator: String,
    pub literal: String,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub columns: Vec<CatalogColumn>,
    pub conditions: Vec<Condition>,
    pub qualifiers: HashMap<String, String>,
    pub page_size: u32,
    pub cursor: String,
}

/// Allocates a query with an empty condition list and a cursor of zero.
pub fn make_query(page_size: u32, columns: &[CatalogColumn]) -> Query {
    Query {
        columns: columns.to_vec(),
        conditions: Vec::new(),
        qualifiers: HashMap::new(),
        page_size,
        cursor: String::new(),
    }
}

/// Appends `(column, operator, literal)` conditions to `query`.
///
/// Literals containing a single quote are rejected with an
/// invalid-argument error rather than escaped: the condition's wire
/// rendering is `<operator> '<literal>'`, and a silently-escaped quote
/// would need a backend-specific escaping dialect this crate has no way
/// to verify. Rejecting keeps the policy single and testable.
pub fn add_conditions(
    query: &mut Query,
    conds: impl IntoIterator<Item = (CatalogColumn, String, String)>,
) -> Result<(), ExecutorError> {
    for (column, operator, literal) in conds {
        if literal.contains('\'') {
            return Err(ExecutorError::invalid_argument(format!(
                "literal {literal:?} contains a single quote, which this backend cannot render safely"
            )));
        }
        query.conditions.push(Condition {
            column,
            operator,
            literal,
        });
    }
    Ok(())
}

/// Adds a keyed qualifier, e.g. `("zone", "tempZone")`.
pub fn add_qualifier(query: &mut Query, key: &str, value: &str) {
    query.qualifiers.insert(key.to_string(), value.to_string());
}

/// Renders a condition the way the backend expects it on the wire.
pub fn render_condition(cond: &Condition) -> String {
    format!("{} '{}'", cond.operator, cond.literal)
}

fn splitdir(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) if idx > 0 => (path[..idx].to_string(), path[idx + 1..].to_string()),
        Some(_) => ("/".to_string(), path[1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Conditions for listing metadata on a data object: `COLL_NAME` =
/// dirname(path), `DATA_NAME` = basename(path), optionally
/// `META_DATA_ATTR_NAME` = attr.
pub fn list_metadata_data_object_conditions(
    path: &str,
    attr: Option<&str>,
) -> Vec<(CatalogColumn, String, String)> {
    let (coll, data) = splitdir(path);
    let mut conds = vec![
        (CatalogColumn::CollName, "=".to_string(), coll),
        (CatalogColumn::DataName, "=".to_string(), data),
    ];
    if let Some(attr) = attr {
        conds.push((CatalogColumn::MetaDataAttrName, "=".to_string(), attr.to_string()));
    }
    conds
}

/// Conditions for listing metadata on a collection: `COLL_NAME` = path,
/// optionally `META_COLL_ATTR_NAME` = attr.
pub fn list_metadata_collection_conditions(
    path: &str,
    attr: Option<&str>,
) -> Vec<(CatalogColumn, String, String)> {
    let mut conds = vec![(CatalogColumn::CollName, "=".to_string(), path.to_string())];
    if let Some(attr) = attr {
        conds.push((CatalogColumn::MetaCollAttrName, "=".to_string(), attr.to_string()));
    }
    conds
}

/// Conditions for a data-object AVU search clause.
pub fn search_data_object_avu_conditions(
    attribute: &str,
    value: &str,
    operator: &str,
) -> Vec<(CatalogColumn, String, String)> {
    vec![
        (CatalogColumn::MetaDataAttrName, "=".to_string(), attribute.to_string()),
        (CatalogColumn::MetaDataAttrValue, operator.to_string(), value.to_string()),
    ]
}

/// Conditions for a collection AVU search clause, symmetric with the
/// data-object form above but against `META_COLL_*` columns.
pub fn search_collection_avu_conditions(
    attribute: &str,
    value: &str,
    operator: &str,
) -> Vec<(CatalogColumn, String, String)> {
    vec![
        (CatalogColumn::MetaCollAttrName, "=".to_string(), attribute.to_string()),
        (CatalogColumn::MetaCollAttrValue, operator.to_string(), value.to_string()),
    ]
}

/// Builds the `LIKE` pattern for restricting a search to a subtree.
/// Absolute roots yield `"<root>%"`; non-absolute fragments yield
/// `"%<root>%"`.
pub fn subtree_pattern(root: &str) -> String {
    if root.starts_with('/') {
        format!("{root}%")
    } else {
        format!("%{root}%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtree_pattern_for_absolute_root() {
        assert_eq!(subtree_pattern("/a/b"), "/a/b%");
    }

    #[test]
    fn subtree_pattern_for_fragment() {
        assert_eq!(subtree_pattern("b/c"), "%b/c%");
    }

    #[test]
    fn add_conditions_rejects_embedded_single_quote() {
        let mut q = make_query(500, &[CatalogColumn::CollName]);
        let err = add_conditions(
            &mut q,
            vec![(CatalogColumn::CollName, "=".to_string(), "o'brien".to_string())],
        )
        .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidArgument(_)));
    }

    #[test]
    fn add_conditions_accepts_clean_literal() {
        let mut q = make_query(500, &[CatalogColumn::CollName]);
        add_conditions(
            &mut q,
            vec![(CatalogColumn::CollName, "=".to_string(), "/z/x".to_string())],
        )
        .unwrap();
        assert_eq!(q.conditions.len(), 1);
        assert_eq!(render_condition(&q.conditions[0]), "= '/z/x'");
    }

    #[test]
    fn list_metadata_data_object_splits_path() {
        let conds = list_metadata_data_object_conditions("/z/x/f.txt", None);
        assert_eq!(conds[0].2, "/z/x");
        assert_eq!(conds[1].2, "f.txt");
    }
}
