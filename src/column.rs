//! Typed catalog column identifiers.
//!
//! Replaces raw integer/string column constants with a closed
//! enumeration carrying its own external label, so the Query Builder
//! cannot mix a data-object column into a collection-metadata query (or
//! vice versa) by accident — see the "Global catalog-column
//! identifiers" design note.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogColumn {
    CollName,
    DataName,
    DataSize,
    DataChecksum,
    MetaDataAttrName,
    MetaDataAttrValue,
    MetaDataAttrUnits,
    MetaCollAttrName,
    MetaCollAttrValue,
    MetaCollAttrUnits,
}

impl CatalogColumn {
    /// The label used as the JSON key for this column in result rows.
    pub fn label(self) -> &'static str {
        match self {
            CatalogColumn::CollName => "collection",
            CatalogColumn::DataName => "data_object",
            CatalogColumn::DataSize => "size",
            CatalogColumn::DataChecksum => "checksum",
            CatalogColumn::MetaDataAttrName => "attribute",
            CatalogColumn::MetaDataAttrValue => "value",
            CatalogColumn::MetaDataAttrUnits => "units",
            CatalogColumn::MetaCollAttrName => "attribute",
            CatalogColumn::MetaCollAttrValue => "value",
            CatalogColumn::MetaCollAttrUnits => "units",
        }
    }
}
