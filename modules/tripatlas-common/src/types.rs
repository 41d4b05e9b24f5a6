use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Node labels for extracted item records. One label per extraction module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemLabel {
    Sight,
    Restaurant,
    Delicacy,
}

impl ItemLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemLabel::Sight => "Sight",
            ItemLabel::Restaurant => "Restaurant",
            ItemLabel::Delicacy => "Delicacy",
        }
    }
}

/// One unit of work for the pipeline: a named city or province, with the
/// listing URL when the seed file carries one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    pub name: String,
    pub url: Option<String>,
}

impl Seed {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    pub fn with_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvinceRecord {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityRecord {
    pub name: String,
    pub url: String,
}

/// Shared vocabulary nodes an item can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagKind {
    Feature,
    CookingStyle,
}

impl TagKind {
    pub fn label(&self) -> &'static str {
        match self {
            TagKind::Feature => "Feature",
            TagKind::CookingStyle => "CookingStyle",
        }
    }

    pub fn relationship(&self) -> &'static str {
        match self {
            TagKind::Feature => "HAS_FEATURE",
            TagKind::CookingStyle => "HAS_STYLE",
        }
    }
}

/// A fully extracted item (sight, restaurant, or delicacy) ready for ingest.
/// `city_uid` is the composite dedup key; `fields` holds the module's
/// summary + detail fields in extraction order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub label: ItemLabel,
    pub city_uid: String,
    pub name: String,
    pub url: String,
    pub city: String,
    pub city_url: String,
    pub fields: BTreeMap<String, String>,
    /// Whitespace-split tag values (Feature / CookingStyle vocabulary).
    pub tags: Vec<String>,
    pub tag_kind: Option<TagKind>,
}

/// Composite dedup key: parent name + item name, the stand-in for a natural
/// unique identifier the source never exposes.
pub fn composite_key(city: &str, name: &str) -> String {
    format!("{city}_{name}")
}

/// One row of the transit station table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitRow {
    pub city: String,
    pub district: Option<String>,
    pub line_name: String,
    pub station_name: String,
    pub poi_id: String,
    pub pinyin: Option<String>,
    pub gd_lng: Option<f64>,
    pub gd_lat: Option<f64>,
    pub bd_lng: Option<f64>,
    pub bd_lat: Option<f64>,
}

impl TransitRow {
    /// Composite key for the line node this row belongs to.
    pub fn line_uid(&self) -> String {
        composite_key(&self.city, &self.line_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_joins_city_and_name() {
        assert_eq!(composite_key("南宁", "青秀山"), "南宁_青秀山");
    }

    #[test]
    fn line_uid_uses_city_and_line() {
        let row = TransitRow {
            city: "广州".into(),
            district: None,
            line_name: "1号线".into(),
            station_name: "体育西路".into(),
            poi_id: "BV10012345".into(),
            pinyin: None,
            gd_lng: None,
            gd_lat: None,
            bd_lng: None,
            bd_lat: None,
        };
        assert_eq!(row.line_uid(), "广州_1号线");
    }
}
