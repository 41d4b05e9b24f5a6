//! Transit-table import.
//!
//! Reads the station table (CSV, upstream column headers), drops rows
//! missing a required column, and merge-creates City / District / Line /
//! Station nodes with their PART_OF / OPERATES_IN / BELONGS_TO / LOCATED_IN
//! edges in batches of 500. Everything merges, so the table is
//! re-importable without duplication.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

use tripatlas_common::text::clean_text;
use tripatlas_common::TransitRow;

use crate::traits::RecordStore;

pub const TRANSIT_BATCH_SIZE: usize = 500;

/// Raw CSV row. Renames cover the upstream export's Chinese headers;
/// aliases accept an already-translated table.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "站点名称", alias = "station_name")]
    station_name: Option<String>,
    #[serde(rename = "POI编号", alias = "poi_id")]
    poi_id: Option<String>,
    #[serde(rename = "拼音名称", alias = "pinyin")]
    pinyin: Option<String>,
    #[serde(rename = "gd经度", alias = "gd_lng")]
    gd_lng: Option<f64>,
    #[serde(rename = "gd纬度", alias = "gd_lat")]
    gd_lat: Option<f64>,
    #[serde(rename = "路线名称", alias = "line_name")]
    line_name: Option<String>,
    #[serde(rename = "城市名称", alias = "city")]
    city: Option<String>,
    #[serde(rename = "行政区名称", alias = "district")]
    district: Option<String>,
    #[serde(rename = "bd经度", alias = "bd_lng")]
    bd_lng: Option<f64>,
    #[serde(rename = "bd纬度", alias = "bd_lat")]
    bd_lat: Option<f64>,
}

#[derive(Debug, Default)]
pub struct TransitStats {
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub rows_committed: u64,
    pub batches_failed: u64,
    pub cities: BTreeSet<String>,
    pub districts: BTreeSet<String>,
    pub lines: BTreeSet<String>,
    pub stations: BTreeSet<String>,
}

impl fmt::Display for TransitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows: {} read, {} skipped, {} committed ({} failed batches); \
             {} cities, {} districts, {} lines, {} stations",
            self.rows_read,
            self.rows_skipped,
            self.rows_committed,
            self.batches_failed,
            self.cities.len(),
            self.districts.len(),
            self.lines.len(),
            self.stations.len(),
        )
    }
}

pub async fn import_transit(
    store: Arc<dyn RecordStore>,
    path: &Path,
    batch_size: usize,
) -> Result<TransitStats> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening transit table {}", path.display()))?;

    let mut stats = TransitStats::default();
    let mut batch: Vec<TransitRow> = Vec::with_capacity(batch_size);

    for (line, result) in reader.deserialize::<RawRow>().enumerate() {
        stats.rows_read += 1;
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!(line = line + 2, "Unparseable row, skipping: {e}");
                stats.rows_skipped += 1;
                continue;
            }
        };
        let Some(row) = clean_row(raw) else {
            stats.rows_skipped += 1;
            continue;
        };

        stats.cities.insert(row.city.clone());
        if let Some(d) = &row.district {
            stats.districts.insert(d.clone());
        }
        stats.lines.insert(row.line_uid());
        stats.stations.insert(row.poi_id.clone());

        batch.push(row);
        if batch.len() >= batch_size {
            commit_chunk(store.as_ref(), &mut batch, &mut stats).await;
        }
    }

    commit_chunk(store.as_ref(), &mut batch, &mut stats).await;

    info!(%stats, "Transit import complete");
    Ok(stats)
}

async fn commit_chunk(store: &dyn RecordStore, batch: &mut Vec<TransitRow>, stats: &mut TransitStats) {
    if batch.is_empty() {
        return;
    }
    match store.commit_transit(batch).await {
        Ok(()) => stats.rows_committed += batch.len() as u64,
        Err(e) => {
            stats.batches_failed += 1;
            error!(count = batch.len(), "Transit batch failed, dropping: {e:#}");
        }
    }
    batch.clear();
}

/// Validate and clean one raw row. Rows missing any required column are
/// dropped, matching the source table's sparse tail.
fn clean_row(raw: RawRow) -> Option<TransitRow> {
    let station_name = required(raw.station_name)?;
    let poi_id = required(raw.poi_id)?;
    let line_name = required(raw.line_name)?;
    let city = required(raw.city)?;

    Some(TransitRow {
        city,
        district: raw.district.map(|d| clean_text(&d)).filter(|d| !d.is_empty()),
        line_name,
        station_name,
        poi_id,
        pinyin: raw.pinyin.map(|p| clean_text(&p)).filter(|p| !p.is_empty()),
        gd_lng: raw.gd_lng,
        gd_lat: raw.gd_lat,
        bd_lng: raw.bd_lng,
        bd_lat: raw.bd_lat,
    })
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| clean_text(&v)).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_missing_required_columns_are_dropped() {
        let raw = RawRow {
            station_name: Some("体育西路".into()),
            poi_id: None,
            pinyin: None,
            gd_lng: None,
            gd_lat: None,
            line_name: Some("1号线".into()),
            city: Some("广州".into()),
            district: None,
            bd_lng: None,
            bd_lat: None,
        };
        assert!(clean_row(raw).is_none());
    }

    #[test]
    fn clean_row_strips_invisible_characters() {
        let raw = RawRow {
            station_name: Some("\u{200b}体育西路 ".into()),
            poi_id: Some("BV10012345".into()),
            pinyin: Some(" tiyuxilu".into()),
            gd_lng: Some(113.32),
            gd_lat: Some(23.13),
            line_name: Some("1号线".into()),
            city: Some("广州".into()),
            district: Some(" 天河区".into()),
            bd_lng: None,
            bd_lat: None,
        };
        let row = clean_row(raw).unwrap();
        assert_eq!(row.station_name, "体育西路");
        assert_eq!(row.district.as_deref(), Some("天河区"));
        assert_eq!(row.line_uid(), "广州_1号线");
    }
}
