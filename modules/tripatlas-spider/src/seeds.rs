//! Seed-file loading and derived-seed artifacts.
//!
//! Pipeline stages chain through these files: the sights crawl discovers
//! cities, the resolver turns city names into listing URLs, and each listing
//! crawl reads the previous stage's artifact as its seed input. A missing or
//! unparseable seed file is the one fatal error in the system.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use tripatlas_common::Seed;

use crate::sources::derive_restaurant_url;

/// Load a JSON seed file: an array of objects carrying `city_name` plus the
/// module's URL field. Entries without a usable name are dropped.
pub fn load_url_seeds(path: &Path, url_field: &str) -> Result<Vec<Seed>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let entries: Vec<Map<String, Value>> = serde_json::from_str(strip_bom(&raw))
        .with_context(|| format!("parsing seed file {}", path.display()))?;

    let mut seeds = Vec::new();
    for entry in entries {
        let name = entry
            .get("city_name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let url = entry
            .get(url_field)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        seeds.push(Seed {
            name: name.to_string(),
            url,
        });
    }

    if seeds.is_empty() {
        bail!("seed file {} contains no usable entries", path.display());
    }
    Ok(seeds)
}

/// Load a comma-delimited name list. Tolerates a BOM and a trailing comma —
/// both show up in hand-maintained lists.
pub fn load_named_seeds(path: &Path) -> Result<Vec<Seed>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading name list {}", path.display()))?;
    let seeds: Vec<Seed> = strip_bom(&raw)
        .trim()
        .trim_end_matches(',')
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Seed::named)
        .collect();

    if seeds.is_empty() {
        bail!("name list {} contains no usable entries", path.display());
    }
    Ok(seeds)
}

/// Write a derived seed artifact: one `{city_name, <url_field>}` object per
/// resolved seed, consumed by the next stage as its seed input.
pub fn write_url_seeds(path: &Path, seeds: &[(String, String)], url_field: &str) -> Result<()> {
    let array: Vec<Value> = seeds
        .iter()
        .map(|(name, url)| {
            let mut obj = Map::new();
            obj.insert("city_name".to_string(), Value::String(name.clone()));
            obj.insert(url_field.to_string(), Value::String(url.clone()));
            Value::Object(obj)
        })
        .collect();
    write_text(path, &serde_json::to_string_pretty(&Value::Array(array))?)
}

/// Rewrite the food-listing artifact into the restaurant-listing one:
/// URL path derived, field renamed. Returns how many entries were written.
pub fn derive_restaurant_seeds(input: &Path, output: &Path) -> Result<usize> {
    let seeds = load_url_seeds(input, "food_url")?;
    let derived: Vec<(String, String)> = seeds
        .into_iter()
        .filter_map(|s| s.url.map(|u| (s.name, derive_restaurant_url(&u))))
        .collect();
    write_url_seeds(output, &derived, "restaurant_url")?;
    Ok(derived.len())
}

/// Dump a comma-delimited name list (the post-sights city dump).
pub fn write_name_list(path: &Path, names: &[String]) -> Result<()> {
    write_text(path, &names.join(","))
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating artifact dir {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing artifact {}", path.display()))
}

fn strip_bom(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_seeds_parse_with_bom_and_skip_nameless_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Food_citys.txt");
        fs::write(
            &path,
            "\u{feff}[{\"city_name\":\"南宁\",\"food_url\":\"https://example/fooditem/1\"},\
             {\"city_name\":\"\",\"food_url\":\"https://example/fooditem/2\"},\
             {\"city_name\":\"桂林\"}]",
        )
        .unwrap();

        let seeds = load_url_seeds(&path, "food_url").unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].name, "南宁");
        assert_eq!(seeds[0].url.as_deref(), Some("https://example/fooditem/1"));
        assert_eq!(seeds[1].name, "桂林");
        assert!(seeds[1].url.is_none());
    }

    #[test]
    fn missing_seed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_url_seeds(&dir.path().join("nope.txt"), "city_url").is_err());
    }

    #[test]
    fn name_list_tolerates_bom_and_trailing_comma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("All_name_citys.txt");
        fs::write(&path, "\u{feff}南宁, 桂林,柳州,").unwrap();

        let seeds = load_named_seeds(&path).unwrap();
        let names: Vec<&str> = seeds.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["南宁", "桂林", "柳州"]);
    }

    #[test]
    fn restaurant_seeds_derive_from_food_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let food = dir.path().join("Food_citys.txt");
        let restaurant = dir.path().join("Restaurant_citys.txt");
        write_url_seeds(
            &food,
            &[(
                "南宁".to_string(),
                "https://example/fooditem/nanning702.html".to_string(),
            )],
            "food_url",
        )
        .unwrap();

        let written = derive_restaurant_seeds(&food, &restaurant).unwrap();
        assert_eq!(written, 1);

        let seeds = load_url_seeds(&restaurant, "restaurant_url").unwrap();
        assert_eq!(
            seeds[0].url.as_deref(),
            Some("https://example/restaurantlist/nanning702.html")
        );
    }
}
