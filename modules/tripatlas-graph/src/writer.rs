use neo4rs::{query, Query};
use tracing::info;

use tripatlas_common::{CityRecord, ItemLabel, ItemRecord, ProvinceRecord, TransitRow};

use crate::GraphClient;

/// Write-side wrapper for the graph. Used by the spider only.
///
/// Administrative nodes (Province/City/District) are merge-created eagerly
/// during traversal; item nodes are only ever created inside one batch
/// transaction in `commit_items`, so a failed batch leaves no partial state.
pub struct GraphWriter {
    client: GraphClient,
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Merge-create a Province node.
    pub async fn upsert_province(&self, p: &ProvinceRecord) -> Result<(), neo4rs::Error> {
        let q = query("MERGE (p:Province {name: $name}) SET p.url = $url")
            .param("name", p.name.as_str())
            .param("url", p.url.as_str());
        self.client.graph.run(q).await
    }

    /// Merge-create a City node, linked to its province when one is known.
    pub async fn upsert_city(
        &self,
        c: &CityRecord,
        province: Option<&str>,
    ) -> Result<(), neo4rs::Error> {
        let q = match province {
            Some(p) => query(
                "MERGE (c:City {name: $name}) SET c.url = $url \
                 WITH c MATCH (p:Province {name: $province}) \
                 MERGE (c)-[:BELONGS_TO]->(p)",
            )
            .param("province", p),
            None => query("MERGE (c:City {name: $name}) SET c.url = $url"),
        }
        .param("name", c.name.as_str())
        .param("url", c.url.as_str());
        self.client.graph.run(q).await
    }

    /// Point lookup of a City by name.
    pub async fn get_city(&self, name: &str) -> Result<Option<CityRecord>, neo4rs::Error> {
        let q = query("MATCH (c:City {name: $name}) RETURN c.name AS name, c.url AS url LIMIT 1")
            .param("name", name);
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            Ok(Some(CityRecord {
                name: row.get("name").unwrap_or_default(),
                url: row.get("url").unwrap_or_default(),
            }))
        } else {
            Ok(None)
        }
    }

    /// All City nodes currently in the graph.
    pub async fn list_cities(&self) -> Result<Vec<CityRecord>, neo4rs::Error> {
        let q = query("MATCH (c:City) RETURN c.name AS name, c.url AS url ORDER BY name");
        let mut stream = self.client.graph.execute(q).await?;
        let mut cities = Vec::new();
        while let Some(row) = stream.next().await? {
            cities.push(CityRecord {
                name: row.get("name").unwrap_or_default(),
                url: row.get("url").unwrap_or_default(),
            });
        }
        Ok(cities)
    }

    /// Point existence lookup by composite key.
    pub async fn item_exists(&self, label: ItemLabel, uid: &str) -> Result<bool, neo4rs::Error> {
        let cypher = format!(
            "MATCH (n:{} {{city_uid: $uid}}) RETURN n.city_uid AS uid LIMIT 1",
            label.as_str()
        );
        let mut stream = self.client.graph.execute(query(&cypher).param("uid", uid)).await?;
        Ok(stream.next().await?.is_some())
    }

    /// Commit a batch of item records in one transaction: each item node,
    /// its LOCATED_IN edge, and merge-created tag nodes with their edges.
    /// On failure the transaction is rolled back and the error returned;
    /// nothing from the batch reaches the store.
    pub async fn commit_items(&self, items: &[ItemRecord]) -> Result<(), neo4rs::Error> {
        if items.is_empty() {
            return Ok(());
        }

        let mut queries: Vec<Query> = Vec::new();
        for item in items {
            queries.push(item_create_query(item));
            if let Some(kind) = item.tag_kind {
                for tag in &item.tags {
                    let cypher = format!(
                        "MATCH (n:{label} {{city_uid: $uid}}) \
                         MERGE (t:{tag_label} {{name: $tag}}) \
                         MERGE (n)-[:{rel}]->(t)",
                        label = item.label.as_str(),
                        tag_label = kind.label(),
                        rel = kind.relationship(),
                    );
                    queries.push(
                        query(&cypher)
                            .param("uid", item.city_uid.as_str())
                            .param("tag", tag.as_str()),
                    );
                }
            }
        }

        let mut txn = self.client.graph.start_txn().await?;
        if let Err(e) = txn.run_queries(queries).await {
            let _ = txn.rollback().await;
            return Err(e);
        }
        txn.commit().await?;

        info!(count = items.len(), "Committed item batch");
        Ok(())
    }

    /// Commit a batch of transit rows in one transaction. Everything is
    /// merge-created: the table is re-importable without duplication.
    pub async fn commit_transit(&self, rows: &[TransitRow]) -> Result<(), neo4rs::Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut queries: Vec<Query> = Vec::new();
        for row in rows {
            queries.push(transit_row_query(row));
        }

        let mut txn = self.client.graph.start_txn().await?;
        if let Err(e) = txn.run_queries(queries).await {
            let _ = txn.rollback().await;
            return Err(e);
        }
        txn.commit().await?;

        info!(count = rows.len(), "Committed transit batch");
        Ok(())
    }
}

/// CREATE query for one item node plus its LOCATED_IN edge.
/// Field keys come from the compile-time module table, so interpolating them
/// into the property map is safe; all values travel as parameters.
fn item_create_query(item: &ItemRecord) -> Query {
    let mut props = String::from(
        "city_uid: $city_uid, name: $name, url: $url, city: $city, city_url: $city_url",
    );
    for (i, key) in item.fields.keys().enumerate() {
        props.push_str(&format!(", {key}: $f{i}"));
    }
    let cypher = format!(
        "CREATE (n:{label} {{{props}}}) \
         WITH n MATCH (c:City {{name: $city}}) \
         MERGE (n)-[:LOCATED_IN]->(c)",
        label = item.label.as_str(),
    );

    let mut q = query(&cypher)
        .param("city_uid", item.city_uid.as_str())
        .param("name", item.name.as_str())
        .param("url", item.url.as_str())
        .param("city", item.city.as_str())
        .param("city_url", item.city_url.as_str());
    for (i, value) in item.fields.values().enumerate() {
        q = q.param(&format!("f{i}"), value.as_str());
    }
    q
}

/// MERGE chain for one transit table row: City, optional District, Line,
/// Station, and their PART_OF / OPERATES_IN / BELONGS_TO / LOCATED_IN edges.
fn transit_row_query(row: &TransitRow) -> Query {
    let cypher = if row.district.is_some() {
        "MERGE (c:City {name: $city}) \
         SET c.gd_lng = $gd_lng, c.gd_lat = $gd_lat, c.bd_lng = $bd_lng, c.bd_lat = $bd_lat \
         MERGE (d:District {name: $district}) SET d.city = $city \
         MERGE (d)-[:PART_OF]->(c) \
         MERGE (l:Line {city_uid: $line_uid}) SET l.name = $line_name, l.city = $city \
         MERGE (l)-[:OPERATES_IN]->(c) \
         MERGE (s:Station {poi_id: $poi_id}) \
         SET s.name = $station_name, s.pinyin = $pinyin, s.line_name = $line_name, \
             s.city = $city, s.gd_lng = $gd_lng, s.gd_lat = $gd_lat, \
             s.bd_lng = $bd_lng, s.bd_lat = $bd_lat \
         MERGE (s)-[:BELONGS_TO]->(l) \
         MERGE (s)-[:LOCATED_IN]->(c) \
         MERGE (s)-[:LOCATED_IN]->(d)"
    } else {
        "MERGE (c:City {name: $city}) \
         SET c.gd_lng = $gd_lng, c.gd_lat = $gd_lat, c.bd_lng = $bd_lng, c.bd_lat = $bd_lat \
         MERGE (l:Line {city_uid: $line_uid}) SET l.name = $line_name, l.city = $city \
         MERGE (l)-[:OPERATES_IN]->(c) \
         MERGE (s:Station {poi_id: $poi_id}) \
         SET s.name = $station_name, s.pinyin = $pinyin, s.line_name = $line_name, \
             s.city = $city, s.gd_lng = $gd_lng, s.gd_lat = $gd_lat, \
             s.bd_lng = $bd_lng, s.bd_lat = $bd_lat \
         MERGE (s)-[:BELONGS_TO]->(l) \
         MERGE (s)-[:LOCATED_IN]->(c)"
    };

    query(cypher)
        .param("city", row.city.as_str())
        .param("district", row.district.as_deref().unwrap_or(""))
        .param("line_uid", row.line_uid())
        .param("line_name", row.line_name.as_str())
        .param("station_name", row.station_name.as_str())
        .param("poi_id", row.poi_id.as_str())
        .param("pinyin", row.pinyin.as_deref().unwrap_or(""))
        .param("gd_lng", row.gd_lng.unwrap_or(0.0))
        .param("gd_lat", row.gd_lat.unwrap_or(0.0))
        .param("bd_lng", row.bd_lng.unwrap_or(0.0))
        .param("bd_lat", row.bd_lat.unwrap_or(0.0))
}
