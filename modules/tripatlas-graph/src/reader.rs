use neo4rs::query;
use serde_json::Value;

use crate::GraphClient;

/// Read-side wrapper for the graph: schema introspection and ad-hoc read
/// queries. This is the surface the query-translation assistant consumes —
/// it never touches the write path.
pub struct GraphReader {
    client: GraphClient,
}

impl GraphReader {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    /// Node labels present in the store.
    pub async fn labels(&self) -> Result<Vec<String>, neo4rs::Error> {
        self.collect_strings("CALL db.labels() YIELD label RETURN label", "label")
            .await
    }

    /// Relationship types present in the store.
    pub async fn relationship_types(&self) -> Result<Vec<String>, neo4rs::Error> {
        self.collect_strings(
            "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
            "relationshipType",
        )
        .await
    }

    /// Property keys observed on nodes with `label`, sampled from the first
    /// few hundred nodes.
    pub async fn property_keys(&self, label: &str) -> Result<Vec<String>, neo4rs::Error> {
        let cypher = format!(
            "MATCH (n:{label}) WITH n LIMIT 200 \
             UNWIND keys(n) AS key RETURN DISTINCT key ORDER BY key"
        );
        self.collect_strings(&cypher, "key").await
    }

    /// Node count for a label.
    pub async fn count(&self, label: &str) -> Result<i64, neo4rs::Error> {
        let cypher = format!("MATCH (n:{label}) RETURN count(n) AS count");
        let mut stream = self.client.graph.execute(query(&cypher)).await?;
        if let Some(row) = stream.next().await? {
            Ok(row.get("count").unwrap_or(0))
        } else {
            Ok(0)
        }
    }

    /// Run an ad-hoc read query, extracting the named return columns from
    /// each row. Callers own their RETURN clause, so they name its columns.
    pub async fn run_read(
        &self,
        cypher: &str,
        columns: &[&str],
    ) -> Result<Vec<Vec<Value>>, neo4rs::Error> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            let values = columns
                .iter()
                .map(|c| row.get::<Value>(c).unwrap_or(Value::Null))
                .collect();
            rows.push(values);
        }
        Ok(rows)
    }

    async fn collect_strings(
        &self,
        cypher: &str,
        column: &str,
    ) -> Result<Vec<String>, neo4rs::Error> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await? {
            let v: String = row.get(column).unwrap_or_default();
            if !v.is_empty() {
                out.push(v);
            }
        }
        Ok(out)
    }
}
