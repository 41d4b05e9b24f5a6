use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Declare the uniqueness constraints the ingest path relies on.
/// Idempotent: "already exists" is not an error.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Declaring uniqueness constraints...");

    let constraints = [
        "CREATE CONSTRAINT IF NOT EXISTS FOR (p:Province) REQUIRE p.name IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (c:City) REQUIRE c.name IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (d:District) REQUIRE d.name IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (s:Sight) REQUIRE s.city_uid IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (r:Restaurant) REQUIRE r.city_uid IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (d:Delicacy) REQUIRE d.city_uid IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (l:Line) REQUIRE l.city_uid IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (s:Station) REQUIRE s.poi_id IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (f:Feature) REQUIRE f.name IS UNIQUE",
        "CREATE CONSTRAINT IF NOT EXISTS FOR (cs:CookingStyle) REQUIRE cs.name IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }

    info!("Uniqueness constraints in place");
    Ok(())
}

/// Run a DDL statement, treating "already exists" / "equivalent" responses
/// as success.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("already exists") || msg.contains("equivalent") {
                Ok(())
            } else {
                warn!(statement = cypher, "Constraint declaration failed: {msg}");
                Err(e)
            }
        }
    }
}
