use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chromium_client::{SessionConfig, SessionManager};
use tripatlas_common::Config;
use tripatlas_graph::{migrate, GraphClient, GraphReader, GraphWriter};
use tripatlas_spider::pipeline::Pipeline;
use tripatlas_spider::resolve::resolve_seeds;
use tripatlas_spider::seeds;
use tripatlas_spider::sources;
use tripatlas_spider::traits::{RecordStore, SessionProvider};
use tripatlas_spider::transit::{import_transit, TRANSIT_BATCH_SIZE};

#[derive(Parser)]
#[command(name = "tripatlas-spider", about = "Travel knowledge-graph extraction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl sight listings from a province/city seed file.
    Sights {
        /// JSON array of {city_name, city_url}.
        #[arg(long)]
        seeds: PathBuf,
    },
    /// Crawl restaurant listings for cities already in the graph.
    Restaurants {
        /// JSON array of {city_name, restaurant_url}.
        #[arg(long)]
        seeds: PathBuf,
    },
    /// Crawl delicacy listings for cities already in the graph.
    Delicacies {
        /// JSON array of {city_name, food_url}.
        #[arg(long)]
        seeds: PathBuf,
    },
    /// Resolve food-listing URLs for a comma-delimited city-name list.
    ResolveFood {
        #[arg(long)]
        names: PathBuf,
        /// Derived seed artifact for the delicacy crawl.
        #[arg(long)]
        out: PathBuf,
    },
    /// Derive the restaurant seed artifact from the food one.
    DeriveRestaurantSeeds {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Import the transit station table (CSV).
    Transit {
        #[arg(long)]
        table: PathBuf,
    },
    /// Dump the graph's city names as the next stage's name list.
    DumpCities {
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the store's schema surface (labels, relationships, properties).
    Schema,
    /// Run a read-only Cypher query and print the named columns as JSON rows.
    Query {
        #[arg(long)]
        cypher: String,
        /// Column names from the RETURN clause, comma-separated.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tripatlas_spider=info".parse()?)
                .add_directive("tripatlas_graph=info".parse()?)
                .add_directive("chromium_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    // An operator interrupt finishes the seed in flight, flush and
    // checkpoint included, before the process exits.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received; finishing the seed in flight before exit");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    match cli.command {
        Command::Sights { seeds: seed_path } => {
            let module = sources::sights();
            let seed_list = seeds::load_url_seeds(&seed_path, module.seed_url_field)?;
            let stats = pipeline(&config, shutdown)
                .await?
                .run(&module, &seed_list)
                .await?;
            info!(%stats, "Sights crawl finished");
        }
        Command::Restaurants { seeds: seed_path } => {
            let module = sources::restaurants();
            let seed_list = seeds::load_url_seeds(&seed_path, module.seed_url_field)?;
            let stats = pipeline(&config, shutdown)
                .await?
                .run(&module, &seed_list)
                .await?;
            info!(%stats, "Restaurant crawl finished");
        }
        Command::Delicacies { seeds: seed_path } => {
            let module = sources::delicacies();
            let seed_list = seeds::load_url_seeds(&seed_path, module.seed_url_field)?;
            let stats = pipeline(&config, shutdown)
                .await?
                .run(&module, &seed_list)
                .await?;
            info!(%stats, "Delicacy crawl finished");
        }
        Command::ResolveFood { names, out } => {
            let name_list = seeds::load_named_seeds(&names)?;
            let resolved = resolve_seeds(
                session_provider(&config),
                &sources::food_resolver(),
                &name_list,
                &config.data_dir,
                &out,
                &config.policy,
                shutdown,
            )
            .await?;
            info!(resolved, "Food URL resolution finished");
        }
        Command::DeriveRestaurantSeeds { input, out } => {
            let written = seeds::derive_restaurant_seeds(&input, &out)?;
            info!(written, artifact = %out.display(), "Restaurant seeds derived");
        }
        Command::Transit { table } => {
            let store = connect_store(&config).await?;
            let stats = import_transit(store, &table, TRANSIT_BATCH_SIZE).await?;
            info!(%stats, "Transit import finished");
        }
        Command::DumpCities { out } => {
            let store = connect_store(&config).await?;
            let cities = store.list_cities().await?;
            let names: Vec<String> = cities.into_iter().map(|c| c.name).collect();
            seeds::write_name_list(&out, &names)?;
            info!(count = names.len(), artifact = %out.display(), "City names dumped");
        }
        Command::Schema => {
            let client = connect_client(&config).await?;
            let reader = GraphReader::new(client);
            let labels = reader.labels().await?;
            let mut schema = serde_json::Map::new();
            schema.insert(
                "relationship_types".to_string(),
                serde_json::json!(reader.relationship_types().await?),
            );
            let mut label_info = serde_json::Map::new();
            for label in &labels {
                label_info.insert(
                    label.clone(),
                    serde_json::json!({
                        "count": reader.count(label).await?,
                        "properties": reader.property_keys(label).await?,
                    }),
                );
            }
            schema.insert("labels".to_string(), serde_json::Value::Object(label_info));
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Command::Query { cypher, columns } => {
            let client = connect_client(&config).await?;
            let reader = GraphReader::new(client);
            let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
            let rows = reader.run_read(&cypher, &column_refs).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}

async fn connect_client(config: &Config) -> Result<GraphClient> {
    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    migrate(&client).await?;
    Ok(client)
}

async fn connect_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    let client = connect_client(config).await?;
    Ok(Arc::new(GraphWriter::new(client)))
}

fn session_provider(config: &Config) -> Arc<dyn SessionProvider> {
    let session_config = SessionConfig {
        executable: config.chrome_executable.clone(),
        nav_timeout: Duration::from_secs(config.policy.nav_timeout_secs),
        ..SessionConfig::default()
    };
    Arc::new(SessionManager::new(session_config))
}

async fn pipeline(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Pipeline> {
    let store = connect_store(config).await?;
    Ok(Pipeline::new(
        session_provider(config),
        store,
        config.data_dir.clone(),
        config.policy.clone(),
        shutdown,
    ))
}
