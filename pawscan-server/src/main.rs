use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use pawscan_core::classifier::HttpClassifierClient;
use pawscan_core::generation::GeminiImageClient;
use pawscan_core::identifier::GeminiIdentifierClient;
use pawscan_core::PawscanConfig;

use pawscan_server::storage::FsBlobStore;
use pawscan_server::subsystems::queue;
use pawscan_server::subsystems::simulate::{JobDeps, PayloadCache};
use pawscan_server::subsystems::status_cache::StatusCache;
use pawscan_server::AppContext;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "pawscan.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match PawscanConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match pawscan_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match pawscan_core::db::health_check(&pool).await {
            Ok(v) => println!("PostgreSQL connected: {}", v),
            Err(e) => {
                println!("PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("Pawscan DB health check passed");
        return Ok(());
    }

    // Model service clients
    let classifier = match HttpClassifierClient::new(config.classifier.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create classifier client: {}", e);
            std::process::exit(1);
        }
    };
    let identifier = match GeminiIdentifierClient::new(config.identifier.clone(), None) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create identifier client (is GOOGLE_API_KEY set?): {}", e);
            std::process::exit(1);
        }
    };
    let generator = match GeminiImageClient::new(config.generation.clone(), None) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create generation client: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(FsBlobStore::new(config.storage.root.clone()));
    let status_cache = StatusCache::new();
    let payload_cache = PayloadCache::new(config.simulation.payload_cache_ttl_secs);

    // Shutdown plumbing
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Spawn the age-progression worker
    let jobs = queue::start_worker(
        JobDeps {
            pool: pool.clone(),
            store: store.clone(),
            generator,
            status_cache: status_cache.clone(),
            payload_cache,
            config: config.simulation.clone(),
        },
        tx.subscribe(),
    );

    let context = Arc::new(AppContext {
        pool,
        config: config.clone(),
        store,
        classifier,
        identifier,
        jobs,
        status_cache,
    });

    if config.http.enabled {
        pawscan_server::http::start_http_server(context, tx.subscribe()).await?;
    } else {
        // Headless mode: only the worker runs
        tracing::info!("HTTP disabled; running worker only");
        let mut shutdown = tx.subscribe();
        let _ = shutdown.recv().await;
    }

    Ok(())
}
