mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use adserve_providers::{BsaClient, EthicalAdsClient};
use adserve_server::{AdSelector, GeoResolver, Ingestor, MaxMindResolver, NoGeo};
use adserve_store::AdStore;

use config::{BackgroundArgs, ServeArgs, StoreArgs};

/// Ad-serving gateway
#[derive(Parser)]
#[command(name = "adserve", version, about)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

/// `serve` flags resolved from the environment alone.
#[derive(Parser)]
struct DefaultServe {
    #[command(flatten)]
    args: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Serve ads over HTTP (the default)
    Serve(ServeArgs),
    /// Receive push subscriptions only, without serving ads
    Background(BackgroundArgs),
    /// Bring the database schema up to date and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("adserve v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let command = match cli.command {
        Some(command) => command,
        None => Command::Serve(DefaultServe::parse_from(["adserve"]).args),
    };

    match command {
        Command::Migrate => {
            let store = open_store(&cli.store)?;
            let version = store.migrate()?;
            info!(version, "migration complete");
            store.close()?;
        }
        Command::Serve(args) => serve(&cli.store, args).await?,
        Command::Background(args) => background(&cli.store, args).await?,
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("ENV").is_ok_and(|v| v == "PROD") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(args: &StoreArgs) -> anyhow::Result<AdStore> {
    let store = match &args.db {
        Some(path) => AdStore::open_persistent(path)
            .with_context(|| format!("opening database {}", path.display()))?,
        None => AdStore::open()?,
    };
    Ok(store.with_breaker(args.breaker()))
}

/// Open the store and make sure the schema is current.
fn ready_store(args: &StoreArgs) -> anyhow::Result<Arc<AdStore>> {
    let store = open_store(args)?;
    store.migrate()?;
    Ok(Arc::new(store))
}

async fn serve(store_args: &StoreArgs, args: ServeArgs) -> anyhow::Result<()> {
    let store = ready_store(store_args)?;
    let app = serving_app(store, &args)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "server is listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Ad routes and push ingestion over one shared store.
fn serving_app(store: Arc<AdStore>, args: &ServeArgs) -> anyhow::Result<Router> {
    let http = reqwest::Client::new();

    let geo: Arc<dyn GeoResolver> = match &args.geoip_db {
        Some(path) => Arc::new(MaxMindResolver::open(path)?),
        None => {
            info!("no geo database configured, geo targeting disabled");
            Arc::new(NoGeo)
        }
    };
    let bsa = BsaClient::new(http.clone(), &args.bsa_base_url).with_breaker(args.bsa_breaker());
    let ethicalads =
        EthicalAdsClient::new(http, &args.ethicalads_base_url, &args.ethicalads_token)
            .with_breaker(args.ethicalads_breaker());

    let selector = AdSelector::new(
        store.clone(),
        store.clone(),
        Arc::new(bsa),
        Arc::new(ethicalads),
        geo,
    )
    .with_placements(args.placements()?)
    .with_secondary_first_ratio(args.secondary_first_ratio);
    let ingestor = Ingestor::new(store.clone(), store);

    Ok(adserve_server::app(Arc::new(selector), Arc::new(ingestor)))
}

async fn background(store_args: &StoreArgs, args: BackgroundArgs) -> anyhow::Result<()> {
    let store = ready_store(store_args)?;
    let ingestor = Ingestor::new(store.clone(), store);

    let app = adserve_server::ingest::router(Arc::new(ingestor));
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "ingest-only mode, ad routes disabled");
    axum::serve(listener, app).await?;
    Ok(())
}
