use aggregator::{
    AdapterChain, AggregatedResult, BookingsQuery, Coordinates, CredentialBundle, MobilityBroker,
    OptionsQuery,
};
use clap::{Args, Parser, Subcommand};
use registry::{
    CacheError, Capability, ProviderCache, ProviderDescriptor, RegistryRecord,
    ServiceRegistryClient,
};
use serde::Serialize;
use serde_json::json;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

mod config;
mod observability;

use config::Config;

#[derive(Parser)]
#[command(name = "mobility-broker", about = "Mobility service broker")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, global = true, default_value = "broker.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Keep the provider registry fresh and serve health probes until Ctrl-C
    Serve,
    /// Print the providers currently listed in the registry
    Providers,
    /// Search transport options across providers
    Options(OptionsArgs),
    /// List bookings across providers
    Bookings(BookingsArgs),
    /// Announce a provider to the registry
    Register(RegisterArgs),
}

#[derive(Args)]
struct OptionsArgs {
    /// Origin as `lat,lon`
    #[arg(long)]
    from: Coordinates,
    /// Destination as `lat,lon`
    #[arg(long)]
    to: Option<Coordinates>,
    /// Earliest departure, in seconds from now
    #[arg(long)]
    start_in_secs: Option<u64>,
    /// Latest arrival, in seconds from now
    #[arg(long)]
    end_in_secs: Option<u64>,
    #[arg(long)]
    radius_meters: Option<i64>,
    #[arg(long)]
    sharing_allowed: Option<bool>,
    #[arg(long = "mode")]
    modes: Vec<String>,
    #[arg(long = "mobility-type")]
    mobility_types: Vec<String>,
    #[arg(long = "provider")]
    providers: Vec<String>,
    #[arg(long)]
    limit: Option<u32>,
    /// JSON object of credentials keyed by provider id
    #[arg(long)]
    credentials: Option<String>,
}

#[derive(Args)]
struct BookingsArgs {
    #[arg(long)]
    state: Option<String>,
    #[arg(long = "provider")]
    providers: Vec<String>,
    /// JSON object of credentials keyed by provider id
    #[arg(long)]
    credentials: Option<String>,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    service_url: String,
    #[arg(long = "api", required = true)]
    apis: Vec<Capability>,
    #[arg(long = "mode")]
    modes: Vec<String>,
    #[arg(long = "mobility-type")]
    mobility_types: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    let _sentry = observability::init_logging(config.sentry_dsn());
    if let Some(metrics) = &config.metrics {
        observability::init_metrics(metrics)?;
    }

    match cli.command {
        CliCommand::Serve => serve(&config).await?,
        CliCommand::Providers => {
            let cache = loaded_cache(&config).await?;
            let snapshot = cache.current();
            let providers: Vec<&ProviderDescriptor> = snapshot.iter().map(Arc::as_ref).collect();
            print_json(&providers)?;
        }
        CliCommand::Options(args) => options(&config, args).await?,
        CliCommand::Bookings(args) => bookings(&config, args).await?,
        CliCommand::Register(args) => register(&config, args).await?,
    }

    Ok(())
}

async fn serve(config: &Config) -> Result<(), Box<dyn Error>> {
    let cache = ProviderCache::new(Arc::new(ServiceRegistryClient::from_config(&config.registry)));
    let refresh = cache.start(config.registry.schedule());

    let ready_cache = cache.clone();
    let admin: AdminService<_, std::io::Error> = AdminService::new(move || ready_cache.is_ready());
    let listener = config.admin_listener.clone();
    let admin_task =
        tokio::spawn(async move { run_http_service(&listener.host, listener.port, admin).await });

    match cache
        .wait_for_first_snapshot(config.registry.first_snapshot_timeout())
        .await
    {
        Ok(snapshot) => tracing::info!(providers = snapshot.len(), "Provider registry loaded"),
        Err(e) => {
            tracing::warn!(error = %e, "Serving without providers until the registry answers")
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down");
        }
        result = admin_task => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "Admin listener failed"),
                Err(e) => tracing::error!(error = %e, "Admin listener task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    refresh.shutdown().await;
    Ok(())
}

async fn options(config: &Config, args: OptionsArgs) -> Result<(), Box<dyn Error>> {
    let now = SystemTime::now();
    let mut query = OptionsQuery::new(args.from)
        .with_modes(&args.modes)
        .with_mobility_types(&args.mobility_types)
        .with_provider_ids(args.providers);
    query.to = args.to;
    query.start_time = args.start_in_secs.map(|secs| now + Duration::from_secs(secs));
    query.end_time = args.end_in_secs.map(|secs| now + Duration::from_secs(secs));
    query.radius_meters = args.radius_meters;
    query.sharing_allowed = args.sharing_allowed;
    query.limit = args.limit;

    let broker = broker(config).await?;
    let credentials = CredentialBundle::parse(args.credentials.as_deref());
    let result = broker.get_options(&query, &credentials).await?;

    print_result(result)
}

async fn bookings(config: &Config, args: BookingsArgs) -> Result<(), Box<dyn Error>> {
    let query = BookingsQuery {
        state: args.state,
        provider_ids: args.providers.into_iter().collect(),
    };

    let broker = broker(config).await?;
    let credentials = CredentialBundle::parse(args.credentials.as_deref());
    let result = broker.get_bookings(&query, &credentials).await?;

    print_result(result)
}

async fn register(config: &Config, args: RegisterArgs) -> Result<(), Box<dyn Error>> {
    let descriptor = ProviderDescriptor::from_record(RegistryRecord {
        id: Some(args.id),
        name: args.name,
        service_url: Some(args.service_url),
        apis: Some(args.apis.iter().map(|api| api.as_str().to_string()).collect()),
        modes: Some(args.modes),
        mobility_types: Some(args.mobility_types),
    })?;

    ServiceRegistryClient::from_config(&config.registry)
        .register(&descriptor)
        .await?;
    Ok(())
}

/// A cache holding the registry as of now, for one-shot commands.
async fn loaded_cache(config: &Config) -> Result<ProviderCache, CacheError> {
    let cache = ProviderCache::new(Arc::new(ServiceRegistryClient::from_config(&config.registry)));
    cache.refresh().await?;
    Ok(cache)
}

async fn broker(config: &Config) -> Result<MobilityBroker, Box<dyn Error>> {
    let cache = loaded_cache(config).await?;
    let adapters = AdapterChain::new().with(config.outgoing_headers_adapter()?);

    Ok(MobilityBroker::from_config(cache, &config.dispatch, adapters))
}

fn print_result<T: Serialize>(result: AggregatedResult<T>) -> Result<(), Box<dyn Error>> {
    let failures: Vec<_> = result
        .failures
        .iter()
        .map(|failure| {
            json!({"providerId": failure.provider_id, "error": failure.cause.to_string()})
        })
        .collect();

    print_json(&json!({"items": result.items, "failures": failures}))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
