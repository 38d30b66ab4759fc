//! role-connection - sync guild roles to linked-role metadata

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use role_connection::{
    config::{Args, Command, LogFormat, SyncConfig},
    directory::DiscordDirectory,
    http,
    publisher::{DiscordPublisher, MetadataPublisher, MockPublisher},
    AccessToken, MembershipResolver, ReconcileRequest, ReconciliationService, RoleCatalog,
    SchemaRegistrar, UserId,
};

/// Exit code when a reconciliation ran but did not apply.
const EXIT_NOT_APPLIED: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return Ok(ExitCode::FAILURE);
    }

    let catalog = match RoleCatalog::load(&args.catalog) {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(catalog = %args.catalog.display(), "Role catalog misconfigured: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        catalog = %args.catalog.display(),
        roles = catalog.entries().len(),
        fields = catalog.metadata_schema().len(),
        "Role catalog loaded"
    );

    match &args.command {
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(catalog.metadata_schema())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Register => {
            let (config, client) = platform(&args)?;
            let registrar = SchemaRegistrar::new(
                client,
                config.api_base.clone(),
                config.application_id.clone(),
                config.bot_token.clone(),
            );
            let registered = registrar.register(catalog.metadata_schema()).await?;
            println!("{}", serde_json::to_string_pretty(&registered)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Reconcile {
            user_id,
            access_token,
            dry_run,
        } => {
            let (config, client) = platform(&args)?;
            let (service, dry_run_publisher) = build_service(&config, client, catalog, *dry_run);
            let user_id = UserId::new(user_id.as_str());
            let result = service
                .reconcile(&user_id, &AccessToken::new(access_token.as_str()))
                .await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            print_dry_run(dry_run_publisher.as_deref())?;

            Ok(if result.is_done() && result.pushed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_NOT_APPLIED)
            })
        }
        Command::ReconcileBatch { tokens, dry_run } => {
            let raw = std::fs::read_to_string(tokens)
                .with_context(|| format!("reading {}", tokens.display()))?;
            let requests: Vec<ReconcileRequest> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", tokens.display()))?;

            let (config, client) = platform(&args)?;
            let (service, dry_run_publisher) = build_service(&config, client, catalog, *dry_run);
            let report = service.reconcile_batch(&requests).await;

            println!("{}", serde_json::to_string_pretty(&report)?);
            print_dry_run(dry_run_publisher.as_deref())?;

            Ok(if report.summary.pushed == report.summary.total {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_NOT_APPLIED)
            })
        }
    }
}

/// Settings and HTTP client for commands that talk to the platform.
fn platform(args: &Args) -> anyhow::Result<(SyncConfig, reqwest::Client)> {
    let config = args.sync_config()?;
    let client = http::build_client(config.request_timeout).context("building HTTP client")?;
    Ok((config, client))
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("role_connection={},info", args.log_level).into());

    // Logs go to stderr so stdout stays machine readable.
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Wire the service. With `dry_run` the mock publisher stands in and is
/// returned so its recorded bodies can be printed.
fn build_service(
    config: &SyncConfig,
    client: reqwest::Client,
    catalog: Arc<RoleCatalog>,
    dry_run: bool,
) -> (ReconciliationService, Option<Arc<MockPublisher>>) {
    let directory = DiscordDirectory::new(
        client.clone(),
        config.api_base.clone(),
        config.bot_token.clone(),
    );
    let resolver = MembershipResolver::new(Arc::new(directory), config.community_id.clone());

    let dry_run_publisher = dry_run.then(|| Arc::new(MockPublisher::new()));
    let publisher: Arc<dyn MetadataPublisher> = match &dry_run_publisher {
        Some(mock) => mock.clone(),
        None => Arc::new(DiscordPublisher::new(
            client,
            config.api_base.clone(),
            config.application_id.clone(),
        )),
    };

    let service = ReconciliationService::new(catalog, resolver, publisher)
        .with_config(config.service_config());
    (service, dry_run_publisher)
}

fn print_dry_run(publisher: Option<&MockPublisher>) -> anyhow::Result<()> {
    let Some(publisher) = publisher else {
        return Ok(());
    };

    for (user_id, body) in publisher.sent() {
        println!(
            "dry run: would PUT for {}: {}",
            user_id,
            serde_json::to_string(&body)?
        );
    }
    Ok(())
}
