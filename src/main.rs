//! s3control-operator - AccessPoint reconciliation against S3 Control

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use s3control_operator::config::ControllerConfig;
use s3control_operator::controller::{Controller, ControllerClient};
use s3control_operator::crd::{parse_manifests, AccessPoint, AccessPointPhase};
use s3control_operator::gateway::memory::MemoryGateway;
use s3control_operator::server;
use s3control_operator::status::{condition_types, find_condition};
use s3control_operator::store::RecordKey;
use s3control_operator::telemetry::{init_tracing, LogFormat, TelemetryConfig};

/// s3control-operator - reconciles S3 Control access points
#[derive(Parser, Debug)]
#[command(name = "s3control-operator", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "S3CONTROL_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the AccessPoint CRD as YAML
    Crd,

    /// Run the controller against the in-memory S3 Control simulator
    ///
    /// Applies every AccessPoint in the manifest file, waits for each to
    /// reach Synced, then serves the status API until interrupted.
    Simulate(SimulateArgs),
}

/// Simulate mode arguments
#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Multi-document YAML file of AccessPoint manifests
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Controller configuration file (YAML)
    #[arg(long, env = "S3CONTROL_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the status API
    #[arg(long, env = "S3CONTROL_LISTEN", default_value = s3control_operator::DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Override the number of concurrent reconciles
    #[arg(long, env = "S3CONTROL_WORKERS")]
    workers: Option<usize>,

    /// Override the region used for ARNs
    #[arg(long, env = "S3CONTROL_REGION")]
    region: Option<String>,

    /// Fetches the simulator answers with Creating before an access point is active
    #[arg(long, default_value = "1")]
    activation_fetches: u32,

    /// How long to wait for each access point to settle, in seconds
    #[arg(long, default_value = "60")]
    wait_timeout_secs: u64,

    /// Delete every access point after it syncs and exit instead of serving
    #[arg(long)]
    delete_after: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })
    .context("failed to initialize tracing")?;

    match cli.command {
        Commands::Crd => {
            let crd = serde_yaml::to_string(&AccessPoint::crd())
                .context("failed to serialize CRD")?;
            println!("{crd}");
            Ok(())
        }
        Commands::Simulate(args) => run_simulate(args).await,
    }
}

async fn load_config(args: &SimulateArgs) -> anyhow::Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path).await?,
        None => ControllerConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(region) = &args.region {
        config.region = region.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Run the controller against the in-memory gateway
async fn run_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let config = load_config(&args).await?;
    let manifests = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let access_points = parse_manifests(&manifests)?;
    info!(
        count = access_points.len(),
        file = %args.file.display(),
        "loaded access point manifests"
    );

    let gateway = Arc::new(
        MemoryGateway::new()
            .with_region(config.region.clone())
            .with_activation_fetches(args.activation_fetches),
    );
    let controller = Controller::new(gateway.clone(), config).start();
    let client = controller.client();

    let server_cancel = CancellationToken::new();
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server_task = tokio::spawn(server::serve(
        listener,
        server::router(client.clone()),
        server_cancel.clone(),
    ));

    let wait = Duration::from_secs(args.wait_timeout_secs);
    let outcome = drive(&client, &gateway, access_points, wait, args.delete_after).await;

    if outcome.is_ok() && !args.delete_after {
        info!(addr = %args.listen, "serving status API, press ctrl-c to stop");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
    }

    server_cancel.cancel();
    controller.shutdown().await;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "status API failed"),
        Err(e) => error!(error = %e, "status API task panicked"),
    }
    outcome
}

async fn drive(
    client: &ControllerClient,
    gateway: &MemoryGateway,
    access_points: Vec<AccessPoint>,
    wait: Duration,
    delete_after: bool,
) -> anyhow::Result<()> {
    let mut keys = Vec::with_capacity(access_points.len());
    for access_point in access_points {
        let key = RecordKey::of(&access_point);
        let outcome = client.apply(access_point).await?;
        info!(record = %key, ?outcome, "applied");
        keys.push(key);
    }

    for key in &keys {
        settle(client, key, wait).await?;
    }

    if !delete_after {
        return Ok(());
    }

    for key in &keys {
        let target = client
            .status(key)
            .and_then(|s| s.status.identity.clone())
            .with_context(|| format!("{key} has no identity after sync"))?;
        anyhow::ensure!(gateway.exists(&target), "{target} missing after sync");

        client.request_delete(key).await?;
        client.wait_for_removal(key, wait).await?;
        anyhow::ensure!(!gateway.exists(&target), "{target} still exists after delete");
        info!(record = %key, access_point = %target, "deleted");
    }
    Ok(())
}

/// Wait for a record to reach Synced, reporting its Ready condition if it doesn't
async fn settle(client: &ControllerClient, key: &RecordKey, wait: Duration) -> anyhow::Result<()> {
    match client.wait_for_phase(key, AccessPointPhase::Synced, wait).await {
        Ok(snapshot) => {
            info!(
                record = %key,
                arn = snapshot.status.access_point_arn.as_deref().unwrap_or(""),
                alias = snapshot.status.alias.as_deref().unwrap_or(""),
                "synced"
            );
            Ok(())
        }
        Err(e) => {
            let detail = client
                .status(key)
                .map(|s| {
                    let ready = find_condition(&s.status, condition_types::READY)
                        .map(|c| format!("{}: {}", c.reason, c.message))
                        .unwrap_or_default();
                    format!("phase {} ({ready})", s.phase())
                })
                .unwrap_or_else(|| "record missing".to_string());
            Err(anyhow::Error::new(e).context(format!("{key} did not sync: {detail}")))
        }
    }
}
