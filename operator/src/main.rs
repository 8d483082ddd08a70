use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::client::Client;

mod clock;
mod conditions;
mod config;
mod events;
mod health;
mod rbac;
mod recurrence;
mod requests;
mod schedule;
mod util;

#[cfg(feature = "metrics")]
mod metrics;

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Top-level CLI configuration for the binary. Any command line
/// flags should go in here.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// `manager.leaderElect`: require a held lease before reconciling.
    /// Safe to disable only when a single replica is guaranteed to run.
    #[arg(long, env = "MANAGER_LEADER_ELECT", default_value_t = true)]
    leader_elect: bool,

    /// `metrics.bindAddress`. Disabled unless set.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_BIND_ADDRESS")]
    metrics_bind_address: Option<SocketAddr>,

    /// `metrics.secure`: accepted for config-table parity, not enforced
    /// (see `metrics::run_server`).
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_SECURE", default_value_t = false)]
    metrics_secure: bool,

    /// `health.probeBindAddress`. Disabled unless set.
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS")]
    health_probe_bind_address: Option<SocketAddr>,

    /// `controller.reconcileTimeout`: wall-clock budget per reconcile.
    #[arg(long, env = "CONTROLLER_RECONCILE_TIMEOUT", value_parser = parse_duration, default_value = "60s")]
    reconcile_timeout: Duration,

    /// `controller.backoff`: requeue delay after a retryable error.
    #[arg(long, env = "CONTROLLER_BACKOFF", value_parser = parse_duration, default_value = "10s")]
    backoff: Duration,

    /// `controller.privilegeEscalation`: allow the operator to grant roles
    /// that exceed its own permissions. Defaults to false; the operator
    /// checks each request's RBAC rules against its own via
    /// `SelfSubjectRulesReview` before creating anything.
    #[arg(long, env = "CONTROLLER_PRIVILEGE_ESCALATION", default_value_t = false)]
    privilege_escalation: bool,

    /// `otel.endpoint`: accepted and logged, not wired to an exporter.
    #[arg(long, env = "OTEL_ENDPOINT")]
    otel_endpoint: Option<String>,

    /// `alertmanager.enabled`
    #[arg(long, env = "ALERTMANAGER_ENABLED", default_value_t = false)]
    alertmanager_enabled: bool,

    /// `alertmanager.endpoint`
    #[arg(long, env = "ALERTMANAGER_ENDPOINT")]
    alertmanager_endpoint: Option<String>,

    /// `alertmanager.tls.caFile`
    #[arg(long, env = "ALERTMANAGER_TLS_CA_FILE")]
    alertmanager_tls_ca_file: Option<String>,

    /// `alertmanager.tls.insecureSkipVerify`
    #[arg(long, env = "ALERTMANAGER_TLS_INSECURE_SKIP_VERIFY", default_value_t = false)]
    alertmanager_tls_insecure_skip_verify: bool,

    /// `alertmanager.auth.bearerToken`
    #[arg(long, env = "ALERTMANAGER_AUTH_BEARER_TOKEN")]
    alertmanager_auth_bearer_token: Option<String>,
}

impl Cli {
    fn config(&self) -> config::Config {
        config::Config {
            leader_elect: self.leader_elect,
            reconcile_timeout: self.reconcile_timeout,
            backoff: self.backoff,
            privilege_escalation: self.privilege_escalation,
            otel_endpoint: self.otel_endpoint.clone(),
            alertmanager: config::AlertmanagerConfig {
                enabled: self.alertmanager_enabled,
                endpoint: self.alertmanager_endpoint.clone(),
                tls_ca_file: self.alertmanager_tls_ca_file.clone(),
                tls_insecure_skip_verify: self.alertmanager_tls_insecure_skip_verify,
                auth_bearer_token: self.alertmanager_auth_bearer_token.clone(),
            },
        }
    }
}

/// List of subcommands for the binary. Clap will convert the
/// name of each enum variant to kebab-case for the CLI.
#[derive(Subcommand)]
enum Command {
    ManageRequests,
}

/// Secondary entrypoint that runs the appropriate subcommand.
async fn run(client: Client) {
    let cli = Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(bind_address) = cli.metrics_bind_address {
        if cli.metrics_secure {
            eprintln!("metrics.secure requested but the metrics server has no TLS support; serving plaintext");
        }
        tokio::spawn(metrics::run_server(bind_address));
    }

    if let Some(bind_address) = cli.health_probe_bind_address {
        tokio::spawn(health::run_server(bind_address));
    }

    if let Some(endpoint) = &cli.otel_endpoint {
        println!("otel.endpoint={endpoint} accepted, no exporter wired up");
    }

    let config = cli.config();
    match cli.command {
        Command::ManageRequests => requests::reconcile::run(client, config).await,
    }
    .unwrap();

    panic!("exited unexpectedly");
}

/// Main entrypoint that sets up the environment before running the secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    breakglass_common::init();

    // Set the panic hook to exit the process with a non-zero exit code
    // when a panic occurs on any thread. This is desired behavior when
    // running in a container, as the metrics server or controller may
    // panic and we always want to restart the container in that case.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Create a kubernetes client using the default configuration.
    // In-cluster, the kubeconfig will be set by the service account.
    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    // Run the secondary entrypoint.
    run(client).await;

    // This is an unreachable branch. The controllers and metrics
    // servers should never exit without a panic.
    panic!("exited prematurely");
}
