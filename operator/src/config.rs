use std::time::Duration;

/// Runtime configuration recognized by the controller, covering the table
/// in spec.md §6. Built once from `Cli` in `main.rs` and threaded through
/// `ContextData` for the lifetime of the process.
#[derive(Clone, Debug)]
pub struct Config {
    /// `manager.leaderElect`
    pub leader_elect: bool,

    /// `controller.reconcileTimeout`
    pub reconcile_timeout: Duration,

    /// `controller.backoff`
    pub backoff: Duration,

    /// `controller.privilegeEscalation`: whether `rbac::grant` may create
    /// bindings for permissions the operator itself does not hold.
    pub privilege_escalation: bool,

    /// `otel.endpoint`, accepted and logged at startup but not wired to any
    /// exporter — nothing in this workspace's dependency stack speaks
    /// OTLP, so this stays an inert passthrough rather than a faked
    /// integration.
    pub otel_endpoint: Option<String>,

    pub alertmanager: AlertmanagerConfig,
}

#[derive(Clone, Debug, Default)]
pub struct AlertmanagerConfig {
    /// `alertmanager.enabled`
    pub enabled: bool,

    /// `alertmanager.endpoint`
    pub endpoint: Option<String>,

    /// `alertmanager.tls.caFile`
    pub tls_ca_file: Option<String>,

    /// `alertmanager.tls.insecureSkipVerify`
    pub tls_insecure_skip_verify: bool,

    /// `alertmanager.auth.bearerToken`
    pub auth_bearer_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            leader_elect: true,
            reconcile_timeout: Duration::from_secs(60),
            backoff: Duration::from_secs(10),
            privilege_escalation: false,
            otel_endpoint: None,
            alertmanager: AlertmanagerConfig::default(),
        }
    }
}
