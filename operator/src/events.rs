use std::time::Duration;

use breakglass_types::{BreakglassRequest, BreakglassRequestStatus};
use kube::{
    Client, ResourceExt,
    runtime::events::{Event, EventType, Recorder, Reporter},
};
use serde::Serialize;

use crate::{
    config::AlertmanagerConfig,
    util::{Error, MANAGER_NAME},
};

const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether an event (and any corresponding alert) is routine or should
/// draw attention.
pub enum EventKind {
    Normal,
    Warning,
}

/// The two alert lifecycle states Alertmanager expects: firing and
/// resolved (`endsAt` in the past).
pub enum AlertType {
    Active,
    Expired,
}

impl AlertType {
    fn alert_name(&self) -> &'static str {
        match self {
            AlertType::Active => "BreakglassAccessActive",
            AlertType::Expired => "BreakglassAccessExpired",
        }
    }

    fn severity(&self) -> &'static str {
        match self {
            AlertType::Active => "critical",
            AlertType::Expired => "info",
        }
    }

    fn status(&self) -> &'static str {
        match self {
            AlertType::Active => "firing",
            AlertType::Expired => "resolved",
        }
    }
}

/// Records a Kubernetes `Event` against `instance` via the controller's
/// event recorder.
pub async fn record_event(
    client: Client,
    instance: &BreakglassRequest,
    kind: EventKind,
    reason: &str,
    message: String,
) -> Result<(), Error> {
    let reporter = Reporter {
        controller: MANAGER_NAME.to_string(),
        instance: instance.uid(),
    };
    let recorder = Recorder::new(client, reporter);
    recorder
        .publish(
            &Event {
                type_: match kind {
                    EventKind::Normal => EventType::Normal,
                    EventKind::Warning => EventType::Warning,
                },
                reason: reason.to_string(),
                note: Some(message),
                action: reason.to_string(),
                secondary: None,
            },
            &instance.object_ref(&()),
        )
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct AlertPayload {
    labels: std::collections::BTreeMap<String, String>,
    annotations: std::collections::BTreeMap<String, String>,
    #[serde(rename = "startsAt", skip_serializing_if = "Option::is_none")]
    starts_at: Option<String>,
    #[serde(rename = "endsAt", skip_serializing_if = "Option::is_none")]
    ends_at: Option<String>,
}

fn subjects_summary(instance: &BreakglassRequest) -> String {
    instance
        .spec
        .subjects
        .iter()
        .map(|s| format!("{}:{}", s.kind, s.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn build_client(config: &AlertmanagerConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(ca_file) = &config.tls_ca_file
        && let Ok(pem) = std::fs::read(ca_file)
        && let Ok(cert) = reqwest::Certificate::from_pem(&pem)
    {
        builder = builder.add_root_certificate(cert);
    }
    if config.tls_insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build()
}

/// Fire-and-forget POST of an Alertmanager-v2-compatible alert group,
/// gated by `alertmanager.enabled`/`alertmanager.endpoint`. Errors are
/// logged, never propagated, since an undelivered alert must not block
/// reconciliation.
pub async fn deliver_alert(
    instance: &BreakglassRequest,
    status: &BreakglassRequestStatus,
    alert_type: AlertType,
    now: chrono::DateTime<chrono::Utc>,
    config: &AlertmanagerConfig,
) {
    if !config.enabled {
        return;
    }
    let Some(endpoint) = config.endpoint.clone() else {
        return;
    };

    let mut labels = std::collections::BTreeMap::new();
    labels.insert("alertname".to_string(), alert_type.alert_name().to_string());
    labels.insert("severity".to_string(), alert_type.severity().to_string());
    labels.insert("status".to_string(), alert_type.status().to_string());
    labels.insert("request_name".to_string(), instance.name_any());
    labels.insert(
        "request_namespace".to_string(),
        instance.namespace().unwrap_or_default(),
    );

    let mut annotations = std::collections::BTreeMap::new();
    annotations.insert("justification".to_string(), instance.spec.justification.clone());
    annotations.insert(
        "approver".to_string(),
        if status.approved_by.is_empty() {
            "none".to_string()
        } else {
            status.approved_by.clone()
        },
    );
    annotations.insert("subjects".to_string(), subjects_summary(instance));
    if let Some(ticket_id) = &instance.spec.ticket_id {
        annotations.insert("ticket_id".to_string(), ticket_id.clone());
    }
    if let Some(expires_at) = &status.expires_at {
        annotations.insert("expiry".to_string(), expires_at.clone());
    }

    let (starts_at, ends_at) = match alert_type {
        AlertType::Active => (Some(now.to_rfc3339()), None),
        AlertType::Expired => (None, Some(now.to_rfc3339())),
    };

    let payload = vec![AlertPayload {
        labels,
        annotations,
        starts_at,
        ends_at,
    }];

    let client = match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("alertmanager client build failed: {e}");
            return;
        }
    };

    let mut request = client.post(endpoint).json(&payload).timeout(ALERT_TIMEOUT);
    if let Some(token) = &config.auth_bearer_token {
        request = request.bearer_auth(token);
    }
    if let Err(e) = request.send().await {
        eprintln!("alertmanager delivery failed: {e}");
    }
}
