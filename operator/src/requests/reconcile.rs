use std::sync::Arc;
use std::time::Duration;

use breakglass_types::{BreakglassRequestStatus, BreakglassRequest};
use chrono::Utc;
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use super::handlers::{self, RequestAction};
use crate::{
    clock::{Clock, SystemClock},
    conditions,
    config::Config,
    events::{self, AlertType, EventKind},
    rbac,
    util::{
        self, Error,
        colors::{FG1, FG2},
        finalizer,
        messages::CLEANUP_COMPLETED,
        patch::patch_status,
    },
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `BreakglassRequest` controller, with leader election
/// gating who actually runs reconciliation (unless `manager.leaderElect`
/// is disabled, in which case it reconciles unconditionally).
pub async fn run(client: Client, config: Config) -> Result<(), Error> {
    println!("{}", "Starting breakglass-request controller...".green());

    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), config.clone()));

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        breakglass_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    breakglass_common::signal_ready();

    if !config.leader_elect {
        println!("manager.leaderElect disabled; reconciling unconditionally");
        let crd_api: Api<BreakglassRequest> = Api::all(client);
        let controller = tokio::spawn(async move {
            use futures::stream::StreamExt;
            println!("{}", "breakglass-request controller started.".green());
            Controller::new(crd_api, Default::default())
                .run(reconcile, on_error, context)
                .for_each(|_res| async move {})
                .await;
        });
        tokio::select! {
            _ = shutdown.cancelled() => {
                controller.abort();
                controller.await.ok();
            }
            _ = controller => {}
        }
        return Ok(());
    }

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("breakglass-operator-{}", uuid::Uuid::new_v4()));
    let lease_name = "breakglass-operator-lock".to_string();
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if lease.acquired_lease {
            if controller_task.is_none() {
                println!("acquired leadership; starting controller");
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let crd_api: Api<BreakglassRequest> = Api::all(client_for_controller.clone());
                controller_task = Some(tokio::spawn(async move {
                    use futures::stream::StreamExt;
                    println!("{}", "breakglass-request controller started.".green());
                    Controller::new(crd_api, Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    clock: SystemClock,
    config: Config,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, config: Config) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                clock: SystemClock,
                config,
                metrics: ControllerMetrics::new("requests"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData { client, clock: SystemClock, config }
        }
    }
}

/// Validates the fields of a request that the CRD schema cannot enforce
/// on its own (spec.md §4.2).
pub fn validate_spec(spec: &breakglass_types::BreakglassRequestSpec) -> Result<(), String> {
    use breakglass_types::SubjectKind;

    if spec.subjects.is_empty() {
        return Err("subjects must not be empty".to_string());
    }
    for subject in &spec.subjects {
        if subject.kind == SubjectKind::ServiceAccount && subject.namespace.is_none() {
            return Err("a ServiceAccount subject requires a namespace".to_string());
        }
    }
    if spec.cluster_roles.is_empty() == spec.policy.is_empty() {
        return Err("exactly one of clusterRoles or policy must be set".to_string());
    }
    if spec.justification.trim().is_empty() {
        return Err("justification must not be empty".to_string());
    }
    if spec.schedule.cron.trim().is_empty() {
        if spec.schedule.start.is_none() {
            return Err("a one-shot schedule requires start".to_string());
        }
    } else {
        if spec.schedule.cron.trim().starts_with('@') {
            return Err("@-descriptor cron expressions are not supported".to_string());
        }
        match crate::schedule::parse_duration_spec(&spec.schedule.duration) {
            Ok(d) if d > chrono::Duration::zero() => {}
            _ => return Err("a recurring schedule requires a positive duration".to_string()),
        }
    }
    if spec.schedule.max_activations == Some(0) {
        return Err("maxActivations must be greater than zero".to_string());
    }
    Ok(())
}

/// Emits a warning event if `dispatch` just transitioned the request into a
/// new `Failed{reason}` it wasn't already in, covering condition-driven
/// terminal failures (`InvalidSchedule`, `MaxActivationsReached`, ...) that
/// the pure recurrence/schedule modules have no `Client` to report
/// themselves.
async fn record_new_failure(
    client: Client,
    instance: &BreakglassRequest,
    before: Option<&str>,
    status: &BreakglassRequestStatus,
) -> Result<(), Error> {
    let Some(failed) = status
        .conditions
        .iter()
        .find(|c| c.type_ == breakglass_types::ConditionType::Failed)
    else {
        return Ok(());
    };
    if before == Some(failed.reason.as_str()) {
        return Ok(());
    }
    events::record_event(
        client,
        instance,
        EventKind::Warning,
        &failed.reason,
        failed.message.clone(),
    )
    .await
}

async fn reconcile(instance: Arc<BreakglassRequest>, context: Arc<ContextData>) -> Result<Action, Error> {
    match tokio::time::timeout(context.config.reconcile_timeout, reconcile_inner(instance, context)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn reconcile_inner(instance: Arc<BreakglassRequest>, context: Arc<ContextData>) -> Result<Action, Error> {
    let client = context.client.clone();
    let name = instance.name_any();
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("BreakglassRequest must be namespaced".to_string()))?;

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    if instance.meta().deletion_timestamp.is_some() {
        return handle_deletion(client, &context.config, &instance).await;
    }

    if finalizer::needs_finalizer(instance.as_ref()) {
        finalizer::add(client, instance.as_ref()).await?;
        return Ok(Action::requeue(Duration::from_millis(0)));
    }

    if instance.status.is_none()
        && let Err(reason) = validate_spec(&instance.spec)
    {
        let now = Utc::now();
        patch_status(client.clone(), instance.as_ref(), |s| {
            conditions::set_condition(
                &mut s.conditions,
                breakglass_types::ConditionType::Failed,
                "InvalidRequest",
                reason.clone(),
                instance.meta().generation,
                now,
            );
        })
        .await?;
        events::record_event(client, &instance, EventKind::Warning, "InvalidRequest", reason).await?;
        return Ok(Action::await_change());
    }

    let mut status = instance.status.clone().unwrap_or_default();
    let observed_generation = instance.meta().generation.unwrap_or(0);
    status.observed_generation = Some(observed_generation);
    let previous_failure_reason = conditions::find_condition(&status.conditions, breakglass_types::ConditionType::Failed)
        .map(|c| c.reason.clone());

    #[cfg(feature = "metrics")]
    let read_timer = context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace])
        .start_timer();

    let action = handlers::dispatch(&instance.spec, &mut status, &context.clock, observed_generation);

    #[cfg(feature = "metrics")]
    read_timer.observe_duration();

    if !matches!(action, RequestAction::Requeue(d) if d.is_zero()) {
        println!(
            "{}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            action.label().color(FG2),
        );
    }

    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.label()])
        .inc();

    #[cfg(feature = "metrics")]
    let write_timer = context
        .metrics
        .write_histogram
        .with_label_values(&[&name, &namespace, action.label()])
        .start_timer();

    let status_for_patch = status.clone();
    patch_status(client.clone(), instance.as_ref(), |s| *s = status_for_patch).await?;
    record_new_failure(client.clone(), &instance, previous_failure_reason.as_deref(), &status).await?;

    let result = match action {
        RequestAction::Grant => apply_grant(client, &context.config, &instance, status, observed_generation).await?,
        RequestAction::Revoke => apply_revoke(client, &context.config, &instance, status, observed_generation).await?,
        RequestAction::Requeue(d) if d.is_zero() => Action::requeue(Duration::from_millis(100)),
        RequestAction::Requeue(d) => Action::requeue(d),
        RequestAction::NoOp => Action::requeue(util::PROBE_INTERVAL),
    };

    #[cfg(feature = "metrics")]
    write_timer.observe_duration();

    Ok(result)
}

async fn apply_grant(
    client: Client,
    config: &Config,
    instance: &BreakglassRequest,
    mut status: breakglass_types::BreakglassRequestStatus,
    observed_generation: i64,
) -> Result<Action, Error> {
    let mut snapshot = instance.clone();
    snapshot.status = Some(status.clone());

    match rbac::grant(client.clone(), &snapshot, config.privilege_escalation).await {
        Ok(created) => {
            let now = Utc::now();
            status.created_resources = created;
            if status.approved_by.is_empty() {
                status.approved_by = "system".to_string();
            }
            status.granted_at = Some(now.to_rfc3339());
            status.expires_at = None;
            crate::recurrence::on_activation_granted(&instance.spec, &mut status, &SystemClock, observed_generation);
            conditions::set_condition(
                &mut status.conditions,
                breakglass_types::ConditionType::RecurringActive,
                "Activated",
                "access granted",
                Some(observed_generation),
                now,
            );
            patch_status(client.clone(), instance, |s| *s = status.clone()).await?;
            events::record_event(
                client.clone(),
                instance,
                EventKind::Normal,
                "AccessGranted",
                "breakglass access granted".to_string(),
            )
            .await?;
            events::deliver_alert(instance, &status, AlertType::Active, now, &config.alertmanager).await;

            let window_end = crate::schedule::final_completion_time(&instance.spec, &status, now);
            Ok(Action::requeue(handlers::clamp_requeue(SystemClock.until(window_end))))
        }
        Err(e) if e.retryable => Ok(Action::requeue(config.backoff)),
        Err(e) => {
            let now = Utc::now();
            patch_status(client.clone(), instance, |s| {
                conditions::set_condition(
                    &mut s.conditions,
                    breakglass_types::ConditionType::Failed,
                    &e.reason,
                    e.to_string(),
                    Some(observed_generation),
                    now,
                );
            })
            .await?;
            events::record_event(client, instance, EventKind::Warning, "AccessGrantFailed", e.to_string()).await?;
            Ok(Action::await_change())
        }
    }
}

async fn apply_revoke(
    client: Client,
    config: &Config,
    instance: &BreakglassRequest,
    mut status: breakglass_types::BreakglassRequestStatus,
    observed_generation: i64,
) -> Result<Action, Error> {
    let mut snapshot = instance.clone();
    snapshot.status = Some(status.clone());

    match rbac::revoke(client.clone(), &snapshot).await {
        Ok(()) => {
            let now = Utc::now();
            status.created_resources.clear();
            if crate::recurrence::has_future_activations(&instance.spec, &status) {
                conditions::set_condition(
                    &mut status.conditions,
                    breakglass_types::ConditionType::RecurringPending,
                    "Scheduled",
                    "access revoked; awaiting next scheduled activation",
                    Some(observed_generation),
                    now,
                );
            } else {
                status.expires_at = Some(now.to_rfc3339());
                status.next_activation_at = None;
                conditions::set_condition(
                    &mut status.conditions,
                    breakglass_types::ConditionType::Expired,
                    "AccessExpired",
                    "access window closed",
                    Some(observed_generation),
                    now,
                );
            }
            patch_status(client.clone(), instance, |s| *s = status.clone()).await?;
            events::record_event(
                client.clone(),
                instance,
                EventKind::Normal,
                "AccessRevoked",
                "breakglass access revoked".to_string(),
            )
            .await?;
            events::deliver_alert(instance, &status, AlertType::Expired, now, &config.alertmanager).await;
            Ok(Action::requeue(util::PROBE_INTERVAL))
        }
        Err(e) if e.retryable => Ok(Action::requeue(config.backoff)),
        Err(e) => {
            let now = Utc::now();
            patch_status(client.clone(), instance, |s| {
                conditions::set_condition(
                    &mut s.conditions,
                    breakglass_types::ConditionType::Failed,
                    &e.reason,
                    e.to_string(),
                    Some(observed_generation),
                    now,
                );
            })
            .await?;
            events::record_event(client, instance, EventKind::Warning, "AccessRevokeFailed", e.to_string()).await?;
            Ok(Action::await_change())
        }
    }
}

async fn handle_deletion(client: Client, config: &Config, instance: &BreakglassRequest) -> Result<Action, Error> {
    if !finalizer::has_finalizer(instance) {
        return Ok(Action::await_change());
    }

    match rbac::revoke(client.clone(), instance).await {
        Ok(()) => {
            finalizer::delete(client.clone(), instance).await?;
            events::record_event(
                client,
                instance,
                EventKind::Normal,
                "CleanupCompleted",
                CLEANUP_COMPLETED.to_string(),
            )
            .await?;
            Ok(Action::await_change())
        }
        Err(e) if e.retryable => Ok(Action::requeue(config.backoff)),
        Err(e) => {
            events::record_event(client, instance, EventKind::Warning, "AccessRevokeFailed", e.to_string()).await?;
            Err(Error::Rbac(e))
        }
    }
}

fn on_error(instance: Arc<BreakglassRequest>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "reconciliation error for {}/{}: {error:?}",
            instance.namespace().unwrap_or_default(),
            instance.name_any()
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
