use futures::FutureExt;
use tokio::signal::unix::SignalKind;

/// Resolves on the first of SIGINT or SIGTERM, mirroring the dual-signal
/// wait `kube::runtime::Controller::graceful_shutdown_on` uses internally
/// so the leader-election loop and the controller shut down together.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c().map(|_| ()).boxed();
    let terminate = async {
        tokio::signal::unix::signal(SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    }
    .boxed();

    futures::future::select(ctrl_c, terminate).await;
}
