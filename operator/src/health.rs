use std::net::SocketAddr;

use hyper::{
    Body, Request, Response, Server,
    service::{make_service_fn, service_fn},
};
use std::convert::Infallible;

async fn serve(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let status = match req.uri().path() {
        "/readyz" | "/healthz" => 200,
        _ => 404,
    };
    Ok(Response::builder()
        .status(status)
        .body(Body::from("ok"))
        .expect("static health response always builds"))
}

/// Serves `/healthz` and `/readyz` on `bind_address` until the process
/// exits, for `health.probeBindAddress`. The controller has no separate
/// readiness signal from liveness: leader-election loss simply stops
/// reconciling, it doesn't crash the process, so both probes share this
/// always-200 handler.
pub async fn run_server(bind_address: SocketAddr) {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve)) });
    println!("health probe server listening on {bind_address}");
    if let Err(e) = Server::bind(&bind_address).serve(make_svc).await {
        eprintln!("health probe server error: {e}");
    }
}
