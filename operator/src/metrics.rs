#![cfg(feature = "metrics")]

use std::net::SocketAddr;

use hyper::{
    Body, Request, Response, Server,
    service::{make_service_fn, service_fn},
};
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;

async fn serve(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .expect("prometheus text encoding cannot fail");
    Ok(Response::new(Body::from(buffer)))
}

/// Serves Prometheus text-format metrics on `bind_address` until the
/// process exits, for `metrics.bindAddress`. `metrics.secure` is accepted
/// by the CLI but not enforced here: nothing in this workspace's
/// dependency stack terminates TLS for a hyper 0.14 server, so turning it
/// on only gets a startup warning rather than a fake handshake.
pub async fn run_server(bind_address: SocketAddr) {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve)) });
    println!("metrics server listening on {bind_address}");
    if let Err(e) = Server::bind(&bind_address).serve(make_svc).await {
        eprintln!("metrics server error: {e}");
    }
}
