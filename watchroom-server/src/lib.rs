use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use watchroom_collab::Collab;

use crate::context::ServerContext;

mod context;
mod docs;
mod errors;
mod http;
mod ratelimit;
mod ws;

pub type Router = axum::Router<ServerContext>;

/// Binds the listener and serves the room's HTTP and WebSocket surface
/// until the process is killed. `collab` is already fully assembled
/// (store, registry, dispatcher, lifecycle worker running) by the time
/// it gets here.
pub async fn run_server(collab: Collab) {
    let port = collab.config.port;
    let context = ServerContext {
        collab: Arc::new(collab),
        limiter: ratelimit::RateLimiter::default(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .merge(ws::router())
        .merge(http::router())
        .route("/api.json", get(docs::docs))
        .layer(middleware::from_fn_with_state(context.clone(), ratelimit::enforce))
        .layer(cors)
        .with_state(context);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("listening on {addr}");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server runs until killed");
}
