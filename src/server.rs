use std::{net::SocketAddr, sync::Arc};

use axum::{response::IntoResponse, routing::get, Extension, Json, Router};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
    config::Config, endpoint::Connector, error::Error, ports::PortLister, relay::Relay, websocket,
};

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    Json(config)
}

async fn show_version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

async fn run_inner(
    config: Config,
    addr: SocketAddr,
    connector: Arc<dyn Connector>,
    ports: Option<Arc<dyn PortLister>>,
    shutdown: CancellationToken,
    allocated: Option<oneshot::Sender<SocketAddr>>,
) -> Result<(), Error> {
    config.validate()?;

    let relay = Relay::start(&config, connector, ports, shutdown.clone());

    let app = Router::new()
        .route(&config.path, get(websocket::ws_handler))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket needs to be able to reach the relay
                .layer(Extension(relay))
                .layer(Extension(config.clone())),
        );

    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Bind {
            address: addr,
            problem: e.to_string(),
        })?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(reply) = allocated {
        if reply.send(addr).is_err() {
            debug!("Nobody wanted to know the address");
        }
    }

    info!("Listening on ws://{addr}{}", config.path);

    let stop = shutdown.clone();
    let result = server
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await;

    // Stops the relay too, if the server stopped on its own.
    shutdown.cancel();

    result.map_err(|e| Error::WebsocketIssue(e.to_string()))
}

/// Start the server on the configured address.
///
/// Runs until `shutdown` is cancelled.
pub async fn run(
    config: Config,
    connector: Arc<dyn Connector>,
    ports: Option<Arc<dyn PortLister>>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let addr = config.address;

    run_inner(config, addr, connector, ports, shutdown, None).await
}

/// Start the server on an arbitrary available localhost port.
/// The address allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    connector: Arc<dyn Connector>,
    ports: Option<Arc<dyn PortLister>>,
    shutdown: CancellationToken,
    allocated: oneshot::Sender<SocketAddr>,
) -> Result<(), Error> {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));

    run_inner(config, addr, connector, ports, shutdown, Some(allocated)).await
}
