use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use nanoid::nanoid;
use tokio::{net::TcpListener, time::Instant};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    connection::Connection, dispatcher::Dispatcher, registry::Registry, session::Session,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Hub {
    listener: TcpListener,
    config: HubConfig,
    registry: Arc<Registry>,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    write_timeout: Duration,
}

impl Hub {
    pub fn new(listener: TcpListener, config: HubConfig) -> Self {
        Self {
            listener,
            config,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Hub {
            listener,
            config,
            registry,
        } = self;

        let (dispatcher, delivery) = Dispatcher::spawn(Arc::clone(&registry));
        let app = router(Arc::clone(&registry), dispatcher, config.write_timeout);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("hub shutting down");
        close_sessions(&registry, config.write_timeout).await;
        delivery.abort();
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Builds the HTTP surface: a single `GET /ws` upgrade route.
pub fn router(registry: Arc<Registry>, dispatcher: Dispatcher, write_timeout: Duration) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            registry,
            dispatcher,
            write_timeout,
        })
}

async fn upgrade(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_failed_upgrade(move |error| {
        warn!(?peer, %error, "websocket upgrade failed");
    })
    .on_upgrade(move |socket| serve_socket(socket, peer, state))
}

async fn serve_socket(socket: WebSocket, peer: Option<SocketAddr>, state: AppState) {
    let id = nanoid!();
    info!(?peer, player = %id, "connection upgraded");

    let connection = Connection::from_websocket(socket, state.write_timeout);
    Session::new(id, state.registry, state.dispatcher)
        .run(connection)
        .await;
}

/// Closes every registered connection and waits, up to `grace`, for the
/// sessions to unregister themselves.
async fn close_sessions(registry: &Registry, grace: Duration) {
    let handles: Vec<_> = {
        let inner = registry.lock().await;
        inner.connections().map(|(_, handle)| handle.clone()).collect()
    };
    for handle in &handles {
        handle.close().await;
    }

    let deadline = Instant::now() + grace;
    while !registry.is_empty().await {
        if Instant::now() >= deadline {
            let remaining = registry.len().await;
            warn!(remaining, "sessions still open at shutdown");
            break;
        }
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}
