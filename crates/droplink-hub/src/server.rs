//! Websocket frontend
//!
//! Upgrades `/ws`, mints a fresh peer id per connection, registers the peer
//! with the hub and greets it: `HELLO` with the roster snapshot and ICE
//! servers to the newcomer, `JOIN` to everyone who was already there. The
//! reader then runs until the connection dies.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use droplink_proto::{IceServer, PeerId, ServerFrame};
use futures::StreamExt;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::hub::Hub;
use crate::peer::{self, PeerHandle};
use crate::turn;

#[derive(Clone)]
struct AppState {
    hub: Hub,
    config: Arc<HubConfig>,
}

/// The signaling frontend: one hub plus the axum router around it.
pub struct SignalServer {
    hub: Hub,
    config: Arc<HubConfig>,
}

impl SignalServer {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hub: Hub::spawn(),
            config: Arc::new(config),
        }
    }

    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(AppState {
                hub: self.hub.clone(),
                config: self.config.clone(),
            })
    }

    /// Serve until `shutdown` resolves, then stop the hub, which closes every
    /// connected peer and lets the listener drain.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        info!("signaling hub listening on {}", listener.local_addr()?);
        let hub = self.hub.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                hub.shutdown();
            })
            .await?;
        self.hub.shutdown();
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // ICE servers are built per connection so the credentials are fresh and
    // the advertised host can follow the request when none is configured.
    let host = request_host(&headers);
    let ice_servers = turn::ice_servers(&state.config, host.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, ice_servers))
}

async fn handle_socket(socket: WebSocket, hub: Hub, ice_servers: Vec<IceServer>) {
    let peer_id = PeerId::random();
    let (peer, outbox) = PeerHandle::new(peer_id);

    let registration = match hub.register(peer.clone()).await {
        Ok(registration) => registration,
        Err(err) => {
            warn!(peer = %peer_id, %err, "registration rejected");
            return;
        }
    };
    info!(peer = %peer_id, "peer connected");

    let (sink, stream) = socket.split();
    tokio::spawn(peer::write_loop(sink, outbox, peer.clone()));

    let hello = ServerFrame::Hello {
        client: peer.public_peer().await,
        peers: registration.peers,
        ice_servers,
    };
    if let Err(err) = peer.send_frame(&hello) {
        warn!(peer = %peer_id, %err, "failed to deliver HELLO");
        let _ = hub.unregister(peer_id).await;
        peer.close();
        return;
    }

    let join = ServerFrame::Join {
        peer: peer.public_peer().await,
    };
    for other in &registration.existing {
        if let Err(err) = other.send_frame(&join) {
            debug!(newcomer = %peer_id, peer = %other.id(), %err, "JOIN dropped");
        }
    }

    peer::read_loop(stream, peer, hub).await;
    info!(peer = %peer_id, "peer disconnected");
}

/// Host the client addressed, for ICE URLs: first `X-Forwarded-Host` entry if
/// a proxy added one, otherwise the `Host` header, with any port stripped.
fn request_host(headers: &HeaderMap) -> Option<String> {
    for name in ["x-forwarded-host", "host"] {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let first = value.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return Some(strip_port(first).to_string());
        }
    }
    None
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strip_port_variants() {
        assert_eq!(strip_port("example.org:9000"), "example.org");
        assert_eq!(strip_port("example.org"), "example.org");
        assert_eq!(strip_port("[::1]:9000"), "::1");
        assert_eq!(strip_port("::1"), "::1");
    }

    #[test]
    fn forwarded_host_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("10.0.0.5:9000"));
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("drop.example.com, 10.0.0.1"),
        );
        assert_eq!(request_host(&headers).as_deref(), Some("drop.example.com"));
    }

    #[test]
    fn host_header_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("10.0.0.5:9000"));
        assert_eq!(request_host(&headers).as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn no_host_headers() {
        assert_eq!(request_host(&HeaderMap::new()), None);
    }
}
