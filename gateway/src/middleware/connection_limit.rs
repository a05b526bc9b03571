//! Admission control for telephony WebSocket upgrades.
//!
//! Enforces the global WebSocket cap and the per-IP cap before the upgrade
//! is accepted. The slot travels to the handler as a [`ConnectionSlot`]
//! extension and is released when the call's task drops it.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/ws/telephony/telnyx/{agent_id}", get(telnyx_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::errors::AppError;
use crate::state::{AppState, ConnectionLimitError};

/// Client address of an admitted WebSocket connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// A reserved connection slot, released on drop.
#[derive(Clone)]
pub struct ConnectionSlot {
    inner: Arc<SlotGuard>,
}

struct SlotGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
        tracing::debug!(ip = %self.ip, "Released connection slot");
    }
}

impl ConnectionSlot {
    fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self {
            inner: Arc::new(SlotGuard { state, ip }),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.inner.ip
    }
}

fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Reject WebSocket upgrades over the configured limits.
///
/// Global cap gives 503, per-IP cap gives 429. Plain HTTP requests pass
/// through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(&request) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            let slot = ConnectionSlot::new(state.clone(), client_ip);
            request.extensions_mut().insert(ClientIp(client_ip));
            request.extensions_mut().insert(slot);
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            AppError::ServiceUnavailable(format!("global limit reached for {client_ip}"))
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            AppError::TooManyRequests(format!("per-IP limit reached for {client_ip}"))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_slot_released_on_last_drop() {
        let mut config = ServerConfig::default();
        config.max_connections_per_ip = 2;
        let state = AppState::new(config).await.unwrap();
        let ip: IpAddr = Ipv4Addr::new(10, 0, 0, 7).into();

        state.try_acquire_connection(ip).unwrap();
        let slot = ConnectionSlot::new(state.clone(), ip);
        let copy = slot.clone();
        assert_eq!(slot.ip(), ip);

        drop(slot);
        assert_eq!(state.ip_connection_count(&ip), 1);
        drop(copy);
        assert_eq!(state.ip_connection_count(&ip), 0);
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[test]
    fn test_upgrade_detection() {
        let upgrade = Request::builder()
            .header("Upgrade", "WebSocket")
            .body(Body::empty())
            .unwrap();
        let plain = Request::builder().body(Body::empty()).unwrap();
        assert!(is_websocket_upgrade(&upgrade));
        assert!(!is_websocket_upgrade(&plain));
    }
}
