use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::bridge::{BridgeServices, CallBridge};
use crate::config::ServerConfig;
use crate::core::realtime::OpenAIRealtimeConnector;
use crate::services::{
    AgentConfiguration, BuiltinToolRegistry, CallRecordStore, ConfigAgentResolver,
    LoggingCallRecordStore, ToolRegistry, WebhookCallRecordStore, WebhookToolRegistry,
};

/// Why a WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state that can be shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Runs each telephony call
    pub bridge: CallBridge,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the production collaborators from configuration.
    ///
    /// # Errors
    /// Returns an error if the agents file cannot be loaded or a webhook URL
    /// is rejected.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let services = build_services(&config)?;
        Ok(Self::with_services(config, services))
    }

    /// Build state around caller-supplied collaborators.
    pub fn with_services(config: ServerConfig, services: BridgeServices) -> Arc<Self> {
        let bridge = CallBridge::new(services, config.bridge.clone(), config.realtime.clone());
        Arc::new(Self {
            config,
            bridge,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::AcqRel);
            }
        }

        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Release a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}

fn build_services(config: &ServerConfig) -> Result<BridgeServices, Box<dyn std::error::Error>> {
    let agents = match &config.agents_path {
        Some(path) => {
            let resolver = ConfigAgentResolver::from_file(path, config.openai_api_key.clone())?;
            tracing::info!(path = %path.display(), agents = resolver.len(), "Loaded agents");
            resolver
        }
        None => {
            tracing::warn!("No agents file configured; every call will be rejected");
            ConfigAgentResolver::from_agents(
                std::iter::empty::<AgentConfiguration>(),
                config.openai_api_key.clone(),
            )
        }
    };

    let tools: Arc<dyn ToolRegistry> = match &config.tool_webhook_url {
        Some(url) => {
            let webhook = WebhookToolRegistry::new(url, config.allow_local_webhooks)?;
            Arc::new(BuiltinToolRegistry::with_fallback(Arc::new(webhook)))
        }
        None => Arc::new(BuiltinToolRegistry::new()),
    };

    let records: Arc<dyn CallRecordStore> = match &config.call_record_webhook_url {
        Some(url) => Arc::new(WebhookCallRecordStore::new(url, config.allow_local_webhooks)?),
        None => Arc::new(LoggingCallRecordStore),
    };

    Ok(BridgeServices {
        agents: Arc::new(agents),
        connector: Arc::new(OpenAIRealtimeConnector::new(config.bridge.connect_timeout)),
        tools,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn state(max_ws: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.max_websocket_connections = max_ws;
        config.max_connections_per_ip = per_ip;
        AppState::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_per_ip_limit() {
        let state = state(Some(10), 3).await;
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        for _ in 0..3 {
            assert!(state.try_acquire_connection(ip).is_ok());
        }
        assert_eq!(state.ip_connection_count(&ip), 3);
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert!(state.try_acquire_connection(ip).is_ok());
    }

    #[tokio::test]
    async fn test_global_limit() {
        let state = state(Some(5), 10).await;
        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );

        state.release_connection(ips[0]);
        assert_eq!(state.ip_connection_count(&ips[0]), 0);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
    }

    #[tokio::test]
    async fn test_new_rejects_missing_agents_file() {
        let mut config = ServerConfig::default();
        config.agents_path = Some("/nonexistent/agents.yaml".into());
        assert!(AppState::new(config).await.is_err());
    }
}
