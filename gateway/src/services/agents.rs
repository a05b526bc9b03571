//! Voice agent resolution.
//!
//! A call names its agent in the URL path. The bridge resolves that id into a
//! read-only [`AgentConfiguration`] snapshot plus the credentials used to open
//! the upstream session. The snapshot is shared by both relays for the life
//! of the call and never mutated.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::core::realtime::ToolDefinition;
use crate::core::realtime::openai::OpenAIRealtimeVoice;

fn default_voice() -> String {
    OpenAIRealtimeVoice::default().as_str().to_string()
}

fn default_true() -> bool {
    true
}

/// Voice agent settings as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(alias = "id")]
    pub agent_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Tool definitions announced to the model, in addition to `end_call`.
    #[serde(default, alias = "tools")]
    pub enabled_tools: Vec<ToolDefinition>,
    /// Spoken once shortly after the call connects.
    #[serde(default)]
    pub initial_greeting: Option<String>,
    #[serde(default)]
    pub enable_transcript: bool,
    /// Overrides the server-wide chunks-per-commit policy.
    #[serde(default)]
    pub commit_threshold: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl AgentConfiguration {
    /// Minimal active agent with defaults for everything else.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            workspace_id: None,
            name: String::new(),
            system_prompt: None,
            voice: default_voice(),
            language: None,
            enabled_tools: Vec::new(),
            initial_greeting: None,
            enable_transcript: false,
            commit_threshold: None,
            active: true,
        }
    }
}

/// Upstream credentials for one call. The key is wiped on drop.
pub struct RealtimeCredentials {
    pub api_key: String,
    /// Model override; `None` uses the server default.
    pub model: Option<String>,
}

impl fmt::Debug for RealtimeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeCredentials")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

impl Drop for RealtimeCredentials {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[derive(Debug)]
pub struct ResolvedAgent {
    pub agent: Arc<AgentConfiguration>,
    pub credentials: RealtimeCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid workspace id: {0}")]
    InvalidWorkspace(String),

    #[error("Agent lookup unavailable: {0}")]
    Unavailable(String),
}

/// Looks up agent settings and credentials.
#[async_trait]
pub trait AgentResolver: Send + Sync {
    async fn resolve(
        &self,
        agent_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<ResolvedAgent, ResolveError>;
}

// =============================================================================
// YAML-backed resolver
// =============================================================================

/// One agent in the agents file. Credentials sit next to the settings but are
/// split off before the settings are shared.
#[derive(Debug, Deserialize)]
struct AgentEntry {
    #[serde(flatten)]
    agent: AgentConfiguration,
    #[serde(default)]
    openai_api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<AgentEntry>,
}

struct CatalogEntry {
    agent: Arc<AgentConfiguration>,
    api_key: Option<String>,
    model: Option<String>,
}

impl Drop for CatalogEntry {
    fn drop(&mut self) {
        if let Some(key) = self.api_key.as_mut() {
            key.zeroize();
        }
    }
}

/// Resolves agents from a static catalogue, usually loaded from YAML.
///
/// ```yaml
/// agents:
///   - agent_id: front-desk
///     workspace_id: 6f1c2a8e-0d4b-4f7a-9a53-2f0a9d3c1b77
///     name: Front desk
///     system_prompt: You answer calls for a dental clinic.
///     voice: shimmer
///     initial_greeting: Greet the caller and ask how you can help.
///     enable_transcript: true
/// ```
pub struct ConfigAgentResolver {
    agents: HashMap<String, CatalogEntry>,
    default_api_key: Option<String>,
}

impl fmt::Debug for ConfigAgentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.agents.keys().collect();
        ids.sort();
        f.debug_struct("ConfigAgentResolver")
            .field("agents", &ids)
            .finish()
    }
}

impl Drop for ConfigAgentResolver {
    fn drop(&mut self) {
        if let Some(key) = self.default_api_key.as_mut() {
            key.zeroize();
        }
    }
}

impl ConfigAgentResolver {
    /// Load the catalogue from a YAML file.
    pub fn from_file(
        path: &Path,
        default_api_key: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read agents file {}: {e}", path.display()))?;
        Self::from_yaml_str(&contents, default_api_key)
    }

    pub fn from_yaml_str(
        contents: &str,
        default_api_key: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let file: AgentsFile = serde_yaml::from_str(contents)
            .map_err(|e| format!("Failed to parse agents file: {e}"))?;

        let mut agents = HashMap::with_capacity(file.agents.len());
        for entry in file.agents {
            validate_agent(&entry.agent)?;
            let id = entry.agent.agent_id.clone();
            let catalog_entry = CatalogEntry {
                agent: Arc::new(entry.agent),
                api_key: entry.openai_api_key,
                model: entry.model,
            };
            if agents.insert(id.clone(), catalog_entry).is_some() {
                return Err(format!("Duplicate agent id in agents file: {id}").into());
            }
        }

        Ok(Self {
            agents,
            default_api_key,
        })
    }

    /// Build a catalogue from agents that all use `default_api_key`.
    pub fn from_agents(
        agents: impl IntoIterator<Item = AgentConfiguration>,
        default_api_key: Option<String>,
    ) -> Self {
        let agents = agents
            .into_iter()
            .map(|agent| {
                (
                    agent.agent_id.clone(),
                    CatalogEntry {
                        agent: Arc::new(agent),
                        api_key: None,
                        model: None,
                    },
                )
            })
            .collect();
        Self {
            agents,
            default_api_key,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn validate_agent(agent: &AgentConfiguration) -> Result<(), Box<dyn std::error::Error>> {
    if agent.agent_id.trim().is_empty() {
        return Err("Agent id must not be empty".into());
    }
    if agent.commit_threshold == Some(0) {
        return Err(format!(
            "Agent {}: commit_threshold must be at least 1",
            agent.agent_id
        )
        .into());
    }
    if OpenAIRealtimeVoice::parse(&agent.voice).is_none() {
        return Err(format!("Agent {}: unknown voice '{}'", agent.agent_id, agent.voice).into());
    }
    if let Some(workspace) = &agent.workspace_id
        && Uuid::parse_str(workspace).is_err()
    {
        return Err(format!(
            "Agent {}: workspace_id '{}' is not a UUID",
            agent.agent_id, workspace
        )
        .into());
    }
    Ok(())
}

#[async_trait]
impl AgentResolver for ConfigAgentResolver {
    async fn resolve(
        &self,
        agent_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<ResolvedAgent, ResolveError> {
        let requested_workspace = match workspace_id {
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| ResolveError::InvalidWorkspace(raw.to_string()))?,
            ),
            None => None,
        };

        let entry = self
            .agents
            .get(agent_id)
            .ok_or_else(|| ResolveError::NotFound(agent_id.to_string()))?;

        if let (Some(requested), Some(owner)) = (requested_workspace, &entry.agent.workspace_id)
            && Uuid::parse_str(owner).ok() != Some(requested)
        {
            // Agents in other workspaces are indistinguishable from missing ones.
            return Err(ResolveError::NotFound(agent_id.to_string()));
        }

        if !entry.agent.active {
            return Err(ResolveError::Unauthorized(format!(
                "agent {agent_id} is inactive"
            )));
        }

        let api_key = entry
            .api_key
            .as_ref()
            .or(self.default_api_key.as_ref())
            .filter(|key| !key.is_empty())
            .cloned()
            .ok_or_else(|| {
                ResolveError::Unauthorized(format!("no OpenAI API key for agent {agent_id}"))
            })?;

        Ok(ResolvedAgent {
            agent: entry.agent.clone(),
            credentials: RealtimeCredentials {
                api_key,
                model: entry.model.clone(),
            },
        })
    }
}
