//! Tenant ("instance") configuration.

use std::{fmt, str::FromStr};

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    switchboard_common::secret::{serialize_option_secret, serialize_secret},
};

use crate::{Error, Result};

/// Default timeout for calls to a channel bridge.
pub const DEFAULT_BRIDGE_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a call to the agent backend.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 120;

/// Supported messaging channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Discord,
    Slack,
}

impl ChannelType {
    pub const ALL: [Self; 3] = [Self::WhatsApp, Self::Discord, Self::Slack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Discord => "discord",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid_input(format!("unknown channel type: {s}")))
    }
}

/// Credentials for a WhatsApp account exposed through the HTTP bridge.
#[derive(Clone, Serialize, Deserialize)]
pub struct WhatsAppCredentials {
    /// Base URL of the bridge API, e.g. `https://bridge.example.com`.
    pub bridge_url: String,
    #[serde(serialize_with = "serialize_secret")]
    pub api_key: Secret<String>,
    /// Name of the account on the bridge side. Defaults to the instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_instance: Option<String>,
    #[serde(default = "default_bridge_timeout")]
    pub timeout_secs: u64,
}

/// Credentials for a Discord bot.
#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordCredentials {
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
    /// REST API base; overridable for tests and proxies.
    #[serde(default = "default_discord_api")]
    pub api_base: String,
    #[serde(default = "default_bridge_timeout")]
    pub timeout_secs: u64,
}

/// Credentials for a Slack app.
#[derive(Clone, Serialize, Deserialize)]
pub struct SlackCredentials {
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
    /// Signing secret used to authenticate Events API requests.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_secret: Option<Secret<String>>,
    #[serde(default = "default_slack_api")]
    pub api_base: String,
    #[serde(default = "default_bridge_timeout")]
    pub timeout_secs: u64,
}

/// Channel credentials, tagged by channel type so the two can never disagree.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "channel_type", rename_all = "lowercase")]
pub enum ChannelCredentials {
    #[serde(rename = "whatsapp")]
    WhatsApp(WhatsAppCredentials),
    Discord(DiscordCredentials),
    Slack(SlackCredentials),
}

impl ChannelCredentials {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::WhatsApp(_) => ChannelType::WhatsApp,
            Self::Discord(_) => ChannelType::Discord,
            Self::Slack(_) => ChannelType::Slack,
        }
    }

    /// Timeout applied to every call made to this channel's bridge.
    pub fn timeout(&self) -> std::time::Duration {
        let secs = match self {
            Self::WhatsApp(c) => c.timeout_secs,
            Self::Discord(c) => c.timeout_secs,
            Self::Slack(c) => c.timeout_secs,
        };
        std::time::Duration::from_secs(secs.max(1))
    }
}

/// Agent backend a tenant forwards its messages to.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentBackendConfig {
    /// Base URL; the bridge posts to `{url}/runs`.
    pub url: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

impl AgentBackendConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl fmt::Debug for AgentBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBackendConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Connection state reported by a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known connection state of an instance, written by lifecycle calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Account identity on the channel side (phone number, bot user id).
    pub owner_id: Option<String>,
    /// Epoch milliseconds of the last update.
    pub last_updated: Option<i64>,
    pub error: Option<String>,
}

/// Full per-tenant configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(flatten)]
    pub channel: ChannelCredentials,
    pub agent: AgentBackendConfig,
    #[serde(default)]
    pub connection: ConnectionSnapshot,
}

impl InstanceConfig {
    pub fn channel_type(&self) -> ChannelType {
        self.channel.channel_type()
    }

    pub fn whatsapp(&self) -> Result<&WhatsAppCredentials> {
        match &self.channel {
            ChannelCredentials::WhatsApp(c) => Ok(c),
            other => Err(self.mismatch(other.channel_type(), ChannelType::WhatsApp)),
        }
    }

    pub fn discord(&self) -> Result<&DiscordCredentials> {
        match &self.channel {
            ChannelCredentials::Discord(c) => Ok(c),
            other => Err(self.mismatch(other.channel_type(), ChannelType::Discord)),
        }
    }

    pub fn slack(&self) -> Result<&SlackCredentials> {
        match &self.channel {
            ChannelCredentials::Slack(c) => Ok(c),
            other => Err(self.mismatch(other.channel_type(), ChannelType::Slack)),
        }
    }

    fn mismatch(&self, actual: ChannelType, expected: ChannelType) -> Error {
        Error::invalid_input(format!(
            "instance '{}' is a {actual} instance, not {expected}",
            self.name
        ))
    }
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("name", &self.name)
            .field("channel_type", &self.channel_type())
            .field("is_default", &self.is_default)
            .field("credentials", &"[REDACTED]")
            .field("agent", &self.agent)
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_bridge_timeout() -> u64 {
    DEFAULT_BRIDGE_TIMEOUT_SECS
}

fn default_agent_timeout() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}

fn default_discord_api() -> String {
    "https://discord.com/api/v10".into()
}

fn default_slack_api() -> String {
    "https://slack.com/api".into()
}
