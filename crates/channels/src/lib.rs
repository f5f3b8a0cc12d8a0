//! Channel handler abstraction and the tenant/access/trace model shared by
//! every switchboard crate.
//!
//! Each channel (WhatsApp bridge, Discord, Slack) implements
//! [`ChannelHandler`]: normalize an inbound webhook, send text/media/audio,
//! and manage the connection lifecycle. Per-tenant configuration is always
//! passed in explicitly as an [`InstanceConfig`].

pub mod access;
pub mod error;
pub mod fetch;
pub mod instance;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod trace;

pub use {
    error::{Error, Result},
    instance::{
        AgentBackendConfig, ChannelCredentials, ChannelType, ConnectionSnapshot, ConnectionState,
        DiscordCredentials, InstanceConfig, SlackCredentials, WhatsAppCredentials,
    },
    plugin::{
        ChannelHandler, ChannelSession, ConnectionStatus, InboundMedia, MAX_ERROR_EXCERPT_CHARS,
        MediaKind, MediaSource, MessageType, Normalized, NormalizedMessage, SendResult,
        error_excerpt,
    },
    registry::HandlerRegistry,
    store::{AccessRuleStore, InstanceStore},
    trace::{
        InsertOutcome, NewTrace, Trace, TracePatch, TraceQuery, TraceStatus, TraceStore,
        UpdateOutcome,
    },
};
