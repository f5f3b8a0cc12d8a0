//! WhatsApp channel handler for switchboard.
//!
//! Talks to a WhatsApp Web bridge over HTTP: inbound events arrive as
//! bridge webhooks, replies and lifecycle calls go to the bridge REST API.

pub mod inbound;
pub mod outbound;
pub mod plugin;
pub mod types;

pub use plugin::WhatsAppHandler;
