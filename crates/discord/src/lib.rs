//! Discord channel handler for switchboard.
//!
//! Gateway events are forwarded to the switchboard webhook by an external
//! gateway client; this crate normalizes them and replies through the
//! Discord REST API.

pub mod inbound;
pub mod markdown;
pub mod outbound;
pub mod plugin;
pub mod types;

pub use plugin::DiscordHandler;
