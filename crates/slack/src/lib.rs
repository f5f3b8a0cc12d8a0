//! Slack channel handler for switchboard (Events API over HTTP).

pub mod inbound;
pub mod outbound;
pub mod plugin;
pub mod signature;
pub mod types;

pub use plugin::SlackHandler;
