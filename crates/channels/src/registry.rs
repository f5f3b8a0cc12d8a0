use std::{collections::HashMap, sync::Arc};

use crate::{instance::ChannelType, plugin::ChannelHandler};

/// Channel handlers keyed by channel type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ChannelType, Arc<dyn ChannelHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the same channel.
    pub fn register(&mut self, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(handler.channel_type(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn ChannelHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(&channel_type).cloned()
    }

    pub fn list(&self) -> Vec<ChannelType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}
