use std::{collections::HashMap, sync::Arc};

use backbone_core::{AnnouncementHandler, ConsumerBridge};

/// Handlers by operation name, the default [`ConsumerBridge`].
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn AnnouncementHandler>>>,
    fallback: Option<Arc<dyn AnnouncementHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `operation`. Several handlers per operation share
    /// each message per the consumer's `MultiConsumerBehavior`.
    pub fn register(&mut self, operation: impl Into<String>, handler: Arc<dyn AnnouncementHandler>) {
        self.handlers.entry(operation.into()).or_default().push(handler);
    }

    #[must_use]
    pub fn with(mut self, operation: impl Into<String>, handler: Arc<dyn AnnouncementHandler>) -> Self {
        self.register(operation, handler);
        self
    }

    /// Handler for operations nothing else is registered for.
    #[must_use]
    pub fn with_fallback(mut self, handler: Arc<dyn AnnouncementHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        ops.sort_unstable();
        ops
    }
}

impl ConsumerBridge for HandlerRegistry {
    fn resolve(&self, operation: &str) -> Vec<Arc<dyn AnnouncementHandler>> {
        match self.handlers.get(operation) {
            Some(handlers) => handlers.clone(),
            None => self.fallback.iter().cloned().collect(),
        }
    }
}
