use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// One entity method invocation observed during playback
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    #[serde(rename = "entity")]
    pub entity_type: String,
    pub method: String,
    #[serde(default)]
    pub entity_id: i64,
    #[serde(default)]
    pub args: Vec<Value>,
}

pub type MethodHandler = Box<dyn FnMut(&MethodCall) + Send>;

/// Handlers keyed by (entity type, method name), called in subscription order.
///
/// A registry belongs to a single playback run, so subscriptions never leak
/// between uploads.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<(String, String), Vec<MethodHandler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_method_call<F>(&mut self, entity_type: &str, method: &str, handler: F)
    where
        F: FnMut(&MethodCall) + Send + 'static,
    {
        self.handlers
            .entry((entity_type.to_string(), method.to_string()))
            .or_default()
            .push(Box::new(handler));
    }

    /// Returns how many handlers saw the call.
    pub fn dispatch(&mut self, call: &MethodCall) -> usize {
        match self
            .handlers
            .get_mut(&(call.entity_type.clone(), call.method.clone()))
        {
            Some(handlers) => {
                for handler in handlers.iter_mut() {
                    handler(call);
                }
                handlers.len()
            }
            None => 0,
        }
    }

    pub fn handler_count(&self, entity_type: &str, method: &str) -> usize {
        self.handlers
            .get(&(entity_type.to_string(), method.to_string()))
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}
