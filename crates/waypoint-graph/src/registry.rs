use std::collections::HashMap;

use serde_json::{Map, Value};

use waypoint_core::error::{GraphError, Result};

use crate::channel::{Channel, ChannelSpec};

/// The declared shape of graph state: one channel per key, in
/// registration order.
///
/// The registry never holds state itself. `merge` rebuilds channels from a
/// snapshot, applies one super-step of writes and returns a new snapshot,
/// so the same inputs always produce the same state.
#[derive(Clone, Debug, Default)]
pub struct ChannelRegistry {
    order: Vec<String>,
    specs: HashMap<String, ChannelSpec>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel. Keys are unique.
    pub fn register(&mut self, key: impl Into<String>, spec: ChannelSpec) -> Result<&mut Self> {
        let key = key.into();
        if self.specs.contains_key(&key) {
            return Err(GraphError::Channel(format!("channel '{key}' is registered twice")).into());
        }
        self.order.push(key.clone());
        self.specs.insert(key, spec);
        Ok(self)
    }

    /// Declare a channel folded by a custom reducer.
    pub fn register_reducer<F>(
        &mut self,
        key: impl Into<String>,
        default: Value,
        reducer: F,
    ) -> Result<&mut Self>
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.register(key, ChannelSpec::reducer(default, reducer))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    pub fn spec(&self, key: &str) -> Option<&ChannelSpec> {
        self.specs.get(key)
    }

    /// Keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fail on the first key that has no channel.
    pub fn check_keys<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a String>,
        writer: &str,
    ) -> Result<()> {
        for key in keys {
            if !self.contains(key) {
                return Err(GraphError::Channel(format!(
                    "'{writer}' writes to unregistered channel '{key}'"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// A fresh state: every channel at its default, then `overrides`
    /// stored verbatim.
    pub fn initialize(&self, overrides: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.check_keys(overrides.keys(), "input")?;
        let mut state = Map::new();
        for key in &self.order {
            let mut channel = self.specs[key].create(key);
            if let Some(value) = overrides.get(key) {
                channel.restore(value.clone());
            }
            state.insert(key.clone(), channel.get().clone());
        }
        Ok(state)
    }

    /// Apply one super-step of writes to `state`.
    ///
    /// `updates` pairs each writer with its partial update and must already
    /// be in node-declaration order; per channel, writes are folded in
    /// exactly that order. A `null` update means "no change".
    pub fn merge(
        &self,
        state: &Map<String, Value>,
        updates: &[(String, Value)],
    ) -> Result<Map<String, Value>> {
        self.fold(state, updates, true)
    }

    /// Like `merge`, but for out-of-band edits between super-steps:
    /// transient channels keep what they hold.
    pub fn apply(
        &self,
        state: &Map<String, Value>,
        updates: &[(String, Value)],
    ) -> Result<Map<String, Value>> {
        self.fold(state, updates, false)
    }

    fn fold(
        &self,
        state: &Map<String, Value>,
        updates: &[(String, Value)],
        step_boundary: bool,
    ) -> Result<Map<String, Value>> {
        let mut pending: HashMap<&str, Vec<Value>> = HashMap::new();
        for (writer, update) in updates {
            match update {
                Value::Null => {}
                Value::Object(fields) => {
                    self.check_keys(fields.keys(), writer)?;
                    for (key, value) in fields {
                        pending.entry(key.as_str()).or_default().push(value.clone());
                    }
                }
                other => {
                    return Err(GraphError::Channel(format!(
                        "'{writer}' returned {}, expected an object of channel updates",
                        kind(other)
                    ))
                    .into());
                }
            }
        }

        let mut next = Map::new();
        for key in &self.order {
            let mut channel = self.restore_channel(key, state);
            if step_boundary {
                channel.on_step_end();
            }
            if let Some(values) = pending.remove(key.as_str()) {
                channel.update(values)?;
            }
            next.insert(key.clone(), channel.get().clone());
        }
        Ok(next)
    }

    fn restore_channel(&self, key: &str, state: &Map<String, Value>) -> Box<dyn Channel> {
        let mut channel = self.specs[key].create(key);
        if let Some(value) = state.get(key) {
            channel.restore(value.clone());
        }
        channel
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
