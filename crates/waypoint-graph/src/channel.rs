use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use waypoint_core::error::{GraphError, Result};

/// A reducer closure: `(current, incoming) -> merged`.
pub type ReducerFn = dyn Fn(&Value, &Value) -> Value + Send + Sync;

/// Built-in folds for `BinaryOperator` channels.
#[derive(Clone)]
pub enum AggregateOp {
    /// Numeric sum. Integer inputs stay integers until they overflow.
    Sum,
    /// Keep the larger number. Non-numeric writes are ignored.
    Max,
    /// Keep the smaller number. Non-numeric writes are ignored.
    Min,
    Custom(Arc<ReducerFn>),
}

impl fmt::Debug for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOp::Sum => write!(f, "Sum"),
            AggregateOp::Max => write!(f, "Max"),
            AggregateOp::Min => write!(f, "Min"),
            AggregateOp::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl AggregateOp {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        AggregateOp::Custom(Arc::new(f))
    }

    /// Fold one incoming value into `current`.
    pub fn apply(&self, current: &Value, incoming: &Value) -> Value {
        match self {
            AggregateOp::Sum => sum(current, incoming),
            AggregateOp::Max => pick(current, incoming, Ordering::Greater),
            AggregateOp::Min => pick(current, incoming, Ordering::Less),
            AggregateOp::Custom(f) => f(current, incoming),
        }
    }
}

fn sum(current: &Value, incoming: &Value) -> Value {
    if let (Some(a), Some(b)) = (current.as_i64(), incoming.as_i64()) {
        if let Some(total) = a.checked_add(b) {
            return Value::from(total);
        }
    }
    let a = current.as_f64().unwrap_or(0.0);
    let b = incoming.as_f64().unwrap_or(0.0);
    serde_json::json!(a + b)
}

fn pick(current: &Value, incoming: &Value, wins: Ordering) -> Value {
    let Some(b) = incoming.as_f64() else {
        return current.clone();
    };
    match current.as_f64() {
        Some(a) if b.partial_cmp(&a) != Some(wins) => current.clone(),
        _ => incoming.clone(),
    }
}

/// Declarative description of a channel. The registry keeps specs and
/// builds fresh channel instances for every merge.
#[derive(Clone, Debug)]
pub enum ChannelSpec {
    /// Replace on write. Two writes in one super-step is an error.
    LastValue { default: Value },
    /// List append. Array writes are flattened into the list.
    Append,
    /// Fold every write into the current value.
    BinaryOperator { default: Value, op: AggregateOp },
    /// Visible to the super-step after the one that wrote it, then cleared.
    Ephemeral,
    /// Message queue. Without `accumulate`, messages live for one super-step.
    Topic { accumulate: bool },
}

impl ChannelSpec {
    pub fn last_value(default: Value) -> Self {
        ChannelSpec::LastValue { default }
    }

    pub fn reducer<F>(default: Value, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        ChannelSpec::BinaryOperator {
            default,
            op: AggregateOp::custom(f),
        }
    }

    /// The value a fresh thread starts with.
    pub fn default_value(&self) -> Value {
        match self {
            ChannelSpec::LastValue { default } | ChannelSpec::BinaryOperator { default, .. } => {
                default.clone()
            }
            ChannelSpec::Append | ChannelSpec::Topic { .. } => Value::Array(Vec::new()),
            ChannelSpec::Ephemeral => Value::Null,
        }
    }

    /// Build a channel instance for `key`, starting from its default.
    pub fn create(&self, key: &str) -> Box<dyn Channel> {
        match self {
            ChannelSpec::LastValue { default } => Box::new(LastValue::new(key, default.clone())),
            ChannelSpec::Append => Box::new(Append::new()),
            ChannelSpec::BinaryOperator { default, op } => {
                Box::new(BinaryOperator::new(default.clone(), op.clone()))
            }
            ChannelSpec::Ephemeral => Box::new(Ephemeral::new()),
            ChannelSpec::Topic { accumulate } => Box::new(Topic::new(*accumulate)),
        }
    }
}

/// Holds the value of a single state key and decides how writes combine.
pub trait Channel: Send + Sync {
    /// Apply every write of one super-step, in merge order.
    ///
    /// Returns `Ok(true)` if the value changed.
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    fn get(&self) -> &Value;

    /// Load the value stored in a checkpoint.
    fn restore(&mut self, data: Value);

    /// Called once per super-step, before that step's writes are applied.
    /// Transient channels drop whatever the previous step left behind.
    fn on_step_end(&mut self) {}
}

pub struct LastValue {
    key: String,
    value: Value,
}

impl LastValue {
    pub fn new(key: impl Into<String>, default: Value) -> Self {
        Self {
            key: key.into(),
            value: default,
        }
    }
}

impl Channel for LastValue {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.len() > 1 {
            return Err(GraphError::Channel(format!(
                "channel '{}' received {} writes in one super-step; a last-value channel accepts at most 1",
                self.key,
                values.len()
            ))
            .into());
        }
        match values.into_iter().next() {
            Some(v) if v != self.value => {
                self.value = v;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self) -> &Value {
        &self.value
    }

    fn restore(&mut self, data: Value) {
        self.value = data;
    }
}

/// Keeps a list in a `Value::Array` so `get` can hand out a reference.
pub struct Append {
    items: Value,
}

impl Append {
    pub fn new() -> Self {
        Self {
            items: Value::Array(Vec::new()),
        }
    }

    fn take_list(&mut self) -> Vec<Value> {
        match std::mem::take(&mut self.items) {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

impl Default for Append {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for Append {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        let mut list = self.take_list();
        let before = list.len();
        for value in values {
            match value {
                Value::Array(batch) => list.extend(batch),
                Value::Null => {}
                other => list.push(other),
            }
        }
        let changed = list.len() != before;
        self.items = Value::Array(list);
        Ok(changed)
    }

    fn get(&self) -> &Value {
        &self.items
    }

    fn restore(&mut self, data: Value) {
        self.items = data;
        let list = self.take_list();
        self.items = Value::Array(list);
    }
}

pub struct BinaryOperator {
    value: Value,
    op: AggregateOp,
}

impl BinaryOperator {
    pub fn new(default: Value, op: AggregateOp) -> Self {
        Self { value: default, op }
    }
}

impl Channel for BinaryOperator {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let folded = values
            .iter()
            .fold(self.value.clone(), |acc, v| self.op.apply(&acc, v));
        let changed = folded != self.value;
        self.value = folded;
        Ok(changed)
    }

    fn get(&self) -> &Value {
        &self.value
    }

    fn restore(&mut self, data: Value) {
        self.value = data;
    }
}

pub struct Ephemeral {
    value: Value,
}

impl Ephemeral {
    pub fn new() -> Self {
        Self { value: Value::Null }
    }
}

impl Default for Ephemeral {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for Ephemeral {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        match values.into_iter().last() {
            Some(v) if v != self.value => {
                self.value = v;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self) -> &Value {
        &self.value
    }

    fn restore(&mut self, data: Value) {
        self.value = data;
    }

    fn on_step_end(&mut self) {
        self.value = Value::Null;
    }
}

pub struct Topic {
    inner: Append,
    accumulate: bool,
}

impl Topic {
    pub fn new(accumulate: bool) -> Self {
        Self {
            inner: Append::new(),
            accumulate,
        }
    }
}

impl Channel for Topic {
    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        self.inner.update(values)
    }

    fn get(&self) -> &Value {
        self.inner.get()
    }

    fn restore(&mut self, data: Value) {
        self.inner.restore(data);
    }

    fn on_step_end(&mut self) {
        if !self.accumulate {
            self.inner.restore(Value::Array(Vec::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_value_replaces() {
        let mut ch = LastValue::new("n", json!(0));
        assert!(ch.update(vec![json!(42)]).unwrap());
        assert_eq!(ch.get(), &json!(42));
        assert!(!ch.update(vec![json!(42)]).unwrap());
        assert!(!ch.update(vec![]).unwrap());
    }

    #[test]
    fn last_value_rejects_concurrent_writes() {
        let mut ch = LastValue::new("answer", json!(null));
        let err = ch.update(vec![json!(1), json!(2)]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'answer'"));
        assert!(msg.contains("2 writes"));
        assert_eq!(ch.get(), &json!(null));
    }

    #[test]
    fn append_flattens_arrays() {
        let mut ch = Append::new();
        ch.update(vec![json!("a"), json!(["b", "c"])]).unwrap();
        ch.update(vec![json!("d")]).unwrap();
        assert_eq!(ch.get(), &json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn append_ignores_null_and_empty() {
        let mut ch = Append::new();
        assert!(!ch.update(vec![]).unwrap());
        assert!(!ch.update(vec![json!(null), json!([])]).unwrap());
        assert_eq!(ch.get(), &json!([]));
    }

    #[test]
    fn append_restore_normalizes_scalars() {
        let mut ch = Append::new();
        ch.restore(json!("solo"));
        assert_eq!(ch.get(), &json!(["solo"]));
        ch.restore(json!(null));
        assert_eq!(ch.get(), &json!([]));
    }

    #[test]
    fn sum_keeps_integers() {
        let mut ch = BinaryOperator::new(json!(0), AggregateOp::Sum);
        ch.update(vec![json!(5), json!(6)]).unwrap();
        assert_eq!(ch.get(), &json!(11));
        ch.update(vec![json!(0.5)]).unwrap();
        assert_eq!(ch.get(), &json!(11.5));
    }

    #[test]
    fn sum_overflow_falls_back_to_float() {
        let mut ch = BinaryOperator::new(json!(i64::MAX), AggregateOp::Sum);
        ch.update(vec![json!(1)]).unwrap();
        assert!(ch.get().is_f64());
    }

    #[test]
    fn max_and_min_ignore_non_numbers() {
        let mut max = BinaryOperator::new(json!(null), AggregateOp::Max);
        max.update(vec![json!(3), json!("x"), json!(9), json!(4)]).unwrap();
        assert_eq!(max.get(), &json!(9));

        let mut min = BinaryOperator::new(json!(100), AggregateOp::Min);
        min.update(vec![json!(50), json!(75)]).unwrap();
        assert_eq!(min.get(), &json!(50));
        assert!(!min.update(vec![json!(60)]).unwrap());
    }

    #[test]
    fn custom_reducer_is_order_sensitive() {
        let concat = AggregateOp::custom(|a, b| {
            json!(format!("{}{}", a.as_str().unwrap_or(""), b.as_str().unwrap_or("")))
        });
        let mut ch = BinaryOperator::new(json!(""), concat);
        ch.update(vec![json!("x"), json!("y")]).unwrap();
        assert_eq!(ch.get(), &json!("xy"));
    }

    #[test]
    fn ephemeral_clears_on_step_end() {
        let mut ch = Ephemeral::new();
        ch.update(vec![json!(1), json!(2)]).unwrap();
        assert_eq!(ch.get(), &json!(2));
        ch.on_step_end();
        assert_eq!(ch.get(), &Value::Null);
    }

    #[test]
    fn topic_accumulation() {
        let mut transient = Topic::new(false);
        transient.update(vec![json!("m1")]).unwrap();
        transient.on_step_end();
        assert_eq!(transient.get(), &json!([]));

        let mut durable = Topic::new(true);
        durable.update(vec![json!("m1")]).unwrap();
        durable.on_step_end();
        durable.update(vec![json!("m2")]).unwrap();
        assert_eq!(durable.get(), &json!(["m1", "m2"]));
    }

    #[test]
    fn channel_spec_defaults() {
        assert_eq!(ChannelSpec::last_value(json!(7)).default_value(), json!(7));
        assert_eq!(ChannelSpec::Append.default_value(), json!([]));
        assert_eq!(ChannelSpec::Ephemeral.default_value(), Value::Null);
        let ch = ChannelSpec::Topic { accumulate: true }.create("t");
        assert_eq!(ch.get(), &json!([]));
    }
}
