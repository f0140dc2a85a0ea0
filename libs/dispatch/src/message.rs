//! Messages exchanged between nodes
//!
//! A `Message` is immutable once built and travels through the tree as an
//! `Arc<Message>`, so fanning one message out to many children never copies
//! its payload.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, or 0 if the clock is before it
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Message type tag
///
/// `Start` and `Stop` drive the node lifecycle. Everything else lives in the
/// application-defined `Custom` space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Start,
    Stop,
    Custom(String),
}

impl MessageType {
    pub const START: &'static str = "START";
    pub const STOP: &'static str = "STOP";

    /// Build an application tag. Reserved names map to their control variants.
    pub fn custom(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        match tag.as_str() {
            Self::START => MessageType::Start,
            Self::STOP => MessageType::Stop,
            _ => MessageType::Custom(tag),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Start => Self::START,
            MessageType::Stop => Self::STOP,
            MessageType::Custom(tag) => tag,
        }
    }

    /// True for the reserved lifecycle tags
    pub fn is_control(&self) -> bool {
        matches!(self, MessageType::Start | MessageType::Stop)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MessageType::custom(s))
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        MessageType::custom(tag)
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        MessageType::custom(tag)
    }
}

/// Payload value carried in a message's value map
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integers widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

/// Value exchanged between nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    timestamp_ns: u64,
    kind: MessageType,
    forward: bool,
    values: HashMap<String, Value>,
}

impl Message {
    /// Create a message stamped with the current time
    pub fn new(kind: impl Into<MessageType>) -> Self {
        Self {
            timestamp_ns: current_timestamp_ns(),
            kind: kind.into(),
            forward: false,
            values: HashMap::new(),
        }
    }

    /// Lifecycle START broadcast, forwarded down the tree
    pub fn start() -> Self {
        Self::new(MessageType::Start).with_forward(true)
    }

    /// Lifecycle STOP broadcast, forwarded down the tree
    pub fn stop() -> Self {
        Self::new(MessageType::Stop).with_forward(true)
    }

    pub fn with_forward(mut self, forward: bool) -> Self {
        self.forward = forward;
        self
    }

    pub fn with_timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Freeze into the shared form used by mailboxes
    pub fn shared(self) -> Arc<Message> {
        Arc::new(self)
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn kind(&self) -> &MessageType {
        &self.kind
    }

    pub fn forward(&self) -> bool {
        self.forward
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn is_start(&self) -> bool {
        self.kind == MessageType::Start
    }

    pub fn is_stop(&self) -> bool {
        self.kind == MessageType::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_tags_parse_to_control_variants() {
        assert_eq!(MessageType::custom("START"), MessageType::Start);
        assert_eq!("STOP".parse::<MessageType>().unwrap(), MessageType::Stop);
        assert_eq!(
            MessageType::from("Random"),
            MessageType::Custom("Random".to_string())
        );
        assert!(MessageType::Start.is_control());
        assert!(!MessageType::custom("start").is_control());
    }

    #[test]
    fn test_owned_tags_match_borrowed_ones() {
        for i in 0..3 {
            let owned = Message::new(format!("Burst{}", i));
            assert_eq!(owned.kind(), &MessageType::from(format!("Burst{}", i).as_str()));
        }
        assert_eq!(MessageType::from("STOP".to_string()), MessageType::Stop);
        assert!(Message::new(String::from("START")).is_start());
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::Start.to_string(), "START");
        assert_eq!(MessageType::Stop.to_string(), "STOP");
        assert_eq!(MessageType::custom("Random").to_string(), "Random");
    }

    #[test]
    fn test_lifecycle_messages_forward() {
        let start = Message::start();
        assert!(start.is_start());
        assert!(start.forward());
        assert!(start.timestamp_ns() > 0);

        let stop = Message::stop();
        assert!(stop.is_stop());
        assert!(stop.forward());
        assert!(stop.timestamp_ns() >= start.timestamp_ns());
    }

    #[test]
    fn test_message_values() {
        let mut nested = BTreeMap::new();
        nested.insert("unit".to_string(), Value::from("per_sec"));

        let msg = Message::new("Random")
            .with_value("value", 0.25)
            .with_value("count", 7i64)
            .with_value("final", false)
            .with_value("meta", nested.clone());

        assert!(!msg.forward());
        assert_eq!(msg.value("value").and_then(Value::as_float), Some(0.25));
        assert_eq!(msg.value("count").and_then(Value::as_int), Some(7));
        assert_eq!(msg.value("count").and_then(Value::as_float), Some(7.0));
        assert_eq!(msg.value("final").and_then(Value::as_bool), Some(false));
        assert_eq!(msg.value("meta").and_then(Value::as_map), Some(&nested));
        assert!(msg.value("missing").is_none());
        assert_eq!(msg.values().len(), 4);
    }

    #[test]
    fn test_shared_message_is_not_copied() {
        let msg = Message::new("Random").with_value("value", 1.0).shared();
        let other = Arc::clone(&msg);
        assert!(Arc::ptr_eq(&msg, &other));
    }
}
