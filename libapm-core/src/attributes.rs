// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

pub const USER_ATTRIBUTE_LIMIT: usize = 64;
pub const KEY_LENGTH_LIMIT: usize = 255;
pub const VALUE_LENGTH_LIMIT: usize = 255;

/// Bitset of the payloads an attribute is copied into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination(u8);

impl Destination {
    pub const NONE: Destination = Destination(0);
    pub const TXN_EVENT: Destination = Destination(1 << 0);
    pub const TXN_TRACE: Destination = Destination(1 << 1);
    pub const ERROR: Destination = Destination(1 << 2);
    pub const SPAN: Destination = Destination(1 << 3);
    pub const ALL: Destination = Destination(0b1111);

    pub fn contains(self, other: Destination) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Destination {
    type Output = Destination;

    fn bitor(self, rhs: Destination) -> Destination {
        Destination(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl AttributeValue {
    pub(crate) fn to_json(&self) -> Value {
        match self {
            AttributeValue::Str(s) => Value::from(s.as_str()),
            AttributeValue::Int(i) => Value::from(*i),
            AttributeValue::Double(d) => crate::json::double(*d),
            AttributeValue::Bool(b) => Value::from(*b),
        }
    }

    fn truncated(self) -> Self {
        match self {
            AttributeValue::Str(s) => AttributeValue::Str(truncate(s, VALUE_LENGTH_LIMIT)),
            other => other,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Str(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(d: f64) -> Self {
        AttributeValue::Double(d)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

/// Truncates to at most `limit` bytes without splitting a character.
fn truncate(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[derive(Debug, Clone)]
struct Attribute {
    value: AttributeValue,
    destinations: Destination,
}

/// Attribute bag of a transaction, split into user supplied and agent supplied attributes.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    user: IndexMap<String, Attribute>,
    agent: IndexMap<String, Attribute>,
}

impl Attributes {
    /// Adds or replaces a user attribute. Returns false if the key is invalid or the user
    /// attribute limit is reached.
    pub fn add_user(
        &mut self,
        key: &str,
        value: impl Into<AttributeValue>,
        destinations: Destination,
    ) -> bool {
        if !self.user.contains_key(key) && self.user.len() >= USER_ATTRIBUTE_LIMIT {
            debug!(key, "user attribute limit reached");
            return false;
        }
        Self::insert(&mut self.user, key, value.into(), destinations)
    }

    pub fn add_agent(
        &mut self,
        key: &str,
        value: impl Into<AttributeValue>,
        destinations: Destination,
    ) -> bool {
        Self::insert(&mut self.agent, key, value.into(), destinations)
    }

    fn insert(
        map: &mut IndexMap<String, Attribute>,
        key: &str,
        value: AttributeValue,
        destinations: Destination,
    ) -> bool {
        if key.is_empty() || key.len() > KEY_LENGTH_LIMIT {
            debug!(key_len = key.len(), "attribute key rejected");
            return false;
        }
        map.insert(
            key.to_string(),
            Attribute {
                value: value.truncated(),
                destinations,
            },
        );
        true
    }

    pub fn user_len(&self) -> usize {
        self.user.len()
    }

    pub fn user_to_json(&self, destination: Destination) -> Map<String, Value> {
        Self::to_json(&self.user, destination)
    }

    pub fn agent_to_json(&self, destination: Destination) -> Map<String, Value> {
        Self::to_json(&self.agent, destination)
    }

    fn to_json(map: &IndexMap<String, Attribute>, destination: Destination) -> Map<String, Value> {
        map.iter()
            .filter(|(_, attr)| attr.destinations.contains(destination))
            .map(|(key, attr)| (key.clone(), attr.value.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_destinations() {
        let mut attrs = Attributes::default();
        attrs.add_user("everywhere", "x", Destination::ALL);
        attrs.add_user("errors", 1i64, Destination::ERROR);
        attrs.add_agent("request.method", "GET", Destination::TXN_EVENT | Destination::ERROR);

        assert_eq!(
            Value::Object(attrs.user_to_json(Destination::ERROR)),
            json!({"everywhere": "x", "errors": 1})
        );
        assert_eq!(
            Value::Object(attrs.user_to_json(Destination::TXN_TRACE)),
            json!({"everywhere": "x"})
        );
        assert_eq!(
            Value::Object(attrs.agent_to_json(Destination::TXN_EVENT)),
            json!({"request.method": "GET"})
        );
        assert!(attrs.agent_to_json(Destination::SPAN).is_empty());
    }

    #[test]
    fn test_limits() {
        let mut attrs = Attributes::default();
        for i in 0..USER_ATTRIBUTE_LIMIT {
            assert!(attrs.add_user(&format!("k{i}"), true, Destination::ALL));
        }
        assert!(!attrs.add_user("one_too_many", true, Destination::ALL));
        // replacing an existing key is still allowed
        assert!(attrs.add_user("k0", false, Destination::ALL));
        assert_eq!(attrs.user_len(), USER_ATTRIBUTE_LIMIT);

        let long_key = "k".repeat(KEY_LENGTH_LIMIT + 1);
        assert!(!attrs.add_agent(&long_key, 1i64, Destination::ALL));
        assert!(!attrs.add_agent("", 1i64, Destination::ALL));
    }

    #[test]
    fn test_value_truncation_respects_char_boundaries() {
        let mut attrs = Attributes::default();
        let value = format!("{}é", "a".repeat(VALUE_LENGTH_LIMIT - 1));
        attrs.add_agent("long", value, Destination::ALL);
        let json = attrs.agent_to_json(Destination::ALL);
        assert_eq!(json["long"].as_str().unwrap().len(), VALUE_LENGTH_LIMIT - 1);
    }
}
