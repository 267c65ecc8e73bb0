// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON rendering for daemon payloads. Floating point values are always printed with five
//! decimals, the format the daemon and its upstream expect for timings.

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use std::io;

const DOUBLE_PRECISION: usize = 5;

#[derive(Debug, Default, Clone, Copy)]
struct FixedPrecisionFormatter;

impl Formatter for FixedPrecisionFormatter {
    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        write!(writer, "{value:.DOUBLE_PRECISION$}")
    }

    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.write_f64(writer, value as f64)
    }
}

/// Renders `value` as compact JSON with fixed precision doubles.
pub fn to_string<T: Serialize + ?Sized>(value: &T) -> String {
    let mut buf = Vec::with_capacity(128);
    let mut serializer = Serializer::with_formatter(&mut buf, FixedPrecisionFormatter);
    if value.serialize(&mut serializer).is_err() {
        return String::from("null");
    }
    String::from_utf8(buf).unwrap_or_else(|_| String::from("null"))
}

/// A double, or `null` when the value cannot be represented in JSON.
pub fn double(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Renders an event as the `[intrinsics, user attributes, agent attributes]` triple.
pub fn event_triple(
    intrinsics: Map<String, Value>,
    user: Map<String, Value>,
    agent: Map<String, Value>,
) -> String {
    to_string(&Value::Array(vec![
        Value::Object(intrinsics),
        Value::Object(user),
        Value::Object(agent),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doubles_have_five_decimals() {
        let value = json!({"duration": 0.0005, "count": 3, "flag": true, "ratio": 1.0});
        assert_eq!(
            to_string(&value),
            r#"{"duration":0.00050,"count":3,"flag":true,"ratio":1.00000}"#
        );
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut map = Map::new();
        map.insert("type".into(), Value::from("Transaction"));
        map.insert("name".into(), Value::from("basic"));
        map.insert("a".into(), Value::from(1));
        assert_eq!(
            event_triple(map, Map::new(), Map::new()),
            r#"[{"type":"Transaction","name":"basic","a":1},{},{}]"#
        );
    }

    #[test]
    fn test_non_finite_double() {
        assert_eq!(double(f64::NAN), Value::Null);
        assert_eq!(double(2.5), json!(2.5));
    }
}
