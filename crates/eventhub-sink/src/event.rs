// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log events as handed over by the logging front-end.
//!
//! A [`LogEvent`] is immutable once built. Property order is preserved so the
//! formatter writes properties in the order the producer captured them.

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Severity of a log event, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "Verbose",
            LogLevel::Debug => "Debug",
            LogLevel::Information => "Information",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        }
    }

    /// Parses a level name, case-insensitively. Accepts the short forms used in
    /// environment variables (`info`, `warn`, ...).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "verbose" | "trace" => Some(LogLevel::Verbose),
            "debug" => Some(LogLevel::Debug),
            "information" | "info" => Some(LogLevel::Information),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            "fatal" => Some(LogLevel::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of a scalar, used to pick the property name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Null,
    Bool,
    Int,
    UInt,
    Float,
    String,
    Timestamp,
    Duration,
}

/// A single scalar property value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
    Duration(Duration),
}

impl ScalarValue {
    #[must_use]
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Null => ScalarKind::Null,
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::Int(_) => ScalarKind::Int,
            ScalarValue::UInt(_) => ScalarKind::UInt,
            ScalarValue::Float(_) => ScalarKind::Float,
            ScalarValue::String(_) => ScalarKind::String,
            ScalarValue::Timestamp(_) => ScalarKind::Timestamp,
            ScalarValue::Duration(_) => ScalarKind::Duration,
        }
    }

    /// Text used when the value appears as a dictionary key.
    #[must_use]
    pub fn key_text(&self) -> String {
        match self {
            ScalarValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("null"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::UInt(u) => write!(f, "{u}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::String(s) => f.write_str(s),
            ScalarValue::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
            ScalarValue::Duration(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// RFC 3339 with sub-second digits only when present.
#[must_use]
pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, false)
}

/// `[d.]hh:mm:ss[.fffffff]`, the constant format used for time spans on the wire.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    // 100ns ticks
    let ticks = duration.subsec_nanos() / 100;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// A property value: a scalar or one of the structured shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(ScalarValue),
    Sequence(Vec<PropertyValue>),
    Structure {
        type_tag: Option<String>,
        properties: Vec<(String, PropertyValue)>,
    },
    Dictionary(Vec<(ScalarValue, PropertyValue)>),
}

macro_rules! impl_scalar_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    ScalarValue::$variant(value $(as $cast)?)
                }
            }

            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    PropertyValue::Scalar(ScalarValue::from(value))
                }
            }
        )*
    };
}

impl_scalar_from!(
    bool => Bool,
    i32 => Int as i64,
    i64 => Int,
    u32 => UInt as u64,
    u64 => UInt,
    f32 => Float as f64,
    f64 => Float,
    String => String,
    DateTime<FixedOffset> => Timestamp,
    Duration => Duration,
);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Scalar(ScalarValue::from(value))
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(value: DateTime<Utc>) -> Self {
        ScalarValue::Timestamp(value.fixed_offset())
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::Scalar(ScalarValue::from(value))
    }
}

impl From<ScalarValue> for PropertyValue {
    fn from(value: ScalarValue) -> Self {
        PropertyValue::Scalar(value)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => PropertyValue::Scalar(ScalarValue::Null),
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    if let Ok(i) = i64::try_from(u) {
                        i.into()
                    } else {
                        u.into()
                    }
                } else if let Some(i) = n.as_i64() {
                    i.into()
                } else {
                    n.as_f64().unwrap_or(f64::NAN).into()
                }
            }
            Value::String(s) => s.into(),
            Value::Array(items) => {
                PropertyValue::Sequence(items.into_iter().map(PropertyValue::from).collect())
            }
            Value::Object(map) => PropertyValue::Structure {
                type_tag: None,
                properties: map
                    .into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            },
        }
    }
}

/// A structured log record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogEvent {
    timestamp: DateTime<FixedOffset>,
    level: LogLevel,
    message_template: String,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default, deserialize_with = "deserialize_properties")]
    properties: Vec<(String, PropertyValue)>,
}

impl LogEvent {
    #[must_use]
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        level: LogLevel,
        message_template: impl Into<String>,
    ) -> Self {
        LogEvent {
            timestamp,
            level,
            message_template: message_template.into(),
            exception: None,
            properties: Vec::new(),
        }
    }

    /// Adds a property, replacing any existing one with the same name.
    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.properties.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.properties.push((name, value));
        }
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    #[must_use]
    pub fn timestamp(&self) -> &DateTime<FixedOffset> {
        &self.timestamp
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    #[must_use]
    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    #[must_use]
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    #[must_use]
    pub fn properties(&self) -> &[(String, PropertyValue)] {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

// Keeps the producer's property order, which a plain map would lose.
fn deserialize_properties<'de, D>(deserializer: D) -> Result<Vec<(String, PropertyValue)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PropertiesVisitor;

    impl<'de> Visitor<'de> for PropertiesVisitor {
        type Value = Vec<(String, PropertyValue)>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of property names to values")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut properties = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
                properties.push((name, PropertyValue::from(value)));
            }
            Ok(properties)
        }
    }

    deserializer.deserialize_map(PropertiesVisitor)
}
