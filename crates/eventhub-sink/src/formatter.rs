// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event formatting.
//!
//! The default [`SuffixJsonFormatter`] writes each event as one JSON object and
//! appends a type suffix to every property name, so that a downstream index with a
//! flat, typed schema never sees the same field name carrying two different types:
//!
//! ```json
//! {"Timestamp":"2024-03-01T12:30:00+00:00","Level":"Information",
//!  "MessageTemplate":"User {UserId} logged in","RenderedMessage":"User 42 logged in",
//!  "Properties":{"UserId_i":42,"Request/Path_s":"/login"}}
//! ```
//!
//! Dots in property names become `/` because the downstream schema treats `.` as a
//! path separator.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::errors::FormatError;
use crate::event::{
    format_duration, format_timestamp, LogEvent, PropertyValue, ScalarKind, ScalarValue,
};

/// Turns one event into the bytes published for it.
pub trait Formatter: Send + Sync {
    fn format(&self, event: &LogEvent) -> Result<Vec<u8>, FormatError>;
}

/// Suffix appended to property names, per scalar type.
///
/// Owned by a formatter instance; there is no process-wide table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixTable {
    suffixes: HashMap<ScalarKind, String>,
}

impl Default for SuffixTable {
    fn default() -> Self {
        let mut table = SuffixTable::empty();
        table
            .register(ScalarKind::Bool, "_b")
            .register(ScalarKind::Int, "_i")
            .register(ScalarKind::UInt, "_i")
            .register(ScalarKind::Float, "_d")
            .register(ScalarKind::Timestamp, "_t")
            .register(ScalarKind::Duration, "_ts")
            .register(ScalarKind::String, "_s");
        table
    }
}

impl SuffixTable {
    #[must_use]
    pub fn empty() -> Self {
        SuffixTable {
            suffixes: HashMap::new(),
        }
    }

    /// Sets the suffix for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: ScalarKind, suffix: impl Into<String>) -> &mut Self {
        self.suffixes.insert(kind, suffix.into());
        self
    }

    /// Suffix for a property value. Scalars without an entry of their own use the
    /// string suffix; structured values get none.
    #[must_use]
    pub fn suffix_for(&self, value: &PropertyValue) -> &str {
        match value {
            PropertyValue::Scalar(scalar) => self
                .suffixes
                .get(&scalar.kind())
                .or_else(|| self.suffixes.get(&ScalarKind::String))
                .map_or("", String::as_str),
            _ => "",
        }
    }

    fn field_name(&self, name: &str, value: &PropertyValue) -> String {
        escape_field_name(&format!("{name}{}", self.suffix_for(value)))
    }
}

/// Replaces `.` with `/`.
#[must_use]
pub fn escape_field_name(name: &str) -> String {
    name.replace('.', "/")
}

/// JSON formatter that suffixes property names by value type.
#[derive(Debug, Clone)]
pub struct SuffixJsonFormatter {
    suffixes: SuffixTable,
    render_message: bool,
}

impl Default for SuffixJsonFormatter {
    fn default() -> Self {
        SuffixJsonFormatter::new(SuffixTable::default())
    }
}

impl SuffixJsonFormatter {
    #[must_use]
    pub fn new(suffixes: SuffixTable) -> Self {
        SuffixJsonFormatter {
            suffixes,
            render_message: true,
        }
    }

    /// Whether to include `RenderedMessage`. On by default.
    #[must_use]
    pub fn with_render_message(mut self, render_message: bool) -> Self {
        self.render_message = render_message;
        self
    }

    pub fn register_suffix(&mut self, kind: ScalarKind, suffix: impl Into<String>) {
        self.suffixes.register(kind, suffix);
    }
}

impl Formatter for SuffixJsonFormatter {
    fn format(&self, event: &LogEvent) -> Result<Vec<u8>, FormatError> {
        let document = EventDocument {
            event,
            formatter: self,
        };
        Ok(serde_json::to_vec(&document)?)
    }
}

struct EventDocument<'a> {
    event: &'a LogEvent,
    formatter: &'a SuffixJsonFormatter,
}

impl Serialize for EventDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let event = self.event;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Timestamp", &format_timestamp(event.timestamp()))?;
        map.serialize_entry("Level", event.level().as_str())?;
        map.serialize_entry("MessageTemplate", event.message_template())?;
        if self.formatter.render_message {
            map.serialize_entry("RenderedMessage", &render_message(event))?;
        }
        if let Some(exception) = event.exception() {
            map.serialize_entry("Exception", exception)?;
        }
        if !event.properties().is_empty() {
            map.serialize_entry(
                "Properties",
                &NamedProperties {
                    properties: event.properties(),
                    suffixes: &self.formatter.suffixes,
                },
            )?;
        }
        map.end()
    }
}

struct NamedProperties<'a> {
    properties: &'a [(String, PropertyValue)],
    suffixes: &'a SuffixTable,
}

impl Serialize for NamedProperties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.properties.len()))?;
        for (name, value) in self.properties {
            map.serialize_entry(
                &self.suffixes.field_name(name, value),
                &ValueDocument {
                    value,
                    suffixes: self.suffixes,
                },
            )?;
        }
        map.end()
    }
}

struct ValueDocument<'a> {
    value: &'a PropertyValue,
    suffixes: &'a SuffixTable,
}

impl Serialize for ValueDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            PropertyValue::Scalar(scalar) => ScalarDocument(scalar).serialize(serializer),
            PropertyValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&ValueDocument {
                        value: item,
                        suffixes: self.suffixes,
                    })?;
                }
                seq.end()
            }
            PropertyValue::Structure {
                type_tag,
                properties,
            } => {
                let mut map = serializer.serialize_map(None)?;
                if let Some(tag) = type_tag {
                    map.serialize_entry("_typeTag", tag)?;
                }
                for (name, value) in properties {
                    map.serialize_entry(
                        &self.suffixes.field_name(name, value),
                        &ValueDocument {
                            value,
                            suffixes: self.suffixes,
                        },
                    )?;
                }
                map.end()
            }
            PropertyValue::Dictionary(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(
                        &self.suffixes.field_name(&key.key_text(), value),
                        &ValueDocument {
                            value,
                            suffixes: self.suffixes,
                        },
                    )?;
                }
                map.end()
            }
        }
    }
}

struct ScalarDocument<'a>(&'a ScalarValue);

impl Serialize for ScalarDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            ScalarValue::Null => serializer.serialize_none(),
            ScalarValue::Bool(b) => serializer.serialize_bool(*b),
            ScalarValue::Int(i) => serializer.serialize_i64(*i),
            ScalarValue::UInt(u) => serializer.serialize_u64(*u),
            ScalarValue::Float(f) => serializer.serialize_f64(*f),
            ScalarValue::String(s) => serializer.serialize_str(s),
            ScalarValue::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
            ScalarValue::Duration(d) => serializer.serialize_str(&format_duration(*d)),
        }
    }
}

/// Renders the message template against the event's properties.
///
/// `{Name}` is replaced by the property value (strings quoted unless the `:l`
/// format is given), `{@Name}` and `{$Name}` are accepted, `{{` and `}}` are
/// literal braces. Tokens without a matching property are kept verbatim.
#[must_use]
pub fn render_message(event: &LogEvent) -> String {
    let template = event.message_template();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let Some(end) = template[start..].find('}').map(|i| start + i) else {
                    out.push_str(&template[start..]);
                    break;
                };
                let token = &template[start + 1..end];
                render_token(event, token, &mut out);
                while matches!(chars.peek(), Some((i, _)) if *i <= end) {
                    chars.next();
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn render_token(event: &LogEvent, token: &str, out: &mut String) {
    let name_and_format = token.trim_start_matches(['@', '$']);
    let (name_and_alignment, format) = match name_and_format.split_once(':') {
        Some((n, f)) => (n, Some(f)),
        None => (name_and_format, None),
    };
    let name = name_and_alignment
        .split_once(',')
        .map_or(name_and_alignment, |(n, _)| n);

    match event.property(name) {
        Some(value) => render_value(value, format == Some("l"), out),
        None => {
            out.push('{');
            out.push_str(token);
            out.push('}');
        }
    }
}

fn render_value(value: &PropertyValue, literal: bool, out: &mut String) {
    match value {
        PropertyValue::Scalar(ScalarValue::String(s)) if !literal => {
            let _ = write!(out, "{s:?}");
        }
        PropertyValue::Scalar(scalar) => {
            let _ = write!(out, "{scalar}");
        }
        PropertyValue::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_value(item, false, out);
            }
            out.push(']');
        }
        PropertyValue::Structure {
            type_tag,
            properties,
        } => {
            if let Some(tag) = type_tag {
                out.push_str(tag);
                out.push(' ');
            }
            out.push_str("{ ");
            for (i, (name, value)) in properties.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                render_value(value, false, out);
            }
            out.push_str(" }");
        }
        PropertyValue::Dictionary(entries) => {
            out.push('[');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                render_value(&PropertyValue::Scalar(key.clone()), false, out);
                out.push_str(": ");
                render_value(value, false, out);
                out.push(')');
            }
            out.push(']');
        }
    }
}
