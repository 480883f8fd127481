//! Schema registry and the per-record text format.
//!
//! Every record is stored as one plain-text file: ordered `name: value`
//! lines for each non-null scalar field, followed, if the schema
//! designates a content field, by a blank line and the raw content
//! verbatim. Null fields are omitted entirely, never written as empty.
//!
//! Encoders are resolved once at schema registration time via a finite
//! [`FieldKind`] tag; there is no per-value runtime dispatch.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::error::{StoreError, StoreResult};
use crate::types::{CollectionName, InvalidNameError, RecordKey, TreePath};

/// wire format for DateTime fields
const DATETIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// The finite set of scalar field encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "datetime",
        };
        write!(f, "{}", name)
    }
}

/// A scalar field value. A null field is simply absent from the record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::DateTime(_) => "datetime",
        }
    }
}

/// errors raised while rendering a record to text or parsing it back
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("field '{field}' holds a {found} value but is declared {declared}")]
    KindMismatch {
        field: String,
        declared: FieldKind,
        found: &'static str,
    },

    #[error("cannot parse '{value}' as {kind} for field '{field}'")]
    Parse {
        field: String,
        kind: FieldKind,
        value: String,
    },

    #[error("malformed record line: '{0}'")]
    MalformedLine(String),

    #[error("primary-key field '{0}' is null")]
    NullPrimaryKey(String),

    #[error("content field '{0}' must hold text")]
    ContentNotText(String),

    #[error("invalid record key: {0}")]
    InvalidKey(#[from] InvalidNameError),
}

/// Escape newlines so multi-line text stays on one `name: value` line.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// One field of a schema: name, encoding kind, primary-key flag.
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    primary_key: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: false,
        }
    }

    pub fn primary_key(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            primary_key: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// render a value of this field to its text form
    fn encode(&self, value: &FieldValue) -> Result<String, EncodeError> {
        match (self.kind, value) {
            (FieldKind::Text, FieldValue::Text(s)) => Ok(escape(s)),
            (FieldKind::Integer, FieldValue::Integer(i)) => Ok(i.to_string()),
            (FieldKind::Float, FieldValue::Float(x)) => Ok(x.to_string()),
            (FieldKind::Boolean, FieldValue::Boolean(b)) => {
                Ok(if *b { "True" } else { "False" }.to_string())
            }
            (FieldKind::DateTime, FieldValue::DateTime(t)) => {
                Ok(t.format(DATETIME_FORMAT).to_string())
            }
            (declared, found) => Err(EncodeError::KindMismatch {
                field: self.name.clone(),
                declared,
                found: found.kind_name(),
            }),
        }
    }

    /// parse the text form back into a value
    fn decode(&self, raw: &str) -> Result<FieldValue, EncodeError> {
        let parse_err = || EncodeError::Parse {
            field: self.name.clone(),
            kind: self.kind,
            value: raw.to_string(),
        };

        match self.kind {
            FieldKind::Text => Ok(FieldValue::Text(unescape(raw))),
            FieldKind::Integer => raw
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| parse_err()),
            FieldKind::Float => raw
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|_| parse_err()),
            FieldKind::Boolean => {
                if raw.eq_ignore_ascii_case("true") {
                    Ok(FieldValue::Boolean(true))
                } else if raw.eq_ignore_ascii_case("false") {
                    Ok(FieldValue::Boolean(false))
                } else {
                    Err(parse_err())
                }
            }
            FieldKind::DateTime => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
                .map(FieldValue::DateTime)
                .map_err(|_| parse_err()),
        }
    }
}

/// A record: field name to value. Absent entry means null.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder-style setter
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    /// set a field back to null
    pub fn clear(&mut self, name: &str) {
        self.values.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn is_null(&self, name: &str) -> bool {
        !self.values.contains_key(name)
    }
}

/// The schema of one record type: collection name, ordered fields,
/// primary-key fields and an optional content field.
#[derive(Debug, Clone)]
pub struct Schema {
    collection: CollectionName,
    fields: Vec<FieldDef>,
    content_field: Option<String>,
}

impl Schema {
    pub fn new(
        collection: impl Into<String>,
        fields: Vec<FieldDef>,
    ) -> Result<Self, InvalidNameError> {
        Ok(Self {
            collection: CollectionName::new(collection)?,
            fields,
            content_field: None,
        })
    }

    /// designate one text field whose value is stored verbatim after a
    /// blank line instead of on a `name: value` line
    pub fn with_content_field(mut self, name: impl Into<String>) -> Self {
        self.content_field = Some(name.into());
        self
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn is_content_field(&self, name: &str) -> bool {
        self.content_field.as_deref() == Some(name)
    }

    /// Render a record to its file body.
    pub fn encode(&self, record: &Record) -> Result<String, EncodeError> {
        let mut out = String::new();

        for field in &self.fields {
            if self.is_content_field(&field.name) {
                continue;
            }
            let Some(value) = record.get(&field.name) else {
                continue; // null fields are omitted
            };
            out.push_str(&field.name);
            out.push_str(": ");
            out.push_str(&field.encode(value)?);
            out.push('\n');
        }

        if let Some(content_name) = &self.content_field {
            if let Some(value) = record.get(content_name) {
                let FieldValue::Text(content) = value else {
                    return Err(EncodeError::ContentNotText(content_name.clone()));
                };
                out.push('\n');
                out.push_str(content);
            }
        }

        Ok(out)
    }

    /// Parse a file body back into a record.
    ///
    /// Unknown field names are ignored so that readers tolerate schema
    /// additions made by newer writers.
    pub fn decode(&self, text: &str) -> Result<Record, EncodeError> {
        let (meta, content) = match text.split_once("\n\n") {
            Some((meta, content)) => (meta, Some(content)),
            None => (text, None),
        };

        let mut record = Record::new();
        for line in meta.lines() {
            if line.is_empty() {
                continue;
            }
            let (name, raw) = line
                .split_once(": ")
                .ok_or_else(|| EncodeError::MalformedLine(line.to_string()))?;
            if let Some(field) = self.field(name) {
                record.set(name, field.decode(raw)?);
            }
        }

        if let (Some(content), Some(content_name)) = (content, &self.content_field) {
            record.set(content_name.clone(), FieldValue::Text(content.to_string()));
        }

        Ok(record)
    }

    /// The record's key: primary-key values encoded and joined with commas,
    /// in field order. Errors if any primary-key value is null.
    pub fn key_of(&self, record: &Record) -> Result<RecordKey, EncodeError> {
        let mut parts = Vec::new();
        for field in self.fields.iter().filter(|f| f.primary_key) {
            let value = record
                .get(&field.name)
                .ok_or_else(|| EncodeError::NullPrimaryKey(field.name.clone()))?;
            parts.push(field.encode(value)?);
        }
        if parts.is_empty() {
            return Err(EncodeError::NullPrimaryKey("<none declared>".to_string()));
        }
        Ok(RecordKey::new(parts.join(","))?)
    }

    /// Where the record file for `key` lives: `<collection>/<key>.txt`.
    pub fn path_of(&self, key: &RecordKey) -> TreePath {
        TreePath::for_record(&self.collection, key)
    }
}

/// Explicit registry of record schemas.
///
/// Record types register before first use; recovery replays collections
/// in registration order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: Schema) -> StoreResult<()> {
        if self.get(schema.collection.as_str()).is_some() {
            return Err(StoreError::CollectionAlreadyRegistered(
                schema.collection.to_string(),
            ));
        }
        self.schemas.push(schema);
        Ok(())
    }

    pub fn get(&self, collection: &str) -> Option<&Schema> {
        self.schemas
            .iter()
            .find(|s| s.collection.as_str() == collection)
    }

    /// iterate schemas in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
