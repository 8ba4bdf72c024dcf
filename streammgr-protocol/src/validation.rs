//! Request validation.
//!
//! Every request is validated before it is serialized. Each type lists its
//! fields with a rule table; [`Validator`] walks nested objects and lists
//! depth-first and stops at the first violation, reporting the dotted/indexed
//! path of the offending field.

use crate::model::{
    ExportDefinition, HttpConfig, IoTAnalyticsConfig, KinesisConfig, MessageStreamDefinition,
    ReadMessagesOptions,
};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Character set allowed in stream names, sink identifiers and request ids.
pub const IDENTIFIER_PATTERN: &str = r"^[\w ,.\-_]*$";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"));

/// A single declared constraint on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Minimum(i64),
    Maximum(i64),
    MinItems(usize),
    MaxItems(usize),
    Identifier,
}

/// Rules for request ids.
pub const REQUEST_ID_RULES: &[Rule] = &[Rule::Required, Rule::MinLength(1), Rule::Identifier];

/// Rules for stream names and sink identifiers.
pub const NAME_RULES: &[Rule] = &[
    Rule::Required,
    Rule::MinLength(1),
    Rule::MaxLength(255),
    Rule::Identifier,
];

const BATCH_INTERVAL_RULES: &[Rule] = &[Rule::Minimum(60_000), Rule::Maximum(9_223_372_036_854)];
const PRIORITY_RULES: &[Rule] = &[Rule::Minimum(1), Rule::Maximum(10)];

/// The constraint a field violated, with the offending measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Required,
    MinLength { min: usize, actual: usize },
    MaxLength { max: usize, actual: usize },
    Minimum { min: i64, actual: i64 },
    Maximum { max: i64, actual: i64 },
    MinItems { min: usize, actual: usize },
    MaxItems { max: usize, actual: usize },
    Pattern(&'static str),
    NotLessThan { field: &'static str, min: i64, actual: i64 },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Required => write!(f, "is required, but was missing"),
            Constraint::MinLength { min, actual } => write!(
                f,
                "must have a minimum length of {}, but found length of {}",
                min, actual
            ),
            Constraint::MaxLength { max, actual } => write!(
                f,
                "must have a maximum length of {}, but found length of {}",
                max, actual
            ),
            Constraint::Minimum { min, actual } => {
                write!(f, "must be at least {}, but was {}", min, actual)
            }
            Constraint::Maximum { max, actual } => {
                write!(f, "must be at most {}, but was {}", max, actual)
            }
            Constraint::MinItems { min, actual } => {
                write!(f, "must have at least {} items, but found {}", min, actual)
            }
            Constraint::MaxItems { max, actual } => {
                write!(f, "must have at most {} items, but found {}", max, actual)
            }
            Constraint::Pattern(pattern) => write!(f, "must match regex {}", pattern),
            Constraint::NotLessThan { field, min, actual } => write!(
                f,
                "must not be less than {} ({}), but was {}",
                field, min, actual
            ),
        }
    }
}

/// First constraint violation found in a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {object}: property {path} {constraint}")]
pub struct ValidationError {
    /// Type that declares the invalid field.
    pub object: &'static str,
    /// Dotted/indexed path from the validated root, e.g. `definition.export_definition.kinesis[0].priority`.
    pub path: String,
    pub constraint: Constraint,
}

impl ValidationError {
    pub fn new(object: &'static str, path: impl Into<String>, constraint: Constraint) -> Self {
        Self {
            object,
            path: path.into(),
            constraint,
        }
    }

    /// Name of the invalid field without its parents.
    pub fn field(&self) -> &str {
        let last = self.path.rsplit('.').next().unwrap_or(&self.path);
        last.split('[').next().unwrap_or(last)
    }
}

/// Types that can be checked before being sent.
pub trait Validate {
    /// Type name used in error reports.
    const OBJECT: &'static str;

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError>;

    fn validate(&self) -> Result<(), ValidationError> {
        let mut v = Validator::new(Self::OBJECT);
        self.validate_fields(&mut v)
    }
}

/// Walks a value's fields, tracking the current path and declaring object.
pub struct Validator {
    objects: Vec<&'static str>,
    path: Vec<String>,
}

impl Validator {
    pub fn new(object: &'static str) -> Self {
        Self {
            objects: vec![object],
            path: Vec::new(),
        }
    }

    fn object(&self) -> &'static str {
        self.objects.last().copied().unwrap_or("object")
    }

    fn field_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path.join("."), name)
        }
    }

    fn fail(&self, name: &str, constraint: Constraint) -> ValidationError {
        ValidationError::new(self.object(), self.field_path(name), constraint)
    }

    fn check_required<T>(&self, name: &str, value: &Option<T>, rules: &[Rule]) -> Result<(), ValidationError> {
        if value.is_none() && rules.contains(&Rule::Required) {
            return Err(self.fail(name, Constraint::Required));
        }
        Ok(())
    }

    /// Validates a string field.
    pub fn string(&self, name: &str, value: Option<&str>, rules: &[Rule]) -> Result<(), ValidationError> {
        self.check_required(name, &value, rules)?;
        let Some(value) = value else {
            return Ok(());
        };
        let len = value.chars().count();
        for rule in rules {
            match *rule {
                Rule::MinLength(min) if len < min => {
                    return Err(self.fail(name, Constraint::MinLength { min, actual: len }));
                }
                Rule::MaxLength(max) if len > max => {
                    return Err(self.fail(name, Constraint::MaxLength { max, actual: len }));
                }
                Rule::Identifier if !IDENTIFIER_RE.is_match(value) => {
                    return Err(self.fail(name, Constraint::Pattern(IDENTIFIER_PATTERN)));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates a byte-string field; length rules apply to the byte count.
    pub fn bytes(&self, name: &str, value: Option<&[u8]>, rules: &[Rule]) -> Result<(), ValidationError> {
        self.check_required(name, &value, rules)?;
        let Some(value) = value else {
            return Ok(());
        };
        let len = value.len();
        for rule in rules {
            match *rule {
                Rule::MinLength(min) if len < min => {
                    return Err(self.fail(name, Constraint::MinLength { min, actual: len }));
                }
                Rule::MaxLength(max) if len > max => {
                    return Err(self.fail(name, Constraint::MaxLength { max, actual: len }));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates an integer field.
    pub fn integer(&self, name: &str, value: Option<i64>, rules: &[Rule]) -> Result<(), ValidationError> {
        self.check_required(name, &value, rules)?;
        let Some(value) = value else {
            return Ok(());
        };
        for rule in rules {
            match *rule {
                Rule::Minimum(min) if value < min => {
                    return Err(self.fail(name, Constraint::Minimum { min, actual: value }));
                }
                Rule::Maximum(max) if value > max => {
                    return Err(self.fail(name, Constraint::Maximum { max, actual: value }));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks that `value` is not less than the sibling field `other`.
    pub fn not_less_than(
        &self,
        name: &str,
        value: Option<i64>,
        other: &'static str,
        min: i64,
    ) -> Result<(), ValidationError> {
        match value {
            Some(actual) if actual < min => Err(self.fail(
                name,
                Constraint::NotLessThan {
                    field: other,
                    min,
                    actual,
                },
            )),
            _ => Ok(()),
        }
    }

    /// Validates a nested object, recursing before the field's own rules.
    pub fn nested<T: Validate>(&mut self, name: &str, value: Option<&T>, rules: &[Rule]) -> Result<(), ValidationError> {
        if let Some(inner) = value {
            self.path.push(name.to_string());
            self.objects.push(T::OBJECT);
            let result = inner.validate_fields(self);
            self.objects.pop();
            self.path.pop();
            result?;
        }
        self.check_required(name, &value, rules)
    }

    /// Validates every item of a list of objects, then the list's own rules.
    pub fn list<T: Validate>(&mut self, name: &str, items: &[T], rules: &[Rule]) -> Result<(), ValidationError> {
        for (i, item) in items.iter().enumerate() {
            self.path.push(format!("{}[{}]", name, i));
            self.objects.push(T::OBJECT);
            let result = item.validate_fields(self);
            self.objects.pop();
            self.path.pop();
            result?;
        }
        let len = items.len();
        for rule in rules {
            match *rule {
                Rule::MinItems(min) if len < min => {
                    return Err(self.fail(name, Constraint::MinItems { min, actual: len }));
                }
                Rule::MaxItems(max) if len > max => {
                    return Err(self.fail(name, Constraint::MaxItems { max, actual: len }));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Validate for HttpConfig {
    const OBJECT: &'static str = "HttpConfig";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("identifier", Some(&self.identifier), NAME_RULES)?;
        v.string("uri", Some(&self.uri), &[Rule::Required, Rule::MinLength(1)])?;
        v.integer("batch_size", self.batch_size, &[Rule::Minimum(1), Rule::Maximum(500)])?;
        v.integer("batch_interval_millis", self.batch_interval_millis, BATCH_INTERVAL_RULES)?;
        v.integer("priority", self.priority, PRIORITY_RULES)
    }
}

impl Validate for IoTAnalyticsConfig {
    const OBJECT: &'static str = "IoTAnalyticsConfig";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("identifier", Some(&self.identifier), NAME_RULES)?;
        v.string("iot_channel", Some(&self.iot_channel), &[Rule::Required, Rule::MinLength(1)])?;
        v.string("iot_msg_id_prefix", self.iot_msg_id_prefix.as_deref(), &[Rule::MaxLength(32)])?;
        v.integer("batch_size", self.batch_size, &[Rule::Minimum(1), Rule::Maximum(100)])?;
        v.integer("batch_interval_millis", self.batch_interval_millis, BATCH_INTERVAL_RULES)?;
        v.integer("priority", self.priority, PRIORITY_RULES)
    }
}

impl Validate for KinesisConfig {
    const OBJECT: &'static str = "KinesisConfig";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("identifier", Some(&self.identifier), NAME_RULES)?;
        v.string(
            "kinesis_stream_name",
            Some(&self.kinesis_stream_name),
            &[Rule::Required, Rule::MinLength(1)],
        )?;
        v.integer("batch_size", self.batch_size, &[Rule::Minimum(1), Rule::Maximum(500)])?;
        v.integer("batch_interval_millis", self.batch_interval_millis, BATCH_INTERVAL_RULES)?;
        v.integer("priority", self.priority, PRIORITY_RULES)
    }
}

impl Validate for ExportDefinition {
    const OBJECT: &'static str = "ExportDefinition";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.list("http", &self.http, &[])?;
        v.list("iot_analytics", &self.iot_analytics, &[])?;
        v.list("kinesis", &self.kinesis, &[])
    }
}

impl Validate for MessageStreamDefinition {
    const OBJECT: &'static str = "MessageStreamDefinition";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.string("name", Some(&self.name), NAME_RULES)?;
        v.integer(
            "max_size",
            Some(self.max_size),
            &[Rule::Minimum(1024), Rule::Maximum(i64::MAX)],
        )?;
        v.integer(
            "stream_segment_size",
            Some(self.stream_segment_size),
            &[Rule::Minimum(1024), Rule::Maximum(i32::MAX as i64)],
        )?;
        v.integer(
            "time_to_live_millis",
            self.time_to_live_millis,
            &[Rule::Minimum(60_000), Rule::Maximum(9_223_372_036_854)],
        )?;
        v.nested("export_definition", self.export_definition.as_ref(), &[])
    }
}

impl Validate for ReadMessagesOptions {
    const OBJECT: &'static str = "ReadMessagesOptions";

    fn validate_fields(&self, v: &mut Validator) -> Result<(), ValidationError> {
        v.integer(
            "desired_start_sequence_number",
            self.desired_start_sequence_number,
            &[Rule::Minimum(0), Rule::Maximum(i64::MAX)],
        )?;
        v.integer(
            "min_message_count",
            Some(self.min_message_count),
            &[Rule::Minimum(1), Rule::Maximum(i32::MAX as i64)],
        )?;
        v.integer(
            "max_message_count",
            self.max_message_count,
            &[Rule::Minimum(1), Rule::Maximum(i32::MAX as i64)],
        )?;
        v.not_less_than(
            "max_message_count",
            self.max_message_count,
            "min_message_count",
            self.min_message_count,
        )?;
        v.integer(
            "read_timeout_millis",
            Some(self.read_timeout_millis),
            &[Rule::Minimum(0), Rule::Maximum(9_223_372_036_854)],
        )
    }
}
