use std::fmt::Write;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

use super::TypeStrategy;
use crate::core::{MapperError, Result, Value};
use crate::schema::PropertyMeta;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date and time with a fixed UTC offset.
///
/// A property may declare a `format` (strftime syntax); input must then match
/// it exactly and storage uses it. Otherwise the strategy's default format is
/// used for storage, and RFC 3339 when that is unset too.
#[derive(Debug, Clone, Default)]
pub struct TimestampType {
    default_format: Option<String>,
}

impl TimestampType {
    pub fn new(default_format: Option<String>) -> Self {
        Self { default_format }
    }

    pub fn default_format(&self) -> Option<&str> {
        self.default_format.as_deref()
    }

    fn parse(&self, text: &str, meta: &PropertyMeta) -> Result<DateTime<FixedOffset>> {
        if let Some(format) = meta.format.as_deref() {
            return parse_with_format(text, format).ok_or_else(|| {
                MapperError::UnexpectedValue(format!(
                    "Property {}: create datetime from format [{}] failed for '{}'",
                    meta.name, format, text
                ))
            });
        }

        self.default_format
            .as_deref()
            .and_then(|format| parse_with_format(text, format))
            .or_else(|| parse_flexible(text))
            .ok_or_else(|| {
                MapperError::UnexpectedValue(format!(
                    "Property {}: unparsable datetime '{}'",
                    meta.name, text
                ))
            })
    }
}

impl TypeStrategy for TimestampType {
    fn name(&self) -> &str {
        "datetime"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(ref s) if s.is_empty() => Ok(Value::Null),
            Value::Timestamp(_) => Ok(value),
            Value::Text(ref s) => self.parse(s.trim(), meta).map(Value::Timestamp),
            Value::Integer(secs) => DateTime::from_timestamp(secs, 0)
                .map(|ts| Value::Timestamp(ts.fixed_offset()))
                .ok_or_else(|| {
                    MapperError::UnexpectedValue(format!(
                        "Property {}: timestamp {} out of range",
                        meta.name, secs
                    ))
                }),
            other => Err(MapperError::UnexpectedValue(format!(
                "Property {} cannot hold {} value as datetime",
                meta.name,
                other.type_name()
            ))),
        }
    }

    fn store(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        let Value::Timestamp(ts) = value else {
            return Ok(value);
        };

        let Some(format) = meta.format.as_deref().or(self.default_format.as_deref()) else {
            return Ok(Value::Text(ts.to_rfc3339()));
        };

        let mut text = String::new();
        write!(text, "{}", ts.format(format)).map_err(|_| {
            MapperError::UnexpectedValue(format!(
                "Property {}: invalid datetime format [{}]",
                meta.name, format
            ))
        })?;
        Ok(Value::Text(text))
    }

    fn default_value(&self, meta: &PropertyMeta) -> Result<Value> {
        if meta.default.is_null() {
            return Ok(Value::Null);
        }
        self.normalize(meta.default.clone(), meta)
    }
}

fn parse_with_format(text: &str, format: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_str(text, format) {
        return Some(ts);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn parse_flexible(text: &str) -> Option<DateTime<FixedOffset>> {
    if text.eq_ignore_ascii_case("now") {
        return Some(Utc::now().fixed_offset());
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc().fixed_offset())
        .or_else(|| parse_with_format(text, DATE_FORMAT))
}
