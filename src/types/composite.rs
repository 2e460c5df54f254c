//! Collection types stored as PostgreSQL `array` and `hstore` literals.

use std::collections::BTreeMap;

use super::TypeStrategy;
use crate::core::{MapperError, Result, Value};
use crate::schema::{PropertyDef, PropertyMeta};

/// List stored as an array literal, e.g. `{1,"two",NULL}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayType;

impl TypeStrategy for ArrayType {
    fn name(&self) -> &str {
        "array"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::List(Vec::new())),
            Value::List(_) => Ok(value),
            other => Err(MapperError::UnexpectedValue(format!(
                "Property {} must be a list, got {}",
                meta.name,
                other.type_name()
            ))),
        }
    }

    fn store(&self, value: Value, _meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::List(items) if items.is_empty() => Ok(Value::Null),
            Value::List(items) => Ok(Value::Text(encode_array(&items))),
            other => Ok(other),
        }
    }

    fn restore(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Text(text) => decode_array(&text).map(Value::List),
            other => self.normalize(other, meta),
        }
    }

    fn normalize_meta(&self, def: PropertyDef) -> PropertyDef {
        collection_meta(def, Value::List(Vec::new()))
    }
}

/// String map stored as an hstore literal, e.g. `"a"=>"1", "b"=>NULL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HstoreType;

impl TypeStrategy for HstoreType {
    fn name(&self) -> &str {
        "hstore"
    }

    fn normalize(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Map(BTreeMap::new())),
            Value::Map(_) => Ok(value),
            other => Err(MapperError::UnexpectedValue(format!(
                "Property {} must be a map, got {}",
                meta.name,
                other.type_name()
            ))),
        }
    }

    fn store(&self, value: Value, _meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Map(map) if map.is_empty() => Ok(Value::Null),
            Value::Map(map) => Ok(Value::Text(encode_hstore(&map))),
            other => Ok(other),
        }
    }

    fn restore(&self, value: Value, meta: &PropertyMeta) -> Result<Value> {
        match value {
            Value::Text(text) => decode_hstore(&text).map(Value::Map),
            other => self.normalize(other, meta),
        }
    }

    fn normalize_meta(&self, def: PropertyDef) -> PropertyDef {
        collection_meta(def, Value::Map(BTreeMap::new()))
    }
}

fn collection_meta(mut def: PropertyDef, empty: Value) -> PropertyDef {
    def.strict.get_or_insert(true);
    def.default.get_or_insert(empty);
    def
}

pub fn encode_array(items: &[Value]) -> String {
    let elements: Vec<String> = items.iter().map(encode_array_element).collect();
    format!("{{{}}}", elements.join(","))
}

fn encode_array_element(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => value.to_string(),
        Value::List(items) => encode_array(items),
        other => quote(&other.to_string()),
    }
}

pub fn encode_hstore(map: &BTreeMap<String, Value>) -> String {
    let pairs: Vec<String> = map
        .iter()
        .map(|(key, value)| match value {
            Value::Null => format!("{}=>NULL", quote(key)),
            other => format!("{}=>{}", quote(key), quote(&other.to_string())),
        })
        .collect();
    pairs.join(", ")
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

pub fn decode_array(text: &str) -> Result<Vec<Value>> {
    let mut cursor = Cursor::new(text);
    cursor.skip_whitespace();
    let items = cursor.array()?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        return Err(cursor.error("trailing characters after array"));
    }
    Ok(items)
}

pub fn decode_hstore(text: &str) -> Result<BTreeMap<String, Value>> {
    let mut cursor = Cursor::new(text);
    let mut map = BTreeMap::new();

    loop {
        cursor.skip_whitespace();
        if cursor.at_end() {
            break;
        }

        let key = match cursor.peek() {
            Some('"') => cursor.quoted()?,
            _ => cursor.bare(&['='])?,
        };
        cursor.skip_whitespace();
        cursor.expect('=')?;
        cursor.expect('>')?;
        cursor.skip_whitespace();

        let value = match cursor.peek() {
            Some('"') => Value::Text(cursor.quoted()?),
            _ => {
                let bare = cursor.bare(&[','])?;
                if bare.eq_ignore_ascii_case("null") {
                    Value::Null
                } else {
                    Value::Text(bare)
                }
            }
        };
        map.insert(key, value);

        cursor.skip_whitespace();
        match cursor.next() {
            None => break,
            Some(',') => continue,
            Some(c) => return Err(cursor.error(&format!("unexpected '{}'", c))),
        }
    }

    Ok(map)
}

struct Cursor<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.next() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", expected))),
        }
    }

    fn error(&self, reason: &str) -> MapperError {
        MapperError::UnexpectedValue(format!(
            "Malformed literal '{}' at {}: {}",
            self.source, self.pos, reason
        ))
    }

    fn array(&mut self) -> Result<Vec<Value>> {
        self.expect('{')?;
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some('{') => Value::List(self.array()?),
                Some('"') => Value::Text(self.quoted()?),
                _ => bare_scalar(self.bare(&[',', '}'])?),
            };
            items.push(item);

            self.skip_whitespace();
            match self.next() {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err(self.error("unterminated array")),
            }
        }

        Ok(items)
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect('"')?;
        let mut text = String::new();
        loop {
            match self.next() {
                Some('\\') => match self.next() {
                    Some(c) => text.push(c),
                    None => return Err(self.error("dangling escape")),
                },
                Some('"') => return Ok(text),
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated quote")),
            }
        }
    }

    fn bare(&mut self, stops: &[char]) -> Result<String> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += 1;
            if c == '\\' {
                match self.next() {
                    Some(escaped) => text.push(escaped),
                    None => return Err(self.error("dangling escape")),
                }
            } else {
                text.push(c);
            }
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(self.error("empty element"));
        }
        Ok(text)
    }
}

fn bare_scalar(text: String) -> Value {
    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    match text.as_str() {
        "true" => return Value::Boolean(true),
        "false" => return Value::Boolean(false),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Text(text)
}
