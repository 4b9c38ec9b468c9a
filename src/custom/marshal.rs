//! Validation of the tables returned by script entry points.
//!
//! A result must be `table<uint16, table<field, value>>`. Anything else is
//! rejected as a whole; partially valid results are never returned.

use crate::error::{KageError, Result};
use mlua::{Table, Value};

/// The fields of one entity table, checked but not yet typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFields {
    /// The table key the entity was stored under.
    pub index: u16,
    pub url: String,
    pub name: Option<String>,
    pub cover: Option<String>,
    pub volume: Option<String>,
}

/// Checks one returned value against the entry-point contract.
pub struct Marshaller<'a> {
    pub source_name: &'a str,
    pub function: &'a str,
}

impl Marshaller<'_> {
    fn violation(&self, message: impl Into<String>) -> KageError {
        KageError::contract(self.source_name, self.function, message)
    }

    /// Validate `value` and return its entities ordered by key.
    pub fn entities(&self, value: Value) -> Result<Vec<EntityFields>> {
        let table = match value {
            Value::Table(table) => table,
            other => {
                return Err(self.violation(format!(
                    "was expected to return a table, got {}",
                    other.type_name()
                )))
            }
        };

        // `pairs` walks the table with raw `next`; `__pairs` is never consulted.
        let mut entities = Vec::new();
        for pair in table.pairs::<Value, Value>() {
            let (key, value) = pair.map_err(|e| KageError::script(self.source_name, e))?;
            let index = self.key_index(&key)?;

            let entity = match value {
                Value::Table(entity) => entity,
                other => {
                    return Err(self.violation(format!(
                        "was expected to return a table with tables as values, got {} at key {}",
                        other.type_name(),
                        index
                    )))
                }
            };

            entities.push(self.fields(index, &entity)?);
        }

        entities.sort_by_key(|e| e.index);
        Ok(entities)
    }

    fn key_index(&self, key: &Value) -> Result<u16> {
        match key {
            Value::Integer(i) => u16::try_from(*i).map_err(|_| {
                self.violation(format!(
                    "was expected to return a table with unsigned 16-bit integers as keys, got {i}"
                ))
            }),
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u16::MAX) => Ok(*n as u16),
            Value::Number(n) => Err(self.violation(format!(
                "was expected to return a table with unsigned 16-bit integers as keys, got {n}"
            ))),
            other => Err(self.violation(format!(
                "was expected to return a table with numbers as keys, got {} as a key",
                other.type_name()
            ))),
        }
    }

    fn fields(&self, index: u16, entity: &Table) -> Result<EntityFields> {
        let url = self
            .field(index, entity, "url")?
            .ok_or_else(|| self.violation(format!("entity at key {index} has no url")))?;

        Ok(EntityFields {
            index,
            url,
            name: self.field(index, entity, "name")?,
            cover: self.field(index, entity, "cover")?,
            volume: self.field(index, entity, "volume")?,
        })
    }

    /// A string (or number) field. Nil and empty strings are absent.
    /// Read raw so no script metamethod runs outside the call.
    fn field(&self, index: u16, entity: &Table, name: &str) -> Result<Option<String>> {
        let value = entity
            .raw_get::<Value>(name)
            .map_err(|e| KageError::script(self.source_name, e))?;

        let text = match value {
            Value::Nil => return Ok(None),
            Value::String(s) => s.to_string_lossy().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(self.violation(format!(
                    "field {name:?} of entity at key {index} must be a string, got {}",
                    other.type_name()
                )))
            }
        };

        let text = text.trim().to_string();
        Ok(if text.is_empty() { None } else { Some(text) })
    }
}
