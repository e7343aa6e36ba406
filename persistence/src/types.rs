//! Core types for session persistence

use crate::ejson;
use crate::ejson::Value;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::snapshot::AnySnapshot;
use crate::snapshot::ObjectId;
use crate::snapshot::SchemaVersion;
use crate::snapshot::SnapshotV2;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// A compile error reported against one line of a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: u32,
    pub start: u32,
    pub end: u32,
    pub message: String,
}

/// Editor-facing state of the loaded session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub active_object_id: ObjectId,
    pub program_sources: BTreeMap<ObjectId, String>,
    pub compile_errors: BTreeMap<ObjectId, Vec<Diagnostic>>,
    pub active_line_by_id: BTreeMap<ObjectId, u32>,
}

impl SessionState {
    pub fn new(active_object_id: ObjectId, program_sources: BTreeMap<ObjectId, String>) -> Self {
        Self {
            active_object_id,
            program_sources,
            ..Self::default()
        }
    }

    pub fn active_source(&self) -> Option<&str> {
        self.program_sources
            .get(&self.active_object_id)
            .map(String::as_str)
    }
}

/// VM state plus the circuit the editor had focused
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSession {
    pub vm: AnySnapshot,
    pub active_ic: ObjectId,
}

/// One named local save
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSessionRecord {
    pub name: String,
    pub date: DateTime<Utc>,
    pub schema_version: SchemaVersion,
    pub session: SavedSession,
}

impl SavedSessionRecord {
    pub fn new(name: impl Into<String>, vm: SnapshotV2, active_ic: ObjectId) -> Self {
        Self {
            name: name.into(),
            date: Utc::now(),
            schema_version: SchemaVersion::CURRENT,
            session: SavedSession {
                vm: AnySnapshot::V2(vm),
                active_ic,
            },
        }
    }

    /// Rewrites an older session into the current schema.
    pub fn into_current(self) -> Result<Self> {
        if self.schema_version == SchemaVersion::CURRENT {
            return Ok(self);
        }
        let vm = self.session.vm.into_current()?;
        Ok(Self {
            schema_version: SchemaVersion::CURRENT,
            session: SavedSession {
                vm: AnySnapshot::V2(vm),
                active_ic: self.session.active_ic,
            },
            ..self
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        let session = BTreeMap::from([
            ("vm".to_owned(), self.session.vm.to_value()?),
            (
                "activeIC".to_owned(),
                Value::Number(f64::from(self.session.active_ic)),
            ),
        ]);
        Ok(Value::Object(BTreeMap::from([
            ("name".to_owned(), Value::String(self.name.clone())),
            ("date".to_owned(), ejson::to_value(&self.date)?),
            (
                "schemaVersion".to_owned(),
                ejson::to_value(&self.schema_version)?,
            ),
            ("session".to_owned(), Value::Object(session)),
        ])))
    }

    /// Reads a stored record; the `schemaVersion` tag picks the snapshot layout.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(PersistenceError::CorruptData(
                "saved session is not a record".to_owned(),
            ));
        };
        let name: String = take_field(&mut fields, "name")?;
        let date: DateTime<Utc> = take_field(&mut fields, "date")?;
        let schema_version: SchemaVersion = take_field(&mut fields, "schemaVersion")?;
        let Some(Value::Object(mut session)) = fields.remove("session") else {
            return Err(PersistenceError::CorruptData(format!(
                "saved session {name:?} has no session payload"
            )));
        };
        let vm = session.remove("vm").ok_or_else(|| {
            PersistenceError::CorruptData(format!("saved session {name:?} has no VM snapshot"))
        })?;
        let vm = match schema_version {
            SchemaVersion::V1 => AnySnapshot::V1(ejson::from_value(vm)?),
            SchemaVersion::V2 => AnySnapshot::V2(ejson::from_value(vm)?),
        };
        let active_ic = take_field(&mut session, "activeIC")?;
        Ok(Self {
            name,
            date,
            schema_version,
            session: SavedSession { vm, active_ic },
        })
    }
}

fn take_field<T: DeserializeOwned>(fields: &mut BTreeMap<String, Value>, key: &str) -> Result<T> {
    let value = fields
        .remove(key)
        .ok_or_else(|| PersistenceError::CorruptData(format!("missing field `{key}`")))?;
    Ok(ejson::from_value(value)?)
}

/// The `by-date` and `by-name` lookups over a collection of saves
#[derive(Debug, Clone, Default)]
pub struct SaveIndex {
    by_name: BTreeMap<String, DateTime<Utc>>,
    by_date: BTreeSet<(DateTime<Utc>, String)>,
}

impl SaveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a save, replacing any earlier entry under the same name.
    pub fn add_save(&mut self, name: &str, date: DateTime<Utc>) {
        self.remove_save(name);
        self.by_name.insert(name.to_owned(), date);
        self.by_date.insert((date, name.to_owned()));
    }

    pub fn remove_save(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let date = self.by_name.remove(name)?;
        self.by_date.remove(&(date, name.to_owned()));
        Some(date)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Names, most recent save first.
    pub fn newest_first(&self) -> impl Iterator<Item = &str> {
        self.by_date.iter().rev().map(|(_, name)| name.as_str())
    }

    /// Names containing `query`, ignoring case, in name order.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query_lower = query.to_lowercase();
        self.by_name
            .keys()
            .filter(|name| name.to_lowercase().contains(&query_lower))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use chrono::Duration;

    #[test]
    fn test_index_orders_by_date_and_replaces_by_name() {
        let now = Utc::now();
        let mut index = SaveIndex::new();
        index.add_save("Airlock", now - Duration::minutes(5));
        index.add_save("Furnace", now - Duration::minutes(1));
        index.add_save("Airlock", now);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.newest_first().collect::<Vec<_>>(),
            vec!["Airlock", "Furnace"]
        );
        assert_eq!(index.remove_save("Airlock"), Some(now));
        assert_eq!(index.newest_first().collect::<Vec<_>>(), vec!["Furnace"]);
        assert_eq!(index.remove_save("Airlock"), None);
    }

    #[test]
    fn test_index_search_ignores_case() {
        let mut index = SaveIndex::new();
        let now = Utc::now();
        index.add_save("Solar Tracker", now);
        index.add_save("solar backup", now);
        index.add_save("Greenhouse", now);

        assert_eq!(index.search("SOLAR"), vec!["Solar Tracker", "solar backup"]);
        assert!(index.search("reactor").is_empty());
    }

    #[test]
    fn test_record_value_round_trip() {
        let record = SavedSessionRecord::new("demo", demo::demo_snapshot(), 1);
        let value = record.to_value().unwrap();
        assert_eq!(value.get("schemaVersion"), Some(&Value::from("V2")));

        let back = SavedSessionRecord::from_value(value.clone()).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.date, record.date);
        assert_eq!(back.session.active_ic, 1);
        assert_eq!(back.to_value().unwrap(), value);
    }

    #[test]
    fn test_record_without_session_is_corrupt() {
        let value = Value::Object(BTreeMap::from([
            ("name".to_owned(), Value::from("x")),
            ("date".to_owned(), Value::from("2024-05-01T10:00:00Z")),
            ("schemaVersion".to_owned(), Value::from("V2")),
        ]));
        assert!(matches!(
            SavedSessionRecord::from_value(value),
            Err(PersistenceError::CorruptData(_))
        ));
    }
}
