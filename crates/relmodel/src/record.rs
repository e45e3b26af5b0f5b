//! Row-shaped data: the input of entity constructors and the output of
//! degrouping.

use relmodel_core::{Row, Value};

/// An ordered set of named fields. Nested records hold joined association
/// data.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, RecordValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Value(Value),
    Record(Record),
    List(Vec<Record>),
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert) of a plain value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, RecordValue::Value(value.into()));
        self
    }

    #[must_use]
    pub fn with_record(mut self, key: impl Into<String>, record: Record) -> Self {
        self.insert(key, RecordValue::Record(record));
        self
    }

    #[must_use]
    pub fn with_list(mut self, key: impl Into<String>, records: Vec<Record>) -> Self {
        self.insert(key, RecordValue::List(records));
        self
    }

    /// Set a field, replacing an existing one in place.
    pub fn insert(&mut self, key: impl Into<String>, value: RecordValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The plain value under `key`, if the field holds one.
    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.get(key) {
            Some(RecordValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Shorthand for the `id` field.
    pub fn id(&self) -> Option<&Value> {
        self.value("id")
    }

    pub fn remove(&mut self, key: &str) -> Option<RecordValue> {
        let index = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flat record with one field per result column.
    pub fn from_row(row: &Row) -> Self {
        Self {
            fields: row
                .iter()
                .map(|(name, value)| (name.to_string(), RecordValue::Value(value.clone())))
                .collect(),
        }
    }

    /// Build a record from a JSON object.
    ///
    /// Nested objects become nested records and arrays of objects become
    /// lists; any other array is kept as a JSON value. Returns `None` when
    /// `json` is not an object.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        let fields = object
            .iter()
            .map(|(key, value)| (key.clone(), RecordValue::from_json(value)))
            .collect();
        Some(Self { fields })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }
}

impl IntoIterator for Record {
    type Item = (String, RecordValue);
    type IntoIter = std::vec::IntoIter<(String, RecordValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, RecordValue::Value(value));
        }
        record
    }
}

impl RecordValue {
    fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(_) => {
                Record::from_json(json).map_or(RecordValue::Value(Value::Null), RecordValue::Record)
            }
            serde_json::Value::Array(items) if items.iter().all(serde_json::Value::is_object) => {
                RecordValue::List(items.iter().filter_map(Record::from_json).collect())
            }
            other => RecordValue::Value(Value::from_json(other)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RecordValue::Value(value) => value.to_json(),
            RecordValue::Record(record) => record.to_json(),
            RecordValue::List(records) => {
                serde_json::Value::Array(records.iter().map(Record::to_json).collect())
            }
        }
    }
}
