//! Degrouping of flat joined rows into nested records.
//!
//! A query that joins associations returns one row per combination of
//! parent and child, with child columns aliased `association.column`.
//! [`group_data`] folds those rows back into one record per parent `id`,
//! with every association level turned into a list of records keyed by
//! their own `id`.

use crate::record::{Record, RecordValue};
use relmodel_core::{Row, Value};
use std::collections::HashMap;

const SEPARATOR: char = '.';

/// Degroup flat rows. Output order is the order in which each `id` first
/// appears, at every level.
pub fn group_data(rows: &[Row]) -> Vec<Record> {
    let mut top = Group::default();
    for row in rows {
        top.combine(split_into_nested(Record::from_row(row)));
    }
    tracing::trace!(rows = rows.len(), groups = top.entries.len(), "rows degrouped");
    top.into_records()
}

/// Move every dotted field into nested records. Null values under dotted
/// keys are dropped so an unmatched LEFT JOIN leaves no trace.
fn split_into_nested(record: Record) -> Record {
    let mut out = Record::new();
    for (key, value) in record {
        if !key.contains(SEPARATOR) {
            out.insert(key, value);
            continue;
        }
        if matches!(value, RecordValue::Value(Value::Null)) {
            continue;
        }
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        insert_path(&mut out, &segments, value);
    }
    out
}

fn insert_path(record: &mut Record, segments: &[&str], value: RecordValue) {
    match segments {
        [] => {}
        [last] => record.insert(*last, value),
        [head, rest @ ..] => {
            let mut nested = match record.remove(head) {
                Some(RecordValue::Record(existing)) => existing,
                _ => Record::new(),
            };
            insert_path(&mut nested, rest, value);
            record.insert(*head, RecordValue::Record(nested));
        }
    }
}

/// Records keyed by `id`, in first-appearance order.
#[derive(Default)]
struct Group {
    index: HashMap<String, usize>,
    entries: Vec<Entry>,
}

/// One grouped record. Field order is first appearance; a field holds either
/// a plain value or a nested group, never both.
#[derive(Default)]
struct Entry {
    order: Vec<String>,
    values: HashMap<String, RecordValue>,
    groups: HashMap<String, Group>,
}

impl Group {
    fn combine(&mut self, record: Record) {
        let key = record.id().map_or_else(String::new, Value::group_key);
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                self.entries.push(Entry::default());
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[position];

        for (field, value) in record {
            match value {
                RecordValue::Record(nested) => entry.group(field).combine(nested),
                RecordValue::List(list) => {
                    let group = entry.group(field);
                    for nested in list {
                        group.combine(nested);
                    }
                }
                plain @ RecordValue::Value(_) => entry.set(field, plain),
            }
        }
    }

    fn into_records(self) -> Vec<Record> {
        self.entries.into_iter().map(Entry::into_record).collect()
    }
}

impl Entry {
    fn touch(&mut self, field: &str) {
        if !self.order.iter().any(|f| f == field) {
            self.order.push(field.to_string());
        }
    }

    fn set(&mut self, field: String, value: RecordValue) {
        self.touch(&field);
        self.groups.remove(&field);
        self.values.insert(field, value);
    }

    fn group(&mut self, field: String) -> &mut Group {
        self.touch(&field);
        self.values.remove(&field);
        self.groups.entry(field).or_default()
    }

    fn into_record(mut self) -> Record {
        let mut record = Record::new();
        for field in self.order {
            if let Some(group) = self.groups.remove(&field) {
                record.insert(field, RecordValue::List(group.into_records()));
            } else if let Some(value) = self.values.remove(&field) {
                record.insert(field, value);
            }
        }
        record
    }
}
