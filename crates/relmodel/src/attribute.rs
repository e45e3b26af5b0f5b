//! Dirty-tracked column values.

use relmodel_core::Value;

/// A single column's current value and whether it still has to be written.
///
/// Attributes start dirty: a value nobody has read from the database is
/// assumed to be unsaved.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    value: Value,
    dirty: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the value. The attribute becomes dirty only if the new value
    /// differs from the current one.
    pub fn set(&mut self, value: impl Into<Value>) {
        let value = value.into();
        if !self.value.same_as(&value) {
            tracing::trace!(attribute = %self.name, "attribute changed");
            self.value = value;
            self.dirty = true;
        }
    }

    /// Mark the current value as persisted.
    pub fn clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_attribute_is_dirty() {
        let attr = Attribute::new("name", "Ada");
        assert!(attr.is_dirty());
        assert_eq!(attr.name(), "name");
        assert_eq!(attr.value(), &Value::Text("Ada".to_string()));
    }

    #[test]
    fn same_value_keeps_flag() {
        let mut attr = Attribute::new("name", "Ada");
        attr.clean();
        attr.set("Ada");
        assert!(!attr.is_dirty());

        // still dirty after a no-op assignment on a dirty attribute
        let mut fresh = Attribute::new("name", "Ada");
        fresh.set("Ada");
        assert!(fresh.is_dirty());
    }

    #[test]
    fn changed_value_marks_dirty_after_clean() {
        let mut attr = Attribute::new("age", 30_i64);
        attr.clean();
        attr.set(31_i64);
        assert!(attr.is_dirty());
        assert_eq!(attr.value(), &Value::BigInt(31));
    }

    #[test]
    fn integer_width_is_not_a_change() {
        let mut attr = Attribute::new("id", 7_i64);
        attr.clean();
        attr.set(7_i32);
        assert!(!attr.is_dirty());
    }
}
