//! # Record Construction
//!
//! `RecordBuilder` is the write side of a record: a named bag of scalar
//! values and association targets, validated against the type definition
//! and encoded into struct bytes by `Database::store`. Builders are plain
//! data; mutating one after a store has no effect on what was persisted.

use indexmap::IndexMap;

use crate::record::Value;

/// Reference to a record of a given type. `rod_id` is always non-zero;
/// null associations are represented as `None` at the API surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub type_name: String,
    pub rod_id: u64,
}

impl RecordRef {
    pub fn new(type_name: impl Into<String>, rod_id: u64) -> Self {
        Self {
            type_name: type_name.into(),
            rod_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    fields: IndexMap<String, Value>,
    has_one: IndexMap<String, Option<RecordRef>>,
    has_many: IndexMap<String, Vec<Option<RecordRef>>>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar field. Unset fields store as their zero value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a singular association. `None` stores as null.
    pub fn set_ref(mut self, name: impl Into<String>, target: Option<RecordRef>) -> Self {
        self.has_one.insert(name.into(), target);
        self
    }

    /// Sets a plural association. `None` entries store as null elements.
    pub fn set_refs(mut self, name: impl Into<String>, targets: Vec<Option<RecordRef>>) -> Self {
        self.has_many.insert(name.into(), targets);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn has_one(&self, name: &str) -> Option<&Option<RecordRef>> {
        self.has_one.get(name)
    }

    pub fn has_many(&self, name: &str) -> Option<&[Option<RecordRef>]> {
        self.has_many.get(name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_last_value_per_name() {
        let builder = RecordBuilder::new().set("age", 2).set("age", 3);
        assert_eq!(builder.field("age"), Some(&Value::Int(3)));
    }

    #[test]
    fn unset_members_are_absent() {
        let builder = RecordBuilder::new().set("age", 2);
        assert_eq!(builder.field("sex"), None);
        assert_eq!(builder.has_one("mother"), None);
        assert_eq!(builder.has_many("friends"), None);
    }
}
