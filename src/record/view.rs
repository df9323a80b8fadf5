//! # Decoded Records
//!
//! `Record` is the read side: scalars decoded to [`Value`]s, singular
//! associations resolved to [`RecordRef`]s and plural associations exposed
//! as [`CollectionProxy`] views over their join ranges. Records are plain
//! values detached from the mapping; re-fetching observes later appends.

use eyre::{bail, Result};
use indexmap::IndexMap;

use crate::collection::CollectionProxy;
use crate::record::{RecordRef, Value};

#[derive(Debug)]
pub struct Record {
    type_name: String,
    rod_id: u64,
    fields: IndexMap<String, Value>,
    has_one: IndexMap<String, Option<RecordRef>>,
    has_many: IndexMap<String, CollectionProxy>,
}

impl Record {
    pub(crate) fn new(
        type_name: String,
        rod_id: u64,
        fields: IndexMap<String, Value>,
        has_one: IndexMap<String, Option<RecordRef>>,
        has_many: IndexMap<String, CollectionProxy>,
    ) -> Self {
        Self {
            type_name,
            rod_id,
            fields,
            has_one,
            has_many,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn rod_id(&self) -> u64 {
        self.rod_id
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.fields.get(name) {
            Some(Value::Int(v)) => Ok(*v),
            Some(other) => bail!(
                "field '{}.{}' is {:?}, not an integer",
                self.type_name,
                name,
                other.kind()
            ),
            None => bail!("type '{}' has no field '{}'", self.type_name, name),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.fields.get(name) {
            Some(Value::Float(v)) => Ok(*v),
            Some(other) => bail!(
                "field '{}.{}' is {:?}, not a float",
                self.type_name,
                name,
                other.kind()
            ),
            None => bail!("type '{}' has no field '{}'", self.type_name, name),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.fields.get(name) {
            Some(Value::Bool(v)) => Ok(*v),
            Some(other) => bail!(
                "field '{}.{}' is {:?}, not a bool",
                self.type_name,
                name,
                other.kind()
            ),
            None => bail!("type '{}' has no field '{}'", self.type_name, name),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        match self.fields.get(name) {
            Some(Value::Str(v)) => Ok(v),
            Some(other) => bail!(
                "field '{}.{}' is {:?}, not a string",
                self.type_name,
                name,
                other.kind()
            ),
            None => bail!("type '{}' has no field '{}'", self.type_name, name),
        }
    }

    /// Singular association target, `None` when null.
    pub fn reference(&self, name: &str) -> Result<Option<&RecordRef>> {
        match self.has_one.get(name) {
            Some(target) => Ok(target.as_ref()),
            None => bail!(
                "type '{}' has no singular association '{}'",
                self.type_name,
                name
            ),
        }
    }

    /// Plural association view.
    pub fn collection(&self, name: &str) -> Result<&CollectionProxy> {
        match self.has_many.get(name) {
            Some(proxy) => Ok(proxy),
            None => bail!(
                "type '{}' has no plural association '{}'",
                self.type_name,
                name
            ),
        }
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut CollectionProxy> {
        match self.has_many.get_mut(name) {
            Some(proxy) => Ok(proxy),
            None => bail!(
                "type '{}' has no plural association '{}'",
                self.type_name,
                name
            ),
        }
    }
}
