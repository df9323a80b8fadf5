//! # Schema Module
//!
//! Type definitions and their resolution into on-disk layouts.
//!
//! A [`TypeDef`] describes one record type: ordered scalar fields, ordered
//! singular (`has_one`) and plural (`has_many`) associations, an optional
//! superclass name, and per-field index selections. Types are declared into
//! a [`Registry`] and resolved in two phases: first every type is declared,
//! then `resolve` links association targets. Cycles between types are legal
//! (`User.friends` may target `User`).
//!
//! ## Struct Names and Class Tags
//!
//! Every type has a stable `struct_name`, the snake_case on-disk tag derived
//! from its name. Data files are named after it, and the 64-bit `class_tag`
//! stored in polymorphic join elements is the xxh3 hash of it. Tag
//! collisions between distinct struct names are detected at resolve time
//! and rejected.
//!
//! ## Namespaces
//!
//! Generated types (metadata-driven, used by migration) live under a
//! namespace: their registry name is `<ns>.<name>` while their struct name
//! stays that of the plain name, so they address the same files.

mod layout;

pub use layout::{FieldSlot, RecordLayout};

use std::str::FromStr;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    String,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Flat,
    Segmented,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Segmented => "segmented",
        }
    }
}

impl FromStr for IndexKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat" => Ok(IndexKind::Flat),
            "segmented" => Ok(IndexKind::Segmented),
            other => Err(StoreError::InvalidIndexKind(other.to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    index: Option<IndexKind>,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn index(&self) -> Option<IndexKind> {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDef {
    name: String,
    target: String,
    polymorphic: bool,
}

impl AssociationDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    name: String,
    struct_name: String,
    superclass: Option<String>,
    fields: Vec<FieldDef>,
    has_one: Vec<AssociationDef>,
    has_many: Vec<AssociationDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let struct_name = struct_name_of(&name);
        Self {
            name,
            struct_name,
            superclass: None,
            fields: Vec::new(),
            has_one: Vec::new(),
            has_many: Vec::new(),
        }
    }

    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            index: None,
        });
        self
    }

    pub fn with_indexed_field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        index: IndexKind,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
            index: Some(index),
        });
        self
    }

    pub fn with_has_one(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.has_one.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            polymorphic: false,
        });
        self
    }

    pub fn with_polymorphic_has_one(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.has_one.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            polymorphic: true,
        });
        self
    }

    pub fn with_has_many(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.has_many.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            polymorphic: false,
        });
        self
    }

    pub fn with_polymorphic_has_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.has_many.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            polymorphic: true,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn struct_name(&self) -> &str {
        &self.struct_name
    }

    pub fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn has_one(&self) -> &[AssociationDef] {
        &self.has_one
    }

    pub fn has_many(&self) -> &[AssociationDef] {
        &self.has_many
    }

    pub fn field(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.fields.iter().filter(|f| f.index.is_some())
    }

    pub fn class_tag(&self) -> u64 {
        class_tag_of(&self.struct_name)
    }
}

/// Derives the stable on-disk tag for a type name: snake_case of the name
/// with any namespace prefix stripped.
pub fn struct_name_of(type_name: &str) -> String {
    let plain = split_namespace(type_name).1;

    let mut out = String::with_capacity(plain.len() + 4);
    for (i, c) in plain.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Stable 64-bit class tag of a struct name, stored in polymorphic join
/// elements.
pub fn class_tag_of(struct_name: &str) -> u64 {
    xxh3_64(struct_name.as_bytes())
}

pub fn namespaced(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

/// Splits `"ns.Name"` into `(Some("ns"), "Name")`; plain names have no
/// namespace part.
pub fn split_namespace(full: &str) -> (Option<&str>, &str) {
    match full.rsplit_once('.') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, full),
    }
}

/// Collection-of-types registry. Declaration and linkage are separate
/// phases so that cyclic association graphs resolve cleanly.
#[derive(Debug, Default)]
pub struct Registry {
    types: IndexMap<String, TypeDef>,
    tags: HashMap<u64, String>,
    layouts: HashMap<String, RecordLayout>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: TypeDef) -> Result<()> {
        ensure!(
            !self.types.contains_key(def.name()),
            "type '{}' is already registered",
            def.name()
        );
        self.types.insert(def.name().to_string(), def);
        Ok(())
    }

    /// Links association targets and superclasses, verifies class tag
    /// uniqueness and computes layouts. Idempotent.
    pub fn resolve(&mut self) -> Result<()> {
        for def in self.types.values() {
            for assoc in def.has_one().iter().chain(def.has_many().iter()) {
                ensure!(
                    self.types.contains_key(assoc.target()),
                    "association '{}.{}' targets unknown type '{}'",
                    def.name(),
                    assoc.name(),
                    assoc.target()
                );
            }
            if let Some(superclass) = def.superclass() {
                ensure!(
                    self.types.contains_key(superclass),
                    "type '{}' names unknown superclass '{}'",
                    def.name(),
                    superclass
                );
            }
        }

        self.tags.clear();
        for def in self.types.values() {
            let tag = def.class_tag();
            if let Some(existing) = self.tags.get(&tag) {
                // The same struct name may appear under several namespaces.
                ensure!(
                    existing == def.struct_name(),
                    "class tag collision between '{}' and '{}'",
                    existing,
                    def.struct_name()
                );
            } else {
                self.tags.insert(tag, def.struct_name().to_string());
            }
        }

        self.layouts.clear();
        for (name, def) in &self.types {
            self.layouts.insert(name.clone(), RecordLayout::new(def)?);
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn layout(&self, name: &str) -> Option<&RecordLayout> {
        self.layouts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeDef)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn remove(&mut self, name: &str) -> Option<TypeDef> {
        self.layouts.remove(name);
        self.types.shift_remove(name)
    }

    pub fn purge(&mut self) {
        self.types.clear();
        self.tags.clear();
        self.layouts.clear();
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolves a class tag back to the struct name it was hashed from.
    pub fn struct_name_by_tag(&self, tag: u64) -> Option<&str> {
        self.tags.get(&tag).map(String::as_str)
    }

    /// Registry names in superclass-topological order, roots first.
    /// Declaration order is preserved among unrelated types.
    pub fn topo_sorted(&self) -> Result<Vec<String>> {
        let mut sorted = Vec::with_capacity(self.types.len());
        let mut placed: HashMap<&str, ()> = HashMap::new();

        // Repeatedly emit types whose superclass is already placed.
        let mut remaining: Vec<&str> = self.types.keys().map(String::as_str).collect();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|name| {
                let def = &self.types[*name];
                let ready = match def.superclass() {
                    None => true,
                    Some(parent) => placed.contains_key(parent),
                };
                if ready {
                    placed.insert(name, ());
                    sorted.push(name.to_string());
                }
                !ready
            });
            if remaining.len() == before {
                bail!("superclass cycle among types: {}", remaining.join(", "));
            }
        }

        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_name_is_snake_case() {
        assert_eq!(struct_name_of("Fred"), "fred");
        assert_eq!(struct_name_of("UserFile"), "user_file");
        assert_eq!(struct_name_of("HTTPRequest"), "h_t_t_p_request");
        assert_eq!(struct_name_of("legacy.UserFile"), "user_file");
    }

    #[test]
    fn class_tag_is_stable() {
        assert_eq!(class_tag_of("user_file"), class_tag_of("user_file"));
        assert_ne!(class_tag_of("user_file"), class_tag_of("user"));
    }

    #[test]
    fn index_kind_parses_known_names_only() {
        assert_eq!("flat".parse::<IndexKind>().unwrap(), IndexKind::Flat);
        assert_eq!(
            "segmented".parse::<IndexKind>().unwrap(),
            IndexKind::Segmented
        );

        let err = "btree".parse::<IndexKind>().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidIndexKind(_))
        ));
    }

    #[test]
    fn resolve_rejects_unknown_targets() {
        let mut registry = Registry::new();
        registry
            .register(TypeDef::new("User").with_has_many("files", "UserFile"))
            .unwrap();

        assert!(registry.resolve().is_err());
    }

    #[test]
    fn resolve_accepts_cycles() {
        let mut registry = Registry::new();
        registry
            .register(TypeDef::new("User").with_has_many("friends", "User"))
            .unwrap();

        registry.resolve().unwrap();
    }

    #[test]
    fn topo_sort_puts_roots_first() {
        let mut registry = Registry::new();
        registry
            .register(TypeDef::new("Admin").with_superclass("User"))
            .unwrap();
        registry.register(TypeDef::new("User")).unwrap();
        registry
            .register(TypeDef::new("Root").with_superclass("Admin"))
            .unwrap();
        registry.resolve().unwrap();

        let sorted = registry.topo_sorted().unwrap();
        let user = sorted.iter().position(|n| n == "User").unwrap();
        let admin = sorted.iter().position(|n| n == "Admin").unwrap();
        let root = sorted.iter().position(|n| n == "Root").unwrap();

        assert!(user < admin);
        assert!(admin < root);
    }

    #[test]
    fn topo_sort_detects_cycles() {
        let mut registry = Registry::new();
        registry
            .register(TypeDef::new("A").with_superclass("B"))
            .unwrap();
        registry
            .register(TypeDef::new("B").with_superclass("A"))
            .unwrap();

        assert!(registry.topo_sorted().is_err());
    }

    #[test]
    fn namespaced_types_share_struct_names() {
        let plain = TypeDef::new("UserFile");
        let generated = TypeDef::new("legacy.UserFile");

        assert_eq!(plain.struct_name(), generated.struct_name());
        assert_eq!(plain.class_tag(), generated.class_tag());
    }
}
