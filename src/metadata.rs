//! # Metadata Sidecar
//!
//! `database.yml` captures everything the engine needs to reopen a
//! database: the engine version, creation/update timestamps, the byte/
//! element tails of the shared areas, and one entry per type with its
//! schema and committed record count.
//!
//! ```yaml
//! Rod:
//!   version: 0.8.2
//!   created_at: 2026-08-02T10:00:00Z
//!   updated_at: 2026-08-02T10:05:00Z
//! _string_element:
//!   count: 1234
//! _join_element:
//!   count: 17
//! _polymorphic_join_element:
//!   count: 3
//! Fred:
//!   superclass: null
//!   count: 3
//!   fields:
//!     age: {type: integer}
//!     sex: {type: string, index: flat}
//!   has_one: {}
//!   has_many: {}
//!   indexed_properties: [sex]
//! ```
//!
//! Metadata is written only at close. A crashed session therefore reopens
//! with the last committed counts; bytes past the recorded tails are slack.
//!
//! ## Version Compatibility
//!
//! Versions are `MAJOR.MINOR.PATCH`. File and runtime must agree on MAJOR
//! and MINOR. An even MINOR marks a stable line: the file's PATCH may be
//! older than or equal to the runtime's. An odd MINOR marks a development
//! line: PATCH must match exactly.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::{namespaced, struct_name_of, IndexKind, TypeDef};

/// Engine version stamped into every metadata file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMeta {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementMeta {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    #[serde(rename = "type")]
    pub kind: crate::schema::FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationMeta {
    pub target: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub polymorphic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMeta {
    pub superclass: Option<String>,
    pub count: u64,
    pub fields: IndexMap<String, FieldMeta>,
    pub has_one: IndexMap<String, AssociationMeta>,
    pub has_many: IndexMap<String, AssociationMeta>,
    pub indexed_properties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "Rod")]
    pub engine: EngineMeta,
    #[serde(rename = "_string_element", default)]
    pub string_heap: ElementMeta,
    #[serde(rename = "_join_element", default)]
    pub join: ElementMeta,
    #[serde(rename = "_polymorphic_join_element", default)]
    pub poly_join: ElementMeta,
    #[serde(flatten)]
    pub types: IndexMap<String, TypeMeta>,
}

impl Metadata {
    /// A fresh skeleton for a just-created database.
    pub fn skeleton(now: DateTime<Utc>) -> Self {
        Self {
            engine: EngineMeta {
                version: VERSION.to_string(),
                created_at: now,
                updated_at: now,
            },
            string_heap: ElementMeta::default(),
            join: ElementMeta::default(),
            poly_join: ElementMeta::default(),
            types: IndexMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .wrap_err_with(|| format!("failed to read metadata '{}'", path.display()))?;
        serde_yaml::from_slice(&bytes)
            .wrap_err_with(|| format!("failed to parse metadata '{}'", path.display()))
    }

    /// Atomic save: temp file then rename, so a crash mid-write leaves the
    /// previous metadata intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).wrap_err("failed to serialize metadata")?;

        let tmp = path.with_extension("yml.tmp");
        fs::write(&tmp, yaml.as_bytes())
            .wrap_err_with(|| format!("failed to write metadata temp file '{}'", tmp.display()))?;
        fs::rename(&tmp, path)
            .wrap_err_with(|| format!("failed to move metadata into place '{}'", path.display()))?;

        Ok(())
    }

    /// Applies the version gate against the runtime version.
    pub fn check_version(&self) -> Result<()> {
        check_version_pair(&self.engine.version, VERSION)
    }
}

pub(crate) fn parse_version(v: &str) -> Result<(u64, u64, u64)> {
    let mut parts = v.split('.');
    let parse = |part: Option<&str>| -> Result<u64> {
        part.ok_or_else(|| eyre::eyre!("malformed version '{}'", v))?
            .parse::<u64>()
            .wrap_err_with(|| format!("malformed version '{}'", v))
    };
    let major = parse(parts.next())?;
    let minor = parse(parts.next())?;
    let patch = parse(parts.next())?;
    eyre::ensure!(parts.next().is_none(), "malformed version '{}'", v);
    Ok((major, minor, patch))
}

pub(crate) fn check_version_pair(file: &str, runtime: &str) -> Result<()> {
    let (f_major, f_minor, f_patch) = parse_version(file)?;
    let (r_major, r_minor, r_patch) = parse_version(runtime)?;

    let compatible = f_major == r_major
        && f_minor == r_minor
        && if f_minor % 2 == 0 {
            f_patch <= r_patch
        } else {
            f_patch == r_patch
        };

    if !compatible {
        return Err(StoreError::IncompatibleVersion {
            file: file.to_string(),
            runtime: runtime.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Captures a type definition (plus its committed count) into metadata
/// form. Association targets and superclasses are recorded un-namespaced.
pub fn type_meta_from_def(def: &TypeDef, count: u64) -> TypeMeta {
    let fields = def
        .fields()
        .iter()
        .map(|f| {
            (
                f.name().to_string(),
                FieldMeta {
                    kind: f.kind(),
                    index: f.index(),
                },
            )
        })
        .collect();

    let strip = |name: &str| crate::schema::split_namespace(name).1.to_string();

    let has_one = def
        .has_one()
        .iter()
        .map(|a| {
            (
                a.name().to_string(),
                AssociationMeta {
                    target: strip(a.target()),
                    polymorphic: a.is_polymorphic(),
                },
            )
        })
        .collect();

    let has_many = def
        .has_many()
        .iter()
        .map(|a| {
            (
                a.name().to_string(),
                AssociationMeta {
                    target: strip(a.target()),
                    polymorphic: a.is_polymorphic(),
                },
            )
        })
        .collect();

    TypeMeta {
        superclass: def.superclass().map(strip),
        count,
        fields,
        has_one,
        has_many,
        indexed_properties: def
            .indexed_fields()
            .map(|f| f.name().to_string())
            .collect(),
    }
}

/// Synthesizes a type definition from stored metadata, optionally under a
/// namespace. Cross-type references (targets, superclass) are remapped
/// into the same namespace; struct names stay those of the plain type so
/// generated types address the original files.
pub fn def_from_meta(name: &str, meta: &TypeMeta, namespace: Option<&str>) -> TypeDef {
    let full = match namespace {
        Some(ns) => namespaced(ns, name),
        None => name.to_string(),
    };

    let remap = |target: &str| match namespace {
        Some(ns) => namespaced(ns, target),
        None => target.to_string(),
    };

    let mut def = TypeDef::new(full);
    debug_assert_eq!(def.struct_name(), struct_name_of(name));

    if let Some(superclass) = &meta.superclass {
        def = def.with_superclass(remap(superclass));
    }

    for (field_name, field) in &meta.fields {
        def = match field.index {
            Some(kind) => def.with_indexed_field(field_name, field.kind, kind),
            None => def.with_field(field_name, field.kind),
        };
    }

    for (assoc_name, assoc) in &meta.has_one {
        def = if assoc.polymorphic {
            def.with_polymorphic_has_one(assoc_name, remap(&assoc.target))
        } else {
            def.with_has_one(assoc_name, remap(&assoc.target))
        };
    }

    for (assoc_name, assoc) in &meta.has_many {
        def = if assoc.polymorphic {
            def.with_polymorphic_has_many(assoc_name, remap(&assoc.target))
        } else {
            def.with_has_many(assoc_name, remap(&assoc.target))
        };
    }

    def
}

/// Compares a runtime definition against the stored schema. Any divergence
/// in fields, associations, indexed properties or superclass is an
/// [`StoreError::IncompatibleSchema`].
pub fn check_type(name: &str, def: &TypeDef, meta: &TypeMeta) -> Result<()> {
    let stored = type_meta_from_def(def, meta.count);

    let mismatch = |detail: String| -> eyre::Report {
        StoreError::IncompatibleSchema {
            type_name: name.to_string(),
            detail,
        }
        .into()
    };

    if stored.superclass != meta.superclass {
        return Err(mismatch(format!(
            "superclass differs: runtime {:?}, file {:?}",
            stored.superclass, meta.superclass
        )));
    }

    if !same_entries(&stored.fields, &meta.fields) {
        return Err(mismatch(format!(
            "fields differ: runtime {:?}, file {:?}",
            stored.fields.keys().collect::<Vec<_>>(),
            meta.fields.keys().collect::<Vec<_>>()
        )));
    }

    if !same_entries(&stored.has_one, &meta.has_one) {
        return Err(mismatch("singular associations differ".to_string()));
    }

    if !same_entries(&stored.has_many, &meta.has_many) {
        return Err(mismatch("plural associations differ".to_string()));
    }

    if stored.indexed_properties != meta.indexed_properties {
        return Err(mismatch(format!(
            "indexed properties differ: runtime {:?}, file {:?}",
            stored.indexed_properties, meta.indexed_properties
        )));
    }

    Ok(())
}

/// Order-sensitive map comparison; declaration order is part of the layout.
fn same_entries<V: PartialEq>(a: &IndexMap<String, V>, b: &IndexMap<String, V>) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
