//! # Database Controller
//!
//! The controller owns everything: the type registry, the per-type record
//! stores and indices, the string heap, the join areas and the metadata.
//! It is an explicit value threaded through calls rather than a process
//! global; one controller corresponds to at most one open database
//! directory at a time.
//!
//! ## Lifecycle
//!
//! ```text
//! let mut db = Database::new();
//! db.register(...)?;          // declare types
//! db.create("./p")?;          // or db.open("./p")? / db.open_with(..)
//! db.store(..)?; db.fetch(..)?; db.find_by(..)?;
//! db.close()?;                // flush indices, finalize metadata
//! ```
//!
//! Create/open reject an already-open controller with `AlreadyOpen`; every
//! data operation on a closed controller fails with `NotOpen`; every
//! mutation on a readonly open fails with `Readonly`.
//!
//! ## Module Organization
//!
//! - `lifecycle`: create, open, close
//! - `ops`: store, fetch, reserve, queries, index rebuild
//! - `migration`: schema migration driver with two-phase file swap

mod lifecycle;
mod migration;
mod ops;

use std::path::{Path, PathBuf};

use eyre::Result;
use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::error::StoreError;
use crate::index::PropertyIndex;
use crate::metadata::Metadata;
use crate::record::RecordStore;
use crate::schema::{split_namespace, RecordLayout, Registry, TypeDef};
use crate::storage::{JoinArea, PolymorphicJoinArea, StringHeap};

/// Options accepted by [`Database::open_with`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub(crate) readonly: bool,
    pub(crate) generate: Option<String>,
    pub(crate) migrating: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map files read-only; every mutating operation will fail with
    /// `Readonly`.
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Synthesize type definitions from the stored metadata under the given
    /// namespace instead of requiring pre-registered types.
    pub fn generate(mut self, namespace: impl Into<String>) -> Self {
        self.generate = Some(namespace.into());
        self
    }

    pub(crate) fn migrating() -> Self {
        Self {
            readonly: false,
            generate: None,
            migrating: true,
        }
    }
}

/// Options accepted by [`Database::close_with`].
#[derive(Debug, Clone, Default)]
pub struct CloseOptions {
    pub(crate) skip_indices: bool,
    pub(crate) purge_registry: bool,
}

impl CloseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip draining and saving indices. Lookups against properties whose
    /// appends were skipped will be stale until an index rebuild.
    pub fn skip_indices(mut self, skip: bool) -> Self {
        self.skip_indices = skip;
        self
    }

    /// Drop all registered types after closing.
    pub fn purge_registry(mut self, purge: bool) -> Self {
        self.purge_registry = purge;
        self
    }
}

pub(crate) struct TypeRuntime {
    pub def: TypeDef,
    pub layout: RecordLayout,
    pub store: RecordStore,
    pub indices: IndexMap<String, PropertyIndex>,
}

pub(crate) struct OpenState {
    pub path: PathBuf,
    pub readonly: bool,
    pub metadata: Metadata,
    pub heap: StringHeap,
    pub join: JoinArea,
    pub poly_join: PolymorphicJoinArea,
    pub types: IndexMap<String, TypeRuntime>,
    /// Reserved ids whose records were never stored.
    pub pending: HashSet<(String, u64)>,
}

#[derive(Default)]
pub struct Database {
    pub(crate) registry: Registry,
    pub(crate) state: Option<OpenState>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a type. Types may be registered in any order; association
    /// targets are linked when the database is created or opened.
    pub fn register(&mut self, def: TypeDef) -> Result<()> {
        self.registry.register(def)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_readonly(&self) -> bool {
        self.state.as_ref().is_some_and(|st| st.readonly)
    }

    pub fn path(&self) -> Option<&Path> {
        self.state.as_ref().map(|st| st.path.as_path())
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    pub(crate) fn state(&self) -> Result<&OpenState> {
        self.state.as_ref().ok_or_else(|| StoreError::NotOpen.into())
    }

    pub(crate) fn state_mut(&mut self) -> Result<&mut OpenState> {
        self.state.as_mut().ok_or_else(|| StoreError::NotOpen.into())
    }

    /// Number of committed records of a type.
    pub fn count(&self, type_name: &str) -> Result<u64> {
        let st = self.state()?;
        let rt = st
            .types
            .get(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;
        Ok(rt.store.count())
    }

    pub(crate) fn join_id(&self, offset: u64, i: u64) -> Result<u64> {
        self.state()?.join.get(offset, i)
    }

    pub(crate) fn poly_join_entry(&self, offset: u64, i: u64) -> Result<(u64, u64)> {
        self.state()?.poly_join.get(offset, i)
    }

    /// Resolves a class tag to a runtime type name, preferring types in the
    /// caller's namespace (polymorphic references inside a generated type
    /// resolve to generated types).
    pub(crate) fn resolve_tag(&self, namespace: Option<&str>, tag: u64) -> Result<String> {
        let struct_name = self.registry.struct_name_by_tag(tag).ok_or_else(|| {
            StoreError::CorruptLayout(format!("unknown class tag {:#018x}", tag))
        })?;

        let st = self.state()?;
        let mut fallback = None;
        for (name, rt) in &st.types {
            if rt.def.struct_name() != struct_name {
                continue;
            }
            if split_namespace(name).0 == namespace {
                return Ok(name.clone());
            }
            fallback.get_or_insert_with(|| name.clone());
        }

        fallback.ok_or_else(|| {
            StoreError::CorruptLayout(format!(
                "class tag {:#018x} names unregistered type '{}'",
                tag, struct_name
            ))
            .into()
        })
    }
}
