//! # Database Lifecycle
//!
//! Create, open and close. The rules, in short:
//!
//! - **create** starts from a clean slate: stale data and index files of
//!   every registered type are purged, fresh areas are created and a
//!   metadata skeleton is written immediately.
//! - **open** loads the metadata, applies the version gate, verifies (or
//!   generates) the schema, seeds counts and tails from metadata and maps
//!   every file. Page alignment and capacity violations surface as
//!   `CorruptLayout`.
//! - **close** is where durability happens: dangling references are
//!   rejected, dirty index entries drain into the join area, and the
//!   metadata is rewritten with fresh counts and an `updated_at` stamp.
//!   Nothing before close finalizes state, which is what makes crashed
//!   sessions reopen at their last committed point.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use eyre::{Result, WrapErr};
use hashbrown::HashSet;
use indexmap::IndexMap;
use tracing::debug;

use crate::config::{
    DATA_FILE_EXTENSION, JOIN_FILE_NAME, LEGACY_NAMESPACE, METADATA_FILE_NAME, NEW_DATA_SUFFIX,
    POLY_JOIN_FILE_NAME, STRING_HEAP_FILE_NAME,
};
use crate::database::{CloseOptions, Database, OpenOptions, OpenState, TypeRuntime};
use crate::error::StoreError;
use crate::index::{remove_index_files, PropertyIndex};
use crate::metadata::{check_type, def_from_meta, type_meta_from_def, Metadata, VERSION};
use crate::record::RecordStore;
use crate::schema::{namespaced, split_namespace, TypeDef};
use crate::storage::{JoinArea, PolymorphicJoinArea, StringHeap};

pub(crate) fn data_file_path(db_path: &Path, struct_name: &str) -> PathBuf {
    db_path.join(format!("{}.{}", struct_name, DATA_FILE_EXTENSION))
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.exists() {
        debug!(path = %path.display(), "removing stale file");
        fs::remove_file(path)
            .wrap_err_with(|| format!("failed to remove '{}'", path.display()))?;
    }
    Ok(())
}

impl Database {
    /// Creates a fresh database at `path`, purging any prior files of the
    /// registered types, and leaves it open read-write.
    pub fn create<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.state.is_some() {
            return Err(StoreError::AlreadyOpen.into());
        }

        let path = path.as_ref().to_path_buf();
        self.registry.resolve()?;

        fs::create_dir_all(&path)
            .wrap_err_with(|| format!("failed to create database directory '{}'", path.display()))?;

        remove_if_present(&path.join(METADATA_FILE_NAME))?;
        remove_if_present(&path.join(STRING_HEAP_FILE_NAME))?;
        remove_if_present(&path.join(JOIN_FILE_NAME))?;
        remove_if_present(&path.join(POLY_JOIN_FILE_NAME))?;

        for (_, def) in self.registry.iter() {
            remove_if_present(&data_file_path(&path, def.struct_name()))?;
            for field in def.indexed_fields() {
                remove_index_files(&path, def.struct_name(), field.name())?;
            }
        }

        let heap = StringHeap::create(path.join(STRING_HEAP_FILE_NAME))?;
        let join = JoinArea::create(path.join(JOIN_FILE_NAME))?;
        let poly_join = PolymorphicJoinArea::create(path.join(POLY_JOIN_FILE_NAME))?;

        let mut types = IndexMap::new();
        for (name, def) in self.registry.iter() {
            let layout = self
                .registry
                .layout(name)
                .cloned()
                .ok_or_else(|| eyre::eyre!("no layout for type '{}'", name))?;
            let store = RecordStore::create(
                data_file_path(&path, def.struct_name()),
                name,
                &layout,
            )?;
            let indices = build_indices(&path, def);

            types.insert(
                name.to_string(),
                TypeRuntime {
                    def: def.clone(),
                    layout,
                    store,
                    indices,
                },
            );
        }

        let mut metadata = Metadata::skeleton(Utc::now());
        for (name, rt) in &types {
            metadata
                .types
                .insert(name.clone(), type_meta_from_def(&rt.def, 0));
        }
        metadata.save(&path.join(METADATA_FILE_NAME))?;

        debug!(path = %path.display(), types = types.len(), "created database");

        self.state = Some(OpenState {
            path,
            readonly: false,
            metadata,
            heap,
            join,
            poly_join,
            types,
            pending: HashSet::new(),
        });

        Ok(())
    }

    /// Opens an existing database read-write with default options.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.open_with(path, OpenOptions::new())
    }

    pub fn open_with<P: AsRef<Path>>(&mut self, path: P, options: OpenOptions) -> Result<()> {
        if self.state.is_some() {
            return Err(StoreError::AlreadyOpen.into());
        }

        let path = path.as_ref().to_path_buf();
        let metadata = Metadata::load(&path.join(METADATA_FILE_NAME))?;
        metadata.check_version()?;

        // Synthesize types from metadata when generating or migrating, in
        // superclass order so parents resolve before children.
        let synth_namespace = if options.migrating {
            Some(LEGACY_NAMESPACE.to_string())
        } else {
            options.generate.clone()
        };
        if let Some(ns) = &synth_namespace {
            for name in meta_topo_order(&metadata)? {
                let def = def_from_meta(&name, &metadata.types[&name], Some(ns.as_str()));
                if !self.registry.contains(def.name()) {
                    self.registry.register(def)?;
                }
            }
        }

        self.registry.resolve()?;

        // Every stored type must have a runtime counterpart, and unless the
        // counterpart was generated or is being migrated, it must match.
        for (name, tmeta) in &metadata.types {
            let runtime_name = match &synth_namespace {
                Some(ns) => namespaced(ns, name),
                None => name.clone(),
            };
            let def = self.registry.get(&runtime_name).ok_or_else(|| {
                StoreError::IncompatibleSchema {
                    type_name: name.clone(),
                    detail: "type present in metadata but not registered".to_string(),
                }
            })?;
            if synth_namespace.is_none() {
                check_type(name, def, tmeta)?;
            }
        }

        if options.generate.is_none() && !options.migrating {
            for name in self.registry.names() {
                if !metadata.types.contains_key(name) {
                    return Err(StoreError::IncompatibleSchema {
                        type_name: name.to_string(),
                        detail: "type registered but absent from metadata".to_string(),
                    }
                    .into());
                }
            }
        }

        let heap = StringHeap::open(
            path.join(STRING_HEAP_FILE_NAME),
            options.readonly,
            metadata.string_heap.count,
        )?;
        let join = JoinArea::open(path.join(JOIN_FILE_NAME), options.readonly, metadata.join.count)?;
        let poly_join = PolymorphicJoinArea::open(
            path.join(POLY_JOIN_FILE_NAME),
            options.readonly,
            metadata.poly_join.count,
        )?;

        let mut types = IndexMap::new();
        for (name, def) in self.registry.iter() {
            let layout = self
                .registry
                .layout(name)
                .cloned()
                .ok_or_else(|| eyre::eyre!("no layout for type '{}'", name))?;

            let is_legacy = options.migrating
                && split_namespace(name).0 == Some(LEGACY_NAMESPACE);
            let plain = split_namespace(name).1;
            let count = metadata.types.get(plain).map(|m| m.count).unwrap_or(0);

            let (store, indices) = if options.migrating && !is_legacy {
                // Current types write into a fresh shadow file until the
                // post-migration swap.
                let new_path = data_file_path(&path, def.struct_name())
                    .with_extension(format!("{}.{}", DATA_FILE_EXTENSION, NEW_DATA_SUFFIX));
                let store = RecordStore::create(new_path, name, &layout)?;
                (store, build_indices(&path, def))
            } else {
                let store = RecordStore::open(
                    data_file_path(&path, def.struct_name()),
                    name,
                    &layout,
                    options.readonly,
                    count,
                )?;
                let indices = if is_legacy {
                    IndexMap::new()
                } else {
                    build_indices(&path, def)
                };
                (store, indices)
            };

            types.insert(
                name.to_string(),
                TypeRuntime {
                    def: def.clone(),
                    layout,
                    store,
                    indices,
                },
            );
        }

        debug!(
            path = %path.display(),
            readonly = options.readonly,
            migrating = options.migrating,
            "opened database"
        );

        self.state = Some(OpenState {
            path,
            readonly: options.readonly,
            metadata,
            heap,
            join,
            poly_join,
            types,
            pending: HashSet::new(),
        });

        Ok(())
    }

    /// Closes with default options: indices flushed, registry kept.
    pub fn close(&mut self) -> Result<()> {
        self.close_with(CloseOptions::new())
    }

    pub fn close_with(&mut self, options: CloseOptions) -> Result<()> {
        let st = self.state.as_mut().ok_or(StoreError::NotOpen)?;

        if !st.readonly {
            if !st.pending.is_empty() {
                return Err(StoreError::DanglingReferences {
                    count: st.pending.len(),
                }
                .into());
            }

            if !options.skip_indices {
                for rt in st.types.values_mut() {
                    for index in rt.indices.values_mut() {
                        index.write(&mut st.join)?;
                        index.save()?;
                    }
                }
            }

            st.metadata.engine.version = VERSION.to_string();
            st.metadata.engine.updated_at = Utc::now();
            st.metadata.string_heap.count = st.heap.used();
            st.metadata.join.count = st.join.used();
            st.metadata.poly_join.count = st.poly_join.used();

            let mut type_metas = IndexMap::new();
            for (name, rt) in &st.types {
                let plain = split_namespace(name).1.to_string();
                type_metas.insert(plain, type_meta_from_def(&rt.def, rt.store.count()));
            }
            st.metadata.types = type_metas;

            st.metadata.save(&st.path.join(METADATA_FILE_NAME))?;

            st.heap.sync()?;
            st.join.sync()?;
            st.poly_join.sync()?;
            for rt in st.types.values() {
                rt.store.sync()?;
            }
        }

        debug!(path = %st.path.display(), "closed database");

        self.state = None;
        if options.purge_registry {
            self.registry.purge();
        }

        Ok(())
    }
}

fn build_indices(db_path: &Path, def: &TypeDef) -> IndexMap<String, PropertyIndex> {
    def.indexed_fields()
        .map(|field| {
            let kind = field.index().expect("indexed_fields yields indexed only");
            (
                field.name().to_string(),
                PropertyIndex::new(kind, db_path, def.struct_name(), field.name()),
            )
        })
        .collect()
}

/// Metadata type names in superclass-topological order, roots first.
fn meta_topo_order(metadata: &Metadata) -> Result<Vec<String>> {
    let mut sorted = Vec::with_capacity(metadata.types.len());
    let mut placed: HashSet<&str> = HashSet::new();

    let mut remaining: Vec<&str> = metadata.types.keys().map(String::as_str).collect();
    while !remaining.is_empty() {
        let before = remaining.len();
        remaining.retain(|name| {
            let meta = &metadata.types[*name];
            let ready = match meta.superclass.as_deref() {
                None => true,
                // Superclasses outside the stored set cannot gate ordering.
                Some(parent) => {
                    placed.contains(parent) || !metadata.types.contains_key(parent)
                }
            };
            if ready {
                placed.insert(name);
                sorted.push(name.to_string());
            }
            !ready
        });
        if remaining.len() == before {
            eyre::bail!("superclass cycle in metadata: {}", remaining.join(", "));
        }
    }

    Ok(sorted)
}
