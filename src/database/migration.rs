//! # Migration Driver
//!
//! Supervised copy-forward from a stored (legacy) schema to the currently
//! registered one, ending in an atomic-per-type file swap.
//!
//! ## Protocol
//!
//! 1. Open with legacy types generated from the stored metadata under the
//!    `legacy` namespace; current types write into `<struct>.dat.new`
//!    shadow files, so both data sets coexist.
//! 2. For every legacy type with a current counterpart, invoke the
//!    user-supplied hook. The hook reads from the legacy store and writes
//!    into the new one; [`Database::copy_forward`] is the stock hook body.
//! 3. Per type: rename `<struct>.dat` to `<struct>.dat.legacy`, then
//!    `<struct>.dat.new` to `<struct>.dat`. A failure between the renames
//!    leaves a type either all-legacy or all-new, never mixed. Stale index
//!    files of migrated types are removed.
//! 4. Drop the legacy types, close skipping index rewrite, reopen.
//!
//! Indices of migrated types start empty after the swap; rebuild them with
//! [`Database::rebuild_index`] when lookups are needed.

use std::fs;
use std::path::Path;

use eyre::{Result, WrapErr};
use tracing::debug;

use crate::config::{DATA_FILE_EXTENSION, LEGACY_DATA_SUFFIX, LEGACY_NAMESPACE, NEW_DATA_SUFFIX};
use crate::database::lifecycle::data_file_path;
use crate::database::{CloseOptions, Database, OpenOptions};
use crate::index::remove_index_files;
use crate::record::{RecordBuilder, RecordRef};
use crate::schema::split_namespace;

impl Database {
    /// Migrates the database at `path` from its stored schema to the
    /// registered one. The hook receives the legacy and current type names
    /// and is responsible for copying records forward.
    pub fn migrate<P, F>(&mut self, path: P, hook: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: Fn(&mut Database, &str, &str) -> Result<()>,
    {
        let path = path.as_ref();
        self.open_with(path, OpenOptions::migrating())?;

        let st = self.state()?;
        let legacy_names: Vec<String> = st
            .types
            .keys()
            .filter(|name| split_namespace(name).0 == Some(LEGACY_NAMESPACE))
            .cloned()
            .collect();
        let current_names: Vec<String> = st
            .types
            .keys()
            .filter(|name| split_namespace(name).0.is_none())
            .cloned()
            .collect();

        for legacy_name in &legacy_names {
            let plain = split_namespace(legacy_name).1.to_string();
            if current_names.contains(&plain) {
                hook(self, legacy_name, &plain)
                    .wrap_err_with(|| format!("migration hook failed for type '{}'", plain))?;
            }
        }

        // Two-phase swap, one type at a time.
        for name in &current_names {
            let st = self.state()?;
            let struct_name = st.types[name].def.struct_name().to_string();
            let had_legacy = legacy_names.iter().any(|l| split_namespace(l).1 == name);
            let indexed: Vec<String> = st.types[name]
                .def
                .indexed_fields()
                .map(|f| f.name().to_string())
                .collect();

            let current = data_file_path(path, &struct_name);
            let shadow =
                current.with_extension(format!("{}.{}", DATA_FILE_EXTENSION, NEW_DATA_SUFFIX));
            let legacy =
                current.with_extension(format!("{}.{}", DATA_FILE_EXTENSION, LEGACY_DATA_SUFFIX));

            if had_legacy {
                fs::rename(&current, &legacy).wrap_err_with(|| {
                    format!("failed to retire legacy data file '{}'", current.display())
                })?;
            }
            fs::rename(&shadow, &current).wrap_err_with(|| {
                format!("failed to promote migrated data file '{}'", shadow.display())
            })?;
            debug!(path = %current.display(), "swapped migrated data file");

            for field in &indexed {
                remove_index_files(path, &struct_name, field)?;
            }
        }

        for legacy_name in &legacy_names {
            let st = self.state_mut()?;
            st.types.shift_remove(legacy_name);
            self.registry.remove(legacy_name);
        }

        self.close_with(CloseOptions::new().skip_indices(true))?;
        self.open(path)
    }

    /// Stock migration hook body: copies every record of the legacy type
    /// forward, carrying the members both schemas share. Ids are preserved
    /// because both stores assign them densely in the same order.
    pub fn copy_forward(&mut self, legacy_name: &str, new_name: &str) -> Result<()> {
        let new_def = self
            .registry
            .get(new_name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", new_name))?;
        let legacy_def = self
            .registry
            .get(legacy_name)
            .cloned()
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", legacy_name))?;

        let strip = |type_name: &str| split_namespace(type_name).1.to_string();
        let count = self.count(legacy_name)?;

        for rod_id in 1..=count {
            let record = self.fetch(legacy_name, rod_id)?;
            let mut builder = RecordBuilder::new();

            for field in new_def.fields() {
                if let Some(value) = record.value(field.name()) {
                    if value.kind() == field.kind() {
                        builder = builder.set(field.name(), value.clone());
                    }
                }
            }

            for assoc in new_def.has_one() {
                if legacy_def.has_one().iter().all(|a| a.name() != assoc.name()) {
                    continue;
                }
                let target = record.reference(assoc.name())?.map(|r| {
                    RecordRef::new(strip(&r.type_name), r.rod_id)
                });
                builder = builder.set_ref(assoc.name(), target);
            }

            for assoc in new_def.has_many() {
                if legacy_def
                    .has_many()
                    .iter()
                    .all(|a| a.name() != assoc.name())
                {
                    continue;
                }
                let proxy = record.collection(assoc.name())?;
                let targets = proxy
                    .ids(self)?
                    .into_iter()
                    .map(|t| t.map(|r| RecordRef::new(strip(&r.type_name), r.rod_id)))
                    .collect();
                builder = builder.set_refs(assoc.name(), targets);
            }

            let new_id = self.store(new_name, builder)?;
            eyre::ensure!(
                new_id == rod_id,
                "id drift while migrating '{}': {} became {}",
                new_name,
                rod_id,
                new_id
            );
        }

        Ok(())
    }
}
