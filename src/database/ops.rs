//! # Data Operations
//!
//! Store, fetch and query paths. Encoding and decoding of struct bytes
//! happen here because the controller owns the string heap and join areas
//! the encoded coordinates point into.
//!
//! ## Store
//!
//! `store` encodes the builder into a struct-sized buffer: scalars inline,
//! strings interned into the heap, singular targets as inline ids (0 is
//! null) and plural targets drained into a freshly allocated join range.
//! The record then appends, indexed properties are fed, and the new dense
//! 1-based id returns. `reserve`/`store_reserved` split id assignment from
//! the write so that cyclic object graphs can be stored; ids reserved but
//! never stored block close with `DanglingReferences`.
//!
//! ## Fetch
//!
//! `fetch` decodes the struct back into owned values; plural associations
//! come back as lazy [`CollectionProxy`] views rather than materialized
//! target lists.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;

use crate::collection::CollectionProxy;
use crate::database::{Database, OpenState, TypeRuntime};
use crate::error::StoreError;
use crate::record::{IndexKey, Record, RecordBuilder, RecordRef, Value};
use crate::schema::{split_namespace, AssociationDef, FieldKind};

fn word(bytes: &[u8], offset: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(w)
}

fn put_word(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

/// Per-type facts needed while encoding references: committed count and
/// class tag.
type TypeInfo = HashMap<String, (u64, u64)>;

fn validate_ref(info: &TypeInfo, assoc: &AssociationDef, r: &RecordRef) -> Result<u64> {
    if !assoc.is_polymorphic() {
        ensure!(
            r.type_name == assoc.target(),
            "association '{}' targets '{}', got a '{}' reference",
            assoc.name(),
            assoc.target(),
            r.type_name
        );
    }

    let (count, tag) = info
        .get(&r.type_name)
        .ok_or_else(|| eyre::eyre!("reference to unregistered type '{}'", r.type_name))?;

    if r.rod_id == 0 || r.rod_id > *count {
        return Err(StoreError::OutOfRange {
            type_name: r.type_name.clone(),
            rod_id: r.rod_id,
            count: *count,
        }
        .into());
    }

    Ok(*tag)
}

impl Database {
    /// Stores a record, returning its new id.
    pub fn store(&mut self, type_name: &str, builder: RecordBuilder) -> Result<u64> {
        self.store_impl(type_name, None, &builder)
    }

    /// Assigns the next id of a type without storing anything yet. The id
    /// may be referenced immediately; the database refuses to close until
    /// the matching `store_reserved` happens.
    pub fn reserve(&mut self, type_name: &str) -> Result<u64> {
        let st = self.state_mut()?;
        if st.readonly {
            return Err(StoreError::Readonly.into());
        }

        let rt = st
            .types
            .get_mut(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;
        let rod_id = rt.store.reserve()?;
        st.pending.insert((type_name.to_string(), rod_id));
        Ok(rod_id)
    }

    /// Fills a previously reserved id.
    pub fn store_reserved(
        &mut self,
        type_name: &str,
        rod_id: u64,
        builder: RecordBuilder,
    ) -> Result<()> {
        self.store_impl(type_name, Some(rod_id), &builder)?;
        Ok(())
    }

    fn store_impl(
        &mut self,
        type_name: &str,
        reserved: Option<u64>,
        builder: &RecordBuilder,
    ) -> Result<u64> {
        let st = self.state_mut()?;
        if st.readonly {
            return Err(StoreError::Readonly.into());
        }

        // Reference validation bound: the highest count among runtime types
        // sharing a struct name, so that mid-migration references to records
        // not yet copied forward still validate against the legacy data.
        let mut max_counts: HashMap<&str, u64> = HashMap::new();
        for rt in st.types.values() {
            let entry = max_counts.entry(rt.def.struct_name()).or_insert(0);
            *entry = (*entry).max(rt.store.count());
        }
        let info: TypeInfo = st
            .types
            .iter()
            .map(|(name, rt)| {
                (
                    name.clone(),
                    (max_counts[rt.def.struct_name()], rt.def.class_tag()),
                )
            })
            .collect();
        drop(max_counts);

        let OpenState {
            heap,
            join,
            poly_join,
            types,
            pending,
            ..
        } = st;

        let rt = types
            .get_mut(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;
        let TypeRuntime {
            def,
            layout,
            store,
            indices,
        } = rt;

        let mut buf = vec![0u8; layout.struct_size()];

        for (i, field) in def.fields().iter().enumerate() {
            let slot = layout.field_slot(i);
            let value = builder.field(field.name());

            match (field.kind(), value) {
                (FieldKind::Integer, Some(Value::Int(v))) => put_word(&mut buf, slot.offset, *v as u64),
                (FieldKind::Integer, None) => {}
                (FieldKind::Float, Some(Value::Float(v))) => {
                    put_word(&mut buf, slot.offset, v.to_bits())
                }
                (FieldKind::Float, None) => {}
                (FieldKind::Bool, Some(Value::Bool(v))) => put_word(&mut buf, slot.offset, *v as u64),
                (FieldKind::Bool, None) => {}
                (FieldKind::String, value) => {
                    let s = match value {
                        Some(Value::Str(s)) => s.as_str(),
                        None => "",
                        Some(other) => bail!(
                            "field '{}.{}' expects a string, got {:?}",
                            type_name,
                            field.name(),
                            other.kind()
                        ),
                    };
                    let (offset, len) = heap.intern(s)?;
                    put_word(&mut buf, slot.offset, offset);
                    put_word(&mut buf, slot.offset + 8, len);
                }
                (kind, Some(other)) => bail!(
                    "field '{}.{}' expects {:?}, got {:?}",
                    type_name,
                    field.name(),
                    kind,
                    other.kind()
                ),
            }
        }

        for (i, assoc) in def.has_one().iter().enumerate() {
            let slot = layout.has_one_slot(i);
            let target = builder.has_one(assoc.name()).and_then(Clone::clone);

            if assoc.is_polymorphic() {
                let (id, tag) = match &target {
                    Some(r) => (r.rod_id, validate_ref(&info, assoc, r)?),
                    None => (0, 0),
                };
                put_word(&mut buf, slot.offset, id);
                put_word(&mut buf, slot.offset + 8, tag);
            } else {
                let id = match &target {
                    Some(r) => {
                        validate_ref(&info, assoc, r)?;
                        r.rod_id
                    }
                    None => 0,
                };
                put_word(&mut buf, slot.offset, id);
            }
        }

        for (i, assoc) in def.has_many().iter().enumerate() {
            let slot = layout.has_many_slot(i);
            let targets = builder.has_many(assoc.name()).unwrap_or(&[]);
            let count = targets.len() as u64;

            let offset = if count == 0 {
                0
            } else if assoc.is_polymorphic() {
                let offset = poly_join.allocate(count)?;
                for (j, target) in targets.iter().enumerate() {
                    match target {
                        Some(r) => {
                            let tag = validate_ref(&info, assoc, r)?;
                            poly_join.set(offset, j as u64, r.rod_id, tag)?;
                        }
                        None => poly_join.set(offset, j as u64, 0, 0)?,
                    }
                }
                offset
            } else {
                let offset = join.allocate(count)?;
                for (j, target) in targets.iter().enumerate() {
                    match target {
                        Some(r) => {
                            validate_ref(&info, assoc, r)?;
                            join.set(offset, j as u64, r.rod_id)?;
                        }
                        None => join.set(offset, j as u64, 0)?,
                    }
                }
                offset
            };

            put_word(&mut buf, slot.offset, count);
            put_word(&mut buf, slot.offset + 8, offset);
        }

        let rod_id = match reserved {
            None => store.append(&buf)?,
            Some(rod_id) => {
                ensure!(
                    pending.remove(&(type_name.to_string(), rod_id)),
                    "id {} of type '{}' was not reserved",
                    rod_id,
                    type_name
                );
                store.write_at(rod_id, &buf)?;
                rod_id
            }
        };

        for field in def.fields() {
            if field.index().is_none() {
                continue;
            }
            let key = match builder.field(field.name()) {
                Some(value) => IndexKey::from(value),
                None => IndexKey::from(&Value::default_for(field.kind())),
            };
            if let Some(index) = indices.get_mut(field.name()) {
                index.append(key, rod_id)?;
            }
        }

        Ok(rod_id)
    }

    /// Materializes a record by id.
    pub fn fetch(&self, type_name: &str, rod_id: u64) -> Result<Record> {
        let st = self.state()?;
        let rt = st
            .types
            .get(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;

        let bytes = rt.store.read(rod_id)?;
        let namespace = split_namespace(type_name).0.map(str::to_string);

        let mut fields = indexmap::IndexMap::new();
        for (i, field) in rt.def.fields().iter().enumerate() {
            let slot = rt.layout.field_slot(i);
            let value = match field.kind() {
                FieldKind::Integer => Value::Int(word(bytes, slot.offset) as i64),
                FieldKind::Float => Value::Float(f64::from_bits(word(bytes, slot.offset))),
                FieldKind::Bool => Value::Bool(word(bytes, slot.offset) != 0),
                FieldKind::String => {
                    let offset = word(bytes, slot.offset);
                    let len = word(bytes, slot.offset + 8);
                    Value::Str(st.heap.read(offset, len)?.to_string())
                }
            };
            fields.insert(field.name().to_string(), value);
        }

        let mut has_one = indexmap::IndexMap::new();
        for (i, assoc) in rt.def.has_one().iter().enumerate() {
            let slot = rt.layout.has_one_slot(i);
            let id = word(bytes, slot.offset);
            let target = if id == 0 {
                None
            } else if assoc.is_polymorphic() {
                let tag = word(bytes, slot.offset + 8);
                Some(RecordRef::new(
                    self.resolve_tag(namespace.as_deref(), tag)?,
                    id,
                ))
            } else {
                Some(RecordRef::new(assoc.target(), id))
            };
            has_one.insert(assoc.name().to_string(), target);
        }

        let mut has_many = indexmap::IndexMap::new();
        for (i, assoc) in rt.def.has_many().iter().enumerate() {
            let slot = rt.layout.has_many_slot(i);
            let count = word(bytes, slot.offset);
            let offset = word(bytes, slot.offset + 8);
            let target = if assoc.is_polymorphic() {
                None
            } else {
                Some(assoc.target().to_string())
            };
            has_many.insert(
                assoc.name().to_string(),
                CollectionProxy::from_range(offset, count, target, namespace.clone()),
            );
        }

        Ok(Record::new(
            type_name.to_string(),
            rod_id,
            fields,
            has_one,
            has_many,
        ))
    }

    /// Index lookup: every record of `type_name` whose `field` equals
    /// `value`, in insertion order.
    pub fn find_by(&mut self, type_name: &str, field: &str, value: &Value) -> Result<CollectionProxy> {
        let st = self.state_mut()?;
        let rt = st
            .types
            .get_mut(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;

        let (_, fdef) = rt
            .def
            .field(field)
            .ok_or_else(|| eyre::eyre!("type '{}' has no field '{}'", type_name, field))?;
        ensure!(
            fdef.index().is_some(),
            "field '{}.{}' is not indexed",
            type_name,
            field
        );
        ensure!(
            fdef.kind() == value.kind(),
            "field '{}.{}' is {:?}, queried with {:?}",
            type_name,
            field,
            fdef.kind(),
            value.kind()
        );

        let key = IndexKey::from(value);
        let index = rt
            .indices
            .get_mut(field)
            .ok_or_else(|| eyre::eyre!("no index for '{}.{}'", type_name, field))?;
        index.proxy(&key, type_name)
    }

    /// Rebuilds one property index from the live records, discarding its
    /// current contents. The replacement persists at the next close.
    pub fn rebuild_index(&mut self, type_name: &str, field: &str) -> Result<()> {
        let st = self.state_mut()?;
        if st.readonly {
            return Err(StoreError::Readonly.into());
        }

        let OpenState { heap, types, .. } = st;
        let rt = types
            .get_mut(type_name)
            .ok_or_else(|| eyre::eyre!("unknown type '{}'", type_name))?;
        let TypeRuntime {
            def,
            layout,
            store,
            indices,
        } = rt;

        let (fi, fdef) = def
            .field(field)
            .ok_or_else(|| eyre::eyre!("type '{}' has no field '{}'", type_name, field))?;
        ensure!(
            fdef.index().is_some(),
            "field '{}.{}' is not indexed",
            type_name,
            field
        );
        let index = indices
            .get_mut(field)
            .ok_or_else(|| eyre::eyre!("no index for '{}.{}'", type_name, field))?;

        index.clear()?;

        let slot = layout.field_slot(fi);
        for rod_id in 1..=store.count() {
            let bytes = store.read(rod_id)?;
            let key = match fdef.kind() {
                FieldKind::Integer => IndexKey::Int(word(bytes, slot.offset) as i64),
                FieldKind::Float => IndexKey::Float(word(bytes, slot.offset)),
                FieldKind::Bool => IndexKey::Bool(word(bytes, slot.offset) != 0),
                FieldKind::String => {
                    let offset = word(bytes, slot.offset);
                    let len = word(bytes, slot.offset + 8);
                    IndexKey::Str(heap.read(offset, len)?.to_string())
                }
            };
            index.append(key, rod_id)?;
        }

        Ok(())
    }
}
