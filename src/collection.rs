//! # Collection Proxy
//!
//! Lazy view over a plural association or an index result: a join range
//! `(offset, original_size)` plus an in-memory append buffer. Elements
//! resolve on demand through the database, so a proxy of a million ids
//! costs nothing until indexed into.
//!
//! Materialized records are cached weakly: repeated `get(i)` returns the
//! same `Rc<Record>` while some caller still holds it, but the cache never
//! keeps a record alive on its own.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use eyre::{ensure, Result};
use hashbrown::HashMap;

use crate::database::Database;
use crate::record::{Record, RecordRef};

#[derive(Debug)]
pub struct CollectionProxy {
    offset: u64,
    original_size: u64,
    /// Target type for scalar join elements; `None` means the range lives
    /// in the polymorphic join area and targets resolve by class tag.
    target: Option<String>,
    /// Namespace of the owning record, applied when resolving class tags.
    namespace: Option<String>,
    appended: Vec<Option<RecordRef>>,
    dirty: bool,
    cache: RefCell<HashMap<u64, Weak<Record>>>,
}

impl CollectionProxy {
    pub(crate) fn from_range(
        offset: u64,
        original_size: u64,
        target: Option<String>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            offset,
            original_size,
            target,
            namespace,
            appended: Vec::new(),
            dirty: false,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// An empty proxy with no backing range.
    pub(crate) fn empty(target: Option<String>) -> Self {
        Self::from_range(0, 0, target, None)
    }

    pub fn len(&self) -> u64 {
        self.original_size + self.appended.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Whether the append buffer has diverged from the stored range.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn appended(&self) -> &[Option<RecordRef>] {
        &self.appended
    }

    /// Appends a target (or a null entry) to the in-memory buffer.
    pub fn push(&mut self, target: Option<RecordRef>) {
        self.appended.push(target);
        self.dirty = true;
    }

    /// Resolves the id at position `i`. `None` is a null element.
    pub fn id_at(&self, db: &Database, i: u64) -> Result<Option<RecordRef>> {
        ensure!(i < self.len(), "collection index {} out of range {}", i, self.len());

        if i >= self.original_size {
            return Ok(self.appended[(i - self.original_size) as usize].clone());
        }

        match &self.target {
            Some(target) => {
                let id = db.join_id(self.offset, i)?;
                Ok((id != 0).then(|| RecordRef::new(target.clone(), id)))
            }
            None => {
                let (id, tag) = db.poly_join_entry(self.offset, i)?;
                if id == 0 {
                    return Ok(None);
                }
                let type_name = db.resolve_tag(self.namespace.as_deref(), tag)?;
                Ok(Some(RecordRef::new(type_name, id)))
            }
        }
    }

    /// Materializes the record at position `i`, consulting the weak cache.
    pub fn get(&self, db: &Database, i: u64) -> Result<Option<Rc<Record>>> {
        if let Some(cached) = self.cache.borrow().get(&i).and_then(Weak::upgrade) {
            return Ok(Some(cached));
        }

        let Some(target) = self.id_at(db, i)? else {
            return Ok(None);
        };

        let record = Rc::new(db.fetch(&target.type_name, target.rod_id)?);
        self.cache.borrow_mut().insert(i, Rc::downgrade(&record));
        Ok(Some(record))
    }

    /// All ids in order: the stored range first, then the append buffer.
    pub fn ids(&self, db: &Database) -> Result<Vec<Option<RecordRef>>> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for i in 0..self.len() {
            out.push(self.id_at(db, i)?);
        }
        Ok(out)
    }

    /// Calls `f` with every id in order, nulls included.
    pub fn each_id<F>(&self, db: &Database, mut f: F) -> Result<()>
    where
        F: FnMut(Option<u64>),
    {
        for i in 0..self.len() {
            f(self.id_at(db, i)?.map(|r| r.rod_id));
        }
        Ok(())
    }
}
