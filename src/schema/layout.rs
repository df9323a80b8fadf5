//! # Record Layout
//!
//! Pre-computed word offsets for fixed-width record structs. Every scalar
//! field, string coordinate, association id and class tag occupies whole
//! little-endian words:
//!
//! | Slot                      | Words |
//! |---------------------------|-------|
//! | integer / float / bool    | 1     |
//! | string (offset, len)      | 2     |
//! | has_one (id)              | 1     |
//! | polymorphic has_one       | 2     |
//! | has_many (count, offset)  | 2     |
//!
//! `struct_size` is the word total times [`WORD_SIZE`]; a page holds
//! `PAGE_SIZE / struct_size` records and records never straddle pages.

use eyre::{ensure, Result};

use crate::config::{PAGE_SIZE, WORD_SIZE};
use crate::schema::{FieldKind, TypeDef};

/// Byte offset plus width, in words, of one slot in a record struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub offset: usize,
    pub words: usize,
}

#[derive(Debug, Clone)]
pub struct RecordLayout {
    struct_size: usize,
    field_slots: Vec<FieldSlot>,
    has_one_slots: Vec<FieldSlot>,
    has_many_slots: Vec<FieldSlot>,
}

impl RecordLayout {
    pub fn new(def: &TypeDef) -> Result<Self> {
        let mut words = 0usize;

        let mut field_slots = Vec::with_capacity(def.fields().len());
        for field in def.fields() {
            let w = match field.kind() {
                FieldKind::Integer | FieldKind::Float | FieldKind::Bool => 1,
                FieldKind::String => 2,
            };
            field_slots.push(FieldSlot {
                offset: words * WORD_SIZE,
                words: w,
            });
            words += w;
        }

        let mut has_one_slots = Vec::with_capacity(def.has_one().len());
        for assoc in def.has_one() {
            let w = if assoc.is_polymorphic() { 2 } else { 1 };
            has_one_slots.push(FieldSlot {
                offset: words * WORD_SIZE,
                words: w,
            });
            words += w;
        }

        let mut has_many_slots = Vec::with_capacity(def.has_many().len());
        for _ in def.has_many() {
            has_many_slots.push(FieldSlot {
                offset: words * WORD_SIZE,
                words: 2,
            });
            words += 2;
        }

        // A type with no members still occupies one zeroed word per record
        // so that slot arithmetic stays well-defined.
        let words = words.max(1);
        let struct_size = words * WORD_SIZE;

        ensure!(
            struct_size <= PAGE_SIZE,
            "type '{}' struct size {} exceeds page size {}",
            def.name(),
            struct_size,
            PAGE_SIZE
        );

        Ok(Self {
            struct_size,
            field_slots,
            has_one_slots,
            has_many_slots,
        })
    }

    pub fn struct_size(&self) -> usize {
        self.struct_size
    }

    pub fn records_per_page(&self) -> usize {
        PAGE_SIZE / self.struct_size
    }

    pub fn field_slot(&self, i: usize) -> FieldSlot {
        self.field_slots[i]
    }

    pub fn has_one_slot(&self, i: usize) -> FieldSlot {
        self.has_one_slots[i]
    }

    pub fn has_many_slot(&self, i: usize) -> FieldSlot {
        self.has_many_slots[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexKind;

    #[test]
    fn offsets_follow_declaration_order() {
        let def = TypeDef::new("Fred")
            .with_field("age", FieldKind::Integer)
            .with_indexed_field("sex", FieldKind::String, IndexKind::Flat)
            .with_field("weight", FieldKind::Float)
            .with_has_one("mother", "Fred")
            .with_polymorphic_has_one("item", "Fred")
            .with_has_many("friends", "Fred");

        let layout = RecordLayout::new(&def).unwrap();

        assert_eq!(layout.field_slot(0), FieldSlot { offset: 0, words: 1 });
        assert_eq!(layout.field_slot(1), FieldSlot { offset: 8, words: 2 });
        assert_eq!(layout.field_slot(2), FieldSlot { offset: 24, words: 1 });
        assert_eq!(layout.has_one_slot(0), FieldSlot { offset: 32, words: 1 });
        assert_eq!(layout.has_one_slot(1), FieldSlot { offset: 40, words: 2 });
        assert_eq!(layout.has_many_slot(0), FieldSlot { offset: 56, words: 2 });
        assert_eq!(layout.struct_size(), 72);
    }

    #[test]
    fn empty_type_occupies_one_word() {
        let layout = RecordLayout::new(&TypeDef::new("Marker")).unwrap();
        assert_eq!(layout.struct_size(), WORD_SIZE);
    }

    #[test]
    fn records_per_page_is_floor_division() {
        let def = TypeDef::new("Fred")
            .with_field("a", FieldKind::Integer)
            .with_field("b", FieldKind::Integer)
            .with_field("c", FieldKind::Integer);
        let layout = RecordLayout::new(&def).unwrap();

        assert_eq!(layout.struct_size(), 24);
        assert_eq!(layout.records_per_page(), PAGE_SIZE / 24);
    }
}
