//! # Lifecycle Tests
//!
//! End-to-end create/store/close/reopen scenarios: durability of scalar
//! fields, id density, page-aligned files, readonly enforcement and the
//! lifecycle error guards.

use rodb::{
    Database, FieldKind, IndexKind, OpenOptions, RecordBuilder, StoreError, TypeDef, Value,
};
use tempfile::tempdir;

fn fred_db() -> Database {
    let mut db = Database::new();
    db.register(
        TypeDef::new("Fred")
            .with_field("age", FieldKind::Integer)
            .with_indexed_field("sex", FieldKind::String, IndexKind::Flat),
    )
    .unwrap();
    db
}

fn store_fred(db: &mut Database, age: i64, sex: &str) -> u64 {
    db.store("Fred", RecordBuilder::new().set("age", age).set("sex", sex))
        .unwrap()
}

mod roundtrip_tests {
    use super::*;

    #[test]
    fn create_store_reopen_readonly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        store_fred(&mut db, 2, "male");
        store_fred(&mut db, 8, "female");
        store_fred(&mut db, 8, "female");
        db.close().unwrap();

        db.open_with(&path, OpenOptions::new().readonly(true)).unwrap();
        assert_eq!(db.count("Fred").unwrap(), 3);

        let females = db.find_by("Fred", "sex", &Value::from("female")).unwrap();
        assert_eq!(females.len(), 2);

        let fred = db.fetch("Fred", 1).unwrap();
        assert_eq!(fred.int("age").unwrap(), 2);
        assert_eq!(fred.string("sex").unwrap(), "male");
        db.close().unwrap();
    }

    #[test]
    fn all_scalar_kinds_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = Database::new();
        db.register(
            TypeDef::new("Sample")
                .with_field("n", FieldKind::Integer)
                .with_field("x", FieldKind::Float)
                .with_field("flag", FieldKind::Bool)
                .with_field("text", FieldKind::String),
        )
        .unwrap();
        db.create(&path).unwrap();
        db.store(
            "Sample",
            RecordBuilder::new()
                .set("n", -42)
                .set("x", 2.75)
                .set("flag", true)
                .set("text", "zażółć gęślą jaźń"),
        )
        .unwrap();
        db.close().unwrap();

        db.open(&path).unwrap();
        let sample = db.fetch("Sample", 1).unwrap();
        assert_eq!(sample.int("n").unwrap(), -42);
        assert_eq!(sample.float("x").unwrap(), 2.75);
        assert!(sample.boolean("flag").unwrap());
        assert_eq!(sample.string("text").unwrap(), "zażółć gęślą jaźń");
        db.close().unwrap();
    }

    #[test]
    fn unset_fields_read_as_zero_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        db.store("Fred", RecordBuilder::new()).unwrap();
        db.close().unwrap();

        db.open(&path).unwrap();
        let fred = db.fetch("Fred", 1).unwrap();
        assert_eq!(fred.int("age").unwrap(), 0);
        assert_eq!(fred.string("sex").unwrap(), "");
        db.close().unwrap();
    }

    #[test]
    fn builder_mutation_after_store_is_not_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();

        let builder = RecordBuilder::new().set("age", 2);
        db.store("Fred", builder.clone()).unwrap();
        // mutate the in-memory object without re-storing
        let _mutated = builder.set("age", 3);
        db.close().unwrap();

        db.open(&path).unwrap();
        assert_eq!(db.fetch("Fred", 1).unwrap().int("age").unwrap(), 2);
        db.close().unwrap();
    }

    #[test]
    fn ids_are_dense_and_ordered() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        let ids: Vec<u64> = (0..100).map(|i| store_fred(&mut db, i, "x")).collect();
        db.close().unwrap();

        assert_eq!(ids, (1..=100).collect::<Vec<u64>>());

        db.open(&path).unwrap();
        assert_eq!(db.count("Fred").unwrap(), 100);
        for id in 1..=100u64 {
            assert_eq!(db.fetch("Fred", id).unwrap().int("age").unwrap(), id as i64 - 1);
        }
        db.close().unwrap();
    }

    #[test]
    fn data_files_stay_page_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        for i in 0..1000 {
            store_fred(&mut db, i, if i % 2 == 0 { "even" } else { "odd" });
        }
        db.close().unwrap();

        let page_size = 16384u64;
        for entry in std::fs::read_dir(&path).unwrap() {
            let entry = entry.unwrap();
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".dat") {
                let size = entry.metadata().unwrap().len();
                assert_eq!(size % page_size, 0, "{:?} is not page aligned", name);
            }
        }
    }
}

mod guard_tests {
    use super::*;

    fn is_store_error(err: &eyre::Report, want: &StoreError) -> bool {
        err.downcast_ref::<StoreError>() == Some(want)
    }

    #[test]
    fn create_rejects_already_open() {
        let dir = tempdir().unwrap();
        let mut db = fred_db();
        db.create(dir.path().join("a")).unwrap();

        let err = db.create(dir.path().join("b")).unwrap_err();
        assert!(is_store_error(&err, &StoreError::AlreadyOpen));
        let err = db.open(dir.path().join("a")).unwrap_err();
        assert!(is_store_error(&err, &StoreError::AlreadyOpen));
    }

    #[test]
    fn operations_require_open_database() {
        let mut db = fred_db();

        let err = db.store("Fred", RecordBuilder::new()).unwrap_err();
        assert!(is_store_error(&err, &StoreError::NotOpen));
        let err = db.fetch("Fred", 1).unwrap_err();
        assert!(is_store_error(&err, &StoreError::NotOpen));
        let err = db.close().unwrap_err();
        assert!(is_store_error(&err, &StoreError::NotOpen));
    }

    #[test]
    fn readonly_rejects_every_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        store_fred(&mut db, 1, "x");
        db.close().unwrap();

        db.open_with(&path, OpenOptions::new().readonly(true)).unwrap();

        let err = db.store("Fred", RecordBuilder::new()).unwrap_err();
        assert!(is_store_error(&err, &StoreError::Readonly));
        let err = db.reserve("Fred").unwrap_err();
        assert!(is_store_error(&err, &StoreError::Readonly));
        let err = db.rebuild_index("Fred", "sex").unwrap_err();
        assert!(is_store_error(&err, &StoreError::Readonly));

        // reads still work
        assert_eq!(db.fetch("Fred", 1).unwrap().int("age").unwrap(), 1);
        db.close().unwrap();
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let mut db = fred_db();
        db.create(dir.path().join("a")).unwrap();
        store_fred(&mut db, 1, "x");

        for bad in [0u64, 2, 100] {
            let err = db.fetch("Fred", bad).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::OutOfRange { .. })
            ));
        }
        db.close().unwrap();
    }

    #[test]
    fn create_purges_prior_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a");

        let mut db = fred_db();
        db.create(&path).unwrap();
        for i in 0..10 {
            store_fred(&mut db, i, "x");
        }
        db.close().unwrap();

        let mut db = fred_db();
        db.create(&path).unwrap();
        assert_eq!(db.count("Fred").unwrap(), 0);
        db.close().unwrap();

        db.open(&path).unwrap();
        assert_eq!(db.count("Fred").unwrap(), 0);
        db.close().unwrap();
    }
}
