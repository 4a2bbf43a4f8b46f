use anyhow::Result;

use silodb::catalog::{Catalog, CatalogError, Column, DataType, Schema};
use silodb::common::types::Rid;

mod common;
use common::create_index_buffer_pool;

fn orders_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("customer", DataType::BigInt),
        Column::new("note", DataType::Text),
    ])
}

#[test]
fn test_create_and_lookup_table() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let catalog = Catalog::new(pool);

    let info = catalog.create_table("orders", orders_schema())?;
    assert_eq!(info.name(), "orders");
    assert_eq!(info.schema().columns().len(), 3);
    assert_eq!(info.first_page_id(), None);

    let by_oid = catalog.get_table(info.oid()).expect("lookup by oid");
    assert_eq!(by_oid.name(), "orders");
    let by_name = catalog.get_table_by_name("orders").expect("lookup by name");
    assert_eq!(by_name.oid(), info.oid());
    assert!(catalog.get_table_by_name("missing").is_none());

    assert!(matches!(
        catalog.create_table("orders", orders_schema()),
        Err(CatalogError::DuplicateTable(_))
    ));

    Ok(())
}

#[test]
fn test_index_width_selection() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let catalog = Catalog::new(pool);
    catalog.create_table("orders", orders_schema())?;

    // A single 4-byte column fits the narrowest key.
    let pk = catalog.create_index("orders_pk", "orders", vec![0], 8, 8)?;
    assert_eq!(pk.index().key_width(), 4);
    assert_eq!(pk.key_attrs(), &[0]);

    // Integer + big integer lands in the 16-byte bucket.
    let compound = catalog.create_index("orders_cust", "orders", vec![0, 1], 8, 8)?;
    assert_eq!(compound.index().key_width(), 16);

    // A text column pushes into the wide keys.
    let by_note = catalog.create_index("orders_note", "orders", vec![2], 8, 8)?;
    assert_eq!(by_note.index().key_width(), 32);

    let indexes = catalog.get_table_indexes("orders");
    assert_eq!(indexes.len(), 3);
    assert!(catalog.get_index("orders", "orders_pk").is_some());
    assert!(catalog.get_index("orders", "nope").is_none());
    assert!(catalog.get_table_indexes("missing").is_empty());

    Ok(())
}

#[test]
fn test_erased_index_operations() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(64)?;
    let catalog = Catalog::new(pool);
    catalog.create_table("orders", orders_schema())?;
    let pk = catalog.create_index("orders_pk", "orders", vec![0], 4, 4)?;

    for i in 0..100u32 {
        let key = i.to_be_bytes();
        pk.index().insert(&key, Rid::new(1, i))?;
    }
    for i in 0..100u32 {
        let key = i.to_be_bytes();
        assert_eq!(pk.index().get(&key)?, Some(Rid::new(1, i)));
    }

    pk.index().remove(&42u32.to_be_bytes())?;
    assert_eq!(pk.index().get(&42u32.to_be_bytes())?, None);
    assert_eq!(pk.index().get(&43u32.to_be_bytes())?, Some(Rid::new(1, 43)));

    Ok(())
}

#[test]
fn test_drop_index() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let catalog = Catalog::new(pool);
    catalog.create_table("orders", orders_schema())?;
    catalog.create_index("orders_pk", "orders", vec![0], 4, 4)?;
    assert_eq!(catalog.get_table_indexes("orders").len(), 1);

    catalog.drop_index("orders", "orders_pk")?;
    assert!(catalog.get_index("orders", "orders_pk").is_none());
    assert!(catalog.get_table_indexes("orders").is_empty());

    // Dropping twice is a no-op; the name is reusable.
    catalog.drop_index("orders", "orders_pk")?;
    catalog.create_index("orders_pk", "orders", vec![0], 4, 4)?;
    assert_eq!(catalog.get_table_indexes("orders").len(), 1);

    Ok(())
}

#[test]
fn test_duplicate_index_rejected() -> Result<()> {
    let (pool, _temp_file) = create_index_buffer_pool(32)?;
    let catalog = Catalog::new(pool);
    catalog.create_table("orders", orders_schema())?;
    catalog.create_index("orders_pk", "orders", vec![0], 4, 4)?;

    assert!(matches!(
        catalog.create_index("orders_pk", "orders", vec![0], 4, 4),
        Err(CatalogError::DuplicateIndex(_, _))
    ));
    assert!(matches!(
        catalog.create_index("other_pk", "missing", vec![0], 4, 4),
        Err(CatalogError::TableNotFound(_))
    ));

    Ok(())
}
