use adapter::{ConnectionConfig, Error, NoopDecrypter, Row, StreamParams};
use serde_json::{json, Value};
use usm::{
    validate, Column, Constraint, ConstraintType, DataType, DatabaseType, Table, TypeCategory,
    UnifiedSchema,
};

fn memory_config() -> ConnectionConfig {
    serde_json::from_value(json!({
        "databaseId": "db-test",
        "workspaceId": "ws-test",
        "tenantId": "tn-test",
        "host": "",
        "port": 0,
        "databaseName": ":memory:",
        "username": "",
        "password": "",
        "databaseVendor": "sqlite",
    }))
    .unwrap()
}

fn users_schema() -> UnifiedSchema {
    let mut schema = UnifiedSchema::new(DatabaseType::Sqlite);
    let mut table = Table {
        name: "users".to_string(),
        ..Default::default()
    };
    for (ordinal, (name, data_type, nullable, auto)) in [
        ("id", DataType::scalar("bigint", TypeCategory::Numeric), false, true),
        ("email", DataType::varchar(255), false, false),
        ("name", DataType::scalar("text", TypeCategory::String), true, false),
        ("age", DataType::scalar("int", TypeCategory::Numeric), true, false),
    ]
    .into_iter()
    .enumerate()
    {
        table.columns.insert(
            name.to_string(),
            Column {
                name: name.to_string(),
                data_type,
                ordinal: ordinal as u32 + 1,
                nullable,
                is_primary_key: name == "id",
                auto_increment: auto,
                ..Default::default()
            },
        );
    }
    table.constraints.insert(
        "uq_users_email".to_string(),
        Constraint {
            name: "uq_users_email".to_string(),
            constraint_type: ConstraintType::Unique,
            columns: vec!["email".to_string()],
            reference: None,
            expression: None,
            deferrable: false,
            initially_deferred: false,
            enabled: true,
            validated: true,
            using_index: None,
        },
    );
    schema.add_table(table);
    schema
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn structure_data_and_lifecycle_round_trip() {
    adapter_sqlite::register();
    let factory = adapter::lookup(DatabaseType::Sqlite).unwrap();
    let conn = factory
        .connect(memory_config(), &NoopDecrypter)
        .await
        .unwrap();

    // Structure: create, then discover back and compare the essentials.
    conn.schema()
        .unwrap()
        .create_structure(&users_schema())
        .await
        .unwrap();
    let discovered = conn.schema().unwrap().discover_schema().await.unwrap();
    assert_eq!(validate(&discovered), vec![]);

    let users = discovered.tables.get("users").expect("users table exists");
    assert_eq!(users.columns.len(), 4);
    assert!(!users.columns["email"].nullable);
    assert!(users.columns["name"].nullable);
    assert!(users.columns["id"].is_primary_key);
    assert!(users.columns["id"].auto_increment);
    assert!(users
        .constraints
        .values()
        .any(|c| c.constraint_type == ConstraintType::Unique
            && c.columns == vec!["email".to_string()]));
    assert_eq!(
        conn.schema().unwrap().list_tables().await.unwrap(),
        vec!["users".to_string()]
    );

    // Seed and upsert on the unique key: one row remains, updated.
    let data = conn.data().unwrap();
    let affected = data
        .insert(
            "users",
            &[row(&[
                ("email", json!("a@x")),
                ("name", json!("A")),
                ("age", json!(25)),
            ])],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    data.upsert(
        "users",
        &[row(&[
            ("email", json!("a@x")),
            ("name", json!("A'")),
            ("age", json!(26)),
        ])],
        &["email".to_string()],
    )
    .await
    .unwrap();

    let rows = data.fetch("users", None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("A'")));
    assert_eq!(rows[0].get("age"), Some(&json!(26)));

    // Empty inputs follow the contract.
    assert_eq!(data.insert("users", &[]).await.unwrap(), 0);
    assert!(matches!(
        data.delete("users", &Row::new()).await,
        Err(Error::InvalidData(_))
    ));

    conn.close().await;
    assert!(!conn.is_connected());
    assert!(matches!(conn.data(), Err(Error::NotConnected)));
    conn.close().await; // second close is a no-op
}

#[tokio::test]
async fn stream_pagination_and_row_counts() {
    adapter_sqlite::register();
    let factory = adapter::lookup(DatabaseType::Sqlite).unwrap();
    let conn = factory
        .connect(memory_config(), &NoopDecrypter)
        .await
        .unwrap();

    conn.data()
        .unwrap()
        .execute("CREATE TABLE items (n INTEGER NOT NULL)", &[])
        .await
        .unwrap();
    let rows: Vec<Row> = (1..=5).map(|n| row(&[("n", json!(n))])).collect();
    conn.data().unwrap().insert("items", &rows).await.unwrap();

    let data = conn.data().unwrap();
    let mut cursor = None;
    let mut pages = Vec::new();
    loop {
        let page = data
            .stream(StreamParams {
                table: "items".to_string(),
                columns: None,
                batch_size: 2,
                cursor: cursor.clone(),
            })
            .await
            .unwrap();
        let full = page.rows.len() as u32 == 2;
        assert_eq!(page.has_more, full);
        pages.push(page.rows.len());
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor.clone();
    }
    assert_eq!(pages, vec![2, 2, 1]);

    let (count, exact) = data.get_row_count("items", None).await.unwrap();
    assert_eq!((count, exact), (5, true));
    let (count, _) = data.get_row_count("items", Some("n > 3")).await.unwrap();
    assert_eq!(count, 2);

    // The command envelope has the backend-agnostic shape.
    let envelope = conn
        .metadata()
        .unwrap()
        .execute_command("SELECT 1 AS one, 'x' AS label")
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&envelope).unwrap();
    assert_eq!(parsed["count"], json!(1));
    assert_eq!(parsed["rows"][0]["one"], json!(1));
    assert_eq!(parsed["rows"][0]["label"], json!("x"));

    // Wipe empties every table and leaves the structure in place.
    data.wipe().await.unwrap();
    assert_eq!(data.fetch("items", None).await.unwrap().len(), 0);
    assert_eq!(
        conn.schema().unwrap().list_tables().await.unwrap(),
        vec!["items".to_string()]
    );

    conn.close().await;
}

#[tokio::test]
async fn replication_is_rejected_by_capability() {
    adapter_sqlite::register();
    let factory = adapter::lookup(DatabaseType::Sqlite).unwrap();
    assert!(!factory.capabilities().supports_cdc);

    let conn = factory
        .connect(memory_config(), &NoopDecrypter)
        .await
        .unwrap();
    let result = conn
        .replication()
        .unwrap()
        .open_change_stream("src", Some("t"))
        .await;
    assert!(matches!(result, Err(Error::NotSupported { .. })));
    conn.close().await;
}
