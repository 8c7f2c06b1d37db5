use chrono::Utc;
use pitwall_auth::Role;
use pitwall_server::store::{InjectionInsert, LdxFileMeta, Sensor, Store, StoreError};

async fn store() -> Store {
    Store::open_in_memory().await.expect("open store")
}

async fn submit_one(store: &Store, field: &str, value: Option<&str>) {
    let mut tx = store.pool().begin().await.unwrap();
    Store::upsert_form_value(&mut tx, Role::Daq, "DAQ Setup", field, value, None)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn upsert_appends_audit_only_on_change() {
    let store = store().await;

    submit_one(&store, "sampling_rate", Some("100")).await;
    let page = store.list_audit(0, 10).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].old_value, None);
    assert_eq!(page.items[0].new_value.as_deref(), Some("100"));
    assert_eq!(page.items[0].form_name, "DAQ Setup");

    // Identical submit: no new audit row, no value change.
    submit_one(&store, "sampling_rate", Some("100")).await;
    let page = store.list_audit(0, 10).await.unwrap();
    assert_eq!(page.total, 1);

    // A change advances previous_value to the prior stored value.
    submit_one(&store, "sampling_rate", Some("200")).await;
    let values = store.list_values(Role::Daq).await.unwrap();
    let row = &values["sampling_rate"];
    assert_eq!(row.value.as_deref(), Some("200"));
    assert_eq!(row.previous_value.as_deref(), Some("100"));

    let page = store.list_audit(0, 10).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].old_value.as_deref(), Some("100"));
    assert_eq!(page.items[0].new_value.as_deref(), Some("200"));
}

#[tokio::test]
async fn record_ldx_file_is_idempotent_per_name() {
    let store = store().await;
    let meta = LdxFileMeta {
        file_name: "x.ldx".to_string(),
        size: 42,
        modified_at: Utc::now(),
        content_hash: "abc123".to_string(),
    };

    assert!(store.record_ldx_file(&meta).await.unwrap());
    // Same name again (even with a new hash, e.g. after our own rewrite).
    let touched = LdxFileMeta {
        content_hash: "def456".to_string(),
        ..meta.clone()
    };
    assert!(!store.record_ldx_file(&touched).await.unwrap());

    let files = store.list_ldx_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].content_hash, "abc123");
}

#[tokio::test]
async fn injection_rows_attach_to_file() {
    let store = store().await;
    let meta = LdxFileMeta {
        file_name: "run1.ldx".to_string(),
        size: 1,
        modified_at: Utc::now(),
        content_hash: "h".to_string(),
    };
    store.record_ldx_file(&meta).await.unwrap();
    store
        .append_injection(
            "run1.ldx",
            &[
                InjectionInsert {
                    field_id: "sampling_rate".into(),
                    value: "100".into(),
                    was_update: true,
                },
                InjectionInsert {
                    field_id: "run_label".into(),
                    value: "fri-am".into(),
                    was_update: false,
                },
            ],
        )
        .await
        .unwrap();

    let rows = store.list_injections("run1.ldx").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].was_update);
    assert!(!rows[1].was_update);

    let stats = store.ldx_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].entries, 2);
    assert_eq!(stats[0].updates, 1);
}

#[tokio::test]
async fn clear_data_preserves_users_sensors_configs() {
    let store = store().await;

    store.create_user("boss", "hash", true, &[]).await.unwrap();
    store
        .upsert_sensor(&Sensor {
            sensor_id: "rpm".into(),
            name: "RPM".into(),
            unit: "rpm".into(),
            min_value: 0.0,
            max_value: 14000.0,
            group: "engine".into(),
            sort_order: 0,
            enabled: true,
        })
        .await
        .unwrap();
    store.set_watch_dir(Some("/tmp/ldx")).await.unwrap();

    submit_one(&store, "sampling_rate", Some("100")).await;
    store
        .record_ldx_file(&LdxFileMeta {
            file_name: "x.ldx".into(),
            size: 1,
            modified_at: Utc::now(),
            content_hash: "h".into(),
        })
        .await
        .unwrap();

    store.clear_runtime_data().await.unwrap();

    assert!(store.list_values(Role::Daq).await.unwrap().is_empty());
    assert_eq!(store.list_audit(0, 10).await.unwrap().total, 0);
    assert!(store.list_ldx_files().await.unwrap().is_empty());

    assert_eq!(store.count_users().await.unwrap(), 1);
    assert_eq!(store.list_sensors(false).await.unwrap().len(), 1);
    assert_eq!(store.watch_dir().await.unwrap().as_deref(), Some("/tmp/ldx"));
}

#[tokio::test]
async fn last_admin_cannot_be_deleted() {
    let store = store().await;
    let admin = store.create_user("boss", "hash", true, &[]).await.unwrap();

    let err = store.delete_user(admin.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // With a second admin present, deletion goes through.
    let second = store.create_user("boss2", "hash", true, &[]).await.unwrap();
    store.delete_user(second.id).await.unwrap();
    assert_eq!(store.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let store = store().await;
    store
        .create_user("dave", "hash", false, &[Role::Daq])
        .await
        .unwrap();
    let err = store
        .create_user("dave", "hash", false, &[Role::Aero])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn user_roles_roundtrip() {
    let store = store().await;
    let created = store
        .create_user("dana", "hash", false, &[Role::Daq, Role::Aero])
        .await
        .unwrap();

    let loaded = store.get_user(created.id).await.unwrap().expect("user");
    // SQLite byte order sorts the stored role names: "DAQ" before "aero".
    assert_eq!(loaded.roles, vec![Role::Daq, Role::Aero]);
    assert!(!loaded.is_admin);
}

#[tokio::test]
async fn serial_settings_roundtrip() {
    let store = store().await;
    let mut settings = store.serial_settings().await.unwrap();
    settings.port = "/dev/ttyACM3".to_string();
    settings.csv_channel_order = vec!["rpm".into(), "speed_kph".into()];
    store.set_serial_settings(&settings).await.unwrap();

    let loaded = store.serial_settings().await.unwrap();
    assert_eq!(loaded.port, "/dev/ttyACM3");
    assert_eq!(loaded.csv_channel_order.len(), 2);
}
