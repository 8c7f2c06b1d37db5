use std::collections::HashMap;
use std::time::Duration;

use pitwall_auth::Role;
use pitwall_server::ldx::LdxWatcher;
use serde_json::json;

mod support;

fn submit_payload(value: &str) -> HashMap<String, serde_json::Value> {
    HashMap::from([("sampling_rate".to_string(), json!(value))])
}

/// Writing a candidate then sleeping past the debounce window makes the
/// next scan pick it up deterministically.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test]
async fn injects_values_into_new_file_exactly_once() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let watch = tempfile::tempdir().unwrap();

    let state = support::test_state(forms.path()).await;
    state
        .store
        .set_watch_dir(Some(watch.path().to_str().unwrap()))
        .await
        .unwrap();
    state
        .values
        .submit(Role::Daq, uuid::Uuid::new_v4(), &submit_payload("100"))
        .await
        .unwrap();

    let file = watch.path().join("x.ldx");
    std::fs::write(&file, "<root></root>").unwrap();
    settle().await;

    let watcher = LdxWatcher::new(
        state.store.clone(),
        state.registry.clone(),
        state.metrics.clone(),
    );
    watcher.scan_once().await.unwrap();

    let body = std::fs::read_to_string(&file).unwrap();
    assert!(
        body.contains("<detail><entry id=\"sampling_rate\">100</entry></detail>"),
        "unexpected output: {body}"
    );

    let files = state.store.list_ldx_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "x.ldx");
    let injections = state.store.list_injections("x.ldx").await.unwrap();
    assert_eq!(injections.len(), 1);
    // Fresh submit inside the validity window.
    assert!(injections[0].was_update);

    // Touch without content change: same name, no second processing.
    settle().await;
    watcher.scan_once().await.unwrap();
    assert_eq!(state.store.list_ldx_files().await.unwrap().len(), 1);
    assert_eq!(state.store.list_injections("x.ldx").await.unwrap().len(), 1);
}

#[tokio::test]
async fn null_values_are_skipped_and_fresh_debounced_files_wait() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let watch = tempfile::tempdir().unwrap();

    let state = support::test_state(forms.path()).await;
    state
        .store
        .set_watch_dir(Some(watch.path().to_str().unwrap()))
        .await
        .unwrap();

    // No values submitted at all: injection produces an empty detail block.
    let file = watch.path().join("empty.ldx");
    std::fs::write(&file, "<root></root>").unwrap();

    let watcher = LdxWatcher::new(
        state.store.clone(),
        state.registry.clone(),
        state.metrics.clone(),
    );

    // Within the debounce window nothing happens.
    watcher.scan_once().await.unwrap();
    assert!(state.store.list_ldx_files().await.unwrap().is_empty());

    settle().await;
    watcher.scan_once().await.unwrap();
    assert_eq!(state.store.list_ldx_files().await.unwrap().len(), 1);
    assert!(state
        .store
        .list_injections("empty.ldx")
        .await
        .unwrap()
        .is_empty());
    let body = std::fs::read_to_string(&file).unwrap();
    assert!(body.contains("<detail></detail>"));
}

#[tokio::test]
async fn second_file_sees_untouched_values_as_stale() {
    let forms = tempfile::tempdir().unwrap();
    // A schema without validity_window exercises the touched-since-last-file
    // classification.
    support::write_form(
        forms.path(),
        "aero.yaml",
        r#"
form_name: Aero Setup
role: aero
fields:
  - name: front_wing_deg
    label: Front wing angle
    type: number
"#,
    );
    let watch = tempfile::tempdir().unwrap();

    let state = support::test_state(forms.path()).await;
    state
        .store
        .set_watch_dir(Some(watch.path().to_str().unwrap()))
        .await
        .unwrap();
    state
        .values
        .submit(
            Role::Aero,
            uuid::Uuid::new_v4(),
            &HashMap::from([("front_wing_deg".to_string(), json!("7"))]),
        )
        .await
        .unwrap();

    let watcher = LdxWatcher::new(
        state.store.clone(),
        state.registry.clone(),
        state.metrics.clone(),
    );

    std::fs::write(watch.path().join("first.ldx"), "<root></root>").unwrap();
    settle().await;
    watcher.scan_once().await.unwrap();
    let first = state.store.list_injections("first.ldx").await.unwrap();
    assert_eq!(first.len(), 1);
    // Never processed a file before: any stored value counts as touched.
    assert!(first[0].was_update);

    // Second file, value untouched since the first file was processed.
    std::fs::write(watch.path().join("second.ldx"), "<root></root>").unwrap();
    settle().await;
    watcher.scan_once().await.unwrap();
    let second = state.store.list_injections("second.ldx").await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(!second[0].was_update);
}

#[tokio::test]
async fn non_ldx_files_are_ignored() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let watch = tempfile::tempdir().unwrap();

    let state = support::test_state(forms.path()).await;
    state
        .store
        .set_watch_dir(Some(watch.path().to_str().unwrap()))
        .await
        .unwrap();

    std::fs::write(watch.path().join("notes.txt"), "not xml").unwrap();
    std::fs::write(watch.path().join("upper.LDX"), "<root></root>").unwrap();
    settle().await;

    let watcher = LdxWatcher::new(
        state.store.clone(),
        state.registry.clone(),
        state.metrics.clone(),
    );
    watcher.scan_once().await.unwrap();

    let files = state.store.list_ldx_files().await.unwrap();
    // Extension matching is case-insensitive; the txt file is skipped.
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "upper.LDX");
}
