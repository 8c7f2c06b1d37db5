use std::collections::HashMap;

use pitwall_auth::Role;
use serde_json::json;
use uuid::Uuid;

mod support;

fn payload(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[tokio::test]
async fn submit_then_prefill_roundtrip() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let state = support::test_state(forms.path()).await;
    let user_id = Uuid::new_v4();

    let saved = state
        .values
        .submit(
            Role::Daq,
            user_id,
            &payload(&[
                ("sampling_rate", json!("100")),
                ("run_label", json!("fri-am")),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(saved, 2);

    let prefill = state.values.get_prefill(Role::Daq).await.unwrap();
    assert_eq!(prefill.values["sampling_rate"].as_deref(), Some("100"));
    assert_eq!(prefill.values["run_label"].as_deref(), Some("fri-am"));
    assert!(prefill.timestamps.contains_key("sampling_rate"));
    // Only lookback fields report a previous value.
    assert!(prefill.previous_values.contains_key("sampling_rate"));
    assert!(!prefill.previous_values.contains_key("run_label"));
}

#[tokio::test]
async fn identical_resubmit_saves_nothing_and_adds_no_audit() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let state = support::test_state(forms.path()).await;
    let user_id = Uuid::new_v4();

    let body = payload(&[("sampling_rate", json!("100"))]);
    assert_eq!(state.values.submit(Role::Daq, user_id, &body).await.unwrap(), 1);

    let audit = state.store.list_audit(0, 10).await.unwrap();
    assert_eq!(audit.total, 1);
    assert_eq!(audit.items[0].old_value, None);
    assert_eq!(audit.items[0].new_value.as_deref(), Some("100"));

    assert_eq!(state.values.submit(Role::Daq, user_id, &body).await.unwrap(), 0);
    assert_eq!(state.store.list_audit(0, 10).await.unwrap().total, 1);
}

#[tokio::test]
async fn previous_value_advances_only_on_change() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let state = support::test_state(forms.path()).await;
    let user_id = Uuid::new_v4();

    for value in ["100", "100", "200"] {
        state
            .values
            .submit(Role::Daq, user_id, &payload(&[("sampling_rate", json!(value))]))
            .await
            .unwrap();
    }

    let prefill = state.values.get_prefill(Role::Daq).await.unwrap();
    assert_eq!(prefill.values["sampling_rate"].as_deref(), Some("200"));
    assert_eq!(
        prefill.previous_values["sampling_rate"].as_deref(),
        Some("100")
    );
}

#[tokio::test]
async fn textually_distinct_numbers_count_as_changes() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let state = support::test_state(forms.path()).await;
    let user_id = Uuid::new_v4();

    state
        .values
        .submit(Role::Daq, user_id, &payload(&[("sampling_rate", json!("100"))]))
        .await
        .unwrap();
    let saved = state
        .values
        .submit(Role::Daq, user_id, &payload(&[("sampling_rate", json!("100.0"))]))
        .await
        .unwrap();
    assert_eq!(saved, 1);
    assert_eq!(state.store.list_audit(0, 10).await.unwrap().total, 2);
}

#[tokio::test]
async fn unknown_keys_are_ignored_and_bad_numbers_rejected() {
    let forms = tempfile::tempdir().unwrap();
    support::write_form(forms.path(), "daq.yaml", support::DAQ_FORM);
    let state = support::test_state(forms.path()).await;
    let user_id = Uuid::new_v4();

    let saved = state
        .values
        .submit(
            Role::Daq,
            user_id,
            &payload(&[("no_such_field", json!("x")), ("notes", json!("ok"))]),
        )
        .await
        .unwrap();
    assert_eq!(saved, 1);

    let err = state
        .values
        .submit(Role::Daq, user_id, &payload(&[("sampling_rate", json!("fast"))]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sampling_rate"));
    // Nothing was written for the failed submission.
    assert_eq!(state.store.list_audit(0, 10).await.unwrap().total, 1);
}
