//! Tag event ordering tests
//!
//! The resolver must pick the most recently created tag event across all tag
//! lists, with a fixed tie-break for unparsable timestamps - the ordering is
//! part of the contract because it decides which digest a deploy references.

use kforge::build::imagestream::select_latest_tag_event;
use serde_json::json;

#[test]
fn test_later_created_event_wins() {
    let stream = json!({
        "status": {"tags": [{"tag": "latest", "items": [
            {"created": "2024-01-01T00:00:00Z", "image": "sha256:january"},
            {"created": "2024-06-01T00:00:00Z", "image": "sha256:june"}
        ]}]}
    });
    assert_eq!(select_latest_tag_event(&stream).unwrap(), "sha256:june");
}

#[test]
fn test_selection_spans_all_tag_lists() {
    let stream = json!({
        "status": {"tags": [
            {"tag": "latest", "items": [
                {"created": "2023-12-01T00:00:00Z", "image": "sha256:latest"}
            ]},
            {"tag": "nightly", "items": [
                {"created": "2024-06-01T12:30:45Z", "image": "sha256:nightly"}
            ]}
        ]}
    });
    assert_eq!(select_latest_tag_event(&stream).unwrap(), "sha256:nightly");
}

#[test]
fn test_unparsable_timestamp_loses_to_any_valid_one() {
    let stream = json!({
        "status": {"tags": [{"tag": "latest", "items": [
            {"created": "06/01/2024", "image": "sha256:wrong-format"},
            {"created": "2020-01-01T00:00:00Z", "image": "sha256:ancient-but-valid"}
        ]}]}
    });
    assert_eq!(
        select_latest_tag_event(&stream).unwrap(),
        "sha256:ancient-but-valid"
    );
}

#[test]
fn test_two_unparsable_timestamps_keep_first_seen() {
    let stream = json!({
        "status": {"tags": [{"tag": "latest", "items": [
            {"image": "sha256:first"},
            {"created": "garbage", "image": "sha256:second"}
        ]}]}
    });
    assert_eq!(select_latest_tag_event(&stream).unwrap(), "sha256:first");
}

#[test]
fn test_event_without_digest_is_skipped() {
    let stream = json!({
        "status": {"tags": [{"tag": "latest", "items": [
            {"created": "2024-06-01T00:00:00Z"},
            {"created": "2024-01-01T00:00:00Z", "image": "sha256:has-digest"}
        ]}]}
    });
    assert_eq!(select_latest_tag_event(&stream).unwrap(), "sha256:has-digest");
}

#[test]
fn test_empty_status_is_none() {
    assert_eq!(select_latest_tag_event(&json!({"status": {"tags": []}})), None);
    assert_eq!(select_latest_tag_event(&json!({})), None);
}
