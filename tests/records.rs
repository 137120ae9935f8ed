//! Output record format tests

use perf::stats::Sample;

#[test]
fn test_intermediary_upload_record() {
    let json = r#"{"type":"intermediary","timeSeconds":1.0,"uploadBytes":1024}"#;
    let sample: Sample = serde_json::from_str(json).unwrap();
    assert_eq!(
        sample,
        Sample::Intermediary {
            time_seconds: 1.0,
            upload_bytes: Some(1024),
            download_bytes: None,
        }
    );
    assert_eq!(sample.to_json(), json);
}

#[test]
fn test_intermediary_download_record_omits_upload() {
    let sample = Sample::Intermediary {
        time_seconds: 0.25,
        upload_bytes: None,
        download_bytes: Some(7),
    };
    let json = sample.to_json();
    assert!(json.contains("\"type\":\"intermediary\""));
    assert!(json.contains("\"downloadBytes\":7"));
    assert!(!json.contains("uploadBytes"));
}

#[test]
fn test_final_record_has_both_counts() {
    let sample = Sample::Final {
        time_seconds: 3.5,
        upload_bytes: 0,
        download_bytes: 0,
    };
    let value: serde_json::Value = serde_json::from_str(&sample.to_json()).unwrap();
    assert_eq!(value["type"], "final");
    assert_eq!(value["timeSeconds"], 3.5);
    assert_eq!(value["uploadBytes"], 0);
    assert_eq!(value["downloadBytes"], 0);
    assert!(sample.is_final());
}

#[test]
fn test_unknown_type_rejected() {
    let json = r#"{"type":"partial","timeSeconds":1.0}"#;
    assert!(serde_json::from_str::<Sample>(json).is_err());
}

#[test]
fn test_final_requires_counts() {
    let json = r#"{"type":"final","timeSeconds":1.0,"uploadBytes":1}"#;
    assert!(serde_json::from_str::<Sample>(json).is_err());
}
