use std::fs;

use ctc_decode_lib::decoder::ConfigError;
use ctc_decode_lib::DecoderConfig;

#[test]
fn defaults_are_sane() {
    let config = DecoderConfig::default();
    assert!(config.n_threads >= 1);
    assert_eq!(config.max_frames, 3000);
    assert_eq!(config.arena_bytes, None);
    assert!((config.frame_shift_sec - 0.06).abs() < f32::EPSILON);
    assert!(!config.prefer_accelerator);
}

#[test]
fn json_file_fills_missing_fields_with_defaults() {
    let path = std::env::temp_dir().join(format!("ctc_config_{}.json", std::process::id()));
    fs::write(&path, r#"{ "max_frames": 500, "prefer_accelerator": true }"#).unwrap();

    let config = DecoderConfig::from_json_file(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(config.max_frames, 500);
    assert!(config.prefer_accelerator);
    assert_eq!(config.arena_bytes, DecoderConfig::default().arena_bytes);
}

#[test]
fn config_round_trips_through_json() {
    let config = DecoderConfig {
        n_threads: 3,
        max_frames: 128,
        arena_bytes: Some(1 << 20),
        frame_shift_sec: 0.04,
        prefer_accelerator: true,
    };
    let json = serde_json::to_string(&config).unwrap();
    let parsed: DecoderConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn invalid_json_is_reported() {
    let path = std::env::temp_dir().join(format!("ctc_config_bad_{}.json", std::process::id()));
    fs::write(&path, "{ max_frames: ").unwrap();

    let err = DecoderConfig::from_json_file(&path).unwrap_err();
    fs::remove_file(&path).unwrap();

    assert!(matches!(err, ConfigError::Json(_)));
}

#[test]
fn missing_file_is_reported() {
    let err = DecoderConfig::from_json_file("/nonexistent/ctc/config.json").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
