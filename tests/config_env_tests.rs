use ctc_decode_lib::DecoderConfig;

// Environment variables are process-wide, so every override case lives in
// this single test binary and test function.
#[test]
fn env_overrides_apply_and_invalid_values_are_ignored() {
    std::env::set_var("CTC_THREADS", "3");
    std::env::set_var("CTC_MAX_FRAMES", "1200");
    std::env::set_var("CTC_ARENA_BYTES", "not-a-number");
    std::env::set_var("CTC_FRAME_SHIFT_SEC", "0.04");
    std::env::set_var("CTC_PREFER_ACCELERATOR", "true");

    let config = DecoderConfig::from_env();
    assert_eq!(config.n_threads, 3);
    assert_eq!(config.max_frames, 1200);
    assert_eq!(config.arena_bytes, None);
    assert!((config.frame_shift_sec - 0.04).abs() < f32::EPSILON);
    assert!(config.prefer_accelerator);

    std::env::set_var("CTC_THREADS", "0");
    std::env::set_var("CTC_ARENA_BYTES", "4096");
    let config = DecoderConfig::from_env();
    assert_eq!(config.n_threads, 1);
    assert_eq!(config.arena_bytes, Some(4096));
}
