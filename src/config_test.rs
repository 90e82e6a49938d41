use super::*;

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__BOARDSYNC_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_VALID__", "99") };
    let val: usize = env_parse("__BOARDSYNC_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_INVALID__", "notanumber") };
    let val: u64 = env_parse("__BOARDSYNC_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_INVALID__") };
}

#[test]
fn defaults_match_documented_constants() {
    let config = SyncConfig::default();
    assert_eq!(config.max_participants, 10);
    assert_eq!(config.message_history, 50);
    assert_eq!(config.local_stroke_history, 200);
    assert_eq!(config.remote_stroke_window, 500);
    assert_eq!(config.local_liveness, Duration::from_secs(30));
    assert_eq!(config.load_liveness, Duration::from_secs(45));
    assert_eq!(config.remote_liveness, Duration::from_secs(45));
    assert_eq!(config.poll_interval, Duration::from_secs(3));
    assert_eq!(config.sweep_interval, Duration::from_secs(10));
    assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(config.grace_timeout, Duration::from_secs(5));
    assert_eq!(config.retry.max_retries, 3);
}

#[test]
fn retry_delay_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(1), Duration::from_secs(1));
    assert_eq!(policy.delay(2), Duration::from_secs(2));
    assert_eq!(policy.delay(3), Duration::from_secs(4));
    assert_eq!(policy.delay(4), Duration::from_secs(8));
    assert_eq!(policy.delay(5), Duration::from_secs(10));
    assert_eq!(policy.delay(40), Duration::from_secs(10));
}

#[test]
fn duration_ms_converts_whole_milliseconds() {
    assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
    assert_eq!(duration_ms(Duration::from_secs(30)), 30_000);
}
