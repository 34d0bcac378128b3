use wavy_telemetry::{
    metrics, new_session_id, record_flush_delivered, record_readings_dropped,
};

#[test]
fn session_ids_are_unique() {
    let first = new_session_id();
    let second = new_session_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn flush_counters_accumulate() {
    let before = metrics().snapshot();
    record_flush_delivered(3);
    record_readings_dropped(2);
    let after = metrics().snapshot();
    assert!(after.flush_deliveries >= before.flush_deliveries + 1);
    assert!(after.readings_flushed >= before.readings_flushed + 3);
    assert!(after.readings_dropped >= before.readings_dropped + 2);
}
