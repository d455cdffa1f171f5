use common::{init_structured_logging, LoggingConfig, OperationTimer, StructuredLogEntry};
use serde_json::Value;
use std::collections::HashMap;

#[test]
fn test_init_structured_logging_twice_reports_error() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json_output: true,
        ..Default::default()
    };

    // The first call may race with other tests in this binary; the second
    // one always finds a global subscriber.
    let _ = init_structured_logging(config.clone());
    assert!(init_structured_logging(config).is_err());

    tracing::info!(actor_id = "writer/default", depth = 3u64, "Logged after init");
}

#[test]
fn test_log_entry_roundtrip_keeps_flattened_fields() {
    let line = r#"{"timestamp":"2024-01-01T00:00:00Z","level":"WARN","target":"orchestrator::concurrent","message":"Concurrent member failed","agent":"B","responses":1}"#;

    let entry: StructuredLogEntry = serde_json::from_str(line).unwrap();

    assert_eq!(entry.level, "WARN");
    assert_eq!(entry.message, "Concurrent member failed");
    assert_eq!(entry.fields.get("agent"), Some(&Value::String("B".to_string())));
    assert_eq!(entry.fields.get("responses"), Some(&Value::from(1)));
}

#[test]
fn test_logging_config_from_toml() {
    let config: LoggingConfig =
        common::parse_config("level = \"warn\"\ncolor_output = false\n", Some("toml")).unwrap();

    assert_eq!(config.level, "warn");
    assert!(!config.color_output);
    assert!(!config.json_output);
}

#[test]
fn test_operation_timer_accepts_structured_fields() {
    let mut timer = OperationTimer::new("summarize_history");
    timer.add_field("target_count", 4);
    timer.add_field("service", "chat");
    timer.add_field("extra", HashMap::from([("k", "v")]));

    timer.finish_with_result(Ok::<(), String>(()));
}
