use qubus::config::Settings;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(dir.path().join("absent").to_str().unwrap()).unwrap();
    assert_eq!(settings.base_prefix, "qub_");
    assert_eq!(settings.site_id, 1);
    assert_eq!(settings.lease_seconds, 30);
    assert!(settings.throw_transaction_exceptions);
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("qubus.json"),
        r#"{ "base_prefix": "cms_", "site_id": 3, "cron_path": "/tasks/run", "log_prepared_statements": true }"#,
    )
    .unwrap();
    let settings = Settings::load(dir.path().join("qubus").to_str().unwrap()).unwrap();
    assert_eq!(settings.base_prefix, "cms_");
    assert_eq!(settings.site_id, 3);
    assert_eq!(settings.cron_path, "/tasks/run");
    assert!(settings.log_prepared_statements);
    assert_eq!(settings.bind_address, "127.0.0.1:8080");
}
