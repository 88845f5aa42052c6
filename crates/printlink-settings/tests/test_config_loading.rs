use printlink_settings::{CommConfig, ResendOkPolicy, SettingsError};
use std::io::Write;

#[test]
fn test_load_toml_with_partial_fields() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
port = "/dev/ttyUSB0"
baudrate = 250000
ack_max = 2
trigger_ok_after_resend = "always"

[timeouts]
communication = 15.0

[max_consecutive_timeouts]
idle = 3
"#
    )
    .unwrap();

    let config = CommConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(config.baudrate, Some(250000));
    assert_eq!(config.ack_max, 2);
    assert_eq!(config.trigger_ok_after_resend, ResendOkPolicy::Always);
    assert_eq!(config.timeouts.communication, 15.0);
    assert_eq!(config.timeouts.connection, 10.0);
    assert_eq!(config.max_consecutive_timeouts.idle, 3);
    assert_eq!(config.max_consecutive_timeouts.printing, 5);
}

#[test]
fn test_load_json() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{"extruder_count": 2, "heated_bed": false}}"#).unwrap();

    let config = CommConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.extruder_count, 2);
    assert!(!config.heated_bed);
    assert_eq!(config.hello_command, "M110 N0");
}

#[test]
fn test_rejects_unknown_extension() {
    let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    let err = CommConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedFormat(_)));
}

#[test]
fn test_rejects_invalid_values() {
    let err = CommConfig::from_toml_str("ack_max = 0").unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { .. }));

    let err = CommConfig::from_toml_str("[timeouts]\nresend_ok = -1.0").unwrap_err();
    assert!(err.to_string().contains("timeouts.resend_ok"));
}

#[test]
fn test_for_port() {
    let config = CommConfig::for_port("COM3", 115200);
    assert_eq!(config.port.as_deref(), Some("COM3"));
    assert_eq!(config.baudrate, Some(115200));
    assert!(config.validate().is_ok());
}
