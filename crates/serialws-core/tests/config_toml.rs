//! Integration tests for `BridgeConfig` (de)serialization.
//!
//! The bridge binary loads its configuration from a TOML file, so the serde
//! representation of every field is part of the public contract:
//!
//! ```toml
//! baud_rate = 9600
//! data_bits = 7
//! stop_bits = "1.5"
//! parity = "even"
//! local_only = true
//! port = 9000
//! port_index = 1
//! strip_newline = false
//! ```

use serialws_core::{BridgeConfig, DataBits, Parity, StopBits};

#[test]
fn test_full_toml_document_parses_every_field() {
    let text = r#"
        baud_rate = 9600
        data_bits = 7
        stop_bits = "1.5"
        parity = "even"
        local_only = true
        port = 9000
        port_index = 1
        strip_newline = false
    "#;

    let cfg: BridgeConfig = toml::from_str(text).expect("valid config");

    assert_eq!(cfg.baud_rate, 9600);
    assert_eq!(cfg.data_bits, DataBits::Seven);
    assert_eq!(cfg.stop_bits, StopBits::OnePointFive);
    assert_eq!(cfg.parity, Parity::Even);
    assert!(cfg.local_only);
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.port_index, 1);
    assert!(!cfg.strip_newline);
}

#[test]
fn test_missing_fields_fall_back_to_defaults() {
    let cfg: BridgeConfig = toml::from_str("port = 1234").expect("valid config");

    assert_eq!(cfg.port, 1234);
    assert_eq!(cfg.baud_rate, 115_200);
    assert_eq!(cfg.data_bits, DataBits::Eight);
    assert!(cfg.strip_newline);
}

#[test]
fn test_empty_document_is_the_default_config() {
    let cfg: BridgeConfig = toml::from_str("").expect("valid config");
    assert_eq!(cfg, BridgeConfig::default());
}

#[test]
fn test_out_of_range_data_bits_is_a_parse_error() {
    let result: Result<BridgeConfig, _> = toml::from_str("data_bits = 9");
    assert!(result.is_err());
}

#[test]
fn test_unknown_parity_is_a_parse_error() {
    let result: Result<BridgeConfig, _> = toml::from_str(r#"parity = "sideways""#);
    assert!(result.is_err());
}

#[test]
fn test_serialized_config_parses_back_unchanged() {
    let original = BridgeConfig {
        baud_rate: 57_600,
        data_bits: DataBits::Five,
        stop_bits: StopBits::Two,
        parity: Parity::Space,
        local_only: true,
        port: 8181,
        port_index: 2,
        strip_newline: false,
    };

    let text = toml::to_string(&original).expect("serialize");
    let parsed: BridgeConfig = toml::from_str(&text).expect("parse");

    assert_eq!(parsed, original);
}
