//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for a bridge session.  It is
//! resolved once by the front end (CLI flags, environment variables, a TOML
//! file) and is immutable while a session runs.
//!
//! The line-setting enums ([`DataBits`], [`StopBits`], [`Parity`]) describe
//! everything a UART can be asked for, including values a particular serial
//! backend may not support (1.5 stop bits, mark/space parity).  Rejecting those
//! is the transport's job, not the configuration's.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration parsing and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Baud rate must be a positive number.
    #[error("baud rate must be greater than zero")]
    ZeroBaudRate,

    /// A data-bits value outside 5..=8.
    #[error("invalid data bits '{0}' (expected 5, 6, 7 or 8)")]
    InvalidDataBits(String),

    /// A stop-bits value other than 1, 1.5 or 2.
    #[error("invalid stop bits '{0}' (expected 1, 1.5 or 2)")]
    InvalidStopBits(String),

    /// An unknown parity name.
    #[error("invalid parity '{0}' (expected none, odd, even, mark or space)")]
    InvalidParity(String),
}

// ── Line settings ─────────────────────────────────────────────────────────────

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Returns the number of bits as an integer.
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::InvalidDataBits(other.to_string())),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        value.bits()
    }
}

impl FromStr for DataBits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| ConfigError::InvalidDataBits(s.to_string()))
            .and_then(DataBits::try_from)
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(StopBits::One),
            "1.5" => Ok(StopBits::OnePointFive),
            "2" => Ok(StopBits::Two),
            other => Err(ConfigError::InvalidStopBits(other.to_string())),
        }
    }
}

impl TryFrom<String> for StopBits {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StopBits> for String {
    fn from(value: StopBits) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        f.write_str(s)
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            "mark" => Ok(Parity::Mark),
            "space" => Ok(Parity::Space),
            _ => Err(ConfigError::InvalidParity(s.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(s)
    }
}

// ── BridgeConfig ──────────────────────────────────────────────────────────────

/// All settings for one bridge session.
///
/// Missing fields in a TOML file fall back to [`BridgeConfig::default`].
///
/// # Example
///
/// ```rust
/// use serialws_core::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.baud_rate, 115_200);
/// assert_eq!(cfg.bind_addr().to_string(), "0.0.0.0:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Line speed in bits per second.  Must be greater than zero.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Parity mode.
    pub parity: Parity,
    /// Bind the WebSocket server to the loopback interface only.
    pub local_only: bool,
    /// TCP port of the WebSocket server.
    pub port: u16,
    /// Which port of the selected adapter to open (multi-port adapters).
    pub port_index: usize,
    /// Strip one trailing newline from every frame sent to clients.
    pub strip_newline: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            local_only: false,
            port: 8080,
            port_index: 0,
            strip_newline: true,
        }
    }
}

impl BridgeConfig {
    /// Checks the invariants that do not depend on the hardware.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroBaudRate`] when `baud_rate` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        Ok(())
    }

    /// Address the WebSocket server binds to.
    ///
    /// `127.0.0.1:port` when `local_only` is set, `0.0.0.0:port` otherwise.
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = if self.local_only {
            Ipv4Addr::LOCALHOST
        } else {
            Ipv4Addr::UNSPECIFIED
        };
        SocketAddr::from((ip, self.port))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_factory_settings() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.data_bits, DataBits::Eight);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert_eq!(cfg.parity, Parity::None);
        assert!(!cfg.local_only);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.port_index, 0);
        assert!(cfg.strip_newline);
    }

    #[test]
    fn test_bind_addr_local_only_uses_loopback() {
        let cfg = BridgeConfig {
            local_only: true,
            port: 9001,
            ..BridgeConfig::default()
        };
        assert_eq!(cfg.bind_addr().to_string(), "127.0.0.1:9001");
    }

    #[test]
    fn test_bind_addr_all_interfaces_by_default() {
        assert_eq!(BridgeConfig::default().bind_addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_validate_rejects_zero_baud_rate() {
        let cfg = BridgeConfig {
            baud_rate: 0,
            ..BridgeConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBaudRate));
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_data_bits_parse_accepts_five_through_eight() {
        assert_eq!("5".parse::<DataBits>(), Ok(DataBits::Five));
        assert_eq!("6".parse::<DataBits>(), Ok(DataBits::Six));
        assert_eq!("7".parse::<DataBits>(), Ok(DataBits::Seven));
        assert_eq!("8".parse::<DataBits>(), Ok(DataBits::Eight));
    }

    #[test]
    fn test_data_bits_parse_rejects_out_of_range() {
        assert!(matches!("9".parse::<DataBits>(), Err(ConfigError::InvalidDataBits(_))));
        assert!(matches!("x".parse::<DataBits>(), Err(ConfigError::InvalidDataBits(_))));
    }

    #[test]
    fn test_stop_bits_parse_and_display_agree() {
        for s in ["1", "1.5", "2"] {
            let parsed: StopBits = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("3".parse::<StopBits>().is_err());
    }

    #[test]
    fn test_parity_parse_is_case_insensitive() {
        assert_eq!("EVEN".parse::<Parity>(), Ok(Parity::Even));
        assert_eq!("Mark".parse::<Parity>(), Ok(Parity::Mark));
        assert!(matches!("bogus".parse::<Parity>(), Err(ConfigError::InvalidParity(_))));
    }
}
