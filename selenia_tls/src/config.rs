//! The `Configuration` object (§6, §1.4 [AMBIENT]): every knob
//! `HandshakeFSM`/`RecordLayer`/`KeyExchange` consult before and during
//! negotiation. Modeled on the teacher's `ServerConfig`/`ConfigError`
//! pair: a plain struct, a forgiving hand-rolled `key=value` loader for
//! the scalar fields, and builder-style setters for everything that isn't
//! a scalar (cipher suite order, certificate material).

use crate::message::HeartbeatMode;
use crate::protocol::{CipherSuite, NamedGroup, ProtocolVersion, SignatureScheme};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    InvalidFormat(String),
    InvalidVersionRange,
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config io error: {e}"),
            ConfigError::InvalidFormat(line) => write!(f, "invalid config line: {line}"),
            ConfigError::InvalidVersionRange => write!(f, "min_version must be <= max_version"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Negotiation and policy knobs a `Connection` reads before and during a
/// handshake (§6's "Configuration object"). Every ordered list is in
/// caller preference order -- `HandshakeFSM` and `KeyExchange` never
/// reorder them.
#[derive(Clone)]
pub struct Config {
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
    pub cipher_suites: Vec<CipherSuite>,
    pub ec_curves: Vec<NamedGroup>,
    pub ff_dh_groups: Vec<NamedGroup>,
    pub signature_algorithms: Vec<SignatureScheme>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub require_extended_master_secret: bool,
    pub session_tickets_enabled: bool,
    pub record_size_limit: usize,
    pub min_key_size: usize,
    pub max_key_size: usize,
    pub server_name: Option<String>,
    pub certificate_chain: Vec<Vec<u8>>,
    pub private_key: Option<Vec<u8>>,
    pub heartbeat_mode: HeartbeatMode,
    pub ignore_abrupt_close: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            min_version: ProtocolVersion::TLS1_2,
            max_version: ProtocolVersion::TLS1_3,
            cipher_suites: crate::protocol::ALL_SUITES.to_vec(),
            ec_curves: vec![NamedGroup::X25519, NamedGroup::Secp256r1, NamedGroup::Secp384r1],
            ff_dh_groups: vec![NamedGroup::Ffdhe3072, NamedGroup::Ffdhe4096, NamedGroup::Ffdhe2048],
            signature_algorithms: vec![
                SignatureScheme::Ed25519,
                SignatureScheme::EcdsaSecp256r1Sha256,
                SignatureScheme::RsaPssRsaeSha256,
                SignatureScheme::RsaPkcs1Sha256,
            ],
            alpn_protocols: Vec::new(),
            require_extended_master_secret: true,
            session_tickets_enabled: true,
            record_size_limit: 1 << 14,
            min_key_size: 2048,
            max_key_size: 8192,
            server_name: None,
            certificate_chain: Vec::new(),
            private_key: None,
            heartbeat_mode: HeartbeatMode::Disabled,
            ignore_abrupt_close: false,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_version > self.max_version {
            return Err(ConfigError::InvalidVersionRange);
        }
        Ok(())
    }

    pub fn with_versions(mut self, min: ProtocolVersion, max: ProtocolVersion) -> Config {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn with_cipher_suites(mut self, suites: Vec<CipherSuite>) -> Config {
        self.cipher_suites = suites;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Config {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Config {
        self.alpn_protocols = protocols;
        self
    }

    pub fn with_certificate(mut self, chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Config {
        self.certificate_chain = chain;
        self.private_key = Some(private_key);
        self
    }

    pub fn with_record_size_limit(mut self, limit: usize) -> Config {
        self.record_size_limit = limit.clamp(1, 1 << 14);
        self
    }

    pub fn with_key_size_range(mut self, min: usize, max: usize) -> Config {
        self.min_key_size = min;
        self.max_key_size = max;
        self
    }

    pub fn with_heartbeat_mode(mut self, mode: HeartbeatMode) -> Config {
        self.heartbeat_mode = mode;
        self
    }

    /// Load the scalar subset of this configuration from a minimal
    /// `key=value` file. Ordered/structured fields (cipher suite lists,
    /// certificates) aren't representable in this format and are left at
    /// their `Default` values -- set them with the builder methods after
    /// loading.
    ///
    /// Recognized keys: `min_version`, `max_version` (as `"1.0"`.."1.3"`),
    /// `server_name`, `record_size_limit`, `min_key_size`, `max_key_size`,
    /// `require_extended_master_secret`, `session_tickets_enabled`,
    /// `ignore_abrupt_close`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Config::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, '=');
            let key = parts.next().unwrap().trim();
            let val = match parts.next() {
                Some(v) => v.trim(),
                None => return Err(ConfigError::InvalidFormat(line.to_string())),
            };

            match key {
                "min_version" => config.min_version = parse_version(val, line)?,
                "max_version" => config.max_version = parse_version(val, line)?,
                "server_name" => config.server_name = Some(val.to_string()),
                "record_size_limit" => {
                    config.record_size_limit = val
                        .parse::<usize>()
                        .map_err(|_| ConfigError::InvalidFormat(line.to_string()))?
                        .clamp(1, 1 << 14)
                }
                "min_key_size" => {
                    config.min_key_size = val.parse().map_err(|_| ConfigError::InvalidFormat(line.to_string()))?
                }
                "max_key_size" => {
                    config.max_key_size = val.parse().map_err(|_| ConfigError::InvalidFormat(line.to_string()))?
                }
                "require_extended_master_secret" => {
                    config.require_extended_master_secret = parse_bool(val, line)?
                }
                "session_tickets_enabled" => config.session_tickets_enabled = parse_bool(val, line)?,
                "ignore_abrupt_close" => config.ignore_abrupt_close = parse_bool(val, line)?,
                _ => return Err(ConfigError::InvalidFormat(line.to_string())),
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_version(val: &str, line: &str) -> Result<ProtocolVersion, ConfigError> {
    Ok(match val {
        "1.0" => ProtocolVersion::TLS1_0,
        "1.1" => ProtocolVersion::TLS1_1,
        "1.2" => ProtocolVersion::TLS1_2,
        "1.3" => ProtocolVersion::TLS1_3,
        _ => return Err(ConfigError::InvalidFormat(line.to_string())),
    })
}

fn parse_bool(val: &str, line: &str) -> Result<bool, ConfigError> {
    match val {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidFormat(line.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn inverted_version_range_is_rejected() {
        let cfg = Config::default().with_versions(ProtocolVersion::TLS1_3, ProtocolVersion::TLS1_2);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidVersionRange)));
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = Config::default()
            .with_server_name("example.com")
            .with_record_size_limit(4096);
        assert_eq!(cfg.server_name.as_deref(), Some("example.com"));
        assert_eq!(cfg.record_size_limit, 4096);
    }
}
