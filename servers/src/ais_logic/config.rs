use clap::Parser;
use lib_relay::core::connector::DEFAULT_CONNECT_TIMEOUT;
use lib_relay::core::reconnect::DEFAULT_RECONNECT_DELAY;
use lib_relay::core::subscription::{BoundingBox, DEFAULT_BBOX, DEFAULT_MESSAGE_TYPE, SubscriptionFilter};
use lib_relay::ingestors::AISSTREAM_URL;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Config file read when `--config-path` is not given.
const DEFAULT_CONFIG_FILE: &str = "server_ais.conf";

/// Largest valid MMSI (nine decimal digits).
const MAX_MMSI: u64 = 999_999_999;

#[derive(Debug, Error)]
/// # Configuration Error
///
/// Raised once at startup when a configured value has the wrong shape. The
/// process refuses to start rather than subscribe with a malformed filter.
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("Failed to read config file {}: {source}", .path.display())]
    File { path: PathBuf, source: std::io::Error },

    /// The config file is not valid JSON for `Config`.
    #[error("Failed to parse config file {}: {source}", .path.display())]
    FileFormat { path: PathBuf, source: serde_json::Error },

    /// A JSON-valued setting does not have the expected structure.
    #[error("{field} has an invalid shape: {source}")]
    Shape { field: &'static str, source: serde_json::Error },

    /// A bounding-box corner is outside the valid latitude/longitude range.
    #[error("Bounding box corner [{lat}, {lon}] is out of range (lat -90..90, lon -180..180)")]
    Coordinate { lat: f64, lon: f64 },

    /// A list that needs at least one entry is empty.
    #[error("{0} must contain at least one entry")]
    EmptyList(&'static str),

    /// A message-type tag is blank.
    #[error("MESSAGE_TYPES contains a blank entry")]
    BlankMessageType,

    /// An MMSI is not a 1 to 9 digit positive integer.
    #[error("Invalid MMSI {0:?}: expected an integer between 1 and 999999999")]
    InvalidMmsi(String),

    /// The listen port is zero.
    #[error("PORT must be between 1 and 65535")]
    InvalidPort,

    /// The reconnect delay is zero.
    #[error("RECONNECT_DELAY_MS must be greater than zero")]
    InvalidDelay,

    /// The connect timeout is zero.
    #[error("CONNECT_TIMEOUT_MS must be greater than zero")]
    InvalidConnectTimeout,

    /// Only one of the two TLS paths is set.
    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    IncompleteTls,
}

#[derive(Parser, Deserialize, Debug, Clone, Default)]
#[clap(about = "AISStream WebSocket Relay Server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "AISSTREAM_API_KEY", hide_env_values = true, help = "AISStream API key.")]
    pub api_key: Option<String>,

    #[clap(long, env = "BBOX", value_parser = parse_json, help = "Bounding box [[lat,lon],[lat,lon]] or a list of them (JSON).")]
    pub bbox: Option<Value>,

    #[clap(long, env = "MESSAGE_TYPES", value_parser = parse_json, help = "Message types to subscribe to (JSON list).")]
    pub message_types: Option<Value>,

    #[clap(long, env = "FILTER_MMSI", value_parser = parse_json, help = "Vessel MMSIs to subscribe to (JSON list).")]
    pub filter_mmsi: Option<Value>,

    #[clap(long, env = "AISSTREAM_URL", help = "Upstream AISStream WebSocket URL.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds before reconnecting upstream.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "CONNECT_TIMEOUT_MS", help = "Upper bound in milliseconds on one upstream connect attempt.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "STATIC_DIR", help = "Directory holding the bundled client UI.")]
    pub static_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("not valid JSON: {}", e))
}

impl Config {
    /// Built-in defaults, the lowest layer.
    pub fn defaults() -> Config {
        Config {
            port: Some(3000),
            upstream_url: Some(AISSTREAM_URL.to_string()),
            reconnect_delay_ms: Some(DEFAULT_RECONNECT_DELAY.as_millis() as u64),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT.as_millis() as u64),
            static_dir: Some(PathBuf::from("public")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            api_key: other.api_key.or(self.api_key),
            bbox: other.bbox.or(self.bbox),
            message_types: other.message_types.or(self.message_types),
            filter_mmsi: other.filter_mmsi.or(self.filter_mmsi),
            upstream_url: other.upstream_url.or(self.upstream_url),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            static_dir: other.static_dir.or(self.static_dir),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// # Validate
    ///
    /// Turns the layered, loosely-typed settings into a `RelayConfig`. Unset
    /// values fall back to the built-in defaults.
    pub fn validate(self) -> Result<RelayConfig, ConfigError> {
        let cfg = Config::defaults().merge(self);

        let port = cfg.port.unwrap_or(3000);
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let reconnect_delay = match cfg.reconnect_delay_ms {
            Some(0) => return Err(ConfigError::InvalidDelay),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_RECONNECT_DELAY,
        };

        let connect_timeout = match cfg.connect_timeout_ms {
            Some(0) => return Err(ConfigError::InvalidConnectTimeout),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let bounding_boxes = match cfg.bbox {
            Some(value) => parse_bounding_boxes(value)?,
            None => vec![DEFAULT_BBOX],
        };
        let message_types = match cfg.message_types {
            Some(value) => parse_message_types(value)?,
            None => vec![DEFAULT_MESSAGE_TYPE.to_string()],
        };
        let ship_mmsi = cfg.filter_mmsi.map(parse_mmsi).transpose()?;

        let tls = match (cfg.tls_cert_path, cfg.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsPaths { cert_path, key_path }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        Ok(RelayConfig {
            port,
            api_key: cfg.api_key.filter(|key| !key.trim().is_empty()),
            filter: SubscriptionFilter::new(bounding_boxes, message_types, ship_mmsi),
            upstream_url: cfg.upstream_url.unwrap_or_else(|| AISSTREAM_URL.to_string()),
            reconnect_delay,
            connect_timeout,
            static_dir: cfg.static_dir.unwrap_or_else(|| PathBuf::from("public")),
            log_dir: cfg.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: cfg.log_level.unwrap_or_else(|| "info".to_string()),
            tls,
            config_file: None,
        })
    }
}

/// Certificate and key for serving over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// # Relay Configuration
///
/// The validated settings the rest of the server consumes as plain values.
#[derive(Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub api_key: Option<String>,
    pub filter: SubscriptionFilter,
    pub upstream_url: String,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub static_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub tls: Option<TlsPaths>,
    // Config file that was layered in, if one was found
    pub config_file: Option<PathBuf>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("filter", &self.filter)
            .field("upstream_url", &self.upstream_url)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("static_dir", &self.static_dir)
            .field("log_dir", &self.log_dir)
            .field("log_level", &self.log_level)
            .field("tls", &self.tls)
            .field("config_file", &self.config_file)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BboxInput {
    Single(BoundingBox),
    Many(Vec<BoundingBox>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MmsiInput {
    Number(u64),
    Text(String),
}

fn parse_bounding_boxes(value: Value) -> Result<Vec<BoundingBox>, ConfigError> {
    let boxes = match serde_json::from_value::<BboxInput>(value).map_err(|source| ConfigError::Shape { field: "BBOX", source })? {
        BboxInput::Single(rect) => vec![rect],
        BboxInput::Many(rects) => rects,
    };
    if boxes.is_empty() {
        return Err(ConfigError::EmptyList("BBOX"));
    }
    for [lat, lon] in boxes.iter().flatten().copied() {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ConfigError::Coordinate { lat, lon });
        }
    }
    Ok(boxes)
}

fn parse_message_types(value: Value) -> Result<Vec<String>, ConfigError> {
    let types: Vec<String> =
        serde_json::from_value(value).map_err(|source| ConfigError::Shape { field: "MESSAGE_TYPES", source })?;
    if types.is_empty() {
        return Err(ConfigError::EmptyList("MESSAGE_TYPES"));
    }
    if types.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::BlankMessageType);
    }
    Ok(types)
}

fn parse_mmsi(value: Value) -> Result<Vec<u32>, ConfigError> {
    let raw: Vec<MmsiInput> =
        serde_json::from_value(value).map_err(|source| ConfigError::Shape { field: "FILTER_MMSI", source })?;
    raw.into_iter()
        .map(|entry| {
            let (number, shown) = match entry {
                MmsiInput::Number(n) => (Some(n), n.to_string()),
                MmsiInput::Text(s) => (s.trim().parse::<u64>().ok(), s),
            };
            match number {
                Some(n) if (1..=MAX_MMSI).contains(&n) => Ok(n as u32),
                _ => Err(ConfigError::InvalidMmsi(shown)),
            }
        })
        .collect()
}

/// # Load Config
///
/// Layers, lowest to highest: built-in defaults, the JSON config file
/// (`server_ais.conf` or `--config-path`), then environment variables and
/// CLI flags. The result is validated once.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    resolve(Config::parse())
}

/// Applies the config file under `cli` and validates the merged result.
pub fn resolve(cli: Config) -> Result<RelayConfig, ConfigError> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    let mut loaded_from = None;

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path).map_err(|source| ConfigError::File {
            path: config_file_path.clone(),
            source,
        })?;
        let file_config = serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::FileFormat {
            path: config_file_path.clone(),
            source,
        })?;
        current_config = current_config.merge(file_config);
        loaded_from = Some(config_file_path);
    }

    let mut relay_config = current_config.merge(cli).validate()?;
    relay_config.config_file = loaded_from;
    Ok(relay_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let cfg = Config::default().validate().unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.filter, SubscriptionFilter::default());
        assert_eq!(cfg.upstream_url, AISSTREAM_URL);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(3));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert!(cfg.tls.is_none());
        assert!(cfg.config_file.is_none());
    }

    #[test]
    fn test_connect_timeout_setting() {
        let cfg = Config { connect_timeout_ms: Some(2500), ..Default::default() }.validate().unwrap();
        assert_eq!(cfg.connect_timeout, Duration::from_millis(2500));
        assert!(matches!(
            Config { connect_timeout_ms: Some(0), ..Default::default() }.validate(),
            Err(ConfigError::InvalidConnectTimeout)
        ));
    }

    #[test]
    fn test_missing_file_is_reported_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Config {
            config_path: Some(dir.path().join("absent.conf")),
            ..Default::default()
        };
        let cfg = resolve(cli).unwrap();
        assert!(cfg.config_file.is_none());
        assert_eq!(cfg.port, 3000);
    }

    #[test]
    fn test_single_rectangle_is_wrapped() {
        let cfg = Config {
            bbox: Some(json!([[-23.95, -46.4], [-23.85, -46.2]])),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.filter.bounding_boxes(), &[[[-23.95, -46.4], [-23.85, -46.2]]]);
    }

    #[test]
    fn test_rectangle_list_is_kept() {
        let cfg = Config {
            bbox: Some(json!([[[10, 20], [11, 21]], [[-1.5, -2.5], [1.5, 2.5]]])),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.filter.bounding_boxes().len(), 2);
        assert_eq!(cfg.filter.bounding_boxes()[1], [[-1.5, -2.5], [1.5, 2.5]]);
    }

    #[test]
    fn test_malformed_bbox_fails_fast() {
        let err = Config {
            bbox: Some(json!([[1.0, 2.0, 3.0]])),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Shape { field: "BBOX", .. }));

        let err = Config {
            bbox: Some(json!([[95.0, 0.0], [0.0, 0.0]])),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Coordinate { .. }));

        let err = Config { bbox: Some(json!([])), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyList("BBOX")));
    }

    #[test]
    fn test_message_types_validation() {
        let cfg = Config {
            message_types: Some(json!(["PositionReport", "ShipStaticData"])),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.filter.message_types(), ["PositionReport", "ShipStaticData"]);

        let err = Config { message_types: Some(json!([])), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyList("MESSAGE_TYPES")));

        let err = Config { message_types: Some(json!(["  "])), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::BlankMessageType));

        let err = Config { message_types: Some(json!("PositionReport")), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Shape { field: "MESSAGE_TYPES", .. }));
    }

    #[test]
    fn test_mmsi_accepts_numbers_and_strings() {
        let cfg = Config {
            filter_mmsi: Some(json!([368207620, "710000000"])),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.filter.ship_mmsi(), Some(&[368207620, 710000000][..]));

        let empty = Config { filter_mmsi: Some(json!([])), ..Default::default() }.validate().unwrap();
        assert_eq!(empty.filter.ship_mmsi(), None);

        let err = Config { filter_mmsi: Some(json!([1234567890])), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMmsi(_)));

        let err = Config { filter_mmsi: Some(json!(["abc"])), ..Default::default() }.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMmsi(_)));
    }

    #[test]
    fn test_port_delay_and_tls_checks() {
        assert!(matches!(Config { port: Some(0), ..Default::default() }.validate(), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            Config { reconnect_delay_ms: Some(0), ..Default::default() }.validate(),
            Err(ConfigError::InvalidDelay)
        ));
        assert!(matches!(
            Config { tls_cert_path: Some(PathBuf::from("cert.pem")), ..Default::default() }.validate(),
            Err(ConfigError::IncompleteTls)
        ));
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let cfg = Config { api_key: Some("  ".to_string()), ..Default::default() }.validate().unwrap();
        assert_eq!(cfg.api_key, None);
        let debug = format!("{:?}", Config { api_key: Some("secret".into()), ..Default::default() }.validate().unwrap());
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_file_layer_under_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({ "port": 4000, "reconnectDelayMs": 1500, "messageTypes": ["ShipStaticData"] })
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(5000),
            ..Default::default()
        };
        let cfg = resolve(cli).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(cfg.filter.message_types(), ["ShipStaticData"]);
        assert_eq!(cfg.config_file.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_unparsable_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let cli = Config { config_path: Some(file.path().to_path_buf()), ..Default::default() };
        assert!(matches!(resolve(cli), Err(ConfigError::FileFormat { .. })));
    }

    #[test]
    fn test_cli_flags_parse_json_values() {
        let cli = Config::try_parse_from([
            "server_ais",
            "--port",
            "8088",
            "--api-key",
            "abc",
            "--bbox",
            "[[-23.95,-46.4],[-23.85,-46.2]]",
            "--message-types",
            "[\"PositionReport\"]",
            "--filter-mmsi",
            "[710000000]",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(8088));
        assert_eq!(cli.bbox, Some(json!([[-23.95, -46.4], [-23.85, -46.2]])));

        assert!(Config::try_parse_from(["server_ais", "--bbox", "[[1,2]"]).is_err());
    }
}
