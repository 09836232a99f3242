//! Erizo configuration.
//!
//! Configuration is loaded from environment variables, plus an optional JSON
//! media file holding RTP header extensions and payload maps. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default number of general-purpose media workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default number of I/O workers.
pub const DEFAULT_IO_WORKER_COUNT: usize = 5;

/// Default STUN server.
pub const DEFAULT_STUN_HOST: &str = "stun.l.google.com";

/// Default STUN port.
pub const DEFAULT_STUN_PORT: u16 = 19302;

/// Default audio codec kept from the media config.
pub const DEFAULT_AUDIO_CODEC: &str = "opus";

/// Default video codec kept from the media config.
pub const DEFAULT_VIDEO_CODEC: &str = "vp8";

/// Default erizo instance ID prefix.
pub const DEFAULT_ERIZO_ID_PREFIX: &str = "erizo";

/// Erizo configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Message bus (Redis) connection URL.
    /// Protected by `SecretString` to prevent accidental logging.
    pub bus_url: SecretString,

    /// Agent that spawned this erizo; echoed in every event.
    pub agent_id: String,

    /// Unique identifier for this erizo instance.
    pub erizo_id: String,

    /// Bus channel this erizo consumes commands from (default: `erizo_id`).
    pub inbound_channel: String,

    /// Health endpoint bind address (default: "0.0.0.0:8090").
    pub health_bind_address: String,

    /// Size of the general-purpose worker pool.
    pub worker_count: usize,

    /// Size of the I/O worker pool.
    pub io_worker_count: usize,

    /// ICE settings handed to every new engine connection.
    pub ice: IceConfig,

    /// Codec and header-extension maps handed to every new engine connection.
    pub media: MediaConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bus_url", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .field("erizo_id", &self.erizo_id)
            .field("inbound_channel", &self.inbound_channel)
            .field("health_bind_address", &self.health_bind_address)
            .field("worker_count", &self.worker_count)
            .field("io_worker_count", &self.io_worker_count)
            .field("ice", &self.ice)
            .field("media", &self.media)
            .finish()
    }
}

/// ICE negotiation settings.
#[derive(Clone)]
pub struct IceConfig {
    pub stun_host: String,
    pub stun_port: u16,
    pub turn_host: String,
    pub turn_port: u16,
    pub turn_username: String,
    pub turn_password: SecretString,
    pub network_interface: String,
    pub ice_components: u32,
    pub should_trickle: bool,
    pub min_port: u16,
    pub max_port: u16,
}

impl fmt::Debug for IceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceConfig")
            .field("stun_host", &self.stun_host)
            .field("stun_port", &self.stun_port)
            .field("turn_host", &self.turn_host)
            .field("turn_port", &self.turn_port)
            .field("turn_username", &self.turn_username)
            .field("turn_password", &"[REDACTED]")
            .field("network_interface", &self.network_interface)
            .field("ice_components", &self.ice_components)
            .field("should_trickle", &self.should_trickle)
            .field("min_port", &self.min_port)
            .field("max_port", &self.max_port)
            .finish()
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_host: DEFAULT_STUN_HOST.to_string(),
            stun_port: DEFAULT_STUN_PORT,
            turn_host: String::new(),
            turn_port: 0,
            turn_username: String::new(),
            turn_password: SecretString::from(String::new()),
            network_interface: String::new(),
            ice_components: 0,
            should_trickle: false,
            min_port: 0,
            max_port: 0,
        }
    }
}

/// RTP header extension mapping (`a=extmap`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtMap {
    pub id: u32,
    pub uri: String,
}

/// RTP payload mapping (`a=rtpmap` plus feedback and fmtp lines).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMap {
    pub payload_type: u32,
    pub encoding_name: String,
    #[serde(default)]
    pub clock_rate: u32,
    #[serde(default)]
    pub channels: u32,
    #[serde(default)]
    pub feedback_types: Vec<String>,
    #[serde(default)]
    pub format_parameters: HashMap<String, String>,
}

/// Codec maps offered by every engine connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConfig {
    pub audio_codec: String,
    pub video_codec: String,
    pub ext_maps: Vec<ExtMap>,
    pub rtp_maps: Vec<RtpMap>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaFile {
    #[serde(default)]
    ext_mappings: Vec<String>,
    #[serde(default)]
    media_type: Vec<RtpMap>,
}

impl MediaConfig {
    /// Media config with no maps, only codec preferences.
    pub fn with_codecs(audio_codec: &str, video_codec: &str) -> Self {
        Self {
            audio_codec: audio_codec.to_string(),
            video_codec: video_codec.to_string(),
            ext_maps: Vec::new(),
            rtp_maps: Vec::new(),
        }
    }

    /// Parse the media JSON document, keeping only payload maps whose
    /// encoding matches the configured audio or video codec.
    pub fn from_json(json: &str, audio_codec: &str, video_codec: &str) -> Result<Self, ConfigError> {
        let file: MediaFile = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidValue(format!("media config: {e}")))?;

        let ext_maps = file
            .ext_mappings
            .into_iter()
            .enumerate()
            .map(|(index, uri)| ExtMap {
                id: u32::try_from(index).unwrap_or(u32::MAX),
                uri,
            })
            .collect();

        let rtp_maps = file
            .media_type
            .into_iter()
            .filter(|map| {
                map.encoding_name.eq_ignore_ascii_case(audio_codec)
                    || map.encoding_name.eq_ignore_ascii_case(video_codec)
            })
            .collect();

        Ok(Self {
            audio_codec: audio_codec.to_string(),
            video_codec: video_codec.to_string(),
            ext_maps,
            rtp_maps,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn string_or(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bus_url = SecretString::from(
            vars.get("BUS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("BUS_URL".to_string()))?
                .clone(),
        );

        let agent_id = vars
            .get("ERIZO_AGENT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("ERIZO_AGENT_ID".to_string()))?
            .clone();

        // Generate erizo instance ID
        let erizo_id = vars.get("ERIZO_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_ERIZO_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        let inbound_channel = vars
            .get("ERIZO_INBOUND_CHANNEL")
            .cloned()
            .unwrap_or_else(|| erizo_id.clone());

        let health_bind_address =
            string_or(vars, "ERIZO_HEALTH_BIND_ADDRESS", DEFAULT_HEALTH_BIND_ADDRESS);

        let worker_count = parse_or(vars, "ERIZO_WORKER_COUNT", DEFAULT_WORKER_COUNT);
        let io_worker_count = parse_or(vars, "ERIZO_IO_WORKER_COUNT", DEFAULT_IO_WORKER_COUNT);
        if worker_count == 0 || io_worker_count == 0 {
            return Err(ConfigError::InvalidValue(
                "worker pools need at least one worker".to_string(),
            ));
        }

        let ice = IceConfig {
            stun_host: string_or(vars, "ERIZO_STUN_HOST", DEFAULT_STUN_HOST),
            stun_port: parse_or(vars, "ERIZO_STUN_PORT", DEFAULT_STUN_PORT),
            turn_host: string_or(vars, "ERIZO_TURN_HOST", ""),
            turn_port: parse_or(vars, "ERIZO_TURN_PORT", 0),
            turn_username: string_or(vars, "ERIZO_TURN_USERNAME", ""),
            turn_password: SecretString::from(string_or(vars, "ERIZO_TURN_PASSWORD", "")),
            network_interface: string_or(vars, "ERIZO_NETWORK_INTERFACE", ""),
            ice_components: parse_or(vars, "ERIZO_ICE_COMPONENTS", 0),
            should_trickle: parse_or(vars, "ERIZO_SHOULD_TRICKLE", false),
            min_port: parse_or(vars, "ERIZO_MIN_PORT", 0),
            max_port: parse_or(vars, "ERIZO_MAX_PORT", 0),
        };
        if ice.min_port != 0 && ice.max_port != 0 && ice.min_port > ice.max_port {
            return Err(ConfigError::InvalidValue(format!(
                "ERIZO_MIN_PORT ({}) is greater than ERIZO_MAX_PORT ({})",
                ice.min_port, ice.max_port
            )));
        }

        let audio_codec = string_or(vars, "ERIZO_AUDIO_CODEC", DEFAULT_AUDIO_CODEC);
        let video_codec = string_or(vars, "ERIZO_VIDEO_CODEC", DEFAULT_VIDEO_CODEC);
        let media = match vars.get("ERIZO_MEDIA_CONFIG") {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::InvalidValue(format!("cannot read media config {path}: {e}"))
                })?;
                MediaConfig::from_json(&json, &audio_codec, &video_codec)?
            }
            None => MediaConfig::with_codecs(&audio_codec, &video_codec),
        };

        Ok(Config {
            bus_url,
            agent_id,
            erizo_id,
            inbound_channel,
            health_bind_address,
            worker_count,
            io_worker_count,
            ice,
            media,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("BUS_URL".to_string(), "redis://localhost:6379".to_string()),
            ("ERIZO_AGENT_ID".to_string(), "agent-1".to_string()),
        ])
    }

    const MEDIA_JSON: &str = r#"{
        "extMappings": [
            "urn:ietf:params:rtp-hdrext:ssrc-audio-level",
            "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"
        ],
        "mediaType": [
            {"payloadType": 111, "encodingName": "opus", "clockRate": 48000, "channels": 2,
             "formatParameters": {"minptime": "10", "useinbandfec": "1"}},
            {"payloadType": 100, "encodingName": "VP8", "clockRate": 90000,
             "feedbackTypes": ["ccm fir", "nack", "goog-remb"]},
            {"payloadType": 101, "encodingName": "VP9", "clockRate": 90000},
            {"payloadType": 0, "encodingName": "PCMU", "clockRate": 8000}
        ]
    }"#;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bus_url.expose_secret(), "redis://localhost:6379");
        assert_eq!(config.agent_id, "agent-1");
        assert!(config.erizo_id.starts_with("erizo-"));
        assert_eq!(config.inbound_channel, config.erizo_id);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.io_worker_count, DEFAULT_IO_WORKER_COUNT);
        assert_eq!(config.ice.stun_host, DEFAULT_STUN_HOST);
        assert_eq!(config.ice.stun_port, DEFAULT_STUN_PORT);
        assert!(!config.ice.should_trickle);
        assert_eq!(config.media.audio_codec, "opus");
        assert_eq!(config.media.video_codec, "vp8");
        assert!(config.media.rtp_maps.is_empty());
    }

    #[test]
    fn test_from_vars_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("ERIZO_ID".to_string(), "erizo-42".to_string());
        vars.insert("ERIZO_WORKER_COUNT".to_string(), "8".to_string());
        vars.insert("ERIZO_IO_WORKER_COUNT".to_string(), "2".to_string());
        vars.insert("ERIZO_SHOULD_TRICKLE".to_string(), "true".to_string());
        vars.insert("ERIZO_MIN_PORT".to_string(), "30000".to_string());
        vars.insert("ERIZO_MAX_PORT".to_string(), "31000".to_string());
        vars.insert("ERIZO_TURN_HOST".to_string(), "turn.example.com".to_string());
        vars.insert("ERIZO_TURN_PASSWORD".to_string(), "hunter2".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.erizo_id, "erizo-42");
        assert_eq!(config.inbound_channel, "erizo-42");
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.io_worker_count, 2);
        assert!(config.ice.should_trickle);
        assert_eq!(config.ice.min_port, 30000);
        assert_eq!(config.ice.max_port, 31000);
        assert_eq!(config.ice.turn_host, "turn.example.com");
        assert_eq!(config.ice.turn_password.expose_secret(), "hunter2");
    }

    #[test]
    fn test_inbound_channel_override() {
        let mut vars = base_vars();
        vars.insert("ERIZO_ID".to_string(), "erizo-42".to_string());
        vars.insert("ERIZO_INBOUND_CHANNEL".to_string(), "erizo_queue".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.erizo_id, "erizo-42");
        assert_eq!(config.inbound_channel, "erizo_queue");
    }

    #[test]
    fn test_missing_bus_url() {
        let mut vars = base_vars();
        vars.remove("BUS_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "BUS_URL"));
    }

    #[test]
    fn test_missing_agent_id() {
        let mut vars = base_vars();
        vars.remove("ERIZO_AGENT_ID");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ERIZO_AGENT_ID"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut vars = base_vars();
        vars.insert("ERIZO_IO_WORKER_COUNT".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_inverted_port_range_rejected() {
        let mut vars = base_vars();
        vars.insert("ERIZO_MIN_PORT".to_string(), "40000".to_string());
        vars.insert("ERIZO_MAX_PORT".to_string(), "30000".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("ERIZO_STUN_PORT".to_string(), "not-a-port".to_string());
        vars.insert("ERIZO_WORKER_COUNT".to_string(), "-3".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.ice.stun_port, DEFAULT_STUN_PORT);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
    }

    #[test]
    fn test_missing_media_file_is_invalid() {
        let mut vars = base_vars();
        vars.insert(
            "ERIZO_MEDIA_CONFIG".to_string(),
            "/nonexistent/erizo-media.json".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_media_config_filters_by_codec() {
        let media = MediaConfig::from_json(MEDIA_JSON, "opus", "vp8").unwrap();

        assert_eq!(media.ext_maps.len(), 2);
        assert_eq!(media.ext_maps.first().map(|m| m.id), Some(0));
        assert_eq!(
            media.ext_maps.get(1).map(|m| m.uri.as_str()),
            Some("http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time")
        );

        let payload_types: Vec<u32> = media.rtp_maps.iter().map(|m| m.payload_type).collect();
        assert_eq!(payload_types, vec![111, 100]);

        let opus = media.rtp_maps.first().unwrap();
        assert_eq!(opus.channels, 2);
        assert_eq!(
            opus.format_parameters.get("useinbandfec").map(String::as_str),
            Some("1")
        );
        let vp8 = media.rtp_maps.get(1).unwrap();
        assert_eq!(vp8.feedback_types.len(), 3);
    }

    #[test]
    fn test_media_config_rejects_bad_json() {
        let result = MediaConfig::from_json("{\"mediaType\": 5}", "opus", "vp8");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("ERIZO_TURN_PASSWORD".to_string(), "hunter2".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("redis://localhost:6379"));
        assert!(!debug_output.contains("hunter2"));
        assert!(debug_output.contains("agent-1"));
    }
}
