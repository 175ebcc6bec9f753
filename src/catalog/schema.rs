//! Schema-tagged track configurations
//!
//! The `config` object of a track descriptor is shaped differently for every
//! `schema` tag. Known tags decode into typed structs; any other tag is kept
//! as an opaque JSON value and re-encoded byte-for-byte equivalent.
//!
//! Unknown keys inside a known config are preserved in `extra`, so a relay
//! that re-publishes a catalog does not lose fields it does not understand.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema tag for video tracks
pub const SCHEMA_VIDEO: &str = "video";
/// Schema tag for audio tracks
pub const SCHEMA_AUDIO: &str = "audio";
/// Schema tag for participant profile tracks
pub const SCHEMA_PROFILE: &str = "profile";

/// Decoder configuration for a video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    /// Codec string (e.g., "vp8", "avc1.64001f")
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coded_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coded_height: Option<u32>,
    /// Target bitrate in bits per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<f64>,
    /// Codec-specific description (base64 or hex, as produced by the encoder)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VideoConfig {
    /// Create a config with only the codec set
    pub fn new(codec: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            coded_width: None,
            coded_height: None,
            bitrate: None,
            framerate: None,
            description: None,
            extra: Map::new(),
        }
    }

    /// Set the coded dimensions
    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.coded_width = Some(width);
        self.coded_height = Some(height);
        self
    }

    /// Set the bitrate
    pub fn bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    /// Set the framerate
    pub fn framerate(mut self, framerate: f64) -> Self {
        self.framerate = Some(framerate);
        self
    }
}

/// Decoder configuration for an audio track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    /// Codec string (e.g., "opus", "mp4a.40.2")
    pub codec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AudioConfig {
    /// Create a config with only the codec set
    pub fn new(codec: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            sample_rate: None,
            number_of_channels: None,
            bitrate: None,
            description: None,
            extra: Map::new(),
        }
    }

    /// Set sample rate and channel count
    pub fn format(mut self, sample_rate: u32, channels: u8) -> Self {
        self.sample_rate = Some(sample_rate);
        self.number_of_channels = Some(channels);
        self
    }
}

/// Participant profile published alongside media tracks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Track configuration, keyed by the descriptor's schema tag
///
/// Serializes as the bare config object; the tag travels next to it in the
/// descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackConfig {
    Video(VideoConfig),
    Audio(AudioConfig),
    Profile(ProfileConfig),
    /// Config for a schema this side does not interpret
    Opaque(Value),
}

impl TrackConfig {
    /// Schema tag implied by the variant, if it has one
    pub fn schema(&self) -> Option<&'static str> {
        match self {
            TrackConfig::Video(_) => Some(SCHEMA_VIDEO),
            TrackConfig::Audio(_) => Some(SCHEMA_AUDIO),
            TrackConfig::Profile(_) => Some(SCHEMA_PROFILE),
            TrackConfig::Opaque(_) => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, TrackConfig::Opaque(_))
    }
}

/// Parser turning a raw config object into a [`TrackConfig`]
pub type ConfigParser = fn(Value) -> Result<TrackConfig, serde_json::Error>;

fn parse_video(value: Value) -> Result<TrackConfig, serde_json::Error> {
    serde_json::from_value(value).map(TrackConfig::Video)
}

fn parse_audio(value: Value) -> Result<TrackConfig, serde_json::Error> {
    serde_json::from_value(value).map(TrackConfig::Audio)
}

fn parse_profile(value: Value) -> Result<TrackConfig, serde_json::Error> {
    serde_json::from_value(value).map(TrackConfig::Profile)
}

/// Registry mapping schema tags to typed config parsers
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    parsers: HashMap<String, ConfigParser>,
}

impl SchemaRegistry {
    /// Create a registry that treats every schema as opaque
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Register (or replace) the parser for a schema tag
    pub fn register(&mut self, schema: impl Into<String>, parser: ConfigParser) -> &mut Self {
        self.parsers.insert(schema.into(), parser);
        self
    }

    /// Whether a typed parser exists for this tag
    pub fn knows(&self, schema: &str) -> bool {
        self.parsers.contains_key(schema)
    }

    /// Parse a raw config for the given schema tag
    pub fn parse(&self, schema: &str, config: Value) -> Result<TrackConfig, serde_json::Error> {
        match self.parsers.get(schema) {
            Some(parser) => parser(config),
            None => Ok(TrackConfig::Opaque(config)),
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(SCHEMA_VIDEO, parse_video)
            .register(SCHEMA_AUDIO, parse_audio)
            .register(SCHEMA_PROFILE, parse_profile);
        registry
    }
}
