//! Catalog wire format
//!
//! One catalog group carries one snapshot, one JSON object per frame, each
//! terminated by a newline:
//!
//! ```text
//! frame 0: {"version":"1","$schema":"https://..."}
//! frame 1: {"active":true,"track":{"name":"camera","schema":"video","config":{...}}}
//! frame N: ...
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::SchemaRegistry;
use super::track::TrackDescriptor;
use crate::error::{Error, Result};

/// Leading frame of every catalog group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInit {
    /// Protocol version tag
    pub version: String,

    /// Informational schema URL
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl CatalogInit {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            schema: None,
        }
    }

    pub fn with_schema(mut self, url: impl Into<String>) -> Self {
        self.schema = Some(url.into());
        self
    }
}

/// One decoded track announcement
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEntry {
    /// `false` announces that a previously published track has ended
    pub active: bool,
    pub track: TrackDescriptor,
}

#[derive(Serialize)]
struct EntryFrame<'a> {
    active: bool,
    track: &'a TrackDescriptor,
}

#[derive(Deserialize)]
struct RawEntry {
    active: bool,
    track: RawDescriptor,
}

#[derive(Deserialize)]
struct RawDescriptor {
    name: String,
    schema: String,
    #[serde(default = "empty_config")]
    config: Value,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut buf = BytesMut::new().writer();
    serde_json::to_writer(&mut buf, value)?;
    let mut buf = buf.into_inner();
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Encode the init frame
pub fn encode_init(init: &CatalogInit) -> Result<Bytes> {
    encode_frame(init)
}

/// Encode one track entry frame
pub fn encode_entry(active: bool, track: &TrackDescriptor) -> Result<Bytes> {
    encode_frame(&EntryFrame { active, track })
}

/// Decode the init frame of a group
pub fn decode_init(frame: &[u8]) -> Result<CatalogInit> {
    serde_json::from_slice(frame)
        .map_err(|e| Error::decode(format!("invalid catalog init: {e}"), frame))
}

/// Decode a track entry frame, parsing its config through `registry`
pub fn decode_entry(frame: &[u8], registry: &SchemaRegistry) -> Result<TrackEntry> {
    let raw: RawEntry = serde_json::from_slice(frame)
        .map_err(|e| Error::decode(format!("invalid track entry: {e}"), frame))?;

    if raw.track.name.is_empty() {
        return Err(Error::decode("track entry with empty name", frame));
    }

    let config = registry
        .parse(&raw.track.schema, raw.track.config)
        .map_err(|e| {
            Error::decode(
                format!("invalid config for schema {:?}: {e}", raw.track.schema),
                frame,
            )
        })?;

    Ok(TrackEntry {
        active: raw.active,
        track: TrackDescriptor::new(raw.track.name, raw.track.schema, config),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::schema::{TrackConfig, VideoConfig};

    #[test]
    fn test_init_frame_layout() {
        let frame = encode_init(&CatalogInit::new("1").with_schema("https://example.com/s")).unwrap();

        assert_eq!(
            &frame[..],
            b"{\"version\":\"1\",\"$schema\":\"https://example.com/s\"}\n"
        );
    }

    #[test]
    fn test_init_without_schema_omits_field() {
        let frame = encode_init(&CatalogInit::new("1")).unwrap();
        assert_eq!(&frame[..], b"{\"version\":\"1\"}\n");
    }

    #[test]
    fn test_decode_init_without_newline() {
        let init = decode_init(br#"{"version":"1.0"}"#).unwrap();
        assert_eq!(init, CatalogInit::new("1.0"));
    }

    #[test]
    fn test_entry_frame_layout() {
        let track = TrackDescriptor::opaque("video1", "vp8", json!({}));
        let frame = encode_entry(true, &track).unwrap();

        assert_eq!(
            &frame[..],
            b"{\"active\":true,\"track\":{\"name\":\"video1\",\"schema\":\"vp8\",\"config\":{}}}\n"
        );
    }

    #[test]
    fn test_decode_typed_entry() {
        let registry = SchemaRegistry::default();
        let frame = br#"{"active":true,"track":{"name":"cam","schema":"video","config":{"codec":"vp8"}}}"#;

        let entry = decode_entry(frame, &registry).unwrap();
        assert!(entry.active);
        assert_eq!(entry.track.name(), "cam");
        assert_eq!(entry.track.config(), &TrackConfig::Video(VideoConfig::new("vp8")));
    }

    #[test]
    fn test_decode_missing_config_defaults_to_empty_object() {
        let registry = SchemaRegistry::default();
        let entry = decode_entry(br#"{"active":false,"track":{"name":"x","schema":"chat"}}"#, &registry)
            .unwrap();

        assert!(!entry.active);
        assert_eq!(entry.track.config(), &TrackConfig::Opaque(json!({})));
    }

    #[test]
    fn test_decode_invalid_json_names_content() {
        let registry = SchemaRegistry::default();
        let err = decode_entry(b"{not json", &registry).unwrap_err();

        match err {
            Error::Decode { content, .. } => assert_eq!(content, "{not json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_wrong_shape() {
        let registry = SchemaRegistry::default();

        // init frame where an entry is expected
        let err = decode_entry(br#"{"version":"1"}"#, &registry).unwrap_err();
        assert!(err.is_protocol());

        // empty name
        let err = decode_entry(br#"{"active":true,"track":{"name":"","schema":"x"}}"#, &registry)
            .unwrap_err();
        assert!(err.to_string().contains("empty name"));

        // known schema, bad config
        let err = decode_entry(
            br#"{"active":true,"track":{"name":"cam","schema":"video","config":{}}}"#,
            &registry,
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"video\""));
    }
}
