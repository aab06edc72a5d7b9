use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{Command, CurrentState, PlaybackCommand, QueueRangeResponse, Topic, TrackDescriptor};
use crate::error::{Result, SyncError};

const SEEK_PREFIX: &str = "SEEK_TO";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireState {
    queue_hash: i64,
    queue_size: i32,
    current_index: i32,
    is_playing: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    queue_hash: i64,
    #[serde(default)]
    track_list: BTreeMap<String, TrackDescriptor>,
    /// Base64 encoded blobs.
    #[serde(default)]
    artwork_assets: BTreeMap<String, String>,
}

pub fn encode_state(state: &CurrentState) -> Result<Bytes> {
    let wire = WireState {
        queue_hash: state.queue_hash,
        queue_size: to_wire_int(Topic::CurrentState, state.queue_size)?,
        current_index: to_wire_int(Topic::CurrentState, state.current_index)?,
        is_playing: state.is_playing,
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

pub fn decode_state(payload: &[u8]) -> Result<CurrentState> {
    let wire: WireState = serde_json::from_slice(payload)?;
    let queue_size = from_wire_int(Topic::CurrentState, "queueSize", wire.queue_size)?;
    let current_index = from_wire_int(Topic::CurrentState, "currentIndex", wire.current_index)?;
    let state = CurrentState::new(wire.queue_hash, queue_size, current_index, wire.is_playing);
    state.validate()?;
    Ok(state)
}

pub fn encode_response(response: &QueueRangeResponse) -> Result<Bytes> {
    let wire = WireResponse {
        queue_hash: response.queue_hash,
        track_list: response
            .tracks
            .iter()
            .map(|(index, track)| (index.to_string(), track.clone()))
            .collect(),
        artwork_assets: response
            .artwork
            .iter()
            .map(|(artwork_ref, blob)| (artwork_ref.clone(), STANDARD.encode(blob)))
            .collect(),
    };
    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Decodes a `queue_response` payload.
///
/// Track keys that are not indices are skipped. An artwork blob that is not
/// valid base64 is dropped; the tracks referencing it simply have no artwork.
pub fn decode_response(payload: &[u8]) -> Result<QueueRangeResponse> {
    let wire: WireResponse = serde_json::from_slice(payload)?;
    let mut response = QueueRangeResponse::new(wire.queue_hash);

    for (key, track) in wire.track_list {
        match key.parse::<usize>() {
            Ok(index) => {
                response.tracks.insert(index, track);
            }
            Err(_) => debug!("Ignoring non-index track key `{}`", key),
        }
    }

    for (artwork_ref, encoded) in wire.artwork_assets {
        match STANDARD.decode(encoded.as_bytes()) {
            Ok(blob) => {
                response.artwork.insert(artwork_ref, Bytes::from(blob));
            }
            Err(e) => warn!("⚠️ Dropping undecodable artwork blob `{}`: {}", artwork_ref, e),
        }
    }

    Ok(response)
}

pub fn encode_command(command: &Command) -> Bytes {
    match command {
        Command::Playback(playback) => Bytes::from_static(playback.as_str().as_bytes()),
        Command::SeekTo(index) => Bytes::from(format!("{}:{}", SEEK_PREFIX, index)),
        Command::RequestQueue(indices) => Bytes::from(
            indices
                .iter()
                .map(|index| index.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// Decodes a companion → host message. Host → companion topics are rejected.
pub fn decode_command(topic: Topic, payload: &[u8]) -> Result<Command> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| SyncError::malformed(topic.as_str(), e.to_string()))?
        .trim();

    match topic {
        Topic::PlaybackCommand => PlaybackCommand::from_name(text)
            .map(Command::Playback)
            .ok_or_else(|| SyncError::malformed(topic.as_str(), format!("unknown command `{}`", text))),
        Topic::RequestSeek => {
            let (name, index) = text
                .split_once(':')
                .ok_or_else(|| SyncError::malformed(topic.as_str(), "missing `:` separator"))?;
            if name.trim() != SEEK_PREFIX {
                return Err(SyncError::malformed(
                    topic.as_str(),
                    format!("unknown command `{}`", name),
                ));
            }
            let index = index
                .trim()
                .parse::<usize>()
                .map_err(|e| SyncError::malformed(topic.as_str(), e.to_string()))?;
            Ok(Command::SeekTo(index))
        }
        Topic::RequestQueue => {
            if text.is_empty() {
                return Err(SyncError::malformed(topic.as_str(), "empty index list"));
            }
            let indices = text
                .split(',')
                .map(|part| part.trim().parse::<usize>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SyncError::malformed(topic.as_str(), e.to_string()))?;
            Ok(Command::RequestQueue(indices))
        }
        Topic::CurrentState | Topic::QueueResponse => Err(SyncError::malformed(
            topic.as_str(),
            "not a companion command topic",
        )),
    }
}

fn to_wire_int(topic: Topic, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| SyncError::malformed(topic.as_str(), format!("{} does not fit in int32", value)))
}

fn from_wire_int(topic: Topic, field: &str, value: i32) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| SyncError::malformed(topic.as_str(), format!("negative `{}`: {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_uses_camel_case_keys() {
        let payload = encode_state(&CurrentState::new(-42, 100, 7, true)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "queueHash": -42,
                "queueSize": 100,
                "currentIndex": 7,
                "isPlaying": true
            })
        );
    }

    #[test]
    fn test_state_rejects_negative_and_out_of_range_values() {
        let negative = br#"{"queueHash":1,"queueSize":-1,"currentIndex":0,"isPlaying":false}"#;
        assert!(matches!(decode_state(negative), Err(SyncError::Malformed { .. })));

        let past_end = br#"{"queueHash":1,"queueSize":3,"currentIndex":3,"isPlaying":false}"#;
        assert!(matches!(decode_state(past_end), Err(SyncError::InvalidState { .. })));
    }

    #[test]
    fn test_response_layout_and_decoding() {
        let mut response = QueueRangeResponse::new(99);
        response
            .tracks
            .insert(5, TrackDescriptor::new("Song", "Band", "Record", "https://img/a"));
        response
            .artwork
            .insert("https://img/a".to_string(), Bytes::from_static(&[1, 2, 3]));

        let payload = encode_response(&response).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["trackList"]["5"]["trackName"], "Song");
        assert_eq!(json["trackList"]["5"]["artworkUrl"], "https://img/a");
        assert_eq!(json["artworkAssets"]["https://img/a"], "AQID");

        assert_eq!(decode_response(&payload).unwrap(), response);
    }

    #[test]
    fn test_response_skips_bad_keys_and_blobs() {
        let payload = br#"{
            "queueHash": 3,
            "trackList": {
                "x": {"trackName": "bad"},
                "2": {"trackName": "ok", "artistName": "a"}
            },
            "artworkAssets": {"u": "***"}
        }"#;
        let response = decode_response(payload).unwrap();
        assert_eq!(response.tracks.len(), 1);
        assert_eq!(response.tracks[&2].title, "ok");
        assert_eq!(response.tracks[&2].album, "");
        assert!(response.artwork.is_empty());
    }

    #[test]
    fn test_command_payloads() {
        assert_eq!(
            encode_command(&Command::Playback(PlaybackCommand::PlayPause)),
            Bytes::from_static(b"PLAY_PAUSE")
        );
        assert_eq!(encode_command(&Command::SeekTo(12)), Bytes::from_static(b"SEEK_TO:12"));
        assert_eq!(
            encode_command(&Command::RequestQueue(vec![4, 5, 9])),
            Bytes::from_static(b"4,5,9")
        );
    }

    #[test]
    fn test_command_decoding() {
        assert_eq!(
            decode_command(Topic::PlaybackCommand, b"REQUEST_STATE").unwrap(),
            Command::Playback(PlaybackCommand::RequestState)
        );
        assert_eq!(decode_command(Topic::RequestSeek, b"SEEK_TO:3").unwrap(), Command::SeekTo(3));
        assert_eq!(
            decode_command(Topic::RequestQueue, b"1, 2,3").unwrap(),
            Command::RequestQueue(vec![1, 2, 3])
        );

        assert!(decode_command(Topic::PlaybackCommand, b"SHUFFLE").is_err());
        assert!(decode_command(Topic::RequestSeek, b"SEEK_TO:-1").is_err());
        assert!(decode_command(Topic::RequestSeek, b"JUMP:1").is_err());
        assert!(decode_command(Topic::RequestQueue, b"").is_err());
        assert!(decode_command(Topic::RequestQueue, b"1,,2").is_err());
        assert!(decode_command(Topic::CurrentState, b"NEXT").is_err());
    }
}
