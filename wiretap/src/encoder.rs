//! Conversion of batched records into the wire payload.

use std::collections::HashMap;

use data_encoding::BASE64;
use serde_json::{json, Value};
use wiretap_config::Config;
use wiretap_sampling::SamplingMode;

use crate::record::ObservedRequest;

/// The SDK name reported with every track.
const SDK_NAME: &str = "wiretap-rust";

/// Raised when a batch cannot be encoded.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// No record in the batch could be converted.
    #[error("batch encoded to zero records")]
    EmptyBatch,

    /// Serializing the payload failed.
    #[error("failed to serialize batch payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A record that passed sampling, with its per-request decision.
#[derive(Clone, Debug)]
pub struct SampledRecord {
    /// The observed request.
    pub record: ObservedRequest,
    /// The sample rate to report for this request.
    pub effective_rate: u32,
    /// How the sampling decision was made.
    pub mode: SamplingMode,
}

/// Encodes a batch into the JSON array posted to the tracks endpoint.
///
/// This is a pure function of its inputs. A batch that yields zero tracks is
/// an error, surfaced rather than sent as an empty payload.
pub fn encode_batch(
    records: &[SampledRecord],
    session_id: &str,
    config: &Config,
    tags: &HashMap<String, String>,
) -> Result<Vec<u8>, EncodeError> {
    let tracks: Vec<Value> = records
        .iter()
        .map(|record| encode_track(record, session_id, config, tags))
        .collect();

    if tracks.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }

    Ok(serde_json::to_vec(&tracks)?)
}

fn encode_track(
    sampled: &SampledRecord,
    session_id: &str,
    config: &Config,
    tags: &HashMap<String, String>,
) -> Value {
    let record = &sampled.record;

    let mut request = json!({
        "endpoint": record.url(),
        "method": record.method(),
        "response_code": record.response_code(),
    });
    encode_payload(record, &mut request);

    let mut context = serde_json::Map::new();
    for (key, value) in &config.custom_context {
        context.insert(key.clone(), Value::String(value.clone()));
    }
    if !config.ignore_context {
        for (key, value) in record.context() {
            context.insert(key.clone(), Value::String(value.clone()));
        }
    }

    let mut track = json!({
        "tp_id": config.tp_id,
        "environment": config.environment,
        "provider": record.provider(),
        "ts": record.created_at_ms(),
        "request": request,
        "source_alias": config.source_alias,
        "context": context,
        "sampling_rate": sampled.effective_rate,
        "session_id": session_id,
        "sdk": SDK_NAME,
        "sdk_version": env!("CARGO_PKG_VERSION"),
    });

    if sampled.mode != SamplingMode::Default {
        track["sampling_mode"] = Value::String(sampled.mode.as_str().to_owned());
    }

    if !tags.is_empty() {
        track["tags"] = json!(tags);
    }

    track
}

/// Emits `post_payload` and, for encoded bodies, `post_payload_type`.
///
/// Text bodies are passed through as UTF-8. Gzipped bodies (by magic number
/// or content-encoding header) and binary bodies are base64-encoded with a
/// type marker so the backend can reverse the encoding.
fn encode_payload(record: &ObservedRequest, request: &mut Value) {
    let payload = record.payload();

    if payload.is_empty() {
        request["post_payload"] = Value::Null;
        return;
    }

    let content_encoding = record.headers().get("content-encoding");
    let content_type = record.headers().get("content-type");

    if content_encoding.is_some_and(|encoding| !encoding.is_empty()) || is_gzip(payload) {
        request["post_payload"] = Value::String(BASE64.encode(payload));
        request["post_payload_type"] = Value::String("gzip_base64".to_owned());
    } else if content_type.is_some_and(|ty| ty == "application/octet-stream")
        || std::str::from_utf8(payload).is_err()
    {
        request["post_payload"] = Value::String(BASE64.encode(payload));
        request["post_payload_type"] = Value::String("base64".to_owned());
    } else {
        request["post_payload"] = Value::String(String::from_utf8_lossy(payload).into_owned());
    }
}

fn is_gzip(payload: &[u8]) -> bool {
    payload.len() >= 2 && payload[0] == 0x1f && payload[1] == 0x8b
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use wiretap_config::Config;

    use super::*;

    fn config() -> Config {
        Config::builder("TP1")
            .environment("PRODUCTION")
            .source_alias("android app")
            .context_field("app_version", "1.2.3")
            .build()
            .unwrap()
    }

    fn sampled(record: ObservedRequest) -> SampledRecord {
        SampledRecord {
            record,
            effective_rate: 10,
            mode: SamplingMode::Default,
        }
    }

    fn decode(payload: &[u8]) -> Vec<Value> {
        serde_json::from_slice(payload).unwrap()
    }

    #[test]
    fn encodes_text_payload() {
        let record = ObservedRequest::builder("https://api.segment.io/v1/track")
            .method("POST")
            .payload(b"{\"event\":\"purchase\"}".to_vec())
            .response_code(200)
            .context_field("activity", "MainActivity")
            .finish()
            .unwrap()
            .with_provider("segment")
            .with_created_at(12345);

        let payload =
            encode_batch(&[sampled(record)], "session-1", &config(), &HashMap::new()).unwrap();
        let tracks = decode(&payload);

        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track["tp_id"], "TP1");
        assert_eq!(track["environment"], "PRODUCTION");
        assert_eq!(track["provider"], "segment");
        assert_eq!(track["ts"], 12345);
        assert_eq!(track["request"]["endpoint"], "https://api.segment.io/v1/track");
        assert_eq!(track["request"]["method"], "POST");
        assert_eq!(track["request"]["post_payload"], "{\"event\":\"purchase\"}");
        assert_eq!(track["request"].get("post_payload_type"), None);
        assert_eq!(track["request"]["response_code"], 200);
        assert_eq!(track["context"]["app_version"], "1.2.3");
        assert_eq!(track["context"]["activity"], "MainActivity");
        assert_eq!(track["sampling_rate"], 10);
        assert_eq!(track["session_id"], "session-1");
        assert_eq!(track["sdk"], SDK_NAME);
        assert_eq!(track.get("sampling_mode"), None);
        assert_eq!(track.get("tags"), None);
    }

    #[test]
    fn encodes_gzip_payload_as_base64() {
        let body = vec![0x1f, 0x8b, 0x08, 0x00];
        let record = ObservedRequest::builder("https://x/t")
            .method("POST")
            .payload(body.clone())
            .finish()
            .unwrap()
            .with_provider("segment");

        let payload =
            encode_batch(&[sampled(record)], "s", &config(), &HashMap::new()).unwrap();
        let track = &decode(&payload)[0];

        assert_eq!(track["request"]["post_payload"], BASE64.encode(&body));
        assert_eq!(track["request"]["post_payload_type"], "gzip_base64");
    }

    #[test]
    fn encodes_binary_payload_as_base64() {
        let body = vec![0xff, 0xfe, 0x00];
        let record = ObservedRequest::builder("https://x/t")
            .payload(body.clone())
            .finish()
            .unwrap()
            .with_provider("segment");

        let payload =
            encode_batch(&[sampled(record)], "s", &config(), &HashMap::new()).unwrap();
        let track = &decode(&payload)[0];

        assert_eq!(track["request"]["post_payload"], BASE64.encode(&body));
        assert_eq!(track["request"]["post_payload_type"], "base64");
    }

    #[test]
    fn empty_payload_is_null() {
        let record = ObservedRequest::builder("https://x/t")
            .finish()
            .unwrap()
            .with_provider("segment");

        let payload =
            encode_batch(&[sampled(record)], "s", &config(), &HashMap::new()).unwrap();
        let track = &decode(&payload)[0];

        assert_eq!(track["request"]["post_payload"], Value::Null);
    }

    #[test]
    fn ignore_context_drops_record_context() {
        let config = Config::builder("TP1")
            .context_field("app_version", "1.2.3")
            .ignore_context()
            .build()
            .unwrap();

        let record = ObservedRequest::builder("https://x/t")
            .context_field("activity", "MainActivity")
            .finish()
            .unwrap()
            .with_provider("segment");

        let payload = encode_batch(&[sampled(record)], "s", &config, &HashMap::new()).unwrap();
        let track = &decode(&payload)[0];

        assert_eq!(track["context"]["app_version"], "1.2.3");
        assert_eq!(track["context"].get("activity"), None);
    }

    #[test]
    fn tags_and_sampling_mode_are_reported() {
        let record = ObservedRequest::builder("https://x/t")
            .finish()
            .unwrap()
            .with_provider("segment");
        let sampled = SampledRecord {
            record,
            effective_rate: 2,
            mode: SamplingMode::RescuedByRule,
        };
        let tags = HashMap::from([("release".to_owned(), "1.0".to_owned())]);

        let payload = encode_batch(&[sampled], "s", &config(), &tags).unwrap();
        let track = &decode(&payload)[0];

        assert_eq!(track["sampling_rate"], 2);
        assert_eq!(track["sampling_mode"], "ADAPTIVE/EVENT_DICE/EVENT_MATCHED");
        assert_eq!(track["tags"]["release"], "1.0");
    }

    #[test]
    fn empty_batch_is_an_error() {
        assert!(matches!(
            encode_batch(&[], "s", &config(), &HashMap::new()),
            Err(EncodeError::EmptyBatch)
        ));
    }
}
