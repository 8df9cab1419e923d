use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasq_core::{Job, JobResult, TasqError};
use uuid::Uuid;

/// Topic of envelopes carrying a [`Job`] towards a worker.
pub const JOB_TOPIC: &str = "tasq.job";

/// Topic of envelopes carrying a [`JobResult`] back to the client.
pub const RESULT_TOPIC: &str = "tasq.result";

/// Wire-format envelope shared by every broker transport.
///
/// Messages are serialized with MessagePack for compact, fast transport.
/// `correlation_id` is fresh per envelope and only used for tracing; result
/// correlation goes through the job name inside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    pub timestamp: DateTime<Utc>,

    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    /// Consumers should check this before deserializing the payload.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Default version for messages that omit the field (backward compat).
fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a new message, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        })
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize this entire message envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize a message envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    fn expect_topic(&self, topic: &str) -> Result<(), TasqError> {
        if self.topic != topic {
            return Err(TasqError::Codec(format!(
                "expected topic {topic}, got {}",
                self.topic
            )));
        }
        Ok(())
    }
}

fn codec_err(e: impl std::fmt::Display) -> TasqError {
    TasqError::Codec(e.to_string())
}

/// Envelope and encode a job for the wire.
pub fn encode_job(job: &Job) -> Result<Vec<u8>, TasqError> {
    Message::new(JOB_TOPIC, job)
        .and_then(|m| m.to_bytes())
        .map_err(codec_err)
}

/// Decode a job envelope (worker side, and broker backlog inspection).
pub fn decode_job(bytes: &[u8]) -> Result<Job, TasqError> {
    let message = Message::from_bytes(bytes).map_err(codec_err)?;
    message.expect_topic(JOB_TOPIC)?;
    message.decode().map_err(codec_err)
}

/// Envelope and encode a result for the wire (worker side).
pub fn encode_result(result: &JobResult) -> Result<Vec<u8>, TasqError> {
    Message::new(RESULT_TOPIC, result)
        .and_then(|m| m.to_bytes())
        .map_err(codec_err)
}

/// Decode a result envelope received from the broker.
pub fn decode_result(bytes: &[u8]) -> Result<JobResult, TasqError> {
    let message = Message::from_bytes(bytes).map_err(codec_err)?;
    message.expect_topic(RESULT_TOPIC)?;
    message.decode().map_err(codec_err)
}

/// Helper module for serde to handle `Vec<u8>` as raw bytes in MessagePack.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn job_survives_the_wire() {
        let job = Job::builder("add")
            .arg(1)
            .arg(json!({"nested": [1, 2]}))
            .kwarg("scale", 2.5)
            .name("a")
            .build();
        let decoded = decode_job(&encode_job(&job).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn failed_result_keeps_exc() {
        let res = JobResult::failed("b", "ValueError: bad", Duration::from_millis(12));
        let decoded = decode_result(&encode_result(&res).unwrap()).unwrap();
        assert_eq!(decoded, res);
    }

    #[test]
    fn result_decoder_rejects_job_envelopes() {
        let bytes = encode_job(&Job::builder("noop").build()).unwrap();
        let err = decode_result(&bytes).unwrap_err();
        assert!(matches!(err, TasqError::Codec(msg) if msg.contains(RESULT_TOPIC)));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(decode_result(b"\x01\x02"), Err(TasqError::Codec(_))));
    }

    #[test]
    fn envelope_version_defaults_to_one() {
        let msg = Message::new(JOB_TOPIC, &42u64).unwrap();
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.correlation_id, msg.correlation_id);
    }
}
