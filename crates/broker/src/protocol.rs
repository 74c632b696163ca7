// crates/broker/src/protocol.rs
//! Inbound control message decoding.
//!
//! [`decode`] is the only place raw client text is inspected. Anything that
//! is not a JSON object with a string `action` is an implicit start whose
//! input is the raw text, so a client may just send a FASTA blob.

use serde_json::Value;

/// Normalised inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Start {
        input: String,
        job_id: Option<String>,
    },
    Resume {
        job_id: String,
    },
    /// Non-structured text, treated as a start with the text as input.
    ImplicitStart {
        input: String,
    },
    Unrecognized {
        action: String,
    },
    /// Structured message missing a required field.
    Invalid {
        reason: String,
    },
}

pub fn decode(text: &str) -> ClientMessage {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return ClientMessage::ImplicitStart {
            input: text.to_string(),
        };
    };
    let Some(action) = map.get("action").and_then(Value::as_str) else {
        return ClientMessage::ImplicitStart {
            input: text.to_string(),
        };
    };

    let job_id = map
        .get("jobId")
        .and_then(Value::as_str)
        .map(str::to_string);

    match action {
        "start" => match map.get("fasta") {
            Some(Value::String(s)) => ClientMessage::Start {
                input: s.clone(),
                job_id,
            },
            Some(Value::Null) | None => ClientMessage::Invalid {
                reason: "start requires a 'fasta' field".to_string(),
            },
            Some(other) => ClientMessage::Start {
                input: other.to_string(),
                job_id,
            },
        },
        "resume" => match job_id {
            Some(job_id) if !job_id.is_empty() => ClientMessage::Resume { job_id },
            _ => ClientMessage::Invalid {
                reason: "resume requires a 'jobId' field".to_string(),
            },
        },
        other => ClientMessage::Unrecognized {
            action: other.to_string(),
        },
    }
}
