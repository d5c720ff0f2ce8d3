//! JSON text-frame codec for the chat wire format.
//!
//! Every frame is a single JSON object:
//!
//! ```text
//! { "chatType": "TALK" | "PING" | "PONG", "content": string | null }
//! ```

use crate::types::{ChatType, WireFrame};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("invalid frame JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("TALK frame without content")]
    MissingContent,

    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    chat_type: ChatType,
    content: Option<String>,
}

/// Encodes a frame into its JSON text form.
pub fn encode(frame: &WireFrame) -> String {
    let message = WireMessage {
        chat_type: frame.chat_type(),
        content: match frame {
            WireFrame::Talk(text) => Some(text.clone()),
            WireFrame::Ping | WireFrame::Pong => None,
        },
    };
    // A struct of an enum and an optional string cannot fail to serialize.
    serde_json::to_string(&message).unwrap_or_default()
}

/// Decodes one inbound text frame.
pub fn decode(text: &str) -> Result<WireFrame, DecodeError> {
    if text.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    let message: WireMessage = serde_json::from_str(text)?;
    match message.chat_type {
        ChatType::Talk => message
            .content
            .map(WireFrame::Talk)
            .ok_or(DecodeError::MissingContent),
        ChatType::Ping => Ok(WireFrame::Ping),
        ChatType::Pong => Ok(WireFrame::Pong),
    }
}

/// Decodes a binary frame, which must carry UTF-8 JSON.
pub fn decode_binary(bytes: &[u8]) -> Result<WireFrame, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    decode(text)
}
