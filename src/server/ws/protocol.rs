use serde::{Deserialize, Serialize};

pub const INVALID_QUERY_MESSAGE: &str =
    "Invalid query format. Please provide document_id and question.";
pub const INVALID_JSON_MESSAGE: &str = "Invalid JSON format.";

#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub document_id: Option<String>,
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Query {
        document_id: String,
        question: String,
    },
    Stop,
}

/// Parse a text frame; the error is the message to send back.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, &'static str> {
    let incoming: WsIncomingMessage =
        serde_json::from_str(text).map_err(|_| INVALID_JSON_MESSAGE)?;

    if incoming.msg_type.as_deref() == Some("stop") {
        return Ok(ClientFrame::Stop);
    }

    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    match (non_empty(incoming.document_id), non_empty(incoming.question)) {
        (Some(document_id), Some(question)) => Ok(ClientFrame::Query {
            document_id,
            question,
        }),
        _ => Err(INVALID_QUERY_MESSAGE),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack { query_id: String, timestamp: String },
    Token { content: String },
    Complete { timestamp: String },
    Error { message: String },
    Stopped,
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}
