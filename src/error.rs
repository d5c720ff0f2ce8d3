use reqwest::StatusCode;
use thiserror::Error;
use url::ParseError;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Client Error: status={status}, message={message}")]
    ClientError { status: StatusCode, message: String },

    #[error("Server Error: status={status}, message={message}")]
    ServerError { status: StatusCode, message: String },

    #[error("Ticket Error: {0}")]
    TicketError(String),

    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("Socket is not open")]
    NotConnected,

    #[error("Connection supervisor has stopped")]
    SupervisorClosed,

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("HTTP Request Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),

    #[error("Invalid HTTP Header Value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}
