use crate::error::{ChatError, Result};
use crate::types::Ticket;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const STAGING_WS_URL: &str = "wss://chat-staging.example.com/ws/chat";
const PRODUCTION_WS_URL: &str = "wss://chat.example.com/ws/chat";
const STAGING_API_URL: &str = "https://chat-staging.example.com";
const PRODUCTION_API_URL: &str = "https://chat.example.com";

const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

const TICKET_QUERY_PARAM: &str = "chatTicket";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" | "debug" | "dev" => Ok(Environment::Staging),
            "production" | "prod" | "release" => Ok(Environment::Production),
            other => Err(ChatError::ConfigError(format!(
                "unknown environment '{}', expected 'staging' or 'production'",
                other
            ))),
        }
    }
}

/// Connection settings shared by the ticket client and the supervisor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatConfig {
    /// Chat socket endpoint without the ticket query, e.g. `wss://host/ws/chat`.
    pub ws_url: Url,
    /// Base URL of the REST API that issues tickets.
    pub api_url: Url,
    pub heartbeat_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Capacity of the inbound event fan-out; slow subscribers lag past this.
    pub event_buffer: usize,
    pub http_timeout: Duration,
}

impl ChatConfig {
    pub fn for_environment(environment: Environment) -> Result<Self> {
        let (ws_url, api_url) = match environment {
            Environment::Staging => (STAGING_WS_URL, STAGING_API_URL),
            Environment::Production => (PRODUCTION_WS_URL, PRODUCTION_API_URL),
        };
        Ok(Self {
            ws_url: Url::parse(ws_url)?,
            api_url: Url::parse(api_url)?,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    /// Builds a config from `CHAT_ENVIRONMENT`, `CHAT_WS_URL` and `CHAT_API_URL`.
    pub fn from_env() -> Result<Self> {
        let environment = match std::env::var("CHAT_ENVIRONMENT") {
            Ok(value) => value.parse()?,
            Err(_) => Environment::default(),
        };
        let mut config = Self::for_environment(environment)?;
        if let Ok(ws_url) = std::env::var("CHAT_WS_URL") {
            config.ws_url = Url::parse(&ws_url)?;
        }
        if let Ok(api_url) = std::env::var("CHAT_API_URL") {
            config.api_url = Url::parse(&api_url)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.ws_url.scheme(), "ws" | "wss") {
            return Err(ChatError::ConfigError(format!(
                "socket URL must use ws:// or wss://, got '{}'",
                self.ws_url.scheme()
            )));
        }
        if !matches!(self.api_url.scheme(), "http" | "https") {
            return Err(ChatError::ConfigError(format!(
                "API URL must use http:// or https://, got '{}'",
                self.api_url.scheme()
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ChatError::ConfigError(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.backoff_base.is_zero() || self.backoff_max < self.backoff_base {
            return Err(ChatError::ConfigError(
                "backoff base must be non-zero and not exceed the backoff cap".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ChatError::ConfigError(
                "event buffer must hold at least one event".to_string(),
            ));
        }
        Ok(())
    }

    /// The socket endpoint for one connection attempt.
    pub fn socket_url(&self, ticket: &Ticket) -> Result<Url> {
        if ticket.is_blank() {
            return Err(ChatError::TicketError("ticket is empty".to_string()));
        }
        let mut url = self.ws_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair(TICKET_QUERY_PARAM, ticket.as_str());
        Ok(url)
    }
}
