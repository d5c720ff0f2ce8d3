use super::TicketClient;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::types::{ErrorResponse, IssueTicketResponse, RoomId, Ticket};
use async_trait::async_trait;
use log::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client as HttpClient, Response};
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Issues chat tickets through the REST API.
///
/// # Examples
///
/// ```no_run
/// use chat_connector_rs::config::{ChatConfig, Environment};
/// use chat_connector_rs::rest::{HttpTicketClient, TicketClient};
/// use chat_connector_rs::types::RoomId;
///
/// #[tokio::main]
/// async fn main() {
///     let config = ChatConfig::for_environment(Environment::Staging).unwrap();
///     let client = HttpTicketClient::new(&config, Some("access-token".to_string()))
///         .expect("Failed to create ticket client");
///     let ticket = client
///         .issue_ticket(&RoomId::from("42"))
///         .await
///         .expect("Failed to issue ticket");
///     println!("{:?}", ticket);
/// }
/// ```
#[derive(Clone)]
pub struct HttpTicketClient {
    http_client: HttpClient,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpTicketClient {
    pub fn new(config: &ChatConfig, access_token: Option<String>) -> Result<Self> {
        Self::build(config.api_url.clone(), access_token, config.http_timeout)
    }

    /// Points the client at an arbitrary API base URL, e.g. a local mock server.
    pub fn with_base_url(
        base_url: &str,
        access_token: Option<String>,
        timeout_sec: Option<u64>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_sec.unwrap_or(DEFAULT_TIMEOUT_SECONDS));
        Self::build(Url::parse(base_url)?, access_token, timeout)
    }

    fn build(base_url: Url, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
            access_token,
        })
    }

    fn ticket_url(&self, room_id: &RoomId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::ConfigError(format!("'{}' cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "chat", "rooms", room_id.as_str(), "tickets"]);
        Ok(url)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.access_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Maps non-success statuses to client/server errors, using the server's
    /// `message` field when the body carries one.
    async fn handle_response(response: Response) -> Result<IssueTicketResponse> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<IssueTicketResponse>().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body
                .message
                .unwrap_or_else(|| "Unknown error message".to_string()),
            Err(_) => format!(
                "Request failed with status {} (could not parse error body)",
                status
            ),
        };
        if status.is_client_error() {
            Err(ChatError::ClientError { status, message })
        } else {
            Err(ChatError::ServerError { status, message })
        }
    }
}

#[async_trait]
impl TicketClient for HttpTicketClient {
    async fn issue_ticket(&self, room_id: &RoomId) -> Result<Ticket> {
        let url = self.ticket_url(room_id)?;
        debug!("[Tickets] Requesting ticket for room {}", room_id);
        let response = self
            .http_client
            .post(url)
            .headers(self.headers()?)
            .send()
            .await?;
        let body = Self::handle_response(response).await?;

        let ticket = body
            .chat_ticket
            .map(Ticket::new)
            .filter(|ticket| !ticket.is_blank())
            .ok_or_else(|| ChatError::TicketError("response carried no ticket".to_string()))?;
        debug!(
            "[Tickets] Issued ticket for room {} ({} chars)",
            room_id,
            ticket.as_str().len()
        );
        Ok(ticket)
    }
}
