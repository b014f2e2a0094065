//! JSON-over-HTTP implementation of [`BoardApi`].
//!
//! # Security Note - Logging
//!
//! The API token is kept in a [`SecretBox`] and only exposed when the
//! `Authorization` header is built. Request URLs and bodies never contain it.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::BoardApi;
use super::error::{ApiError, failure_from_reqwest};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::{
    BoardId, BoardLayout, ColumnId, NewTicket, RankUpdate, Ticket, TicketId, TicketPatch,
};

pub struct HttpBoardApi {
    client: Client,
    base_url: Url,
    token: Option<SecretBox<String>>,
}

impl fmt::Debug for HttpBoardApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBoardApi")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveBody<'a> {
    column_id: &'a ColumnId,
}

impl HttpBoardApi {
    /// Create a client from configuration.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let base = config.api_base_url().ok_or_else(|| {
            SyncError::Config(
                "API base URL not configured. Set KANBAN_SYNC_API_URL or api.base_url".to_string(),
            )
        })?;
        Self::new(&base, config.api_token(), config.api_timeout())
    }

    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid API base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "API base URL '{base_url}' cannot have paths appended"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.map(|t| SecretBox::new(Box::new(t))),
        })
    }

    /// Build the URL for `segments` below the base URL. Segments are
    /// percent-encoded, so ids cannot escape their path position.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Network(failure_from_reqwest(&e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body
        };
        tracing::warn!(status = status.as_u16(), "board API request failed");
        Err(ApiError::with_status(message, status).into())
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Network(failure_from_reqwest(&e)))
    }
}

impl BoardApi for HttpBoardApi {
    async fn move_ticket(&self, ticket_id: &TicketId, target_column: &ColumnId) -> Result<Ticket> {
        let request = self
            .request(Method::POST, &["tickets", ticket_id.as_str(), "move"])
            .json(&MoveBody {
                column_id: target_column,
            });
        self.send_json(request).await
    }

    async fn bulk_update_ranks(
        &self,
        board_id: &BoardId,
        updates: &[RankUpdate],
    ) -> Result<Vec<Ticket>> {
        let request = self
            .request(Method::PUT, &["boards", board_id.as_str(), "ranks"])
            .json(updates);
        self.send_json(request).await
    }

    async fn update_ticket(&self, ticket_id: &TicketId, patch: &TicketPatch) -> Result<Ticket> {
        let request = self
            .request(Method::PATCH, &["tickets", ticket_id.as_str()])
            .json(patch);
        self.send_json(request).await
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket> {
        let request = self.request(Method::POST, &["tickets"]).json(ticket);
        self.send_json(request).await
    }

    async fn delete_ticket(&self, ticket_id: &TicketId) -> Result<()> {
        let request = self.request(Method::DELETE, &["tickets", ticket_id.as_str()]);
        self.send(request).await?;
        Ok(())
    }

    async fn list_tickets_by_board(&self, board_id: &BoardId) -> Result<Vec<Ticket>> {
        let request = self.request(Method::GET, &["boards", board_id.as_str(), "tickets"]);
        self.send_json(request).await
    }

    async fn list_archived_tickets_by_board(&self, board_id: &BoardId) -> Result<Vec<Ticket>> {
        let request = self.request(
            Method::GET,
            &["boards", board_id.as_str(), "tickets", "archived"],
        );
        self.send_json(request).await
    }

    async fn get_board(&self, board_id: &BoardId) -> Result<BoardLayout> {
        let request = self.request(Method::GET, &["boards", board_id.as_str()]);
        self.send_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpBoardApi {
        HttpBoardApi::new(base, Some("tok".to_string()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_appends_segments() {
        let api = api("https://boards.example.com/api/v2/");
        assert_eq!(
            api.endpoint(&["boards", "b-1", "ranks"]).as_str(),
            "https://boards.example.com/api/v2/boards/b-1/ranks"
        );

        let api = api_without_slash();
        assert_eq!(
            api.endpoint(&["tickets", "t-1"]).as_str(),
            "https://boards.example.com/api/tickets/t-1"
        );
    }

    fn api_without_slash() -> HttpBoardApi {
        api("https://boards.example.com/api")
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let api = api("https://boards.example.com/");
        assert_eq!(
            api.endpoint(&["tickets", "../admin"]).as_str(),
            "https://boards.example.com/tickets/..%2Fadmin"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpBoardApi::new("not a url", None, Duration::from_secs(1)),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            HttpBoardApi::new("mailto:someone@example.com", None, Duration::from_secs(1)),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", api("https://boards.example.com/"));
        assert!(!debug.contains("tok\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
