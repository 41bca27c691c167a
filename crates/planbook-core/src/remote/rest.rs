use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use tracing::debug;

use super::realtime::RealtimeConnector;
use super::{ChannelFilter, ChannelHandle, RemoteStore};
use crate::config::CoreConfig;
use crate::constants::columns;
use crate::error::RemoteError;
use crate::models::{Row, RowId};

/// Remote store backed by a PostgREST endpoint plus the realtime websocket.
pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    schema: String,
    realtime: RealtimeConnector,
}

impl PostgrestStore {
    pub fn new(config: &CoreConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        let remote = &config.remote;
        Ok(Self {
            client,
            base_url: remote.url.trim_end_matches('/').to_string(),
            api_key: remote.api_key.clone(),
            access_token: remote.access_token.clone(),
            schema: remote.schema.clone(),
            realtime: RealtimeConnector {
                socket_url: RealtimeConnector::socket_url_for(&remote.url),
                api_key: remote.api_key.clone(),
                access_token: remote.access_token.clone(),
                join_timeout: Duration::from_millis(config.realtime.join_timeout_ms),
                heartbeat_interval: Duration::from_millis(config.realtime.heartbeat_interval_ms),
                verbose: config.verbose,
            },
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert("Authorization", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.schema) {
            headers.insert("Accept-Profile", value.clone());
            headers.insert("Content-Profile", value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .headers(self.headers())
    }

    fn id_filter(id: &RowId) -> [(&'static str, String); 1] {
        [(columns::ID, format!("eq.{}", id))]
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait(?Send)]
impl RemoteStore for PostgrestStore {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Row>, RemoteError> {
        let response = self
            .request(Method::GET, table)
            .query(&[("select", "*")])
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;
        debug!("{} rows fetched from {}", rows.len(), table);
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, RemoteError> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| RemoteError::Unavailable {
            message: format!("insert into {} returned no row", table),
        })
    }

    async fn update(&self, table: &str, id: &RowId, fields: Row) -> Result<Row, RemoteError> {
        let response = self
            .request(Method::PATCH, table)
            .query(&Self::id_filter(id))
            .header("Prefer", "return=representation")
            .json(&fields)
            .send()
            .await?;
        let rows: Vec<Row> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or_else(|| RemoteError::NotFound {
            table: table.to_string(),
            id: id.clone(),
        })
    }

    async fn delete(&self, table: &str, id: &RowId) -> Result<(), RemoteError> {
        let response = self
            .request(Method::DELETE, table)
            .query(&Self::id_filter(id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn open_change_channel(
        &self,
        filter: &ChannelFilter,
    ) -> Result<ChannelHandle, RemoteError> {
        self.realtime.open(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;

    fn store() -> PostgrestStore {
        let config = CoreConfig {
            remote: RemoteConfig {
                url: "https://abc.example.co/".to_string(),
                api_key: "anon".to_string(),
                access_token: Some("jwt".to_string()),
                schema: "public".to_string(),
            },
            ..CoreConfig::default()
        };
        PostgrestStore::new(&config).unwrap()
    }

    #[test]
    fn test_table_url_strips_trailing_slash() {
        assert_eq!(
            store().table_url("plans"),
            "https://abc.example.co/rest/v1/plans"
        );
    }

    #[test]
    fn test_headers_prefer_access_token() {
        let headers = store().headers();
        assert_eq!(headers.get("apikey").unwrap(), "anon");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer jwt");
        assert_eq!(headers.get("Accept-Profile").unwrap(), "public");
    }

    #[test]
    fn test_id_filter_uses_eq_operator() {
        let filter = PostgrestStore::id_filter(&RowId::from(42));
        assert_eq!(filter[0], ("id", "eq.42".to_string()));
    }

    #[test]
    fn test_realtime_endpoint_derived_from_url() {
        assert_eq!(
            store().realtime.socket_url,
            "wss://abc.example.co/realtime/v1/websocket"
        );
    }
}
