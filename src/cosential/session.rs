use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;

use super::error::ApiError;

const FIRM_ID_HEADER: &str = "x-compass-firm-id";
const API_KEY_HEADER: &str = "x-compass-api-key";

/// Minimal async session used by the sync engine.
///
/// `path` is relative to the API base URL and may already carry a query
/// string; `query` pairs are appended to it. Implementations return the
/// decoded JSON body of a 2xx response and an error for anything else.
#[async_trait::async_trait]
pub trait ApiSession: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError>;
}

/// Cosential API credentials, resolved once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub firm_id: String,
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("firm_id", &self.firm_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// reqwest-backed session carrying Basic auth and the Compass firm/API-key
/// headers on every request.
pub struct CosentialClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl std::fmt::Debug for CosentialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosentialClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl CosentialClient {
    /// Build a client. Without `timeout` the transport default applies.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            FIRM_ID_HEADER,
            HeaderValue::from_str(&credentials.firm_id).map_err(|_| ApiError::InvalidHeader {
                header: FIRM_ID_HEADER,
            })?,
        );
        let mut api_key = HeaderValue::from_str(&credentials.api_key).map_err(|_| {
            ApiError::InvalidHeader {
                header: API_KEY_HEADER,
            }
        })?;
        api_key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, api_key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: normalize_base_url(base_url),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Ensure the base URL ends in exactly one `/` so relative paths can be appended.
pub(crate) fn normalize_base_url(base_url: &str) -> String {
    format!("{}/", base_url.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl ApiSession for CosentialClient {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.url_for(path);
        tracing::debug!(url = %url, ?query, "GET");

        let mut builder = self.client.get(&url).basic_auth(
            &self.credentials.username,
            Some(&self.credentials.password),
        );
        if !query.is_empty() {
            builder = builder.query(query);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            username: "etl@example.com".into(),
            password: "hunter2".into(),
            firm_id: "1234".into(),
            api_key: "secret-key".into(),
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://compass.cosential.com"),
            "https://compass.cosential.com/"
        );
        assert_eq!(
            normalize_base_url("https://compass.cosential.com/"),
            "https://compass.cosential.com/"
        );
        assert_eq!(
            normalize_base_url("https://compass.cosential.com//"),
            "https://compass.cosential.com/"
        );
    }

    #[test]
    fn test_url_for_joins_relative_path() {
        let client =
            CosentialClient::new("https://compass.cosential.com/api", credentials(), None).unwrap();
        assert_eq!(
            client.url_for("opportunities/changes?reverse=true"),
            "https://compass.cosential.com/api/opportunities/changes?reverse=true"
        );
        assert_eq!(
            client.url_for("/contacts/7"),
            "https://compass.cosential.com/api/contacts/7"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("etl@example.com"));
        assert!(rendered.contains("1234"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn test_invalid_firm_id_header_rejected() {
        let mut creds = credentials();
        creds.firm_id = "bad\nvalue".into();
        let err = CosentialClient::new("https://compass.cosential.com/", creds, None).unwrap_err();
        assert!(matches!(
            err,
            ApiError::InvalidHeader {
                header: FIRM_ID_HEADER
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_error_propagates() {
        let client = CosentialClient::new(
            "http://127.0.0.1:1/",
            credentials(),
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = client.get("opportunities", &[]).await.unwrap_err();
        assert!(matches!(err, ApiError::Http(_)));
    }
}
