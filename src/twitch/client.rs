use super::backoff::{BackoffPolicy, CallState, Outcome, Sleeper};
use super::config::{TwitchConfig, USER_AGENT};
use crate::error::IngestError;
use crate::streams::{StreamRecord, StreamTable};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const CLIENT_ID_KEY: &str = "client_id";
const CLIENT_SECRET_KEY: &str = "client_secret";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Headers sent with every Helix request once authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthHeaders {
    pub client_id: String,
    pub access_token: String,
}

impl AuthHeaders {
    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// HTTP session plus the backoff loop shared by every logical call.
struct Transport {
    http: Client,
    policy: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Transport {
    /// Runs one logical call through the backoff state machine.
    async fn call_with_backoff(
        &self,
        url: &str,
        method: HttpMethod,
        params: &[(&str, String)],
        auth: Option<&AuthHeaders>,
    ) -> Result<Value, IngestError> {
        let mut state = CallState::start();
        let mut body = None;

        loop {
            state = match state {
                CallState::Attempting { accumulated } => {
                    match self.attempt(url, method, params, auth).await {
                        Ok(value) => {
                            body = Some(value);
                            self.policy.transition(state, Outcome::Success)
                        }
                        Err(e) => {
                            warn!(
                                endpoint = %url,
                                error = %e,
                                backoff_secs = accumulated.as_secs(),
                                "Request failed, backing off"
                            );
                            self.policy.transition(state, Outcome::Failure)
                        }
                    }
                }
                CallState::BackoffWait { accumulated } => {
                    debug!(endpoint = %url, delay_secs = accumulated.as_secs(), "Sleeping before retry");
                    self.sleeper.sleep(accumulated).await;
                    self.policy.transition(state, Outcome::Slept)
                }
                CallState::Succeeded => {
                    return body.ok_or_else(|| {
                        IngestError::Configuration(format!("{} succeeded without a body", url))
                    });
                }
                CallState::Exhausted { accumulated } => {
                    return Err(IngestError::BackoffExhausted {
                        endpoint: url.to_string(),
                        waited: accumulated,
                    });
                }
            };
        }
    }

    /// A single request. Every failure here is transient.
    async fn attempt(
        &self,
        url: &str,
        method: HttpMethod,
        params: &[(&str, String)],
        auth: Option<&AuthHeaders>,
    ) -> Result<Value, IngestError> {
        let transient = |source| IngestError::Transient {
            endpoint: url.to_string(),
            source,
        };

        let request = match method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
        }
        .query(params);
        let request = match auth {
            Some(auth) => request
                .header("Client-ID", &auth.client_id)
                .header("Authorization", auth.authorization()),
            None => request,
        };

        let response = request.send().await.map_err(transient)?;
        log_rate_limit(response.headers());

        response
            .error_for_status()
            .map_err(transient)?
            .json::<Value>()
            .await
            .map_err(transient)
    }
}

/// Authenticated client for the Helix streams endpoint.
///
/// The underlying connection pool lives as long as the client and is
/// released when it is dropped.
pub struct TwitchClient {
    transport: Transport,
    config: TwitchConfig,
    auth: AuthHeaders,
}

impl TwitchClient {
    /// Validates the credentials, then obtains an app access token.
    ///
    /// Missing `client_id` or `client_secret` fails before any request is
    /// made. A token response without `access_token` is not retried.
    pub async fn connect(
        credentials: &HashMap<String, String>,
        config: TwitchConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, IngestError> {
        let missing: Vec<&str> = [CLIENT_ID_KEY, CLIENT_SECRET_KEY]
            .into_iter()
            .filter(|key| !credentials.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::Configuration(format!(
                "Twitch credentials missing {}",
                missing.join(", ")
            )));
        }
        let client_id = &credentials[CLIENT_ID_KEY];
        let client_secret = &credentials[CLIENT_SECRET_KEY];

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IngestError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let transport = Transport {
            http,
            policy: BackoffPolicy::new(config.backoff_interval(), config.backoff_ceiling()),
            sleeper,
        };

        let auth = authorize(&transport, &config.auth_url, client_id, client_secret)
            .await
            .inspect_err(|e| error!(error = %e, "Error getting Twitch auth token"))?;

        Ok(Self {
            transport,
            config,
            auth,
        })
    }

    pub fn auth_headers(&self) -> &AuthHeaders {
        &self.auth
    }

    /// Pages through every live stream.
    ///
    /// Stops at the first page without rows, or after the first page that
    /// carries no cursor. Any failed page aborts the whole fetch.
    pub async fn fetch_current_streams(&self) -> Result<StreamTable, IngestError> {
        self.fetch_pages()
            .await
            .inspect_err(|e| error!(error = %e, "Error getting stream info"))
    }

    async fn fetch_pages(&self) -> Result<StreamTable, IngestError> {
        let mut table = StreamTable::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params = vec![("first", self.config.page_size.to_string())];
            if let Some(after) = &cursor {
                params.push(("after", after.clone()));
            }

            let body = self
                .transport
                .call_with_backoff(
                    &self.config.streams_url,
                    HttpMethod::Get,
                    &params,
                    Some(&self.auth),
                )
                .await?;
            pages += 1;

            let rows = match body.get("data").and_then(Value::as_array) {
                Some(rows) if !rows.is_empty() => rows,
                _ => break,
            };

            // First stream of each page shows progress.
            let first = &rows[0];
            let title = first.get("title").and_then(Value::as_str).unwrap_or_default();
            let viewers = first
                .get("viewer_count")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            info!(page = pages, title = title, viewers = viewers, "Fetched streams page");

            let records: Vec<StreamRecord> =
                rows.iter().filter_map(|row| row.as_object().cloned()).collect();
            if records.len() != rows.len() {
                warn!(
                    page = pages,
                    skipped = rows.len() - records.len(),
                    "Skipping stream entries that are not objects"
                );
            }
            table.append_page(records);

            match next_cursor(&body) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(pages = pages, streams = table.len(), "Finished fetching live streams");
        Ok(table)
    }
}

async fn authorize(
    transport: &Transport,
    auth_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<AuthHeaders, IngestError> {
    debug!("Getting Twitch OAuth token");

    let params = [
        (CLIENT_ID_KEY, client_id.to_string()),
        (CLIENT_SECRET_KEY, client_secret.to_string()),
        ("grant_type", "client_credentials".to_string()),
    ];
    let body = transport
        .call_with_backoff(auth_url, HttpMethod::Post, &params, None)
        .await?;

    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            IngestError::Configuration(format!("Twitch access token missing from {} response", auth_url))
        })?;

    Ok(AuthHeaders {
        client_id: client_id.to_string(),
        access_token: access_token.to_string(),
    })
}

fn next_cursor(body: &Value) -> Option<String> {
    body.get("pagination")
        .and_then(|p| p.get("cursor"))
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Logs the Helix rate-limit headers, when present.
fn log_rate_limit(headers: &HeaderMap) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let Some(remaining) = header("Ratelimit-Remaining") else {
        return;
    };
    let reset: Option<DateTime<Utc>> = header("Ratelimit-Reset")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    debug!(
        limit = header("Ratelimit-Limit").unwrap_or("unknown"),
        remaining = remaining,
        reset = ?reset,
        "Rate limit stats"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records requested waits without sleeping.
    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn waits(&self) -> Vec<u64> {
            self.waits.lock().unwrap().iter().map(|d| d.as_secs()).collect()
        }
    }

    #[async_trait::async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn credentials() -> HashMap<String, String> {
        HashMap::from([
            ("client_id".to_string(), "1234".to_string()),
            ("client_secret".to_string(), "ABCD".to_string()),
        ])
    }

    fn config_for(server: &ServerGuard) -> TwitchConfig {
        TwitchConfig {
            auth_url: format!("{}/oauth2/token", server.url()),
            streams_url: format!("{}/helix/streams", server.url()),
            ..TwitchConfig::default()
        }
    }

    async fn mock_auth(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/oauth2/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "1234".into()),
                Matcher::UrlEncoded("client_secret".into(), "ABCD".into()),
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "1111", "expires_in": 5000000, "token_type": "bearer"}"#)
            .create_async()
            .await
    }

    async fn connect(server: &ServerGuard, sleeper: Arc<RecordingSleeper>) -> TwitchClient {
        TwitchClient::connect(&credentials(), config_for(server), sleeper)
            .await
            .unwrap()
    }

    fn page(rows: Value, cursor: Option<&str>) -> String {
        let pagination = match cursor {
            Some(c) => json!({ "cursor": c }),
            None => json!({}),
        };
        json!({ "data": rows, "pagination": pagination }).to_string()
    }

    #[tokio::test]
    async fn test_missing_credentials_makes_no_request() {
        let mut server = Server::new_async().await;
        let auth = server
            .mock("POST", "/oauth2/token")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut creds = credentials();
        creds.remove("client_secret");
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = TwitchClient::connect(&creds, config_for(&server), sleeper.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(err.to_string().contains("client_secret"));

        let err = TwitchClient::connect(&HashMap::new(), config_for(&server), sleeper)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("client_id, client_secret"));

        auth.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_builds_auth_headers() {
        let mut server = Server::new_async().await;
        let auth = mock_auth(&mut server).await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        assert_eq!(client.auth_headers().client_id, "1234");
        assert_eq!(client.auth_headers().authorization(), "Bearer 1111");

        auth.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_access_token_is_not_retried() {
        let mut server = Server::new_async().await;
        let auth = server
            .mock("POST", "/oauth2/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message": "no token for you"}"#)
            .expect(1)
            .create_async()
            .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = TwitchClient::connect(&credentials(), config_for(&server), sleeper.clone())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::Configuration(_)));
        assert!(err.to_string().contains("access token missing"));
        assert!(sleeper.waits().is_empty());

        auth.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/oauth2/token")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let auth = mock_auth(&mut server).await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let client = connect(&server, sleeper.clone()).await;
        assert_eq!(client.auth_headers().access_token, "1111");
        assert_eq!(sleeper.waits(), vec![5]);

        failing.assert_async().await;
        auth.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_stream_data_returns_empty() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("first".into(), "100".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        let table = client.fetch_current_streams().await.unwrap();

        assert!(table.is_empty());
        assert!(table.columns().is_empty());
        streams.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_paginated_streams() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("first".into(), "100".into()))
            .match_header("Client-ID", "1234")
            .match_header("Authorization", "Bearer 1111")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(
                json!([
                    {"viewer_count": 1000, "title": "A random stream"},
                    {"viewer_count": 2000, "title": "A random stream 2"}
                ]),
                None,
            ))
            .expect(1)
            .create_async()
            .await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        let table = client.fetch_current_streams().await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.columns(), &["viewer_count", "title"]);
        let viewers: Vec<_> = table.column("viewer_count").map(|v| v.unwrap().as_u64()).collect();
        assert_eq!(viewers, vec![Some(1000), Some(2000)]);
        streams.assert_async().await;
    }

    #[tokio::test]
    async fn test_paginated_streams_follow_cursor() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let first_page = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("first".into(), "100".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(
                json!([
                    {"viewer_count": 1000, "title": "A random stream"},
                    {"viewer_count": 2000, "title": "A random stream 2"}
                ]),
                Some("1234"),
            ))
            .expect(1)
            .create_async()
            .await;
        let second_page = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("first".into(), "100".into()),
                Matcher::UrlEncoded("after".into(), "1234".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(
                json!([
                    {"viewer_count": 3000, "title": "A random stream 3"},
                    {"viewer_count": 4000, "title": "A random stream 4"}
                ]),
                None,
            ))
            .expect(1)
            .create_async()
            .await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        let table = client.fetch_current_streams().await.unwrap();

        let viewers: Vec<_> = table.column("viewer_count").map(|v| v.unwrap().as_u64().unwrap()).collect();
        assert_eq!(viewers, vec![1000, 2000, 3000, 4000]);
        first_page.assert_async().await;
        second_page.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_cursor_stops_pagination() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(json!([{"id": "1"}]), Some("")))
            .expect(1)
            .create_async()
            .await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        assert_eq!(client.fetch_current_streams().await.unwrap().len(), 1);
        streams.assert_async().await;
    }

    #[tokio::test]
    async fn test_backoff_then_success() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let failing = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(3)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(json!([{"id": "1", "title": "back"}]), None))
            .expect(1)
            .create_async()
            .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let client = connect(&server, sleeper.clone()).await;
        let table = client.fetch_current_streams().await.unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(sleeper.waits(), vec![5, 10, 15]);
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_backoff_exhausted_stops_requesting() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let failing = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(6)
            .create_async()
            .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let client = connect(&server, sleeper.clone()).await;
        let err = client.fetch_current_streams().await.unwrap_err();

        match &err {
            IngestError::BackoffExhausted { endpoint, waited } => {
                assert!(endpoint.ends_with("/helix/streams"));
                assert_eq!(*waited, Duration::from_secs(30));
            }
            other => panic!("expected BackoffExhausted, got {:?}", other),
        }
        assert_eq!(sleeper.waits(), vec![5, 10, 15, 20, 25]);
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_auth_server_backs_off() {
        // Nothing listens on the discard port, so every attempt is refused.
        let config = TwitchConfig {
            auth_url: "http://127.0.0.1:9/oauth2/token".to_string(),
            ..TwitchConfig::default()
        };
        let sleeper = Arc::new(RecordingSleeper::default());

        let err = TwitchClient::connect(&credentials(), config, sleeper.clone())
            .await
            .err()
            .unwrap();
        match &err {
            IngestError::BackoffExhausted { endpoint, waited } => {
                assert_eq!(endpoint, "http://127.0.0.1:9/oauth2/token");
                assert_eq!(*waited, Duration::from_secs(30));
            }
            other => panic!("expected BackoffExhausted, got {:?}", other),
        }
        assert_eq!(sleeper.waits(), vec![5, 10, 15, 20, 25]);
    }

    #[tokio::test]
    async fn test_failure_mid_pagination_aborts_fetch() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let _first_page = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("first".into(), "100".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page(json!([{"id": "1"}]), Some("next")))
            .expect(1)
            .create_async()
            .await;
        let _second_page = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("after".into(), "next".into()))
            .with_status(502)
            .create_async()
            .await;

        let client = connect(&server, Arc::new(RecordingSleeper::default())).await;
        let err = client.fetch_current_streams().await.unwrap_err();
        assert!(matches!(err, IngestError::BackoffExhausted { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_transient() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth(&mut server).await;
        let garbage = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>oops</html>")
            .expect(1)
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("Ratelimit-Limit", "800")
            .with_header("Ratelimit-Remaining", "799")
            .with_header("Ratelimit-Reset", "1709821509")
            .with_body(page(json!([]), None))
            .create_async()
            .await;
        let sleeper = Arc::new(RecordingSleeper::default());

        let client = connect(&server, sleeper.clone()).await;
        assert!(client.fetch_current_streams().await.unwrap().is_empty());
        assert_eq!(sleeper.waits(), vec![5]);
        garbage.assert_async().await;
    }

    #[test]
    fn test_next_cursor() {
        assert_eq!(
            next_cursor(&json!({"pagination": {"cursor": "abc"}})),
            Some("abc".to_string())
        );
        assert_eq!(next_cursor(&json!({"pagination": {}})), None);
        assert_eq!(next_cursor(&json!({})), None);
        assert_eq!(next_cursor(&json!({"pagination": {"cursor": ""}})), None);
    }
}
