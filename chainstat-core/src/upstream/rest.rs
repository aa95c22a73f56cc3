// REST client for the CI server's HTTP API, with bounded retry and backoff.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::types::BuildId;

use super::raw::{RawBuild, RawProblem, RawTestOccurrence};
use super::traits::UpstreamClient;

/// Maximum retry attempts for transient failures.
const MAX_RETRIES: u32 = 5;
/// Page size for test/problem occurrence listings.
const PAGE_SIZE: u32 = 1000;

/// Authenticated REST connection to one upstream CI server.
#[derive(Debug)]
pub struct RestClient {
    server_code: String,
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// Installs the process-default rustls crypto provider exactly once.
///
/// reqwest is built with the `-no-provider` feature, so `Client::new` panics
/// unless a provider has been installed before the first client is created.
static INSTALL_CRYPTO_PROVIDER: std::sync::Once = std::sync::Once::new();

impl RestClient {
    pub fn new(server_code: impl Into<String>, base_url: impl Into<String>, token: Option<String>) -> Self {
        INSTALL_CRYPTO_PROVIDER.call_once(|| {
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        });
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            server_code: server_code.into(),
            base_url,
            token,
            client: Client::new(),
        }
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{path}", self.base_url);
        let mut delay = Duration::from_secs(1);

        for attempt in 0..=MAX_RETRIES {
            let mut req = self.client.get(&url).header("Accept", "application/json");
            if let Some(token) = &self.token {
                req = req.header("Authorization", format!("Bearer {token}"));
            }

            debug!(server = %self.server_code, url = %url, attempt, "upstream request");

            let resp = match req.send().await {
                Ok(resp) => resp,
                // Connection-level failure: retry with backoff.
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(attempt, error = %e, "upstream connection failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(60));
                    continue;
                }
                Err(e) => return Err(UpstreamError::Transient(format!("{url}: {e}"))),
            };

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json()
                    .await
                    .map_err(|e| UpstreamError::Api(format!("parse response from {url}: {e}")));
            }

            match status {
                StatusCode::NOT_FOUND => {
                    return Err(UpstreamError::Api(format!("{url}: 404")));
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(UpstreamError::Auth(format!(
                        "server {} rejected credentials ({status})",
                        self.server_code
                    )));
                }
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
                    if attempt < MAX_RETRIES =>
                {
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map_or(delay, Duration::from_secs);
                    warn!(
                        attempt,
                        status = status.as_u16(),
                        wait_secs = wait.as_secs(),
                        "upstream throttled, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    delay = (delay * 2).min(Duration::from_secs(60));
                }
                _ if status.is_server_error() && attempt < MAX_RETRIES => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(60));
                }
                _ => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(UpstreamError::Api(format!("{url}: {status}: {body}")));
                }
            }
        }

        Err(UpstreamError::Transient(format!(
            "max retries exceeded for {url}"
        )))
    }

    fn is_not_found(err: &UpstreamError) -> bool {
        matches!(err, UpstreamError::Api(msg) if msg.ends_with(": 404"))
    }
}

#[async_trait::async_trait]
impl UpstreamClient for RestClient {
    async fn fetch_build(&self, id: BuildId) -> Result<RawBuild, UpstreamError> {
        let path = format!(
            "/app/rest/builds/id:{id}?fields=id,buildTypeId,buildType(name),branchName,\
             status,state,startDate,finishDate,snapshot-dependencies(build(id))"
        );
        self.api_get(&path).await.map_err(|e| {
            if Self::is_not_found(&e) {
                UpstreamError::NotFound(id.0)
            } else {
                e
            }
        })
    }

    async fn fetch_tests(&self, id: BuildId) -> Result<Vec<RawTestOccurrence>, UpstreamError> {
        let path = format!(
            "/app/rest/testOccurrences?locator=build:(id:{id}),count:{PAGE_SIZE}\
             &fields=testOccurrence(name,status,duration,logSize)"
        );
        match self.api_get::<TestOccurrencesPage>(&path).await {
            Ok(page) => Ok(page.test_occurrence),
            Err(e) if Self::is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn fetch_problems(&self, id: BuildId) -> Result<Vec<RawProblem>, UpstreamError> {
        let path = format!(
            "/app/rest/problemOccurrences?locator=build:(id:{id}),count:{PAGE_SIZE}\
             &fields=problemOccurrence(type)"
        );
        match self.api_get::<ProblemOccurrencesPage>(&path).await {
            Ok(page) => Ok(page.problem_occurrence),
            Err(e) if Self::is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TestOccurrencesPage {
    #[serde(rename = "testOccurrence", default)]
    test_occurrence: Vec<RawTestOccurrence>,
}

#[derive(Debug, Default, Deserialize)]
struct ProblemOccurrencesPage {
    #[serde(rename = "problemOccurrence", default)]
    problem_occurrence: Vec<RawProblem>,
}
