//! JSON/HTTP implementation of the collaborator traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{
    ContextError, ContextHandle, ContextProvider, ExtractError, ExtractErrorKind, ExtractOutput,
    ExtractRequest, ExtractionBackend, RenderBackend, RenderError, RenderedDocument,
};
use crate::config::AgentConfig;
use crate::job::{base64_decoded_len, ExtractedImage};
use crate::store::StateStore;

/// Slack added to job deadlines so the agent can answer before the client gives up.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Client for a remote page agent.
///
/// Archives above the inline limit are written to the state store and
/// returned by reference.
pub struct HttpPageAgent {
    client: Client,
    config: AgentConfig,
    store: Arc<dyn StateStore>,
}

#[derive(Serialize)]
struct OpenRequest<'a> {
    target: &'a str,
}

#[derive(Deserialize)]
struct OpenResponse {
    handle: String,
}

#[derive(Serialize)]
struct WaitRequest {
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct TitleResponse {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    markup: &'a str,
    title: &'a str,
}

/// Extraction response as sent by the agent.
#[derive(Debug, Default, Deserialize)]
struct AgentExtractResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    images: Vec<ExtractedImage>,
    #[serde(default)]
    archive_base64: Option<String>,
    #[serde(default)]
    archive_size: Option<u64>,
}

/// Error body returned by the agent.
#[derive(Debug, Deserialize)]
struct AgentError {
    error: String,
    #[serde(default)]
    kind: Option<ExtractErrorKind>,
}

impl HttpPageAgent {
    /// Create a new agent client.
    pub fn new(config: AgentConfig, store: Arc<dyn StateStore>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self {
            client,
            config,
            store,
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn context_url(&self, handle: &ContextHandle, suffix: &str) -> String {
        format!(
            "{}/contexts/{}{}",
            self.base_url(),
            urlencoding::encode(handle.as_str()),
            suffix
        )
    }

    /// Turn the agent's response into an extraction output, spilling large
    /// archives into the state store.
    fn into_output(
        &self,
        request: &ExtractRequest,
        response: AgentExtractResponse,
    ) -> Result<ExtractOutput, ExtractError> {
        let mut output = ExtractOutput {
            content: response.content,
            images: response.images,
            archive_size: response.archive_size,
            ..Default::default()
        };

        if let Some(archive) = response.archive_base64 {
            let size = response
                .archive_size
                .unwrap_or_else(|| base64_decoded_len(&archive));
            output.archive_size = Some(size);

            if size > self.config.inline_archive_limit_bytes {
                let key = format!("archive:{}", request.request_id);
                self.store
                    .set(vec![(key.clone(), Value::String(archive))])
                    .map_err(|e| ExtractError::failed(format!("Failed to store archive: {}", e)))?;
                info!(job = %request.target, %key, size, "Stored archive by reference");
                output.archive_ref = Some(key);
            } else {
                output.archive_inline = Some(archive);
            }
        }

        Ok(output)
    }
}

/// Read an agent error body, falling back to the status line.
async fn agent_error(response: Response) -> AgentError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_agent_error(status, &body)
}

fn parse_agent_error(status: StatusCode, body: &str) -> AgentError {
    serde_json::from_str(body).unwrap_or_else(|_| AgentError {
        error: if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>())
        },
        kind: None,
    })
}

#[async_trait]
impl ContextProvider for HttpPageAgent {
    async fn open(&self, target: &str) -> Result<ContextHandle, ContextError> {
        let url = format!("{}/contexts", self.base_url());
        let response = self
            .client
            .post(&url)
            .json(&OpenRequest { target })
            .send()
            .await
            .map_err(|e| ContextError::OpenFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ContextError::OpenFailed(agent_error(response).await.error));
        }

        let opened: OpenResponse = response
            .json()
            .await
            .map_err(|e| ContextError::OpenFailed(e.to_string()))?;
        debug!(%target, handle = %opened.handle, "Opened page context");
        Ok(ContextHandle::new(opened.handle))
    }

    async fn await_loaded(
        &self,
        handle: &ContextHandle,
        deadline: Duration,
    ) -> Result<(), ContextError> {
        let response = self
            .client
            .post(self.context_url(handle, "/wait"))
            .timeout(deadline + DEADLINE_SLACK)
            .json(&WaitRequest {
                timeout_ms: deadline.as_millis() as u64,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ContextError::LoadTimeout
                } else {
                    ContextError::Other(e.to_string())
                }
            })?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ContextError::NotFound(handle.to_string())),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(ContextError::LoadTimeout)
            }
            _ => Err(ContextError::Other(agent_error(response).await.error)),
        }
    }

    async fn page_title(&self, handle: &ContextHandle) -> Option<String> {
        let response = self
            .client
            .get(self.context_url(handle, "/title"))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<TitleResponse>().await.ok()?.title
    }

    async fn close(&self, handle: &ContextHandle) -> Result<(), ContextError> {
        let response = self
            .client
            .delete(self.context_url(handle, ""))
            .send()
            .await
            .map_err(|e| ContextError::Other(e.to_string()))?;

        // Already gone is fine.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(ContextError::Other(agent_error(response).await.error))
        }
    }
}

#[async_trait]
impl ExtractionBackend for HttpPageAgent {
    async fn extract(
        &self,
        context: &ContextHandle,
        request: &ExtractRequest,
    ) -> Result<ExtractOutput, ExtractError> {
        let response = self
            .client
            .post(self.context_url(context, "/extract"))
            .timeout(request.timeout + DEADLINE_SLACK)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::timeout(request.timeout)
                } else {
                    ExtractError::failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let err = agent_error(response).await;
            return Err(ExtractError::new(
                err.kind.unwrap_or(ExtractErrorKind::Failed),
                err.error,
            ));
        }

        let body: AgentExtractResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::failed(format!("Invalid extraction response: {}", e)))?;
        self.into_output(request, body)
    }
}

#[async_trait]
impl RenderBackend for HttpPageAgent {
    async fn render(&self, markup: &str, title: &str) -> Result<RenderedDocument, RenderError> {
        let url = format!("{}/render", self.base_url());
        let response = self
            .client
            .post(&url)
            .json(&RenderRequest { markup, title })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RenderError::Unavailable(e.to_string())
                } else {
                    RenderError::Failed(e.to_string())
                }
            })?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| RenderError::Failed(e.to_string())),
            StatusCode::SERVICE_UNAVAILABLE => {
                Err(RenderError::Unavailable(agent_error(response).await.error))
            }
            _ => Err(RenderError::Failed(agent_error(response).await.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobOptions};
    use crate::store::SqliteStateStore;

    fn agent(limit: u64) -> (HttpPageAgent, Arc<SqliteStateStore>) {
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        let config = AgentConfig {
            inline_archive_limit_bytes: limit,
            ..Default::default()
        };
        let agent = HttpPageAgent::new(config, store.clone()).unwrap();
        (agent, store)
    }

    fn request() -> ExtractRequest {
        ExtractRequest {
            request_id: "batch-42".to_string(),
            target: "https://a.example/doc".to_string(),
            kind: JobKind::PackagedArchive,
            label: "Doc".to_string(),
            options: JobOptions::new(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_small_archive_stays_inline() {
        let (agent, _) = agent(1024);
        let output = agent
            .into_output(
                &request(),
                AgentExtractResponse {
                    archive_base64: Some("A".repeat(100)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(output.archive_inline.as_deref().map(str::len), Some(100));
        assert_eq!(output.archive_size, Some(75));
        assert!(output.archive_ref.is_none());
    }

    #[test]
    fn test_large_archive_is_stored_by_reference() {
        let (agent, store) = agent(10);
        let output = agent
            .into_output(
                &request(),
                AgentExtractResponse {
                    archive_base64: Some("QUJD".repeat(10)),
                    archive_size: Some(30),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(output.archive_inline.is_none());
        assert_eq!(output.archive_ref.as_deref(), Some("archive:batch-42"));

        let stored = store.get(&["archive:batch-42"]).unwrap();
        assert_eq!(stored["archive:batch-42"], Value::String("QUJD".repeat(10)));
    }

    #[test]
    fn test_parse_agent_error_with_kind() {
        let err = parse_agent_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"Archive exceeds limit","kind":"archive_too_large"}"#,
        );
        assert_eq!(err.error, "Archive exceeds limit");
        assert_eq!(err.kind, Some(ExtractErrorKind::ArchiveTooLarge));
    }

    #[test]
    fn test_parse_agent_error_plain_body() {
        let err = parse_agent_error(StatusCode::BAD_GATEWAY, "upstream died");
        assert_eq!(err.error, "HTTP 502 Bad Gateway: upstream died");
        assert!(err.kind.is_none());

        let err = parse_agent_error(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.error, "HTTP 500 Internal Server Error");
    }

    #[test]
    fn test_context_url_encodes_handle() {
        let (agent, _) = agent(10);
        let url = agent.context_url(&ContextHandle::new("tab/7"), "/wait");
        assert_eq!(url, "http://127.0.0.1:3900/contexts/tab%2F7/wait");
    }
}
