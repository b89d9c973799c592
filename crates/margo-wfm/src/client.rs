use std::time::Duration;

use margo_domain::{ActualPhase, ComponentStatus, DeploymentId, DesiredStateSnapshot, DeviceClientId, Digest, RecordedError};
use reqwest::{header, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::error::WfmError;

/// The agent's per-call deadline (spec.md §5). Applied both as the
/// `reqwest::Client`'s connect/read timeout and as a belt-and-braces
/// `tokio::time::timeout` around the whole request, so a hung DNS
/// resolution can't exceed it either.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of polling for desired state: either the WFM sent a fresh
/// snapshot plus the token to send on the next poll, or nothing changed.
#[derive(Debug, Clone)]
pub enum DesiredStatePoll {
    Fresh(DesiredStateSnapshot, String),
    NotModified,
}

/// Thin typed layer over one `reqwest::Client` talking to the Workload
/// Fleet Manager. Holds no mutable state of its own — onboarding,
/// freshness tokens, and cached digests all live in the caller (store,
/// cache) so this client stays a pure transport.
pub struct WfmClient {
    http: reqwest::Client,
    base_url: String,
}

impl WfmClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, WfmError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WfmError::Transport(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    async fn with_deadline<T>(&self, fut: impl std::future::Future<Output = Result<T, WfmError>>) -> Result<T, WfmError> {
        tokio::time::timeout(REQUEST_TIMEOUT, fut)
            .await
            .unwrap_or_else(|_| Err(WfmError::Transport("request exceeded agent deadline".to_string())))
    }

    /// POST `/onboarding`. Maps 201 to the assigned client id, 409 to
    /// `DuplicateSignature`.
    pub async fn onboard(&self, certificate_der: &[u8]) -> Result<DeviceClientId, WfmError> {
        use base64::Engine as _;
        let body = serde_json::json!({
            "publicCertificate": base64::engine::general_purpose::STANDARD.encode(certificate_der),
        });

        self.with_deadline(async {
            let resp = self.http.post(format!("{}/onboarding", self.base_url)).json(&body).send().await?;

            match resp.status() {
                StatusCode::CREATED => {
                    let parsed: OnboardResponse = resp.json().await.map_err(|e| WfmError::Protocol(e.to_string()))?;
                    Ok(DeviceClientId::new(parsed.client_id))
                }
                StatusCode::CONFLICT => Err(WfmError::DuplicateSignature),
                other => Err(WfmError::Rejected(other.as_u16())),
            }
        })
        .await
    }

    /// POST `/clients/{clientId}/capabilities`. Any 2xx counts as success;
    /// retrying on transport failure is the caller's responsibility
    /// (the supervisor's one-shot startup sequence).
    pub async fn report_capabilities(&self, client_id: &DeviceClientId, capabilities: &serde_json::Value) -> Result<(), WfmError> {
        self.with_deadline(async {
            let resp = self
                .http
                .post(format!("{}/clients/{}/capabilities", self.base_url, client_id))
                .json(capabilities)
                .send()
                .await?;

            if resp.status().is_success() {
                Ok(())
            } else {
                Err(WfmError::Rejected(resp.status().as_u16()))
            }
        })
        .await
    }

    /// GET `/clients/{clientId}/deployments`. Sends `If-None-Match:
    /// <freshness_token>` when present; a 304 short-circuits without ever
    /// parsing a body.
    pub async fn get_desired_state(&self, client_id: &DeviceClientId, freshness_token: Option<&str>) -> Result<DesiredStatePoll, WfmError> {
        self.with_deadline(async {
            let mut req = self
                .http
                .get(format!("{}/clients/{}/deployments", self.base_url, client_id))
                .header(header::ACCEPT, "application/vnd.margo.manifest.v1+json");
            if let Some(token) = freshness_token {
                req = req.header(header::IF_NONE_MATCH, token);
            }

            let resp = req.send().await?;

            match resp.status() {
                StatusCode::NOT_MODIFIED => Ok(DesiredStatePoll::NotModified),
                StatusCode::OK => {
                    let etag = resp
                        .headers()
                        .get(header::ETAG)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    let snapshot: DesiredStateSnapshot = resp.json().await.map_err(|e| WfmError::Protocol(e.to_string()))?;
                    Ok(DesiredStatePoll::Fresh(snapshot, etag))
                }
                other => Err(WfmError::Rejected(other.as_u16())),
            }
        })
        .await
    }

    /// GET `/clients/{clientId}/deployments/{deploymentId}/{digest}`. On a
    /// 304 (the caller already holds `digest` cached) returns `cached`
    /// unchanged; on 200 verifies the body hashes to `digest` before
    /// returning it.
    pub async fn fetch_deployment_yaml(
        &self,
        client_id: &DeviceClientId,
        deployment_id: &DeploymentId,
        digest: &Digest,
        cached: Option<&[u8]>,
    ) -> Result<Vec<u8>, WfmError> {
        let url = format!("{}/clients/{}/deployments/{}/{}", self.base_url, client_id, deployment_id, digest);
        self.fetch_conditional(&url, digest, cached).await
    }

    /// GET `/clients/{clientId}/bundles/{digest}`. Same conditional-GET and
    /// digest-verify contract as `fetch_deployment_yaml`.
    pub async fn download_bundle(&self, client_id: &DeviceClientId, digest: &Digest, cached: Option<&[u8]>) -> Result<Vec<u8>, WfmError> {
        let url = format!("{}/clients/{}/bundles/{}", self.base_url, client_id, digest);
        self.fetch_conditional(&url, digest, cached).await
    }

    async fn fetch_conditional(&self, url: &str, digest: &Digest, cached: Option<&[u8]>) -> Result<Vec<u8>, WfmError> {
        self.with_deadline(async {
            let resp = self.http.get(url).header(header::IF_NONE_MATCH, format!("\"{digest}\"")).send().await?;

            match resp.status() {
                StatusCode::NOT_MODIFIED => match cached {
                    Some(bytes) => Ok(bytes.to_vec()),
                    None => Err(WfmError::Protocol("server returned 304 but we have nothing cached".to_string())),
                },
                StatusCode::OK => {
                    let bytes = resp.bytes().await.map_err(|e| WfmError::Protocol(e.to_string()))?.to_vec();
                    if !digest.matches(&bytes) {
                        let computed = Digest::of(&bytes);
                        return Err(WfmError::DigestMismatch { expected: digest.to_string(), computed: computed.to_string() });
                    }
                    Ok(bytes)
                }
                other => Err(WfmError::Rejected(other.as_u16())),
            }
        })
        .await
    }

    /// POST `/clients/{clientId}/deployment/{deploymentId}/status`. Any 2xx
    /// is success.
    pub async fn report_deployment_status(
        &self,
        client_id: &DeviceClientId,
        deployment_id: &DeploymentId,
        phase: ActualPhase,
        components: &[ComponentStatus],
        error: Option<&RecordedError>,
    ) -> Result<(), WfmError> {
        #[derive(Serialize)]
        struct StatusPayload<'a> {
            phase: ActualPhase,
            components: &'a [ComponentStatus],
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a RecordedError>,
        }
        let payload = StatusPayload { phase, components, error };

        self.with_deadline(async {
            let resp = self
                .http
                .post(format!("{}/clients/{}/deployment/{}/status", self.base_url, client_id, deployment_id))
                .json(&payload)
                .send()
                .await?;

            if resp.status().is_success() {
                Ok(())
            } else {
                warn!(status = resp.status().as_u16(), %deployment_id, "WFM rejected status report");
                Err(WfmError::Rejected(resp.status().as_u16()))
            }
        })
        .await
    }
}

#[derive(serde::Deserialize)]
struct OnboardResponse {
    #[serde(rename = "clientId")]
    client_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use margo_domain::{DesiredAction, DesiredItem};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_id() -> DeviceClientId {
        DeviceClientId::new("dev-1")
    }

    #[tokio::test]
    async fn onboard_maps_201_to_client_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/onboarding"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"clientId": "dev-1"})))
            .mount(&server)
            .await;

        let client = WfmClient::new(server.uri()).unwrap();
        let id = client.onboard(b"der-bytes").await.unwrap();
        assert_eq!(id.as_str(), "dev-1");
    }

    #[tokio::test]
    async fn onboard_maps_409_to_duplicate_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/onboarding")).respond_with(ResponseTemplate::new(409)).mount(&server).await;

        let client = WfmClient::new(server.uri()).unwrap();
        let err = client.onboard(b"der-bytes").await.unwrap_err();
        assert!(matches!(err, WfmError::DuplicateSignature));
    }

    #[tokio::test]
    async fn get_desired_state_304_is_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/clients/{}/deployments", client_id())))
            .and(header("If-None-Match", "tok-1"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = WfmClient::new(server.uri()).unwrap();
        let poll = client.get_desired_state(&client_id(), Some("tok-1")).await.unwrap();
        assert!(matches!(poll, DesiredStatePoll::NotModified));
    }

    #[tokio::test]
    async fn get_desired_state_200_returns_snapshot_and_etag() {
        let server = MockServer::start().await;
        let snapshot = DesiredStateSnapshot {
            freshness_token: "tok-2".to_string(),
            issued_at: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&chrono::Utc),
            items: vec![DesiredItem {
                deployment_id: DeploymentId::new(uuid::Uuid::new_v4()),
                version: 1,
                spec_digest: Digest::of(b"manifest"),
                action: DesiredAction::Apply,
            }],
        };

        Mock::given(method("GET"))
            .and(path(format!("/clients/{}/deployments", client_id())))
            .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot).insert_header("ETag", "tok-2"))
            .mount(&server)
            .await;

        let client = WfmClient::new(server.uri()).unwrap();
        let poll = client.get_desired_state(&client_id(), None).await.unwrap();
        match poll {
            DesiredStatePoll::Fresh(got, token) => {
                assert_eq!(got.items.len(), 1);
                assert_eq!(token, "tok-2");
            }
            DesiredStatePoll::NotModified => panic!("expected Fresh"),
        }
    }

    #[tokio::test]
    async fn download_bundle_rejects_digest_mismatch() {
        let server = MockServer::start().await;
        let requested = Digest::of(b"expected-bytes");

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"different-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = WfmClient::new(server.uri()).unwrap();
        let err = client.download_bundle(&client_id(), &requested, None).await.unwrap_err();
        assert!(matches!(err, WfmError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn download_bundle_304_returns_cached_bytes() {
        let server = MockServer::start().await;
        let digest = Digest::of(b"cached-body");

        Mock::given(method("GET")).respond_with(ResponseTemplate::new(304)).mount(&server).await;

        let client = WfmClient::new(server.uri()).unwrap();
        let got = client.download_bundle(&client_id(), &digest, Some(b"cached-body")).await.unwrap();
        assert_eq!(got, b"cached-body");
    }

    #[tokio::test]
    async fn report_deployment_status_2xx_is_ok() {
        let server = MockServer::start().await;
        let deployment_id = DeploymentId::new(uuid::Uuid::new_v4());

        Mock::given(method("POST"))
            .and(path(format!("/clients/{}/deployment/{}/status", client_id(), deployment_id)))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = WfmClient::new(server.uri()).unwrap();
        client.report_deployment_status(&client_id(), &deployment_id, ActualPhase::Running, &[], None).await.unwrap();
    }
}
