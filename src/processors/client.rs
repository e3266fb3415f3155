//! HTTP gateway to the payment processors
//!
//! Delivery calls share a pooled keep-alive client; health probes use a
//! dedicated client that closes its connection after each request, since
//! the health endpoint is rate-limited and polled by a single elected
//! prober.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::ProcessorsConfig;
use crate::processors::error::{ProcessorError, ProcessorResult};
use crate::processors::types::{
    ProcessorKind, ProcessorPaymentRequest, ProcessorStatus, ServiceHealthResponse,
};

/// Seam between the dispatch engine / health monitor and the processor
/// HTTP protocol.
#[async_trait]
pub trait ProcessorChannel: Send + Sync {
    /// POST the payment to one processor. `deadline` overrides the client
    /// default for this single call.
    async fn submit_payment(
        &self,
        kind: ProcessorKind,
        request: &ProcessorPaymentRequest,
        deadline: Duration,
    ) -> ProcessorResult<()>;

    /// GET the processor's service-health verdict.
    async fn probe_health(&self, kind: ProcessorKind) -> ProcessorResult<ProcessorStatus>;
}

pub struct HttpProcessorGateway {
    delivery: Client,
    probe: Client,
    default_url: String,
    fallback_url: String,
    probe_deadline: Duration,
}

impl HttpProcessorGateway {
    pub fn new(config: &ProcessorsConfig) -> ProcessorResult<Self> {
        let delivery = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProcessorError::Network {
                processor: ProcessorKind::Default,
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        let mut probe_headers = HeaderMap::new();
        probe_headers.insert(CONNECTION, HeaderValue::from_static("close"));
        let probe = Client::builder()
            .default_headers(probe_headers)
            .timeout(config.probe_deadline())
            .build()
            .map_err(|e| ProcessorError::Network {
                processor: ProcessorKind::Default,
                message: format!("failed to initialize probe client: {}", e),
            })?;

        Ok(Self {
            delivery,
            probe,
            default_url: config.default_url.trim_end_matches('/').to_string(),
            fallback_url: config.fallback_url.trim_end_matches('/').to_string(),
            probe_deadline: config.probe_deadline(),
        })
    }

    fn base_url(&self, kind: ProcessorKind) -> &str {
        match kind {
            ProcessorKind::Default => &self.default_url,
            ProcessorKind::Fallback => &self.fallback_url,
        }
    }
}

#[async_trait]
impl ProcessorChannel for HttpProcessorGateway {
    async fn submit_payment(
        &self,
        kind: ProcessorKind,
        request: &ProcessorPaymentRequest,
        deadline: Duration,
    ) -> ProcessorResult<()> {
        let url = format!("{}/payments", self.base_url(kind));

        let response = self
            .delivery
            .post(&url)
            .timeout(deadline)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::DeadlineExceeded { processor: kind }
                } else {
                    ProcessorError::Network {
                        processor: kind,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(processor = %kind, correlation_id = %request.correlation_id, "payment accepted");
            Ok(())
        } else {
            Err(ProcessorError::Rejected {
                processor: kind,
                status: status.as_u16(),
            })
        }
    }

    async fn probe_health(&self, kind: ProcessorKind) -> ProcessorResult<ProcessorStatus> {
        let url = format!("{}/payments/service-health", self.base_url(kind));

        let response = self
            .probe
            .get(&url)
            .timeout(self.probe_deadline)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::DeadlineExceeded { processor: kind }
                } else {
                    ProcessorError::Network {
                        processor: kind,
                        message: e.to_string(),
                    }
                }
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProcessorError::Rejected {
                processor: kind,
                status: 429,
            });
        }
        if !response.status().is_success() {
            return Err(ProcessorError::Rejected {
                processor: kind,
                status: response.status().as_u16(),
            });
        }

        let raw: ServiceHealthResponse =
            response.json().await.map_err(|e| ProcessorError::Network {
                processor: kind,
                message: format!("invalid service-health payload: {}", e),
            })?;

        Ok(raw.into())
    }
}
