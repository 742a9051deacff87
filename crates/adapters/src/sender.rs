//! HTTP metric sender for the agent (`reqwest`).
//!
//! Outbound pipeline: JSON, gzip, HMAC over the compressed bytes, then
//! optional RSA block encryption.

use crate::codec::{BodyEncryptor, BodySigner, HASH_HEADER, gzip};
use metricsd_ports::{BoxFuture, MetricRecord, MetricSenderPort};
use metricsd_shared::{
    ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, RetryPolicy, SecretString,
    UnexpectedError, normalize_unexpected_error, retry_async,
};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

const REAL_IP_HEADER_LOWER: &str = "x-real-ip";

/// Transport retry budget: 3 attempts, 1 s apart.
pub const DEFAULT_SEND_RETRY: RetryPolicy = RetryPolicy::fixed(3, 1_000);

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct HttpSenderConfig {
    /// Server base URL, with scheme, without trailing slash.
    pub base_url: Box<str>,
    /// HMAC key.
    pub key: Option<SecretString>,
    /// Public-key encryptor.
    pub encryptor: Option<BodyEncryptor>,
    /// Address reported in `X-Real-IP`.
    pub real_ip: IpAddr,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry budget for transient failures.
    pub retry: RetryPolicy,
}

/// `MetricSenderPort` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetricSender {
    client: reqwest::Client,
    update_url: Box<str>,
    batch_url: Box<str>,
    signer: Option<BodySigner>,
    encryptor: Option<BodyEncryptor>,
    retry: RetryPolicy,
}

impl HttpMetricSender {
    /// Build the sender and its HTTP client.
    pub fn new(config: HttpSenderConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "server address must be non-empty",
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let real_ip = HeaderValue::from_str(&config.real_ip.to_string()).map_err(|_| {
            ErrorEnvelope::expected(ErrorCode::invalid_input(), "agent address is not a header value")
        })?;
        headers.insert(HeaderName::from_static(REAL_IP_HEADER_LOWER), real_ip);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("agent", "client_init_failed"),
                    format!("failed to build HTTP client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        Ok(Self {
            client,
            update_url: format!("{base}/update/").into_boxed_str(),
            batch_url: format!("{base}/updates/").into_boxed_str(),
            signer: config.key.as_ref().map(BodySigner::new).transpose()?,
            encryptor: config.encryptor,
            retry: config.retry,
        })
    }

    /// Encode a payload into wire bytes plus the optional digest.
    fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(Vec<u8>, Option<String>)> {
        let json = serde_json::to_vec(payload).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::internal(),
                format!("failed to encode metrics: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;
        let compressed = gzip::compress(&json)?;
        let digest = self.signer.as_ref().map(|signer| signer.sign(&compressed));
        let body = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&compressed)?,
            None => compressed,
        };
        Ok((body, digest))
    }

    async fn post(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: Vec<u8>,
        digest: Option<String>,
        operation: &'static str,
    ) -> Result<()> {
        retry_async(ctx, self.retry, operation, || {
            let mut request = self.client.post(url).body(body.clone());
            if let Some(digest) = &digest {
                request = request.header(HASH_HEADER, digest.as_str());
            }
            async move {
                let response = tokio::select! {
                    () = ctx.cancelled() => return Err(cancelled_error(operation)),
                    result = request.send() => result.map_err(map_reqwest_error)?,
                };
                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let message = response.text().await.unwrap_or_default();
                Err(map_status_error(status, message.trim()))
            }
        })
        .await
    }
}

impl MetricSenderPort for HttpMetricSender {
    fn send_one(&self, ctx: &RequestContext, record: MetricRecord) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("http_sender.send_one")?;
            let (body, digest) = self.encode(&record)?;
            self.post(&ctx, &self.update_url, body, digest, "http_sender.send_one")
                .await
                .map_err(|error| error.with_metadata("metric", record.id.clone()))
        })
    }

    fn send_batch(
        &self,
        ctx: &RequestContext,
        records: Vec<MetricRecord>,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("http_sender.send_batch")?;
            if records.is_empty() {
                return Ok(());
            }
            let (body, digest) = self.encode(records.as_slice())?;
            self.post(&ctx, &self.batch_url, body, digest, "http_sender.send_batch")
                .await
                .map_err(|error| error.with_metadata("records", records.len().to_string()))
        })
    }
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn map_reqwest_error(error: reqwest::Error) -> ErrorEnvelope {
    if error.is_timeout() {
        return ErrorEnvelope::unexpected(
            ErrorCode::timeout(),
            "metrics request timed out",
            ErrorClass::Retriable,
        );
    }
    let is_connect = error.is_connect();
    let envelope = normalize_unexpected_error(UnexpectedError::error(error));
    if is_connect && !envelope.class.is_retriable() {
        return ErrorEnvelope::unexpected(ErrorCode::io(), envelope.message, ErrorClass::Retriable);
    }
    envelope
}

fn map_status_error(status: StatusCode, message: &str) -> ErrorEnvelope {
    let message = if message.is_empty() {
        format!("server answered {status}")
    } else {
        format!("server answered {status}: {message}")
    };
    let envelope = if status.is_server_error() {
        ErrorEnvelope::unexpected(
            ErrorCode::new("agent", "server_error"),
            message,
            ErrorClass::Retriable,
        )
    } else {
        ErrorEnvelope::expected(ErrorCode::new("agent", "request_rejected"), message)
    };
    envelope.with_metadata("status", status.as_u16().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_retry_and_client_errors_do_not() {
        assert!(map_status_error(StatusCode::BAD_GATEWAY, "").class.is_retriable());
        let rejected = map_status_error(StatusCode::BAD_REQUEST, "negative value");
        assert!(!rejected.class.is_retriable());
        assert_eq!(rejected.metadata.get("status").map(String::as_str), Some("400"));
    }

    #[test]
    fn encode_signs_compressed_bytes() -> Result<()> {
        let sender = HttpMetricSender::new(HttpSenderConfig {
            base_url: "http://localhost:8080/".into(),
            key: Some(SecretString::from("k")),
            encryptor: None,
            real_ip: IpAddr::from([127, 0, 0, 1]),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::fixed(1, 0),
        })?;
        assert_eq!(sender.batch_url.as_ref(), "http://localhost:8080/updates/");

        let (body, digest) = sender.encode(&MetricRecord::counter("hits", 1))?;
        let signer = BodySigner::new(&SecretString::from("k"))?;
        assert_eq!(digest.as_deref(), Some(signer.sign(&body).as_str()));
        assert_eq!(
            gzip::decompress(&body)?,
            br#"{"id":"hits","type":"counter","delta":1}"#.to_vec()
        );
        Ok(())
    }
}
