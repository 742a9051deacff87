//! Protocol transform chain.
//!
//! Request order: address allow-list, body decryption, HMAC verification,
//! gzip decompression, handler. On the way out the response is gzip
//! compressed, then signed, so the digest covers the bytes on the wire.

use crate::error::ApiError;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metricsd_adapters::codec::{BodyDecryptor, BodySigner, TrustedSubnet, gzip};
use metricsd_shared::{ErrorEnvelope, Result};
use std::sync::Arc;

/// Largest body read by any transform.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// `HashSHA256`, normalized.
pub const HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");
/// `X-Real-IP`, normalized.
pub const REAL_IP_HEADER_NAME: HeaderName = HeaderName::from_static("x-real-ip");

/// Optional transforms; each one is a no-op when unset.
#[derive(Debug, Clone, Default)]
pub struct TransformConfig {
    /// Trusted agent subnet.
    pub trusted_subnet: Option<TrustedSubnet>,
    /// Private key for request bodies.
    pub decryptor: Option<BodyDecryptor>,
    /// HMAC key for requests and responses.
    pub signer: Option<BodySigner>,
}

/// Shared transform state.
pub type TransformState = Arc<TransformConfig>;

async fn read_body(body: Body) -> Result<Bytes> {
    to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|error| ErrorEnvelope::invalid_input(format!("failed to read body: {error}")))
}

fn with_body(request: Request, body: Vec<u8>) -> Request {
    let (mut parts, _) = request.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(body))
}

/// Reject requests whose `X-Real-IP` is missing or outside the subnet.
pub async fn ip_allowlist(
    State(state): State<TransformState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(subnet) = state.trusted_subnet.as_ref() {
        let real_ip = request
            .headers()
            .get(REAL_IP_HEADER_NAME)
            .and_then(|value| value.to_str().ok());
        if let Err(error) = subnet.check(real_ip) {
            return ApiError(error).into_response();
        }
    }
    next.run(request).await
}

/// Decrypt RSA block ciphertext bodies. Empty bodies pass through.
pub async fn decrypt_body(
    State(state): State<TransformState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(decryptor) = state.decryptor.as_ref() else {
        return next.run(request).await;
    };
    let (parts, body) = request.into_parts();
    let ciphertext = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(error) => return ApiError(error).into_response(),
    };
    let request = Request::from_parts(parts, Body::empty());
    if ciphertext.is_empty() {
        return next.run(request).await;
    }
    match decryptor.decrypt(&ciphertext) {
        Ok(plaintext) => next.run(with_body(request, plaintext)).await,
        Err(error) => ApiError(error).into_response(),
    }
}

/// Verify `HashSHA256` on requests that carry it, and sign every response.
pub async fn verify_and_sign(
    State(state): State<TransformState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signer) = state.signer.as_ref() else {
        return next.run(request).await;
    };

    let digest = request
        .headers()
        .get(HASH_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let request = match digest {
        Some(digest) => {
            let (parts, body) = request.into_parts();
            let bytes = match read_body(body).await {
                Ok(bytes) => bytes,
                Err(error) => return ApiError(error).into_response(),
            };
            if let Err(error) = signer.verify(&bytes, &digest) {
                return ApiError(error).into_response();
            }
            Request::from_parts(parts, Body::from(bytes))
        },
        None => request,
    };

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    let bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(error) => return ApiError(error).into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&signer.sign(&bytes)) {
        parts.headers.insert(HASH_HEADER_NAME, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}

/// Decompress gzip request bodies and compress JSON/HTML responses for
/// clients that accept gzip.
pub async fn gzip_codec(request: Request, next: Next) -> Response {
    let accepts_gzip = header_contains(request.headers(), ACCEPT_ENCODING, "gzip");

    let request = if header_contains(request.headers(), CONTENT_ENCODING, "gzip") {
        let (mut parts, body) = request.into_parts();
        let compressed = match read_body(body).await {
            Ok(bytes) => bytes,
            Err(error) => return ApiError(error).into_response(),
        };
        let plain = match gzip::decompress(&compressed) {
            Ok(plain) => plain,
            Err(error) => return ApiError(error).into_response(),
        };
        parts.headers.remove(CONTENT_ENCODING);
        with_body(Request::from_parts(parts, Body::empty()), plain)
    } else {
        request
    };

    let response = next.run(request).await;
    if !accepts_gzip || !is_compressible(response.headers()) {
        return response;
    }
    let (mut parts, body) = response.into_parts();
    let bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(error) => return ApiError(error).into_response(),
    };
    match gzip::compress(&bytes) {
        Ok(compressed) => {
            parts.headers.remove(CONTENT_LENGTH);
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Response::from_parts(parts, Body::from(compressed))
        },
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

fn header_contains(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| {
            part.split(';')
                .next()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case(token))
        })
}

fn is_compressible(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value.starts_with("application/json") || value.starts_with("text/html")
        })
}
