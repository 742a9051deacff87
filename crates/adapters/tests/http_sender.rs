//! Agent sender against a mock server.

use metricsd_adapters::codec::{BodySigner, gzip};
use metricsd_adapters::sender::{HttpMetricSender, HttpSenderConfig};
use metricsd_ports::{MetricRecord, MetricSenderPort};
use metricsd_shared::{RequestContext, Result, RetryPolicy, SecretString};
use std::net::IpAddr;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sender(server: &MockServer, key: Option<&str>) -> Result<HttpMetricSender> {
    HttpMetricSender::new(HttpSenderConfig {
        base_url: server.uri().into(),
        key: key.map(SecretString::from),
        encryptor: None,
        real_ip: IpAddr::from([10, 0, 0, 5]),
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::fixed(3, 10),
    })
}

#[tokio::test]
async fn batch_posts_signed_gzip_json() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .and(header("content-type", "application/json"))
        .and(header("content-encoding", "gzip"))
        .and(header("accept-encoding", "gzip"))
        .and(header("x-real-ip", "10.0.0.5"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(&server, Some("secret"))?;
    let ctx = RequestContext::new_request();
    sender
        .send_batch(
            &ctx,
            vec![MetricRecord::counter("PollCount", 1), MetricRecord::gauge("RandomValue", 0.5)],
        )
        .await?;

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let digest = request
        .headers
        .get("HashSHA256")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let signer = BodySigner::new(&SecretString::from("secret"))?;
    signer.verify(&request.body, digest)?;

    let json = gzip::decompress(&request.body)?;
    let records: Vec<MetricRecord> = serde_json::from_slice(&json)
        .map_err(|error| metricsd_shared::ErrorEnvelope::invalid_input(error.to_string()))?;
    assert_eq!(records.len(), 2);
    Ok(())
}

#[tokio::test]
async fn single_updates_go_to_update_route_without_hash_when_unkeyed() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(&server, None)?;
    let ctx = RequestContext::new_request();
    sender.send_one(&ctx, MetricRecord::gauge("Alloc", 1.0)).await?;

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests[0].headers.get("HashSHA256").is_none());
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried_up_to_budget() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let sender = sender(&server, None)?;
    let ctx = RequestContext::new_request();
    let result = sender
        .send_batch(&ctx, vec![MetricRecord::counter("PollCount", 1)])
        .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn client_errors_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("negative value"))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(&server, None)?;
    let ctx = RequestContext::new_request();
    let Err(error) = sender
        .send_one(&ctx, MetricRecord::counter("PollCount", 1))
        .await
    else {
        panic!("expected rejection");
    };
    assert!(!error.class.is_retriable());
    assert_eq!(error.metadata.get("status").map(String::as_str), Some("400"));
    Ok(())
}

#[tokio::test]
async fn recovers_after_transient_failure() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sender = sender(&server, None)?;
    let ctx = RequestContext::new_request();
    sender
        .send_batch(&ctx, vec![MetricRecord::counter("PollCount", 1)])
        .await?;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 2);
    Ok(())
}
