use crate::errors::ProviderError;
use crate::request::ProviderRequest;
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use std::time::Duration;

/// A successful (2xx) provider answer.
#[derive(Clone, Debug)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Executes built provider requests. Non-2xx answers are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// Transport over a shared `reqwest` connection pool. Every call is bounded
/// by its own timeout; one slow provider does not hold up the others.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(ProviderResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(Duration::ZERO)
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::query::BookingsQuery;
    use crate::request::ProviderRequestBuilder;
    use registry::ProviderDescriptor;
    use registry::testutils::record_at;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bookings_request(server: &MockServer, credential: Option<&Credential>) -> ProviderRequest {
        request_to(&server.uri(), credential)
    }

    fn request_to(base_url: &str, credential: Option<&Credential>) -> ProviderRequest {
        let provider =
            ProviderDescriptor::from_record(record_at("svc-a", base_url, &["BOOKING"], &[]))
                .unwrap();
        let query = BookingsQuery {
            state: Some("CONFIRMED".into()),
            ..BookingsQuery::default()
        };
        ProviderRequestBuilder::new()
            .bookings(&provider, &query, credential)
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bookings"))
            .and(query_param("state", "CONFIRMED"))
            .and(header("x-token", "CRED_A"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"id":"b1"}]"#))
            .expect(1)
            .mount(&server)
            .await;

        let credential = Credential::Token("CRED_A".into());
        let transport = HttpTransport::new(Duration::from_secs(5));
        let response = transport
            .execute(bookings_request(&server, Some(&credential)))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], br#"[{"id":"b1"}]"#);
    }

    #[tokio::test]
    async fn test_execute_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_secs(5));
        let result = transport.execute(bookings_request(&server, None)).await;

        assert!(matches!(
            result,
            Err(ProviderError::Status(status)) if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(Duration::from_millis(100));
        let result = transport.execute(bookings_request(&server, None)).await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_execute_unreachable() {
        // Nothing listens on a port we just released
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let request = request_to(&format!("http://127.0.0.1:{port}"), None);

        let transport = HttpTransport::new(Duration::from_secs(5));
        let result = transport.execute(request).await;

        assert!(matches!(result, Err(ProviderError::Transport(_))));
    }
}
