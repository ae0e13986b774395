use poem::http::StatusCode;
use poem::{Endpoint, IntoResponse, Middleware, Request, Response};
use std::time::Instant;
use tracing::Level;

/// Logs one line per request with method, path, status, latency and peer address.
/// Request and response bodies are never logged since they carry key material.
pub struct RequestLogging;

impl<E: Endpoint> Middleware<E> for RequestLogging {
    type Output = RequestLoggingEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        RequestLoggingEndpoint { inner: ep }
    }
}

pub struct RequestLoggingEndpoint<E> {
    inner: E,
}

fn level_for(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else if status.is_success() {
        Level::INFO
    } else {
        Level::DEBUG
    }
}

macro_rules! log_request {
    ($level:expr, $($field:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($field)+),
            Level::WARN => tracing::warn!($($field)+),
            Level::INFO => tracing::info!($($field)+),
            _ => tracing::debug!($($field)+),
        }
    };
}

impl<E: Endpoint> Endpoint for RequestLoggingEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let peer = req
            .remote_addr()
            .as_socket_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let result = self.inner.call(req).await.map(IntoResponse::into_response);
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, error) = match &result {
            Ok(resp) => (resp.status(), None),
            Err(err) => (err.status(), Some(err.to_string())),
        };

        log_request!(
            level_for(status),
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            peer = %peer,
            error = error.as_deref(),
            "request handled"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poem::http::Uri;
    use poem::{handler, EndpointExt, Route};

    #[handler]
    fn ok() -> &'static str {
        "ok"
    }

    #[handler]
    fn fail() -> poem::Result<&'static str> {
        Err(poem::Error::from_status(StatusCode::BAD_GATEWAY))
    }

    #[test]
    fn test_level_follows_status_class() {
        assert_eq!(level_for(StatusCode::OK), Level::INFO);
        assert_eq!(level_for(StatusCode::NOT_FOUND), Level::WARN);
        assert_eq!(level_for(StatusCode::INTERNAL_SERVER_ERROR), Level::ERROR);
        assert_eq!(level_for(StatusCode::SWITCHING_PROTOCOLS), Level::DEBUG);
    }

    #[tokio::test]
    async fn test_responses_pass_through_unchanged() {
        let app = Route::new()
            .at("/ok", ok)
            .at("/fail", fail)
            .with(RequestLogging);

        let resp = app
            .get_response(Request::builder().uri(Uri::from_static("/ok")).finish())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.into_body().into_string().await.unwrap(), "ok");

        let resp = app
            .get_response(Request::builder().uri(Uri::from_static("/fail")).finish())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
