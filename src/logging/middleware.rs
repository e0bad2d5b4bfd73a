use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::Instrument;

/// Route template the request matched, e.g. `/api/project/{id}/`. Keeps ids
/// out of the field so log lines group by endpoint.
fn route_of(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

fn request_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Runs the request inside a `request` span carrying its id, method and
/// route, so handler logs inherit them. Completion is logged at a level
/// matching the response status.
pub async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id_of(&request),
        method = %request.method(),
        route = %route_of(&request),
    );

    async move {
        tracing::debug!(uri = %request.uri(), "incoming request");

        let response = next.run(request).await;
        let status = response.status().as_u16();
        let duration_ms = start.elapsed().as_millis() as u64;

        if status >= 500 {
            tracing::error!(status, duration_ms, "request failed");
        } else if status >= 400 {
            tracing::warn!(status, duration_ms, "request rejected");
        } else {
            tracing::info!(status, duration_ms, "request completed");
        }
        response
    }
    .instrument(span)
    .await
}

pub fn request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_route_of_unrouted_request() {
        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        assert_eq!(route_of(&request), "unmatched");
        assert_eq!(request_id_of(&request), "unknown");
    }

    #[tokio::test]
    async fn test_route_template_reaches_inner_service() {
        let app = Router::new()
            .route(
                "/api/project/{id}/",
                get(|path: MatchedPath| async move { path.as_str().to_string() }),
            )
            .layer(from_fn(log_request));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/project/42/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"/api/project/{id}/");
    }
}
