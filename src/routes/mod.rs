//! HTTP surface: the welcome page on `/`, everything else mirrored.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use http::StatusCode;

use crate::{pages, pipeline::{self, MirrorState}};

/// Build the mirror's router.
///
/// `GET /` and `POST /` answer the welcome page; every other path and
/// method falls through to the mirroring pipeline.
pub fn build_router(state: Arc<MirrorState>) -> Router {
    Router::new()
        .route("/", get(welcome).post(welcome_json))
        .fallback(mirror_entry)
        .with_state(state)
}

async fn welcome(State(state): State<Arc<MirrorState>>) -> Html<String> {
    Html(pages::welcome_page(&state.conf))
}

async fn welcome_json() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "mirror is up" }))
}

async fn mirror_entry(State(state): State<Arc<MirrorState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    let path_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    pipeline::process(&state, parts.method, path_query, &parts.headers, body).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::Method;
    use tower::ServiceExt;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

    use super::*;
    use crate::config::{MirrorConfig, UpstreamConfig};

    async fn router_for(server: &MockServer) -> Router {
        let addr = server.address();
        let mut conf = MirrorConfig::default();
        conf.server.my_host_name = "mirror.example".into();
        conf.server.my_port = None;
        conf.upstream = UpstreamConfig::for_tests(
            &format!("{}:{}", addr.ip(), addr.port()),
            "http://",
            &[],
        );
        Router::new().merge(build_router(Arc::new(MirrorState::build(conf).unwrap())))
    }

    #[tokio::test]
    async fn test_welcome_routes() {
        let server = MockServer::start().await;
        let router = router_for(&server).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(std::str::from_utf8(&body).unwrap().contains("Mirror is up"));

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fallback_mirrors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("mirrored"))
            .expect(1)
            .mount(&server)
            .await;

        let router = router_for(&server).await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/some/path")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"mirrored");
    }

    #[tokio::test]
    async fn test_query_string_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::query_param("q", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let router = router_for(&server).await;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/search?q=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
