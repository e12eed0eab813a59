//! HTTP router.
//!
//! Routes are nested under `/api/`. The body limit sits a little above the
//! configured upload limit so the handler, not the extractor, reports the
//! precise size error for ordinary oversized files.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the API router.
pub fn api_router(ctx: ApiContext, allowed_origins: &[String]) -> Router {
    let body_limit = ctx.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/prescriptions/analyze", post(endpoints::prescriptions::analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx);

    let router = Router::new().nest("/api", api);
    match cors_layer(allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// CORS for the configured origins. `None` when no origin is configured.
fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    if allowed_origins.is_empty() {
        return None;
    }

    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
    use tower::ServiceExt;

    use crate::pipeline::analyzer::PrescriptionAnalyzer;
    use crate::pipeline::extraction::{EngineRegistry, MockOcrEngine, OcrEngine, PreprocessingPipeline};
    use crate::pipeline::structuring::{MockLlmClient, PrescriptionParser};
    use crate::pipeline_config::PipelineConfig;

    const BOUNDARY: &str = "rxscan-test-boundary";

    fn test_context(max_upload_bytes: usize) -> ApiContext {
        let config = PipelineConfig::default();
        let engines: Vec<Arc<dyn OcrEngine>> = vec![Arc::new(MockOcrEngine::new(
            "tesseract",
            "Rx\nTab Cetirizine 10mg HS x 5 days",
            0.82,
        ))];
        let registry = Arc::new(EngineRegistry::from_engines(engines, &config.merge));
        let llm = Arc::new(MockLlmClient::new(
            r#"{"medicines": [{"name": "Cetirizine", "dosage": "10mg", "frequency": "HS", "duration": "5 days"}]}"#,
        ));
        let parser = Arc::new(PrescriptionParser::new(llm, &config.llm));
        let analyzer = PrescriptionAnalyzer::new(
            Arc::new(PreprocessingPipeline::from_config(&config.preprocess)),
            registry,
            Some(parser),
            &config,
        );
        ApiContext::new(Arc::new(analyzer), max_upload_bytes)
    }

    fn test_router() -> Router {
        api_router(test_context(10 * 1024 * 1024), &[])
    }

    fn png_bytes() -> Vec<u8> {
        let mut img = GrayImage::from_pixel(96, 64, Luma([250u8]));
        for x in 10..86 {
            img.put_pixel(x, 30, Luma([10u8]));
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/prescriptions/analyze")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_lists_engines() {
        let response = test_router()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["engines"][0], "tesseract");
        assert_eq!(json["llm_configured"], true);
        assert_eq!(json["llm_provider"], "mock");
    }

    #[tokio::test]
    async fn analyze_returns_report() {
        let response = test_router()
            .oneshot(upload_request(multipart_body("file", "rx.png", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["primary_engine"], "tesseract");
        assert_eq!(json["text_lines"][1], "Tab Cetirizine 10mg HS x 5 days");
        assert_eq!(json["medicines"][0]["name"], "Cetirizine");
        assert_eq!(json["structured_by"], "llm");
        assert_eq!(json["ocr_complete"], true);
    }

    #[tokio::test]
    async fn undecodable_upload_reports_error_status() {
        let response = test_router()
            .oneshot(upload_request(multipart_body("file", "rx.jpg", &[0x17; 256])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("decode"));
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let response = test_router()
            .oneshot(upload_request(multipart_body("file", "rx.pdf", b"%PDF-1.7")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(response).await["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
    }

    #[tokio::test]
    async fn rejects_missing_file_field() {
        let response = test_router()
            .oneshot(upload_request(multipart_body("photo", "rx.png", &png_bytes())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn rejects_oversized_file() {
        let router = api_router(test_context(1024), &[]);
        let response = router
            .oneshot(upload_request(multipart_body("file", "rx.png", &vec![0u8; 4096])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["error"]["code"], "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = test_router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let router = api_router(test_context(1024), &["http://localhost:5173".to_string()]);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn no_cors_without_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["*".to_string()]).is_some());
    }
}
