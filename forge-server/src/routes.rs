//! HTTP routes.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use forge::io::config::ForgeConfig;
use forge::io::gateway::Completion;
use forge::io::harness::Sandbox;

use crate::sse::generate_handler;
use crate::state::AppState;

/// Build the full application: `POST /generate` plus the `/api` routes, with
/// open CORS for browser clients.
pub fn app<C, S>(state: AppState<C, S>) -> Router
where
    C: Completion + 'static,
    S: Sandbox + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router::<C, S>())
        .route("/generate", post(generate_handler::<C, S>))
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
fn api_router<C, S>() -> Router<AppState<C, S>>
where
    C: Completion + 'static,
    S: Sandbox + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config::<C, S>))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/config - the settings every request runs with.
async fn get_config<C, S>(State(state): State<AppState<C, S>>) -> Json<ForgeConfig>
where
    C: Completion + 'static,
    S: Sandbox + 'static,
{
    Json(state.config.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use forge::io::prompt;
    use forge::test_support::{ScriptedGateway, ScriptedSandbox};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(gateway: ScriptedGateway) -> AppState<ScriptedGateway, ScriptedSandbox> {
        let mut config = ForgeConfig::default();
        config.orchestrator.max_retries = 0;
        AppState::new(gateway, ScriptedSandbox::new(), config)
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app(state(ScriptedGateway::new()))
            .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn config_is_served_as_json() {
        let response = app(state(ScriptedGateway::new()))
            .oneshot(Request::get("/api/config").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(value["orchestrator"]["max_retries"], 0);
        assert_eq!(value["harness"]["interpreter"][0], "python3");
    }

    #[tokio::test]
    async fn empty_task_is_rejected() {
        let request = Request::post("/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"task": "   "}"#))
            .expect("request");
        let response = app(state(ScriptedGateway::new()))
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_streams_events_until_done() {
        let gateway = ScriptedGateway::new()
            .with_completion(prompt::CLASSIFIER, r#"{"type": "task", "language": "python"}"#)
            .with_generation(
                "```python\ndef greet():\n    print('Hello!')\n\nif __name__ == '__main__':\n    greet()\n```",
            )
            .with_completion(
                prompt::LENIENT_AUDITOR,
                r#"{"score": 98, "critique": "Friendly and well structured."}"#,
            );
        let request = Request::post("/generate")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"task": "Write a greeter."}"#))
            .expect("request");

        let response = app(state(gateway)).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let body = body_text(response).await;
        let phases: Vec<String> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|json| {
                let value: serde_json::Value = serde_json::from_str(json).expect("event json");
                value["phase"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert_eq!(phases.first().map(String::as_str), Some("log"));
        assert!(phases.iter().any(|p| p == "iteration"));
        assert!(phases.iter().any(|p| p == "explanation"));
        assert_eq!(phases.last().map(String::as_str), Some("done"));
    }
}
