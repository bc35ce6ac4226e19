use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::executor::BatchError;
use crate::models::{BatchRequest, BatchResponse, ErrorResponse, FeedbackRequest, FeedbackResponse};
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

pub async fn process_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRequest>,
) -> impl IntoResponse {
    tracing::info!(
        request_id = payload.request_id.as_deref().unwrap_or("-"),
        caller = payload.caller.as_deref().unwrap_or("unknown"),
        session_user = payload.session_user.as_deref().unwrap_or("unknown"),
        context_keys = payload.user_defined_context.as_ref().map_or(0, |ctx| ctx.len()),
        rows = payload.calls.len(),
        in_flight = state.executor.gate().in_flight(),
        open_sessions = state.executor.sessions().open_sessions(),
        "batch received"
    );

    match state.executor.execute(payload.calls).await {
        Ok(replies) => (StatusCode::OK, Json(BatchResponse { replies })).into_response(),
        Err(err) => err.into_response(),
    }
}

// Both variants are 500 on the wire; the caller only retries on the first,
// and `code` keeps them apart for anyone reading responses or logs.
impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let body = match &self {
            BatchError::Retryable(_) => ErrorResponse {
                code: "quota_exceeded",
                message: "Quota Exceeded (429). Retryable.",
            },
            BatchError::Internal(_) => {
                tracing::error!(error = %self, "critical batch error");
                ErrorResponse {
                    code: "internal_batch_error",
                    message: "Internal Batch Processing Error",
                }
            }
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

pub async fn feedback(Json(payload): Json<FeedbackRequest>) -> Json<FeedbackResponse> {
    tracing::info!(
        run_id = payload.run_id.as_str(),
        feedback_score = payload.feedback_score,
        feedback_text = payload.feedback_text.as_str(),
        "feedback received"
    );
    Json(FeedbackResponse { status: "success" })
}

#[cfg(test)]
mod tests {
    use crate::app::build_router;
    use crate::backend::{AgentBackend, BackendError};
    use crate::config::ExecutorConfig;
    use crate::executor::{BatchError, BatchExecutor};
    use crate::models::BatchResponse;
    use crate::session::{ItemSession, SessionFactory};
    use crate::state::AppState;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::{IntoResponse, Response},
        Router,
    };
    use serde_json::{json, Value};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    /// Echoes the customer id back, or fails when the row says so.
    struct EchoBackend;

    #[async_trait]
    impl AgentBackend for EchoBackend {
        async fn run(&self, session: &mut ItemSession, prompt: &str) -> Result<(), BackendError> {
            if prompt.contains("quota") {
                return Err(BackendError::Agent(
                    "429 RESOURCE_EXHAUSTED: quota exceeded".to_string(),
                ));
            }
            if prompt.contains("broken") {
                return Err(BackendError::Agent("ValueError: bad row".to_string()));
            }
            session
                .state
                .insert("security_results".to_string(), json!(prompt));
            Ok(())
        }
    }

    fn router() -> Router {
        let config = ExecutorConfig {
            max_concurrent_rows: 2,
            chunk_size: 2,
            item_timeout: Some(Duration::from_secs(5)),
        };
        let executor = BatchExecutor::new(
            &config,
            SessionFactory::new("app", "bq-remote-user"),
            Arc::new(EchoBackend),
        );
        build_router(AppState::new(executor))
    }

    async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn error_body(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn bq_request(calls: Value) -> Value {
        json!({
            "requestId": "124ab1c",
            "caller": "//bigquery.googleapis.com/projects/demo/jobs/job_1",
            "sessionUser": "analyst@example.com",
            "userDefinedContext": {"mode": "scan"},
            "calls": calls
        })
    }

    #[tokio::test]
    async fn batch_returns_aligned_replies() {
        let calls = json!([["c-1", "low_usage"], ["c-2", "broken"], ["c-3", "inactive"]]);
        let (status, body) = post_json(router(), "/", bq_request(calls)).await;

        assert_eq!(status, StatusCode::OK);
        let response: BatchResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.replies.len(), 3);
        assert!(response.replies[0].contains("c-1"));
        assert!(response.replies[1].contains("bad row"));
        assert!(response.replies[2].contains("c-3"));
    }

    #[tokio::test]
    async fn quota_row_signals_retry() {
        let calls = json!([["c-1"], ["c-2", "quota"], ["c-3"]]);
        let (status, body) = post_json(router(), "/v1/batch", bq_request(calls)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "quota_exceeded");
        assert!(body.get("replies").is_none());
    }

    #[tokio::test]
    async fn minimal_body_is_accepted() {
        let (status, body) = post_json(router(), "/", json!({"calls": []})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replies"], json!([]));
    }

    #[tokio::test]
    async fn missing_calls_is_rejected() {
        let (status, _) = post_json(router(), "/", json!({"caller": "x"})).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn feedback_is_acknowledged() {
        let feedback = json!({"run_id": "r-1", "feedback_score": 4.5, "feedback_text": "good"});
        let (status, body) = post_json(router(), "/feedback", feedback).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
    }

    #[tokio::test]
    async fn internal_error_maps_to_internal_batch_error() {
        let err = BatchError::Internal("row task cancelled".to_string());
        let (status, body) = error_body(err.into_response()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "internal_batch_error");
        assert_eq!(body["message"], "Internal Batch Processing Error");
    }

    #[tokio::test]
    async fn retryable_error_maps_to_quota_exceeded() {
        let err = BatchError::Retryable("429 RESOURCE_EXHAUSTED".to_string());
        let (status, body) = error_body(err.into_response()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "quota_exceeded");
        assert_eq!(body["message"], "Quota Exceeded (429). Retryable.");
    }
}
