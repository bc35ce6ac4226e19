use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Batch sent by a warehouse remote function: one inner array per row.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub session_user: Option<String>,
    #[serde(default)]
    pub user_defined_context: Option<Map<String, Value>>,
    pub calls: Vec<Vec<Value>>,
}

#[derive(Serialize, Deserialize)]
pub struct BatchResponse {
    pub replies: Vec<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: &'static str,
}

#[derive(Deserialize, Serialize)]
pub struct FeedbackRequest {
    pub run_id: String,
    pub feedback_score: f64,
    #[serde(default)]
    pub feedback_text: String,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub status: &'static str,
}
