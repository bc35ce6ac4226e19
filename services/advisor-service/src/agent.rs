use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{AgentBackend, BackendError};
use crate::config::AgentConfig;
use crate::session::ItemSession;

/// Reply used by a specialist (and by the report) when nothing triggered.
pub const NO_ISSUE: &str = "NO_ISSUE";

/// One focused reviewer of a customer record. Its text output lands in the
/// session state under `output_key`.
#[derive(Clone, Copy, Debug)]
pub struct Specialist {
    pub name: &'static str,
    pub report_field: &'static str,
    pub output_key: &'static str,
    pub instruction: &'static str,
}

pub const SPECIALISTS: [Specialist; 3] = [
    Specialist {
        name: "SecurityGuardian",
        report_field: "security",
        output_key: "security_results",
        instruction: "You are the 'SecurityGuardian'.\n\
Scan the input data for: 'suspicious_login', 'no_2fa', 'password_old'.\n\
If NONE of these triggered: Output exactly \"NO_ISSUE\".\n\
If an issue exists, output:\n\
\"URGENT: [Subject Line]\n[Body text]\"",
    },
    Specialist {
        name: "BillingAdvisor",
        report_field: "billing",
        output_key: "billing_results",
        instruction: "You are the 'BillingAdvisor'.\n\
Scan the input data for: 'card_expiring', 'payment_failed', 'renewal_soon'.\n\
If NONE of these triggered: Output exactly \"NO_ISSUE\".\n\
If an issue exists, output:\n\
\"Action Required: [Subject Line]\n[Body text]\"",
    },
    Specialist {
        name: "RetentionSpecialist",
        report_field: "retention",
        output_key: "retention_results",
        instruction: "You are the 'RetentionSpecialist'.\n\
Scan the input data for: 'low_usage', 'unused_points', 'inactive'.\n\
If NONE of these triggered: Output exactly \"NO_ISSUE\".\n\
If an opportunity exists, output:\n\
\"Hi there! [Friendly Subject Line]\n[Body text]\"",
    },
];

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

impl GenerateContentResponse {
    fn joined_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    /// Why the model declined to answer, if it said so.
    fn refusal(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Some(format!("prompt blocked: {reason}"));
        }
        match self.candidates.first()?.finish_reason.as_deref() {
            Some("STOP") | None => None,
            Some(reason) => Some(format!("generation stopped: {reason}")),
        }
    }
}

/// Minimal client for the Gemini `generateContent` REST call.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &AgentConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub async fn generate(&self, instruction: &str, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            system_instruction: Content::text(None, instruction),
            contents: vec![Content::text(Some("user"), prompt)],
        };

        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            // Quota replies carry RESOURCE_EXHAUSTED in the body; keep it.
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|err| BackendError::Parse(err.to_string()))?;
        if let Some(text) = parsed.joined_text() {
            return Ok(text);
        }
        match parsed.refusal() {
            Some(reason) => Err(BackendError::Agent(reason)),
            None => Err(BackendError::Empty(self.model.clone())),
        }
    }
}

/// Runs every specialist against the same record at once and collects
/// their verdicts into the session.
pub struct CustomerScanner {
    client: GeminiClient,
    specialists: Vec<Specialist>,
}

impl CustomerScanner {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            specialists: SPECIALISTS.to_vec(),
        }
    }
}

#[async_trait]
impl AgentBackend for CustomerScanner {
    async fn run(&self, session: &mut ItemSession, prompt: &str) -> Result<(), BackendError> {
        let verdicts = try_join_all(self.specialists.iter().map(|specialist| async move {
            let text = self.client.generate(specialist.instruction, prompt).await?;
            tracing::debug!(specialist = specialist.name, "specialist finished");
            Ok::<_, BackendError>((specialist.output_key, text))
        }))
        .await?;

        for (key, text) in verdicts {
            session.state.insert(key.to_string(), Value::String(text));
        }
        Ok(())
    }

    fn report(&self, session: &ItemSession) -> Value {
        let mut report = serde_json::Map::new();
        for specialist in &self.specialists {
            let verdict = session
                .state_text(specialist.output_key)
                .unwrap_or_else(|| NO_ISSUE.to_string());
            report.insert(specialist.report_field.to_string(), json!(verdict));
        }
        Value::Object(report)
    }
}
