use advisor_common::{env_duration_secs, env_or, env_string_or};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Gate size shared by every request in the process.
    pub max_concurrent_rows: usize,
    /// Rows scheduled per wave; independent from the gate size.
    pub chunk_size: usize,
    pub item_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rows: 10,
            chunk_size: 10,
            item_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_rows: env_or("MAX_CONCURRENT_ROWS", defaults.max_concurrent_rows)
                .max(1),
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size).max(1),
            item_timeout: env_duration_secs(
                "ITEM_TIMEOUT_SECS",
                defaults.item_timeout.map_or(0, |limit| limit.as_secs()),
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub app_name: String,
    pub user_id: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_string_or("AGENT_APP_NAME", "app"),
            user_id: env_string_or("AGENT_USER_ID", "bq-remote-user"),
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            model: env_string_or("GEMINI_MODEL", "gemini-2.5-flash"),
            base_url: env_string_or(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com/v1beta",
            )
            .trim_end_matches('/')
            .to_string(),
            request_timeout: Duration::from_secs(env_or("GEMINI_REQUEST_TIMEOUT_SECS", 60u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_knobs_are_clamped() {
        std::env::set_var("MAX_CONCURRENT_ROWS", "0");
        std::env::set_var("CHUNK_SIZE", "0");
        let config = ExecutorConfig::from_env();
        assert_eq!(config.max_concurrent_rows, 1);
        assert_eq!(config.chunk_size, 1);
        std::env::remove_var("MAX_CONCURRENT_ROWS");
        std::env::remove_var("CHUNK_SIZE");
    }

    #[test]
    fn item_timeout_falls_back_to_default() {
        std::env::remove_var("ITEM_TIMEOUT_SECS");
        assert_eq!(
            ExecutorConfig::from_env().item_timeout,
            ExecutorConfig::default().item_timeout
        );

        std::env::set_var("ITEM_TIMEOUT_SECS", "0");
        assert_eq!(ExecutorConfig::from_env().item_timeout, None);
        std::env::set_var("ITEM_TIMEOUT_SECS", "7");
        assert_eq!(
            ExecutorConfig::from_env().item_timeout,
            Some(Duration::from_secs(7))
        );
        std::env::remove_var("ITEM_TIMEOUT_SECS");
    }
}
