use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            llm: LlmConfig::default(),
            engine: EngineConfig::default(),
            data_dir: None,
            log_level: Some("info".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// OpenAI-compatible completion endpoint settings. A missing `api_key`
/// switches every decision path to its deterministic fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Upper bound on a single completion call, in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Environment variables win over file values, matching how the original
    /// deployment supplied OpenAI credentials.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL")
            && !url.is_empty()
        {
            self.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL")
            && !model.is_empty()
        {
            self.model = Some(model);
        }
    }
}

/// Thresholds for the decision engine. Passed explicitly into every check so
/// the engine stays instantiable per call rather than process-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minutes of silence before a session is considered inactive.
    #[serde(default = "default_inactivity_threshold_minutes")]
    pub inactivity_threshold_minutes: i64,

    /// Longer idle than this switches the proactive nudge to a new topic.
    #[serde(default = "default_inactivity_new_topic_minutes")]
    pub inactivity_new_topic_minutes: i64,

    /// How often the inactivity sweep runs.
    #[serde(default = "default_inactivity_sweep_minutes")]
    pub inactivity_sweep_minutes: u64,

    /// How often the personality sweep runs.
    #[serde(default = "default_personality_sweep_minutes")]
    pub personality_sweep_minutes: u64,

    /// Sessions below this message count are never analyzed.
    #[serde(default = "default_personality_min_messages")]
    pub personality_min_messages: u64,

    /// Minimum hours between two personality evaluations of one session.
    #[serde(default = "default_personality_recheck_hours")]
    pub personality_recheck_hours: i64,

    /// Sessions idle longer than this are skipped by the personality sweep.
    #[serde(default = "default_personality_activity_window_hours")]
    pub personality_activity_window_hours: i64,

    /// Without an API key, suggest an update exactly every Nth message.
    #[serde(default = "default_personality_fallback_interval")]
    pub personality_fallback_interval: u64,

    /// Suggestions above this confidence are applied without asking.
    #[serde(default = "default_personality_auto_apply_confidence")]
    pub personality_auto_apply_confidence: f64,

    /// How many recent turns feed the conversation analysis.
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,

    /// Regenerate the session summary every Nth message.
    #[serde(default = "default_summary_interval")]
    pub summary_interval: u64,

    /// Chance that a pooled agent answers a given message.
    #[serde(default = "default_respond_probability")]
    pub respond_probability: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_minutes: default_inactivity_threshold_minutes(),
            inactivity_new_topic_minutes: default_inactivity_new_topic_minutes(),
            inactivity_sweep_minutes: default_inactivity_sweep_minutes(),
            personality_sweep_minutes: default_personality_sweep_minutes(),
            personality_min_messages: default_personality_min_messages(),
            personality_recheck_hours: default_personality_recheck_hours(),
            personality_activity_window_hours: default_personality_activity_window_hours(),
            personality_fallback_interval: default_personality_fallback_interval(),
            personality_auto_apply_confidence: default_personality_auto_apply_confidence(),
            analysis_window: default_analysis_window(),
            summary_interval: default_summary_interval(),
            respond_probability: default_respond_probability(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3900
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_inactivity_threshold_minutes() -> i64 {
    30
}

fn default_inactivity_new_topic_minutes() -> i64 {
    60
}

fn default_inactivity_sweep_minutes() -> u64 {
    5
}

fn default_personality_sweep_minutes() -> u64 {
    20
}

fn default_personality_min_messages() -> u64 {
    20
}

fn default_personality_recheck_hours() -> i64 {
    24
}

fn default_personality_activity_window_hours() -> i64 {
    24
}

fn default_personality_fallback_interval() -> u64 {
    50
}

fn default_personality_auto_apply_confidence() -> f64 {
    0.8
}

fn default_analysis_window() -> usize {
    30
}

fn default_summary_interval() -> u64 {
    10
}

fn default_respond_probability() -> f64 {
    0.3
}
