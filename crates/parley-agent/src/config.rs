use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

pub const DEFAULT_GREETING: &str =
    "Hello, and thank you for calling. How may we be of service to you today?";

pub const DEFAULT_FAILURE_REPLY: &str =
    "I'm sorry, I had trouble with that. Could you say it one more time?";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a phone intake assistant. \
Keep your responses as brief as possible and ask no more than one question at a time. \
Collect the caller's first and last name, find out what they need, and offer to schedule \
a consultation with their email and phone number when they ask for one. \
Don't make assumptions about what values to plug into functions; ask for clarification \
if a request is ambiguous. Stay within the scope of the business during the call. \
You may insert a '•' symbol every 5 to 10 words at natural pauses where your response \
can be split for text to speech.";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Chat-completion endpoint settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Conversation behaviour shared by every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub greeting: String,
    pub system_prompt: String,
    /// Spoken when a turn fails.
    pub failure_reply: String,
    /// Tool invocations allowed in one turn before it is abandoned.
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            failure_reply: DEFAULT_FAILURE_REPLY.to_string(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}
