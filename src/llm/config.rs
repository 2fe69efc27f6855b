//! Configuration for the streaming chat client

/// Configuration for [`ChatClient`](crate::llm::ChatClient).
#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Model identifier sent with each request.
    pub model: String,

    /// API key; read from `MURMUR_API_KEY`/`OPENAI_API_KEY` when empty.
    pub api_key: String,

    /// Base URL of an OpenAI-compatible endpoint.
    pub base_url: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens per response, if capped.
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4-turbo-preview".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com".to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl LlmConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Resolve the API key from the config or the environment.
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var("MURMUR_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default()
    }
}
