#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    HuggingFace,
    OpenAI,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "huggingface",
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "huggingface" | "hf" => Some(Provider::HuggingFace),
            "openai" => Some(Provider::OpenAI),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![Provider::HuggingFace, Provider::OpenAI, Provider::Ollama]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "Hugging Face Inference",
            Provider::OpenAI => "ChatGPT (OpenAI)",
            Provider::Ollama => "Ollama (Local)",
        }
    }

    /// Environment variable holding the bearer credential, if the provider needs one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::HuggingFace => Some("HF_TOKEN"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Ollama => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.2",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Ollama => "mistral:latest",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for provider in Provider::all() {
            assert_eq!(Provider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::from_str("HF"), Some(Provider::HuggingFace));
        assert_eq!(Provider::from_str("claude"), None);
    }

    #[test]
    fn test_only_local_provider_skips_credentials() {
        assert!(Provider::Ollama.api_key_env().is_none());
        assert_eq!(Provider::HuggingFace.api_key_env(), Some("HF_TOKEN"));
    }
}
