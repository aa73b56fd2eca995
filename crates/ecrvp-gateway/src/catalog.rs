//! Built-in provider descriptors
//!
//! Each provider declares its capabilities once here. Segmentation and
//! capacity checks are written against [`Capabilities`], never against a
//! provider name.

use serde::Serialize;

/// Request/response shape spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `POST {base}/v1/messages`
    AnthropicMessages,
    /// `POST {base}/chat/completions`
    OpenAiChat,
    /// `POST {base}/api/chat`
    OllamaChat,
}

/// Declared limits and ingestion modes of one provider/model pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Accepts documents and images as native attachments
    pub native_files: bool,
    /// Total context window, in tokens
    pub context_tokens: u64,
    /// Largest file segment accepted in one call, in bytes
    pub max_segment_bytes: usize,
}

impl Capabilities {
    /// Rough byte-to-token ratio used for capacity checks
    pub const BYTES_PER_TOKEN: u64 = 4;

    /// Estimated token cost of `bytes` of input
    #[inline]
    #[must_use]
    pub const fn estimate_tokens(bytes: u64) -> u64 {
        bytes.div_ceil(Self::BYTES_PER_TOKEN)
    }
}

/// Static description of a supported provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub wire: WireFormat,
    pub default_base_url: &'static str,
    /// Default credential variable; `None` means no credential is needed
    pub api_key_env: Option<&'static str>,
    pub native_files: bool,
    pub default_context_tokens: u64,
    pub max_segment_bytes: usize,
    /// Known models and their context windows
    pub models: &'static [(&'static str, u64)],
}

impl ProviderDescriptor {
    /// Whether a credential must be resolvable before a channel opens
    #[inline]
    #[must_use]
    pub const fn requires_credential(&self) -> bool {
        self.api_key_env.is_some()
    }

    /// Capabilities for a model, falling back to the provider default window
    #[must_use]
    pub fn capabilities(&self, model: &str) -> Capabilities {
        let context_tokens = self
            .models
            .iter()
            .find(|(id, _)| *id == model)
            .map_or(self.default_context_tokens, |(_, ctx)| *ctx);
        Capabilities {
            native_files: self.native_files,
            context_tokens,
            max_segment_bytes: self.max_segment_bytes,
        }
    }
}

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

static CATALOG: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        id: "anthropic",
        display_name: "Anthropic",
        wire: WireFormat::AnthropicMessages,
        default_base_url: "https://api.anthropic.com",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        native_files: true,
        default_context_tokens: 200_000,
        max_segment_bytes: 4 * MIB,
        models: &[
            ("claude-opus-4-6", 200_000),
            ("claude-opus-4-5-20250514", 200_000),
            ("claude-sonnet-4-5-20250929", 200_000),
            ("claude-haiku-4-5-20251001", 200_000),
        ],
    },
    ProviderDescriptor {
        id: "openai",
        display_name: "OpenAI",
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        native_files: true,
        default_context_tokens: 128_000,
        max_segment_bytes: MIB,
        models: &[
            ("gpt-5", 400_000),
            ("gpt-5-mini", 400_000),
            ("gpt-4.1", 1_000_000),
            ("gpt-4o", 128_000),
            ("gpt-4o-mini", 128_000),
            ("o3", 200_000),
            ("o4-mini", 200_000),
        ],
    },
    ProviderDescriptor {
        id: "deepseek",
        display_name: "DeepSeek",
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.deepseek.com/v1",
        api_key_env: Some("DEEPSEEK_API_KEY"),
        native_files: false,
        default_context_tokens: 64_000,
        max_segment_bytes: 512 * KIB,
        models: &[("deepseek-chat", 128_000), ("deepseek-reasoner", 128_000)],
    },
    ProviderDescriptor {
        id: "mistral",
        display_name: "Mistral",
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.mistral.ai/v1",
        api_key_env: Some("MISTRAL_API_KEY"),
        native_files: false,
        default_context_tokens: 128_000,
        max_segment_bytes: 512 * KIB,
        models: &[
            ("mistral-large-latest", 128_000),
            ("mistral-medium-latest", 128_000),
            ("mistral-small-latest", 128_000),
            ("codestral-latest", 256_000),
        ],
    },
    ProviderDescriptor {
        id: "xai",
        display_name: "xAI",
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.x.ai/v1",
        api_key_env: Some("XAI_API_KEY"),
        native_files: false,
        default_context_tokens: 256_000,
        max_segment_bytes: MIB,
        models: &[
            ("grok-4", 256_000),
            ("grok-4-fast", 2_000_000),
            ("grok-3", 131_072),
            ("grok-3-mini", 131_072),
        ],
    },
    ProviderDescriptor {
        id: "perplexity",
        display_name: "Perplexity",
        wire: WireFormat::OpenAiChat,
        default_base_url: "https://api.perplexity.ai",
        api_key_env: Some("PERPLEXITY_API_KEY"),
        native_files: false,
        default_context_tokens: 128_000,
        max_segment_bytes: 512 * KIB,
        models: &[("sonar-pro", 200_000), ("sonar", 128_000)],
    },
    ProviderDescriptor {
        id: "ollama",
        display_name: "Ollama (local)",
        wire: WireFormat::OllamaChat,
        default_base_url: "http://localhost:11434",
        api_key_env: None,
        native_files: false,
        default_context_tokens: 32_000,
        max_segment_bytes: 256 * KIB,
        models: &[],
    },
];

/// Every built-in provider
#[inline]
#[must_use]
pub fn catalog() -> &'static [ProviderDescriptor] {
    CATALOG
}

/// Look up a provider by identifier
#[must_use]
pub fn descriptor(id: &str) -> Option<&'static ProviderDescriptor> {
    CATALOG.iter().find(|d| d.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_declared_window() {
        let openai = descriptor("openai").unwrap();
        assert_eq!(openai.capabilities("gpt-4.1").context_tokens, 1_000_000);
        assert_eq!(openai.capabilities("unlisted").context_tokens, 128_000);
    }

    #[test]
    fn ollama_needs_no_credential() {
        assert!(!descriptor("ollama").unwrap().requires_credential());
        assert!(descriptor("anthropic").unwrap().requires_credential());
    }

    #[test]
    fn ids_are_unique() {
        let mut ids: Vec<_> = catalog().iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog().len());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(Capabilities::estimate_tokens(0), 0);
        assert_eq!(Capabilities::estimate_tokens(5), 2);
    }
}
