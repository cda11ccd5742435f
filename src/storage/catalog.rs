//! Model catalog
//!
//! Static list of known models. Lookup only; file state lives in
//! [`crate::storage::integrity`].

use crate::types::{ModelDescriptor, QualityTier, SpeedTier};

/// Known models, in display order
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// Catalog with a caller-supplied model list
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Built-in catalog of curated GGUF models
    pub fn builtin() -> Self {
        Self::new(builtin_models())
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "llama-3.2-1b-instruct".to_string(),
            source_url: "https://huggingface.co/bartowski/Llama-3.2-1B-Instruct-GGUF/resolve/main/Llama-3.2-1B-Instruct-Q4_K_M.gguf".to_string(),
            expected_size_bytes: 807_694_464, // ~0.8 GB
            display_name: "Llama 3.2 1B Instruct".to_string(),
            ram_estimate: "~1.5 GB".to_string(),
            quality_tier: QualityTier::Basic,
            speed_tier: SpeedTier::Fastest,
            description: "Smallest option, fine for categorization and short summaries.".to_string(),
            context_length: 131072,
        },
        ModelDescriptor {
            id: "llama-3.2-3b-instruct".to_string(),
            source_url: "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf".to_string(),
            expected_size_bytes: 2_019_377_696, // ~2 GB
            display_name: "Llama 3.2 3B Instruct".to_string(),
            ram_estimate: "~3 GB".to_string(),
            quality_tier: QualityTier::Good,
            speed_tier: SpeedTier::Fast,
            description: "Balanced default for chat and summarization.".to_string(),
            context_length: 131072,
        },
        ModelDescriptor {
            id: "qwen-2.5-3b-instruct".to_string(),
            source_url: "https://huggingface.co/Qwen/Qwen2.5-3B-Instruct-GGUF/resolve/main/qwen2.5-3b-instruct-q4_k_m.gguf".to_string(),
            expected_size_bytes: 2_104_932_768, // ~2.1 GB
            display_name: "Qwen 2.5 3B Instruct".to_string(),
            ram_estimate: "~3 GB".to_string(),
            quality_tier: QualityTier::Good,
            speed_tier: SpeedTier::Fast,
            description: "Strong multilingual support and structured output.".to_string(),
            context_length: 32768,
        },
        ModelDescriptor {
            id: "mistral-7b-instruct".to_string(),
            source_url: "https://huggingface.co/bartowski/Mistral-7B-Instruct-v0.3-GGUF/resolve/main/Mistral-7B-Instruct-v0.3-Q4_K_M.gguf".to_string(),
            expected_size_bytes: 4_372_812_000, // ~4.4 GB
            display_name: "Mistral 7B Instruct".to_string(),
            ram_estimate: "~6 GB".to_string(),
            quality_tier: QualityTier::Best,
            speed_tier: SpeedTier::Moderate,
            description: "Best quality, needs a machine with plenty of memory.".to_string(),
            context_length: 32768,
        },
    ]
}
