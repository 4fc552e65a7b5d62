//! Types describing models on disk and models resident in a child process.

use serde::{Deserialize, Serialize};

/// A model file discovered by the registry (spec.md §3 `ModelDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    /// Unique id, typically the filename stem.
    pub id: String,
    /// Local path to the model artifact.
    pub path: String,
    pub size_bytes: u64,
    /// Parsed from the filename, e.g. `Q4_K_M`. Empty if unrecognized.
    pub quantization: String,
    /// Present for multimodal models that ship a separate projector file.
    pub projector_path: Option<String>,
    /// Advisory only; set by the registry, not authoritative over the cache.
    pub is_loaded: bool,
}

/// A live child process holding one model resident (spec.md §3 `ModelInstance`).
///
/// Owned exclusively by the model cache; never constructed elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInstance {
    pub model_id: String,
    pub pid: u32,
    pub port: u16,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: chrono::DateTime<chrono::Utc>,
}

impl ModelInstance {
    pub fn touch(&mut self) {
        self.last_used_at = chrono::Utc::now();
    }
}

/// Recognized quantization suffixes, longest/most-specific first so that
/// e.g. `Q3_K_S` is matched before the bare `Q3_K` variant.
const QUANT_TAGS: &[&str] = &[
    "Q2_K", "Q3_K_S", "Q3_K_M", "Q3_K_L", "Q3_K", "Q4_K_S", "Q4_K_M", "Q4_K", "Q4_0", "Q4_1",
    "Q5_K_S", "Q5_K_M", "Q5_K", "Q5_0", "Q5_1", "Q6_K", "Q8_0", "F16", "F32",
];

/// Parses a quantization tag out of a model filename stem. Matching is
/// case-insensitive and looks for the tag as a `_`-delimited token anywhere
/// in the name (e.g. `llama-3-8b-instruct.Q4_K_M.gguf` → `Q4_K_M`).
pub fn parse_quantization(filename: &str) -> String {
    let upper = filename.to_uppercase();
    let normalized = upper.replace('.', "_").replace('-', "_");
    for tag in QUANT_TAGS {
        if normalized.split('_').collect::<Vec<_>>().join("_").contains(tag) {
            // Confirm the tag appears as a token boundary, not a substring
            // of something longer (e.g. don't match Q4_0 inside Q4_01).
            let tokens: Vec<&str> = normalized.split('_').filter(|s| !s.is_empty()).collect();
            let tag_tokens: Vec<&str> = tag.split('_').collect();
            if tokens.windows(tag_tokens.len()).any(|w| w == tag_tokens.as_slice()) {
                return (*tag).to_string();
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_quant_tags() {
        assert_eq!(parse_quantization("llama-3-8b.Q4_K_M.gguf"), "Q4_K_M");
        assert_eq!(parse_quantization("mistral-7b.Q5_K_S.gguf"), "Q5_K_S");
        assert_eq!(parse_quantization("phi-3.F16.gguf"), "F16");
        assert_eq!(parse_quantization("model.Q8_0.gguf"), "Q8_0");
    }

    #[test]
    fn unrecognized_tag_yields_empty() {
        assert_eq!(parse_quantization("model-custom.gguf"), "");
    }

    #[test]
    fn touch_advances_last_used() {
        let mut inst = ModelInstance {
            model_id: "m1".into(),
            pid: 1,
            port: 50000,
            loaded_at: chrono::Utc::now(),
            last_used_at: chrono::Utc::now() - chrono::Duration::seconds(60),
        };
        let before = inst.last_used_at;
        inst.touch();
        assert!(inst.last_used_at > before);
    }
}
