//! Deterministic hashing for the response cache key (spec.md §3
//! `RequestFingerprint`). Never includes streaming or identity fields —
//! only the parameters that fully determine a deterministic completion.

use std::hash::{Hash, Hasher};

use crate::chat::{ChatCompletionRequest, Message};

/// Stable hash of the fields that determine a deterministic completion.
/// Two requests that would produce the same output from the same model
/// hash identically; anything else (stream flag, client identity,
/// timestamps) is deliberately excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint(pub u64);

impl RequestFingerprint {
    pub fn for_chat(req: &ChatCompletionRequest) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        req.model.hash(&mut hasher);
        hash_messages(&req.messages, &mut hasher);
        hash_f32(req.temperature, &mut hasher);
        hash_f32(req.top_p, &mut hasher);
        req.max_tokens.hash(&mut hasher);
        req.stop.hash(&mut hasher);
        req.seed.hash(&mut hasher);
        RequestFingerprint(hasher.finish())
    }

    /// Whether this request is eligible for the response cache at all.
    /// Streaming and non-deterministic (`temperature > 0`, no seed) requests
    /// are never cached (spec.md §4.6, §9 open question 4).
    pub fn is_cacheable(req: &ChatCompletionRequest, cache_opt_out: bool) -> bool {
        if req.stream || cache_opt_out {
            return false;
        }
        match (req.temperature, req.seed) {
            (Some(t), None) if t > 0.0 => false,
            _ => true,
        }
    }
}

fn hash_messages(messages: &[Message], hasher: &mut impl Hasher) {
    messages.len().hash(hasher);
    for m in messages {
        m.role.hash_into(hasher);
        normalize_whitespace(&m.content).hash(hasher);
    }
}

trait HashRole {
    fn hash_into(&self, hasher: &mut impl Hasher);
}

impl HashRole for crate::chat::Role {
    fn hash_into(&self, hasher: &mut impl Hasher) {
        let tag: u8 = match self {
            crate::chat::Role::System => 0,
            crate::chat::Role::User => 1,
            crate::chat::Role::Assistant => 2,
            crate::chat::Role::Tool => 3,
        };
        tag.hash(hasher);
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `f32` doesn't implement `Hash`; fold it through its bit pattern, treating
/// `None` distinctly from any concrete value.
fn hash_f32(v: Option<f32>, hasher: &mut impl Hasher) {
    match v {
        None => 0u8.hash(hasher),
        Some(f) => {
            1u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;

    fn req(content: &str, temperature: Option<f32>, seed: Option<i64>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "m1".into(),
            messages: vec![Message { role: Role::User, content: content.into() }],
            stream: false,
            temperature,
            top_p: None,
            max_tokens: None,
            stop: None,
            seed,
        }
    }

    #[test]
    fn identical_requests_hash_equal() {
        let a = RequestFingerprint::for_chat(&req("hello", Some(0.0), None));
        let b = RequestFingerprint::for_chat(&req("hello", Some(0.0), None));
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_hashes_differ() {
        let a = RequestFingerprint::for_chat(&req("hello", Some(0.0), None));
        let b = RequestFingerprint::for_chat(&req("goodbye", Some(0.0), None));
        assert_ne!(a, b);
    }

    #[test]
    fn whitespace_differences_normalize_equal() {
        let a = RequestFingerprint::for_chat(&req("hello   world", Some(0.0), None));
        let b = RequestFingerprint::for_chat(&req("hello world", Some(0.0), None));
        assert_eq!(a, b);
    }

    #[test]
    fn positive_temperature_without_seed_is_not_cacheable() {
        assert!(!RequestFingerprint::is_cacheable(&req("hi", Some(0.7), None), false));
    }

    #[test]
    fn positive_temperature_with_seed_is_cacheable() {
        assert!(RequestFingerprint::is_cacheable(&req("hi", Some(0.7), Some(42)), false));
    }

    #[test]
    fn zero_temperature_is_cacheable() {
        assert!(RequestFingerprint::is_cacheable(&req("hi", Some(0.0), None), false));
    }

    #[test]
    fn streaming_is_never_cacheable() {
        let mut r = req("hi", Some(0.0), None);
        r.stream = true;
        assert!(!RequestFingerprint::is_cacheable(&r, false));
    }

    #[test]
    fn explicit_opt_out_bypasses_cache() {
        assert!(!RequestFingerprint::is_cacheable(&req("hi", Some(0.0), None), true));
    }
}
