//! Route pattern contract.
//!
//! Patterns are opaque on the wire (carried as their source string) and
//! recompiled on receipt by whichever [`PatternCompiler`] the receiving
//! process is configured with. The indexer never parses paths itself — it
//! only calls [`RoutePattern::matches`].

use crate::error::PatternError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A compiled path pattern supplied by an external router.
///
/// The only operation the core requires is `matches`; everything else
/// (pattern syntax, capture semantics) belongs to the router.
pub trait RoutePattern: Send + Sync + fmt::Debug {
    /// The pattern's original source text, as carried on the wire.
    fn source(&self) -> &str;

    /// Attempt to match `path` against this pattern. Returns the captured
    /// path bindings on success.
    fn matches(&self, path: &str) -> Option<HashMap<String, String>>;
}

/// Compiles pattern source text (as received over the wire, or supplied
/// locally) into a [`RoutePattern`].
pub trait PatternCompiler: Send + Sync {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn RoutePattern>, PatternError>;
}

/// Reference pattern compiler: `{param}` segment templates.
///
/// This is the default compiler used when no external router is wired in —
/// it exists so the rest of the crate (and its tests) has a concrete,
/// swappable `PatternCompiler` to exercise. Production deployments are
/// expected to supply their own compiler backed by their actual HTTP
/// router's pattern language, per the spec's "pattern sharing across
/// processes" design note.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplatePatternCompiler;

impl PatternCompiler for TemplatePatternCompiler {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn RoutePattern>, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::Invalid(
                pattern.to_string(),
                "pattern must start with '/'".to_string(),
            ));
        }
        Ok(Arc::new(TemplatePattern {
            source: pattern.to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
struct TemplatePattern {
    source: String,
}

impl RoutePattern for TemplatePattern {
    fn source(&self) -> &str {
        &self.source
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let t_parts: Vec<&str> = self.source.trim_matches('/').split('/').collect();
        let p_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

        if t_parts.len() != p_parts.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (t, p) in t_parts.iter().zip(p_parts.iter()) {
            if let Some(name) = t.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                params.insert(name.to_string(), (*p).to_string());
            } else if t != p {
                return None;
            }
        }
        Some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_matches() {
        let pattern = TemplatePatternCompiler.compile("/hello").unwrap();
        assert!(pattern.matches("/hello").is_some());
        assert!(pattern.matches("/goodbye").is_none());
    }

    #[test]
    fn captures_named_segment() {
        let pattern = TemplatePatternCompiler
            .compile("/v1/models/{model_id}")
            .unwrap();
        let bindings = pattern.matches("/v1/models/gpt-4").unwrap();
        assert_eq!(bindings.get("model_id").unwrap(), "gpt-4");
    }

    #[test]
    fn rejects_pattern_missing_leading_slash() {
        assert!(TemplatePatternCompiler.compile("hello").is_err());
    }

    #[test]
    fn source_round_trips() {
        let pattern = TemplatePatternCompiler.compile("/x/{y}").unwrap();
        assert_eq!(pattern.source(), "/x/{y}");
    }

    #[test]
    fn depth_mismatch_does_not_match() {
        let pattern = TemplatePatternCompiler.compile("/a/b").unwrap();
        assert!(pattern.matches("/a/b/c").is_none());
        assert!(pattern.matches("/a").is_none());
    }
}
