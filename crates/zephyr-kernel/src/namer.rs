//! Subject Namer — deterministic, collision-free subject naming.
//!
//! This is the only sanctioned way subjects are formed; no other component
//! in the workspace concatenates subject strings by hand.

/// Default subject namespace prefix. Every subject produced by [`namer`]
/// (or an instance-scoped [`Namer`]) begins with this segment.
pub const DEFAULT_NAMESPACE: &str = "zephyr";

/// Joins a fixed namespace prefix with zero or more identifiers, normalizing
/// each identifier and dropping empty ones.
///
/// ```
/// use zephyr_kernel::namer::Namer;
///
/// let namer = Namer::default();
/// assert_eq!(namer.subject(&["gateway.announce"]), "zephyr.gateway.announce");
/// assert_eq!(namer.subject(&["service", "HelloWorld"]), "zephyr.service.hello-world");
/// ```
#[derive(Debug, Clone)]
pub struct Namer {
    namespace: String,
}

impl Default for Namer {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl Namer {
    /// Build a namer with a custom namespace prefix instead of `"zephyr"`.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Format one or more identifiers into a subject string under this
    /// namer's namespace. Empty identifiers are skipped; everything else is
    /// normalized by [`normalize_segment`] and joined with `.`.
    pub fn subject(&self, identifiers: &[&str]) -> String {
        let mut chunks = Vec::with_capacity(identifiers.len() + 1);
        chunks.push(self.namespace.clone());
        for id in identifiers {
            if !id.is_empty() {
                chunks.push(normalize_segment(id));
            }
        }
        chunks.join(".")
    }

    /// Canonical subject for gateway announcements: `<ns>.gateway.announce`.
    pub fn gateway_announce(&self) -> String {
        self.subject(&["gateway.announce"])
    }

    /// Canonical subject for service announcements: `<ns>.service.announce`.
    pub fn service_announce(&self) -> String {
        self.subject(&["service.announce"])
    }

    /// Canonical dispatch entry point for a named service:
    /// `<ns>.service.<normalized-name>`.
    pub fn service_dispatch(&self, service_name: &str) -> String {
        self.subject(&["service", service_name])
    }
}

/// Normalize one identifier segment:
/// - runs of lowercase letters, digits, `-`, `.`, `*` pass through;
/// - an uppercase letter preceded by a lowercase letter becomes `-<lower>`
///   (camelCase → kebab-case);
/// - other uppercase letters become their lowercase form;
/// - `_` becomes `-`;
/// - all other characters are dropped.
pub fn normalize_segment(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        match c {
            'A'..='Z' => {
                if matches!(prev, Some(p) if p.is_ascii_lowercase()) {
                    out.push('-');
                    out.push(c.to_ascii_lowercase());
                } else {
                    out.push(c.to_ascii_lowercase());
                }
            }
            'a'..='z' | '0'..='9' => out.push(c),
            '-' => out.push('-'),
            '_' => out.push('-'),
            '.' => out.push('.'),
            '*' => out.push('*'),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_alone() {
        let namer = Namer::default();
        assert_eq!(namer.subject(&[]), "zephyr");
    }

    #[test]
    fn gateway_announce_subject_is_stable() {
        let namer = Namer::default();
        assert_eq!(namer.gateway_announce(), "zephyr.gateway.announce");
    }

    #[test]
    fn service_announce_subject_is_stable() {
        let namer = Namer::default();
        assert_eq!(namer.service_announce(), "zephyr.service.announce");
    }

    #[test]
    fn camel_case_identifier_becomes_kebab_case() {
        let namer = Namer::default();
        assert_eq!(
            namer.subject(&["service", "HelloWorld"]),
            "zephyr.service.hello-world"
        );
    }

    #[test]
    fn leading_uppercase_run_lowercases_without_hyphen() {
        // No preceding lowercase letter, so consecutive capitals don't each
        // get a hyphen inserted.
        assert_eq!(normalize_segment("HTTPServer"), "httpserver");
    }

    #[test]
    fn underscore_becomes_hyphen() {
        assert_eq!(normalize_segment("hello_world"), "hello-world");
    }

    #[test]
    fn disallowed_characters_are_dropped() {
        assert_eq!(normalize_segment("a/b c!d"), "abcd");
    }

    #[test]
    fn empty_identifiers_are_skipped() {
        let namer = Namer::default();
        assert_eq!(namer.subject(&["service", "", "x"]), "zephyr.service.x");
    }

    #[test]
    fn wildcard_and_dot_pass_through() {
        assert_eq!(normalize_segment("service.*"), "service.*");
    }

    #[test]
    fn custom_namespace_prefix() {
        let namer = Namer::with_namespace("zeph-test");
        assert_eq!(namer.subject(&["x"]), "zeph-test.x");
    }
}
