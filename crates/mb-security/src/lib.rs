//! Capability policy for the analyzer sandbox and the instrumentation-probe heuristics.

mod guard;

pub use guard::CASE_INSENSITIVE_PATTERNS;
pub use guard::CONSOLE_CALL_PATTERN;
pub use guard::DEVTOOLS_MARKER_PATTERN;
pub use guard::INSPECTION_WORD_PATTERN;
pub use guard::MutationTarget;
pub use guard::TO_STRING_ASSIGN_PATTERN;
pub use guard::TO_STRING_WORD_PATTERN;
pub use guard::is_devtools_probe_source;
pub use guard::should_block_mutation;

use mb_core::BridgeError;
use mb_core::BridgeResult;
use url::Url;

/// Element tags the sandbox refuses to create.
pub const REQUIRED_BLOCKED_TAGS: &[&str] = &[
    "script", "img", "iframe", "frame", "link", "audio", "video", "source", "object", "embed",
    "form",
];

/// Globals replaced by throwing stubs inside the sandbox.
pub const REQUIRED_BLOCKED_GLOBALS: &[&str] = &[
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "EventSource",
    "importScripts",
];

/// What the analyzer sandbox may reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    pub allow_network: bool,
    pub allow_popups: bool,
    pub allow_navigation: bool,
    pub blocked_element_tags: Vec<String>,
    pub blocked_globals: Vec<String>,
    pub allowed_script_schemes: Vec<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_network: false,
            allow_popups: false,
            allow_navigation: false,
            blocked_element_tags: REQUIRED_BLOCKED_TAGS
                .iter()
                .map(|tag| (*tag).to_owned())
                .collect(),
            blocked_globals: REQUIRED_BLOCKED_GLOBALS
                .iter()
                .map(|name| (*name).to_owned())
                .collect(),
            allowed_script_schemes: vec!["http".to_owned(), "https".to_owned()],
        }
    }
}

impl SandboxPolicy {
    pub fn validate(&self) -> BridgeResult<()> {
        if self.allow_network || self.allow_popups || self.allow_navigation {
            return Err(BridgeError::new(
                "security.invalid_policy",
                "sandbox must not expose network, popup or navigation capabilities",
            ));
        }

        if let Some(tag) = REQUIRED_BLOCKED_TAGS
            .iter()
            .find(|tag| !self.blocked_element_tags.iter().any(|blocked| blocked == *tag))
        {
            return Err(BridgeError::new(
                "security.invalid_policy",
                format!("element `{tag}` must stay blocked in the sandbox"),
            ));
        }

        if let Some(name) = REQUIRED_BLOCKED_GLOBALS
            .iter()
            .find(|name| !self.blocked_globals.iter().any(|blocked| blocked == *name))
        {
            return Err(BridgeError::new(
                "security.invalid_policy",
                format!("global `{name}` must stay blocked in the sandbox"),
            ));
        }

        if self
            .allowed_script_schemes
            .iter()
            .any(|scheme| scheme != "http" && scheme != "https")
        {
            return Err(BridgeError::new(
                "security.invalid_policy",
                "analyzer scripts may only load over http or https",
            ));
        }

        Ok(())
    }

    pub fn allows_script_url(&self, url: &Url) -> bool {
        self.allowed_script_schemes
            .iter()
            .any(|scheme| scheme == url.scheme())
    }

    /// Resolves `raw` against `base` and checks the scheme.
    pub fn resolve_script_url(&self, raw: &str, base: &str) -> BridgeResult<Url> {
        let resolved = Url::parse(base)
            .and_then(|base| base.join(raw.trim()))
            .or_else(|_| Url::parse(raw.trim()))
            .map_err(|error| {
                BridgeError::new(
                    "sandbox.url_invalid",
                    format!("invalid remote JS URL `{raw}`: {error}"),
                )
            })?;

        if !self.allows_script_url(&resolved) {
            return Err(BridgeError::new(
                "sandbox.url_scheme",
                format!("remote JS URL must be http/https, got `{}`", resolved.scheme()),
            ));
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::SandboxPolicy;

    #[test]
    fn default_policy_is_valid() {
        assert!(SandboxPolicy::default().validate().is_ok());
    }

    #[test]
    fn rejects_network_capability() {
        let policy = SandboxPolicy {
            allow_network: true,
            ..SandboxPolicy::default()
        };
        let result = policy.validate();
        assert!(result.is_err());
        if let Err(error) = result {
            assert_eq!(error.code, "security.invalid_policy");
        }
    }

    #[test]
    fn rejects_unblocked_element() {
        let mut policy = SandboxPolicy::default();
        policy.blocked_element_tags.retain(|tag| tag != "iframe");
        assert!(policy.validate().is_err());

        let mut policy = SandboxPolicy::default();
        policy.blocked_globals.retain(|name| name != "fetch");
        assert!(policy.validate().is_err());
    }

    #[test]
    fn resolves_script_urls_against_page() {
        let policy = SandboxPolicy::default();
        let resolved = policy.resolve_script_url("/js/analyzer.js", "https://films.test/detail/1");
        assert_eq!(
            resolved.map(|url| url.to_string()),
            Ok("https://films.test/js/analyzer.js".to_owned())
        );
    }

    #[test]
    fn rejects_non_http_scripts() {
        let policy = SandboxPolicy::default();
        for raw in ["data:text/javascript,1", "file:///etc/passwd", "javascript:alert(1)"] {
            let resolved = policy.resolve_script_url(raw, "https://films.test/");
            assert!(resolved.is_err(), "{raw} should be rejected");
            if let Err(error) = resolved {
                assert_eq!(error.code, "sandbox.url_scheme");
            }
        }
    }

    #[test]
    fn rejects_unparseable_urls() {
        let policy = SandboxPolicy::default();
        let resolved = policy.resolve_script_url("http://[::1", "not a url");
        assert!(resolved.is_err());
        if let Err(error) = resolved {
            assert_eq!(error.code, "sandbox.url_invalid");
        }
    }
}
