//! Heuristics that recover a server URL from dev-server banners.

use std::net::{Ipv4Addr, Ipv6Addr};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use super::strip_ansi;

/// Whether a heuristic looks for the local or the network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlScope {
    Local,
    Network,
}

/// How a pattern's capture groups become a URL candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Group 1 is a full URL.
    Url,
    /// Group 1 is `host:port` without a scheme.
    HostPort,
    /// Group 1 is a port on localhost.
    Port,
    /// Python's `Serving HTTP on <host> port <port> (<url>)`.
    PythonServe,
}

/// Error type for sniffer operations.
#[derive(thiserror::Error, Debug)]
pub enum SnifferError {
    /// Invalid regex pattern.
    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A URL found in process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedUrl {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub scope: UrlScope,
}

/// Result of scanning one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffResult {
    pub local: Option<DetectedUrl>,
    pub network: Option<DetectedUrl>,
}

impl SniffResult {
    /// The local URL if found, otherwise the network URL.
    #[must_use]
    pub fn preferred(self) -> Option<DetectedUrl> {
        self.local.or(self.network)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.network.is_none()
    }
}

/// Verbs dev servers use in front of their address.
const VERBS: &str = "listening|running|available|serving|started|starting|ready|live";

/// Built-in heuristics, in priority order within each scope.
fn default_patterns() -> Vec<(&'static str, UrlScope, CaptureKind, String)> {
    use CaptureKind::{HostPort, Port, PythonServe, Url};
    use UrlScope::{Local, Network};

    vec![
        // Vite, Nuxt, Astro, SvelteKit, Next.js, Angular: "➜ Local: http://..."
        ("local-banner", Local, Url, r"(?i)\blocal:\s+(https?://\S+)".to_string()),
        // Older Next.js: "started server on 0.0.0.0:3000, url: http://localhost:3000"
        ("url-field", Local, Url, r"(?i)\burl:\s*(https?://\S+)".to_string()),
        (
            "verb-url",
            Local,
            Url,
            format!(r"(?i)\b(?:{VERBS})\b[^\n]*?\b(?:at|on)\s*:?\s+(https?://\S+)"),
        ),
        (
            "verb-host-port",
            Local,
            HostPort,
            format!(
                r"(?i)\b(?:{VERBS})\b[^\n]*?\b(?:at|on)\s+(?:port\s+)?((?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):\d{{1,5}})\b"
            ),
        ),
        (
            "verb-port",
            Local,
            Port,
            r"(?i)\b(?:listening|running|server|started|serving)\b[^\n]*?\bon\s+port\s+:?(\d{1,5})\b"
                .to_string(),
        ),
        (
            "loopback-url",
            Local,
            Url,
            r"(?i)(https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\])(?::\d+)?\S*)".to_string(),
        ),
        (
            "python-http-server",
            Local,
            PythonServe,
            r"Serving HTTP on (\S+) port (\d{1,5})(?: \((https?://[^)\s]+)\))?".to_string(),
        ),
        // Vite/Nuxt "Network:", Create React App "On Your Network:"
        ("network-banner", Network, Url, r"(?i)\bnetwork:\s+(https?://\S+)".to_string()),
    ]
}

/// A single URL heuristic.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    name: String,
    scope: UrlScope,
    kind: CaptureKind,
    regex: Regex,
}

impl UrlPattern {
    /// Create a new heuristic.
    ///
    /// # Errors
    ///
    /// Returns `SnifferError::InvalidPattern` if the regex is invalid.
    pub fn new(
        name: impl Into<String>,
        scope: UrlScope,
        kind: CaptureKind,
        pattern: &str,
    ) -> Result<Self, SnifferError> {
        Ok(Self {
            name: name.into(),
            scope,
            kind,
            regex: Regex::new(pattern)?,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }


    fn candidate(&self, caps: &Captures<'_>) -> Option<String> {
        match self.kind {
            CaptureKind::Url => caps.get(1).map(|m| m.as_str().to_string()),
            CaptureKind::HostPort => caps.get(1).map(|m| format!("http://{}", m.as_str())),
            CaptureKind::Port => caps.get(1).map(|m| format!("http://localhost:{}", m.as_str())),
            CaptureKind::PythonServe => {
                if let Some(url) = caps.get(3) {
                    return Some(url.as_str().to_string());
                }
                let host = caps.get(1)?.as_str();
                let port = caps.get(2)?.as_str();
                if host.contains(':') && !host.starts_with('[') {
                    Some(format!("http://[{host}]:{port}"))
                } else {
                    Some(format!("http://{host}:{port}"))
                }
            }
        }
    }

    /// First valid URL this pattern finds in `text`.
    fn find(&self, text: &str) -> Option<DetectedUrl> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| self.candidate(&caps))
            .find_map(|candidate| validate(&candidate, self.scope))
    }
}

/// Strip quotes, brackets and punctuation that trail a URL in prose.
#[must_use]
pub fn clean_candidate(candidate: &str) -> &str {
    candidate.trim_end_matches(|c: char| {
        matches!(
            c,
            '"' | '\'' | '`' | ')' | ']' | '}' | '>' | '<' | ',' | ';' | '.' | '!' | '?' | ':'
        )
    })
}

fn is_unspecified(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(ip) => ip.is_unspecified(),
        Host::Ipv6(ip) => ip.is_unspecified(),
        Host::Domain(_) => false,
    }
}

/// Whether a URL host names this machine.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }
    if let Ok(ip) = host.parse::<Ipv6Addr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }
    false
}

/// Turn a raw candidate into a [`DetectedUrl`], or `None` if it is not a
/// well-formed http(s) URL with a host.
fn validate(candidate: &str, scope: UrlScope) -> Option<DetectedUrl> {
    let mut url = Url::parse(clean_candidate(candidate)).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if url.host().as_ref().is_some_and(is_unspecified) {
        // A bind-all address is reachable through localhost.
        url.set_host(Some("localhost")).ok()?;
    }

    let host = url.host_str()?.to_string();
    if scope == UrlScope::Network && is_loopback_host(&host) {
        return None;
    }
    let port = url.port_or_known_default()?;

    Some(DetectedUrl {
        url: url.into(),
        host,
        port,
        scope,
    })
}

/// Ordered set of URL heuristics.
#[derive(Debug, Clone)]
pub struct UrlSniffer {
    patterns: Vec<UrlPattern>,
}

impl Default for UrlSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlSniffer {
    /// Create a sniffer with the built-in heuristics.
    #[must_use]
    pub fn new() -> Self {
        let patterns = default_patterns()
            .into_iter()
            .filter_map(|(name, scope, kind, pattern)| {
                match UrlPattern::new(name, scope, kind, &pattern) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        tracing::warn!(pattern = name, error = %e, "Failed to compile URL pattern");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Create a sniffer with no heuristics.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Append a heuristic; it runs after the existing ones of its scope.
    pub fn add_pattern(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    #[must_use]
    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    fn first_match(&self, text: &str, scope: UrlScope) -> Option<DetectedUrl> {
        self.patterns
            .iter()
            .filter(|p| p.scope == scope)
            .find_map(|p| {
                let found = p.find(text)?;
                tracing::trace!(pattern = p.name(), url = %found.url, "URL pattern matched");
                Some(found)
            })
    }

    /// Scan a chunk of output for a local and a network URL.
    #[must_use]
    pub fn sniff(&self, chunk: &str) -> SniffResult {
        let text = strip_ansi(chunk);
        SniffResult {
            local: self.first_match(&text, UrlScope::Local),
            network: self.first_match(&text, UrlScope::Network),
        }
    }

    /// Shorthand for `sniff(chunk).preferred()`.
    #[must_use]
    pub fn detect(&self, chunk: &str) -> Option<DetectedUrl> {
        self.sniff(chunk).preferred()
    }
}
