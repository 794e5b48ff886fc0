//! Fragment discovery engine.
//!
//! Crawls the markdown representation of staged pages for embedded fragment
//! references. Traversal is an explicit worklist with a shared visited set
//! keyed by normalized URL, so cyclic fragment graphs terminate without
//! unbounded call-stack recursion. Nested fragments are expanded one level
//! deep: only fragments found during the initial page scan get their own
//! references resolved; anything deeper is cut off by the visited set.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use graybox_shared::{FragmentRef, GrayboxError, Result};

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("GrayboxPromote/", env!("CARGO_PKG_VERSION"));

/// Fragment links are angle-bracketed absolute URLs under a `/fragments/`
/// path segment.
static FRAGMENT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(https?://[^>\s]*/fragments/[^>\s]*)>").expect("valid regex")
});

// ---------------------------------------------------------------------------
// Configuration & outcome
// ---------------------------------------------------------------------------

/// Configuration for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Authoring origin serving rendered markdown for the staging tree.
    pub staging_origin: String,
    /// Admin API key for authenticated content fetches.
    pub admin_api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

/// Result of discovering fragments for a set of pages.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Top-level fragments found across all pages, nested refs attached.
    pub fragments: Vec<FragmentRef>,
    /// Every URL visited during the run (pages and fragments).
    pub visited: HashSet<String>,
}

/// Fragments bucketed by whether they reference further fragments. The
/// bucketing, not just raw discovery, determines downstream batch
/// assignment: nested fragments require recursive copy-of-copies.
#[derive(Debug, Default)]
pub struct CategorizedFragments {
    pub with_nested: Vec<FragmentRef>,
    pub without_nested: Vec<FragmentRef>,
}

/// Bucket discovered fragments for batch assignment.
pub fn categorize(fragments: Vec<FragmentRef>) -> CategorizedFragments {
    let mut out = CategorizedFragments::default();
    for fragment in fragments {
        if fragment.has_nested() {
            out.with_nested.push(fragment);
        } else {
            out.without_nested.push(fragment);
        }
    }
    out
}

/// Extract the storage path of a fragment from its authoring URL, relative
/// to the given origin. Returns `None` for foreign origins.
pub fn fragment_url_to_path(fragment_url: &str, staging_origin: &str) -> Option<String> {
    let url = Url::parse(fragment_url).ok()?;
    let origin = Url::parse(staging_origin).ok()?;
    if url.host_str() != origin.host_str() {
        return None;
    }
    let path = url.path();
    if path.is_empty() || path == "/" {
        return None;
    }
    Some(path.to_string())
}

// ---------------------------------------------------------------------------
// FragmentDiscovery
// ---------------------------------------------------------------------------

/// Discovery engine over one authoring origin.
pub struct FragmentDiscovery {
    client: Client,
    origin_host: String,
    admin_api_key: Option<String>,
}

impl FragmentDiscovery {
    /// Create a discovery engine for the configured staging origin.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let origin = Url::parse(&config.staging_origin).map_err(|e| {
            GrayboxError::config(format!("invalid staging origin {}: {e}", config.staging_origin))
        })?;
        let origin_host = origin
            .host_str()
            .ok_or_else(|| GrayboxError::config("staging origin has no host"))?
            .to_string();

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GrayboxError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            origin_host,
            admin_api_key: config.admin_api_key,
        })
    }

    /// Discover fragment references for a set of page URLs.
    ///
    /// A fetch failure for any fragment is recorded on that fragment and
    /// discovery continues for its siblings — a single broken link never
    /// aborts the rest of the tree.
    #[instrument(skip_all, fields(pages = page_urls.len()))]
    pub async fn discover(&self, page_urls: &[String]) -> DiscoveryOutcome {
        let mut visited: HashSet<String> = HashSet::new();
        let mut fragments: Vec<FragmentRef> = Vec::new();

        // Initial page scan: collect the top-level fragment worklist.
        let mut worklist: Vec<String> = Vec::new();
        for page_url in page_urls {
            let normalized = normalize_url(page_url);
            if !visited.insert(normalized) {
                continue;
            }
            match self.fetch_markdown(page_url).await {
                Ok((status, content)) if is_success(status) => {
                    let links = self.extract_fragment_links(&content);
                    debug!(page = %page_url, count = links.len(), "fragment links found");
                    for link in links {
                        let normalized = normalize_url(&link);
                        if visited.insert(normalized) {
                            worklist.push(link);
                        }
                    }
                }
                Ok((status, _)) => {
                    warn!(page = %page_url, status, "page fetch failed, skipping");
                }
                Err(e) => {
                    warn!(page = %page_url, error = %e, "page fetch failed, skipping");
                }
            }
        }

        // Expand each top-level fragment one level deep. Deeper chains are
        // cut off here; the shared visited set guarantees termination on
        // cyclic graphs either way.
        for fragment_url in worklist {
            let fragment = self.resolve_fragment(&fragment_url, &mut visited, true).await;
            fragments.push(fragment);
        }

        info!(
            fragments = fragments.len(),
            visited = visited.len(),
            "discovery complete"
        );

        DiscoveryOutcome { fragments, visited }
    }

    /// Fetch one fragment and, when `expand` is set, resolve its own
    /// references as nested fragments (without further expansion).
    async fn resolve_fragment(
        &self,
        fragment_url: &str,
        visited: &mut HashSet<String>,
        expand: bool,
    ) -> FragmentRef {
        let (status, availability, content) = match self.fetch_markdown(fragment_url).await {
            Ok((status, content)) if is_success(status) => {
                (status, "Available".to_string(), Some(content))
            }
            Ok((404, _)) => (404, "Not Found".to_string(), None),
            Ok((status, _)) => (status, "Server Error".to_string(), None),
            Err(e) => {
                warn!(fragment = %fragment_url, error = %e, "fragment fetch failed");
                (500, "Server Error".to_string(), None)
            }
        };

        let mut nested_fragments = Vec::new();
        if expand {
            if let Some(content) = content {
                for link in self.extract_fragment_links(&content) {
                    let normalized = normalize_url(&link);
                    if !visited.insert(normalized) {
                        continue;
                    }
                    let nested = Box::pin(self.resolve_fragment(&link, visited, false)).await;
                    nested_fragments.push(nested);
                }
            }
        }

        FragmentRef {
            fragment_path: fragment_url.to_string(),
            status,
            availability,
            nested_fragments,
        }
    }

    /// Fetch a URL's markdown representation, appending `.md` when missing.
    async fn fetch_markdown(&self, url: &str) -> Result<(u16, String)> {
        let fetch_url = if url.ends_with(".md") {
            url.to_string()
        } else {
            format!("{url}.md")
        };

        let mut request = self.client.get(&fetch_url);
        if let Some(key) = &self.admin_api_key {
            request = request.header("Authorization", format!("token {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GrayboxError::Network(format!("{fetch_url}: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GrayboxError::Network(format!("{fetch_url}: body read failed: {e}")))?;
        Ok((status, body))
    }

    /// Scan markdown content for fragment links on the authoring origin.
    fn extract_fragment_links(&self, content: &str) -> Vec<String> {
        let mut links = Vec::new();
        for caps in FRAGMENT_LINK_RE.captures_iter(content) {
            let link = &caps[1];
            match Url::parse(link) {
                Ok(url) if url.host_str() == Some(self.origin_host.as_str()) => {
                    if !links.contains(&link.to_string()) {
                        links.push(link.to_string());
                    }
                }
                _ => debug!(link, "ignoring fragment link on foreign origin"),
            }
        }
        links
    }
}

/// Normalize a URL for deduplication (strip `.md`, trailing slash).
fn normalize_url(url: &str) -> String {
    let mut s = url.trim_end_matches('/').to_string();
    if let Some(stripped) = s.strip_suffix(".md") {
        s = stripped.to_string();
    }
    s
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status) || status == 304
}
