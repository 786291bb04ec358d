//! Feed fetcher with security measures.
//!
//! Retrieves and parses feeds with SSRF protection and resource limits,
//! reporting the final URL (for permanent-redirect detection), origin cache
//! hints, and any push hub the feed advertises.

use crate::backoff::CacheHints;
use crate::error::{FeedPulseError, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::header::{CACHE_CONTROL, LOCATION};
use reqwest::{Client, StatusCode};
use std::net::IpAddr;
use std::time::Duration;

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout in seconds.
const READ_TIMEOUT_SECS: u64 = 20;

/// Total timeout in seconds.
const TOTAL_TIMEOUT_SECS: u64 = 30;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum feed size in bytes (5MB).
pub const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

/// User agent string for feed fetching.
const USER_AGENT: &str = "FeedPulse/0.1 (Feed Sync)";

/// Feed metadata and entries parsed from a fetched body.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    /// Feed title.
    pub title: Option<String>,
    /// Self URL advertised by the feed (rel="self").
    pub self_url: Option<String>,
    /// Push hub advertised by the feed (rel="hub").
    pub hub_url: Option<String>,
    /// Parsed entries.
    pub entries: Vec<ParsedEntry>,
}

/// A single parsed entry.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    /// Unique identifier (RSS guid or Atom id).
    pub guid: String,
    /// Entry title.
    pub title: String,
    /// Link to the original article.
    pub link: Option<String>,
    /// When the entry was published.
    pub published_at: Option<DateTime<Utc>>,
}

/// Everything the scheduler needs to know about a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// URL the response was finally served from.
    pub final_url: String,
    /// New canonical URL, when the original moved through an unbroken chain
    /// of permanent (301/308) redirects.
    pub permanent_redirect: Option<String>,
    /// Cache freshness hints from the response.
    pub cache_hints: Option<CacheHints>,
    /// The parsed feed.
    pub feed: ParsedFeed,
}

/// Feed fetcher with security measures.
///
/// Redirects are followed manually so that a permanent move of the canonical
/// URL can be distinguished from a temporary one.
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    /// Create a new fetcher with default settings.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOTAL_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FeedPulseError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch and parse a feed from the given URL.
    ///
    /// Performs SSRF validation on the URL and on every redirect hop, and
    /// enforces size limits on the body.
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        validate_url(url)?;

        let mut current = url.to_string();
        // Tracks the end of the unbroken permanent-redirect chain from the
        // original URL; a temporary hop breaks the chain.
        let mut canonical = url.to_string();
        let mut permanent_chain = true;

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(&current)
                .send()
                .await
                .map_err(|e| FeedPulseError::Fetch(format!("failed to fetch feed: {}", e)))?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FeedPulseError::Fetch(format!("redirect without Location: {}", status))
                    })?;

                let next = url::Url::parse(&current)
                    .and_then(|base| base.join(location))
                    .map_err(|e| FeedPulseError::Fetch(format!("invalid redirect target: {}", e)))?
                    .to_string();

                validate_url(&next)?;

                let permanent = status == StatusCode::MOVED_PERMANENTLY
                    || status == StatusCode::PERMANENT_REDIRECT;
                if permanent && permanent_chain {
                    canonical = next.clone();
                } else {
                    permanent_chain = false;
                }

                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FeedPulseError::Fetch(format!("HTTP error: {}", status)));
            }

            let cache_hints = response
                .headers()
                .get(CACHE_CONTROL)
                .and_then(|v| v.to_str().ok())
                .map(CacheHints::from_header);

            // Check content length if available
            if let Some(content_length) = response.content_length() {
                if content_length > MAX_FEED_SIZE {
                    return Err(FeedPulseError::Fetch(format!(
                        "feed too large: {} bytes (max {} bytes)",
                        content_length, MAX_FEED_SIZE
                    )));
                }
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| FeedPulseError::Fetch(format!("failed to read response: {}", e)))?;

            if bytes.len() as u64 > MAX_FEED_SIZE {
                return Err(FeedPulseError::Fetch(format!(
                    "feed too large: {} bytes (max {} bytes)",
                    bytes.len(),
                    MAX_FEED_SIZE
                )));
            }

            let feed = parse_feed(&bytes)?;

            let permanent_redirect = if canonical != url {
                Some(canonical)
            } else {
                None
            };

            return Ok(FetchOutcome {
                final_url: current,
                permanent_redirect,
                cache_hints,
                feed,
            });
        }

        Err(FeedPulseError::Fetch(format!(
            "too many redirects (max {})",
            MAX_REDIRECTS
        )))
    }
}

/// Validate a URL for SSRF protection.
///
/// This function checks that:
/// - The URL uses http or https scheme
/// - The host is not a private/loopback address
/// - The host is not a reserved hostname
pub fn validate_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| FeedPulseError::Fetch(format!("invalid URL: {}", e)))?;

    // Check scheme
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedPulseError::Fetch(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedPulseError::Fetch("URL has no host".to_string()))?;

    match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(FeedPulseError::Fetch(format!("forbidden host: {}", domain)));
            }
        }
        url::Host::Ipv4(ipv4) => {
            let ip = IpAddr::V4(ipv4);
            if is_private_ip(&ip) {
                return Err(FeedPulseError::Fetch(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
        url::Host::Ipv6(ipv6) => {
            let ip = IpAddr::V6(ipv6);
            if is_private_ip(&ip) {
                return Err(FeedPulseError::Fetch(format!(
                    "private IP address not allowed: {}",
                    ip
                )));
            }
        }
    }

    Ok(())
}

/// Check if a hostname is forbidden.
pub fn is_forbidden_hostname(host: &str) -> bool {
    let host_lower = host.to_lowercase();

    // Exact matches
    if host_lower == "localhost" {
        return true;
    }

    // Suffix matches
    let forbidden_suffixes = [
        ".local",
        ".localhost",
        ".internal",
        ".intranet",
        ".corp",
        ".home",
        ".lan",
    ];

    for suffix in &forbidden_suffixes {
        if host_lower.ends_with(suffix) {
            return true;
        }
    }

    false
}

/// Check if an IP address is private/reserved.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            // Loopback: 127.0.0.0/8
            if ipv4.is_loopback() {
                return true;
            }

            // Private: 10.0.0.0/8
            let octets = ipv4.octets();
            if octets[0] == 10 {
                return true;
            }

            // Private: 172.16.0.0/12
            if octets[0] == 172 && (16..=31).contains(&octets[1]) {
                return true;
            }

            // Private: 192.168.0.0/16
            if octets[0] == 192 && octets[1] == 168 {
                return true;
            }

            // Link-local: 169.254.0.0/16
            if octets[0] == 169 && octets[1] == 254 {
                return true;
            }

            if ipv4.is_broadcast() || ipv4.is_unspecified() {
                return true;
            }

            // Documentation: 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
            if (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
            {
                return true;
            }

            false
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }

            let segments = ipv6.segments();
            // Unique local: fc00::/7
            if (segments[0] & 0xfe00) == 0xfc00 {
                return true;
            }

            // Link-local: fe80::/10
            if (segments[0] & 0xffc0) == 0xfe80 {
                return true;
            }

            false
        }
    }
}

/// Parse feed bytes into a ParsedFeed.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedPulseError::Fetch(format!("failed to parse feed: {}", e)))?;

    let title = feed.title.map(|t| t.content);

    let self_url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("self"))
        .map(|l| l.href.clone());

    let hub_url = feed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("hub"))
        .map(|l| l.href.clone());

    let entries: Vec<ParsedEntry> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let guid = entry.id;
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let link = entry.links.first().map(|l| l.href.clone());
            let published_at = entry.published.or(entry.updated);

            ParsedEntry {
                guid,
                title,
                link,
                published_at,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title,
        self_url,
        hub_url,
        entries,
    })
}
