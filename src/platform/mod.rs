use serde::Serialize;
use std::fmt;
use url::Url;

/// Domains the gateway accepts URLs from
pub const ALLOWED_DOMAINS: [&str; 6] = [
    "youtube.com",
    "youtu.be",
    "facebook.com",
    "fb.watch",
    "instagram.com",
    "tiktok.com",
];

/// Source platform of a media URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Facebook,
    Instagram,
    Tiktok,
    Other,
}

impl Platform {
    /// Detection order matters: the first platform with a matching marker wins.
    const MARKERS: [(Platform, &'static [&'static str]); 4] = [
        (Platform::Facebook, &["facebook.com", "fb.watch"]),
        (Platform::Youtube, &["youtube.com", "youtu.be"]),
        (Platform::Instagram, &["instagram.com"]),
        (Platform::Tiktok, &["tiktok.com"]),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Other => "other",
        }
    }

    /// Human readable name with the domains it covers
    pub fn description(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube (youtube.com, youtu.be)",
            Platform::Facebook => "Facebook (facebook.com, fb.watch)",
            Platform::Instagram => "Instagram (instagram.com)",
            Platform::Tiktok => "TikTok (tiktok.com)",
            Platform::Other => "Anything else yt-dlp understands (when the allowlist is off)",
        }
    }

    pub fn all() -> [Platform; 5] {
        [
            Platform::Youtube,
            Platform::Facebook,
            Platform::Instagram,
            Platform::Tiktok,
            Platform::Other,
        ]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub platform: Platform,
    /// Whether the URL's host is on the allowlist
    pub allowed: bool,
}

/// Classify a URL by platform and allowlist membership.
///
/// Never fails. When the URL parses, both verdicts are taken from its host, so a URL that only
/// mentions an allowlisted domain in its path or query is neither allowed nor tagged with that
/// platform. Strings that do not parse are matched by substring for the platform tag and are
/// never allowed.
pub fn classify(url: &str) -> Classification {
    match host_of(url) {
        Some(host) => Classification {
            platform: detect(|marker| host_matches(&host, marker)),
            allowed: ALLOWED_DOMAINS
                .iter()
                .any(|domain| host_matches(&host, domain)),
        },
        None => {
            let lowered = url.to_lowercase();
            Classification {
                platform: detect(|marker| lowered.contains(marker)),
                allowed: false,
            }
        }
    }
}

fn detect(matches: impl Fn(&str) -> bool) -> Platform {
    Platform::MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|marker| matches(marker)))
        .map(|(platform, _)| *platform)
        .unwrap_or(Platform::Other)
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    parsed.host_str().map(|host| host.to_ascii_lowercase())
}

/// `host` is `domain` itself or one of its subdomains
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_supported_platforms() {
        let cases = [
            ("https://www.youtube.com/watch?v=abc", Platform::Youtube),
            ("https://youtu.be/abc", Platform::Youtube),
            ("https://m.youtube.com/shorts/abc", Platform::Youtube),
            ("https://www.facebook.com/watch/?v=1", Platform::Facebook),
            ("https://fb.watch/xyz/", Platform::Facebook),
            ("https://www.instagram.com/reel/abc/", Platform::Instagram),
            ("https://www.tiktok.com/@user/video/1", Platform::Tiktok),
        ];

        for (url, expected) in cases {
            let result = classify(url);
            assert_eq!(result.platform, expected, "{}", url);
            assert!(result.allowed, "{} should be allowed", url);
        }
    }

    #[test]
    fn test_classify_unknown_domain() {
        let result = classify("https://vimeo.com/12345");
        assert_eq!(result.platform, Platform::Other);
        assert!(!result.allowed);
    }

    #[test]
    fn test_classify_rejects_domain_in_query() {
        let result = classify("https://evil.com/?x=youtube.com");
        assert_eq!(result.platform, Platform::Other);
        assert!(!result.allowed);
    }

    #[test]
    fn test_classify_rejects_lookalike_host() {
        assert!(!classify("https://notyoutube.com/watch?v=1").allowed);
        assert!(!classify("https://youtube.com.evil.net/watch?v=1").allowed);
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let result = classify("HTTPS://WWW.YOUTUBE.COM/watch?v=abc");
        assert_eq!(result.platform, Platform::Youtube);
        assert!(result.allowed);
    }

    #[test]
    fn test_classify_is_total() {
        for input in ["", "   ", "not a url", "youtube.com/watch", "::::", "\u{1F600}"] {
            let result = classify(input);
            assert!(!result.allowed, "{:?}", input);
        }
        // Unparseable input still gets a best-effort platform tag
        assert_eq!(classify("youtube.com/watch").platform, Platform::Youtube);
    }

    #[test]
    fn test_facebook_has_priority() {
        let result = classify("https://facebook.com/share?u=https://youtube.com/x");
        assert_eq!(result.platform, Platform::Facebook);
    }
}
