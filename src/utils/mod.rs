use anyhow::Result;
use url::Url;

/// Validate a URL and return it trimmed
pub fn validate_url(url: &str) -> Result<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        anyhow::bail!("URL must not be empty");
    }

    let parsed = Url::parse(trimmed)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", trimmed))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    if parsed.host_str().is_none() {
        anyhow::bail!("URL must have a host");
    }

    Ok(parsed)
}

/// Format a byte count with binary prefixes and two decimals.
///
/// Missing, zero and negative sizes have no representation.
pub fn format_filesize(size: Option<f64>) -> Option<String> {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = size.filter(|s| *s > 0.0)?;
    for unit in UNITS {
        if size < 1024.0 {
            return Some(format!("{:.2} {}", size, unit));
        }
        size /= 1024.0;
    }
    Some(format!("{:.2} PB", size))
}

/// Reduce a title to a filename safe for `Content-Disposition`.
///
/// Keeps ASCII letters, digits, spaces, dots, underscores and hyphens.
pub fn safe_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();

    let kept = kept.trim();
    if kept.is_empty() {
        "media".to_string()
    } else {
        kept.to_string()
    }
}

/// Check if the current environment has required tools
pub async fn check_dependencies(yt_dlp: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp).await {
        missing.push(format!("{} - required for extraction and streaming", yt_dlp));
    }

    // yt-dlp shells out to ffmpeg for merging and re-encoding
    if !check_command_available("ffmpeg").await {
        missing.push("ffmpeg - required to merge and re-encode streams".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg("--version")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_filesize() {
        assert_eq!(format_filesize(None), None);
        assert_eq!(format_filesize(Some(0.0)), None);
        assert_eq!(format_filesize(Some(-5.0)), None);
        assert_eq!(format_filesize(Some(512.0)).as_deref(), Some("512.00 B"));
        assert_eq!(format_filesize(Some(1536.0)).as_deref(), Some("1.50 KB"));
        assert_eq!(format_filesize(Some(1048576.0)).as_deref(), Some("1.00 MB"));
        assert_eq!(
            format_filesize(Some(1073741824.0)).as_deref(),
            Some("1.00 GB")
        );
    }

    #[test]
    fn test_format_filesize_petabytes() {
        let two_pib = 2.0 * 1024f64.powi(5);
        assert_eq!(format_filesize(Some(two_pib)).as_deref(), Some("2.00 PB"));

        let huge = 4096.0 * 1024f64.powi(5);
        assert_eq!(format_filesize(Some(huge)).as_deref(), Some("4096.00 PB"));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Ünïcode Title!! .mp4"), "ncode Title .mp4");
        assert_eq!(safe_filename("My Video (Official) [4K]"), "My Video Official 4K");
        assert_eq!(safe_filename("a/b\\c\"d"), "abcd");
        assert_eq!(safe_filename("line\nbreak"), "linebreak");
    }

    #[test]
    fn test_safe_filename_never_empty() {
        assert_eq!(safe_filename(""), "media");
        assert_eq!(safe_filename("!!!"), "media");
        assert_eq!(safe_filename("日本語"), "media");
        assert_eq!(safe_filename("   "), "media");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://youtu.be/abc").is_ok());
        assert!(validate_url("  http://example.com/x  ").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not-a-url").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }
}
