use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

use crate::Result;

/// Metadata returned by the extractor for one media URL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractorMetadata {
    /// Title of the media item
    #[serde(default)]
    pub title: Option<String>,

    /// Every encoding the source offers, in extractor order
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One encoding as reported by the extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,

    /// Video codec, `"none"` for audio-only encodings
    pub vcodec: Option<String>,

    /// Audio codec, `"none"` for video-only encodings
    pub acodec: Option<String>,

    pub height: Option<u32>,

    pub ext: Option<String>,

    /// Exact size in bytes if known
    pub filesize: Option<f64>,

    /// Estimated size in bytes
    pub filesize_approx: Option<f64>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }

    /// Exact size, falling back to the estimate when the exact size is missing or zero
    pub fn size_hint(&self) -> Option<f64> {
        self.filesize
            .filter(|size| *size != 0.0)
            .or(self.filesize_approx)
    }
}

/// Trait for inspecting a media URL without downloading it
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Fetch metadata and the encoding list for a URL
    async fn extract(&self, url: &str) -> Result<ExtractorMetadata>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extractor_json() {
        let json = r#"{
            "title": "Some clip",
            "duration": 12.5,
            "formats": [
                {"format_id": "140", "vcodec": "none", "acodec": "mp4a.40.2", "ext": "m4a", "filesize": 1024},
                {"format_id": "22", "vcodec": "avc1", "acodec": "mp4a", "height": 720, "ext": "mp4", "filesize_approx": 2048.5}
            ]
        }"#;

        let metadata: ExtractorMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Some clip"));
        assert_eq!(metadata.formats.len(), 2);
        assert!(!metadata.formats[0].has_video());
        assert!(metadata.formats[1].has_audio());
        assert_eq!(metadata.formats[1].height, Some(720));
        assert_eq!(metadata.formats[1].size_hint(), Some(2048.5));
    }

    #[test]
    fn test_missing_fields_default() {
        let metadata: ExtractorMetadata = serde_json::from_str("{}").unwrap();
        assert!(metadata.title.is_none());
        assert!(metadata.formats.is_empty());

        let format: RawFormat = serde_json::from_str(r#"{"format_id": "18"}"#).unwrap();
        assert!(format.has_video());
        assert!(format.has_audio());
        assert_eq!(format.size_hint(), None);
    }

    #[test]
    fn test_size_hint_skips_zero_filesize() {
        let format = RawFormat {
            filesize: Some(0.0),
            filesize_approx: Some(500.0),
            ..Default::default()
        };
        assert_eq!(format.size_hint(), Some(500.0));
    }
}
