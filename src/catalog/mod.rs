//! Turns raw extractor output into the list of encodings a caller can pick from.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::extractors::{ExtractorMetadata, RawFormat};
use crate::utils::format_filesize;

/// Encodings shorter than this are not offered
pub const MIN_HEIGHT: u32 = 360;

/// Identifier of the synthetic entry offered when nothing else qualifies
pub const BEST_AVAILABLE_ID: &str = "best";

/// Whether an encoding already carries its audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Completeness {
    Complete,
    VideoOnly,
}

impl Completeness {
    pub fn note(&self) -> &'static str {
        match self {
            Completeness::Complete => "Complete",
            Completeness::VideoOnly => "Video only (audio merged)",
        }
    }
}

/// One selectable encoding
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEncoding {
    pub id: String,
    pub container: String,
    pub resolution_label: String,
    pub has_audio: bool,
    pub approx_size_bytes: Option<f64>,
    pub completeness: Completeness,
    placeholder: bool,
}

impl MediaEncoding {
    fn from_raw(id: &str, height: u32, raw: &RawFormat) -> Self {
        let has_audio = raw.has_audio();
        Self {
            id: id.to_string(),
            container: raw.ext.clone().unwrap_or_else(|| "mp4".to_string()),
            resolution_label: format!("{}p", height),
            has_audio,
            approx_size_bytes: raw.size_hint(),
            completeness: if has_audio {
                Completeness::Complete
            } else {
                Completeness::VideoOnly
            },
            placeholder: false,
        }
    }

    /// Entry that lets the transcoder pick the best encoding itself
    pub fn best_available() -> Self {
        Self {
            id: BEST_AVAILABLE_ID.to_string(),
            container: "mp4".to_string(),
            resolution_label: "Best available".to_string(),
            has_audio: true,
            approx_size_bytes: None,
            completeness: Completeness::Complete,
            placeholder: true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn note(&self) -> &'static str {
        if self.placeholder {
            "Auto selected"
        } else {
            self.completeness.note()
        }
    }

    pub fn formatted_size(&self) -> Option<String> {
        format_filesize(self.approx_size_bytes)
    }

    pub fn summary(&self) -> FormatSummary {
        FormatSummary {
            format_id: self.id.clone(),
            ext: self.container.clone(),
            resolution: self.resolution_label.clone(),
            note: self.note().to_string(),
            filesize: self.formatted_size(),
        }
    }
}

/// Wire representation of an encoding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSummary {
    pub format_id: String,
    pub ext: String,
    pub resolution: String,
    pub note: String,
    pub filesize: Option<String>,
}

/// Catalog of encodings for one media item; never empty
#[derive(Debug, Clone)]
pub struct MediaCatalog {
    pub title: Option<String>,
    pub encodings: Vec<MediaEncoding>,
}

/// Wire representation of a catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub title: Option<String>,
    pub formats: Vec<FormatSummary>,
}

impl MediaCatalog {
    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            title: self.title.clone(),
            formats: self.encodings.iter().map(MediaEncoding::summary).collect(),
        }
    }
}

/// Build the selectable catalog from extractor metadata.
///
/// Audio-only, unidentified and sub-[`MIN_HEIGHT`] encodings are dropped. When several encodings share a
/// height the one listed last by the extractor is kept, regardless of bitrate.
pub fn build_catalog(metadata: &ExtractorMetadata) -> MediaCatalog {
    let mut by_height: BTreeMap<u32, MediaEncoding> = BTreeMap::new();

    for raw in &metadata.formats {
        if !raw.has_video() {
            continue;
        }
        let Some(height) = raw.height.filter(|h| *h >= MIN_HEIGHT) else {
            continue;
        };
        // An encoding without an id could never be requested back
        let Some(id) = raw
            .format_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        by_height.insert(height, MediaEncoding::from_raw(id, height, raw));
    }

    let mut encodings: Vec<MediaEncoding> = by_height.into_values().collect();
    if encodings.is_empty() {
        encodings.push(MediaEncoding::best_available());
    }

    tracing::debug!(
        "Catalog for {:?}: {} encodings",
        metadata.title,
        encodings.len()
    );

    MediaCatalog {
        title: metadata.title.clone(),
        encodings,
    }
}
