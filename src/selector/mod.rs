//! Maps a requested encoding and a platform to a transcoder invocation.

use crate::catalog::BEST_AVAILABLE_ID;
use crate::platform::Platform;
use crate::utils::safe_filename;

/// ffmpeg arguments that make a browser-streamable H.264 mp4
pub const BROWSER_SAFE_FFMPEG_ARGS: &str =
    "-c:v libx264 -pix_fmt yuv420p -profile:v baseline -movflags +faststart";

const MERGED_BEST: &str = "bestvideo+bestaudio/best";

/// Output container of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
        }
    }
}

/// How the transcoder turns the selected encodings into the output container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postprocess {
    /// Remux the selected streams without re-encoding
    Merge,
    /// Re-encode with the given ffmpeg arguments
    Recode { ffmpeg_args: &'static str },
}

/// How the selection expression is derived from the caller's choice
#[derive(Debug, Clone, Copy)]
enum Selection {
    /// Pair the requested encoding with the best audio track
    WithBestAudio,
    /// Ignore the request and use a fixed expression
    Fixed(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct PlatformProfile {
    selection: Selection,
    postprocess: Postprocess,
}

const RECODE: Postprocess = Postprocess::Recode {
    ffmpeg_args: BROWSER_SAFE_FFMPEG_ARGS,
};

/// YouTube serves separate DASH video and audio that remux cleanly. The others serve muxed
/// encodings browsers often cannot play, so they are re-encoded.
fn profile(platform: Platform) -> PlatformProfile {
    match platform {
        Platform::Youtube => PlatformProfile {
            selection: Selection::WithBestAudio,
            postprocess: Postprocess::Merge,
        },
        Platform::Facebook => PlatformProfile {
            selection: Selection::Fixed("best"),
            postprocess: RECODE,
        },
        Platform::Instagram | Platform::Tiktok | Platform::Other => PlatformProfile {
            selection: Selection::Fixed(MERGED_BEST),
            postprocess: RECODE,
        },
    }
}

/// Execution plan for one stream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPlan {
    pub platform: Platform,
    pub selection_expression: String,
    pub output_container: Container,
    pub postprocess: Postprocess,
    pub target_filename: String,
}

impl StreamPlan {
    /// Derive the download filename from the media title
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        self.target_filename = filename_for(title.unwrap_or_default(), self.output_container);
        self
    }

    /// Arguments for the transcoder, writing the result to stdout
    pub fn transcoder_args(&self, source_url: &str) -> Vec<String> {
        let container = self.output_container.as_str();
        let mut args = vec!["-f".to_string(), self.selection_expression.clone()];

        match self.postprocess {
            Postprocess::Merge => {
                args.extend(["--merge-output-format".to_string(), container.to_string()]);
            }
            Postprocess::Recode { ffmpeg_args } => {
                args.extend([
                    "--recode-video".to_string(),
                    container.to_string(),
                    "--postprocessor-args".to_string(),
                    format!("ffmpeg:{}", ffmpeg_args),
                ]);
            }
        }

        args.extend([
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "-o".to_string(),
            "-".to_string(),
            "--".to_string(),
            source_url.to_string(),
        ]);
        args
    }
}

/// Build the stream plan for a platform and a requested encoding. Never fails.
pub fn select(platform: Platform, requested_id: &str) -> StreamPlan {
    let profile = profile(platform);

    let selection_expression = match profile.selection {
        Selection::WithBestAudio => youtube_selection(requested_id.trim()),
        Selection::Fixed(expression) => expression.to_string(),
    };

    let output_container = Container::Mp4;
    StreamPlan {
        platform,
        selection_expression,
        output_container,
        postprocess: profile.postprocess,
        target_filename: filename_for("", output_container),
    }
}

fn youtube_selection(requested_id: &str) -> String {
    match requested_id {
        // "sd" and "hd" are quality tiers older clients still send
        "" | BEST_AVAILABLE_ID | "sd" | "hd" => MERGED_BEST.to_string(),
        id => format!("{}+bestaudio/best", id),
    }
}

fn filename_for(title: &str, container: Container) -> String {
    format!("{}.{}", safe_filename(title), container.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_best() {
        let plan = select(Platform::Youtube, "best");
        assert_eq!(plan.selection_expression, "bestvideo+bestaudio/best");
        assert_eq!(plan.postprocess, Postprocess::Merge);
        assert_eq!(plan.output_container, Container::Mp4);
    }

    #[test]
    fn test_youtube_specific_format() {
        let plan = select(Platform::Youtube, "22");
        assert_eq!(plan.selection_expression, "22+bestaudio/best");
    }

    #[test]
    fn test_youtube_quality_aliases() {
        for alias in ["sd", "hd", ""] {
            let plan = select(Platform::Youtube, alias);
            assert_eq!(plan.selection_expression, "bestvideo+bestaudio/best");
        }
    }

    #[test]
    fn test_facebook_recodes() {
        let plan = select(Platform::Facebook, "best");
        assert_eq!(plan.selection_expression, "best");
        assert_eq!(plan.output_container, Container::Mp4);
        assert_eq!(
            plan.postprocess,
            Postprocess::Recode {
                ffmpeg_args: BROWSER_SAFE_FFMPEG_ARGS
            }
        );
    }

    #[test]
    fn test_other_platforms_ignore_requested_id() {
        for platform in [Platform::Instagram, Platform::Tiktok, Platform::Other] {
            let plan = select(platform, "137");
            assert_eq!(plan.selection_expression, "bestvideo+bestaudio/best");
            assert!(matches!(plan.postprocess, Postprocess::Recode { .. }));
        }
    }

    #[test]
    fn test_selection_never_empty() {
        for platform in Platform::all() {
            for requested in ["", "best", "22", "   "] {
                assert!(!select(platform, requested).selection_expression.is_empty());
            }
        }
    }

    #[test]
    fn test_filename_from_title() {
        let plan = select(Platform::Youtube, "best").with_title(Some("Ünïcode Title!!"));
        assert_eq!(plan.target_filename, "ncode Title.mp4");

        let untitled = select(Platform::Tiktok, "best").with_title(None);
        assert_eq!(untitled.target_filename, "media.mp4");
    }

    #[test]
    fn test_merge_args() {
        let args = select(Platform::Youtube, "22").transcoder_args("https://youtu.be/abc");
        assert_eq!(
            args,
            vec![
                "-f",
                "22+bestaudio/best",
                "--merge-output-format",
                "mp4",
                "--no-playlist",
                "--quiet",
                "-o",
                "-",
                "--",
                "https://youtu.be/abc",
            ]
        );
    }

    #[test]
    fn test_recode_args() {
        let args = select(Platform::Facebook, "best").transcoder_args("https://fb.watch/x");
        assert!(args.contains(&"--recode-video".to_string()));
        assert!(args.contains(&format!("ffmpeg:{}", BROWSER_SAFE_FFMPEG_ARGS)));
        assert_eq!(args.last().map(String::as_str), Some("https://fb.watch/x"));
        assert_eq!(args[args.len() - 2], "--");
    }
}
