//! Scrapers for the media-fetch tool's free-text output.
//!
//! All pattern matching against the tool lives here so a change in its
//! output format stays a local edit.

use std::ops::Range;
use std::sync::OnceLock;

use regress::Regex;

pub const NO_PLAYABLE_STREAM: &str = "no playable stream found";
pub const UNKNOWN_FILESIZE: &str = "unknown";

/// One line of a format listing that carried a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCandidate {
    pub format_id: Option<String>,
    pub width: u64,
    pub height: u64,
    pub pixel_count: u64,
    pub size_text: Option<String>,
}

impl FormatCandidate {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn filesize(&self) -> &str {
        self.size_text.as_deref().unwrap_or(UNKNOWN_FILESIZE)
    }
}

#[derive(Debug)]
pub struct OutputParser {
    resolution: Regex,
    format_id: Regex,
    filesize: Regex,
    progress: Regex,
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputParser {
    pub fn new() -> Self {
        Self {
            resolution: Regex::new(r"(\d+)x(\d+)").expect("valid resolution regex"),
            format_id: Regex::new(r"^(\d+)\s+").expect("valid format id regex"),
            filesize: Regex::with_flags(r"~?\s*[\d.]+\s*(?:B|KiB|MiB|GiB|TiB)", "i")
                .expect("valid filesize regex"),
            progress: Regex::new(r"\[download\]\s+([\d.]+)%").expect("valid progress regex"),
        }
    }

    /// Process-wide parser; the patterns are compiled once.
    pub fn shared() -> &'static OutputParser {
        static PARSER: OnceLock<OutputParser> = OnceLock::new();
        PARSER.get_or_init(OutputParser::new)
    }

    /// Picks the listing line with the most pixels. Ties keep the line seen
    /// first.
    pub fn select_best_format(&self, listing: &str) -> Option<FormatCandidate> {
        let mut best: Option<FormatCandidate> = None;
        for line in listing.lines() {
            let Some(candidate) = self.parse_format_line(line) else {
                continue;
            };
            tracing::debug!(
                resolution = %candidate.resolution(),
                format_id = candidate.format_id.as_deref().unwrap_or("-"),
                filesize = candidate.filesize(),
                "format listing: candidate line"
            );
            let replace = best
                .as_ref()
                .map_or(true, |current| candidate.pixel_count > current.pixel_count);
            if replace {
                best = Some(candidate);
            }
        }
        best
    }

    fn parse_format_line(&self, line: &str) -> Option<FormatCandidate> {
        let found = self.resolution.find(line)?;
        let width = parse_dimension(group_text(line, found.group(1))?);
        let height = parse_dimension(group_text(line, found.group(2))?);

        let format_id = self
            .format_id
            .find(line)
            .and_then(|m| group_text(line, m.group(1)))
            .map(str::to_string);
        let size_text = self
            .filesize
            .find(line)
            .map(|m| line[m.range()].trim().to_string());

        Some(FormatCandidate {
            format_id,
            width,
            height,
            pixel_count: width.saturating_mul(height),
            size_text,
        })
    }

    /// Extracts the percent from a `[download]  45.0%` style chunk.
    pub fn progress_percent(&self, chunk: &str) -> Option<f64> {
        let found = self.progress.find(chunk)?;
        let percent = group_text(chunk, found.group(1))?.parse::<f64>().ok()?;
        (percent.is_finite() && (0.0..=100.0).contains(&percent)).then_some(percent)
    }
}

/// Collapses carriage returns into newlines and trims the chunk.
pub fn normalize_chunk(raw: &str) -> String {
    raw.replace('\r', "\n").trim().to_string()
}

/// The pattern only admits digits, so the one parse failure is overflow.
fn parse_dimension(digits: &str) -> u64 {
    digits.parse::<u64>().unwrap_or(u64::MAX)
}

fn group_text(haystack: &str, range: Option<Range<usize>>) -> Option<&str> {
    range.map(|range| &haystack[range])
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
[info] Available formats for abc:
ID  EXT RESOLUTION FPS │   FILESIZE   TBR PROTO │ VCODEC
sb0 mhtml 48x27     0 │                  mhtml │ images
160 mp4 640x360    30 │   10.5MiB  120k https │ avc1.4d401e
299 mp4 1920x1080  60 │ ~1.68GiB 6864k m3u8  │ avc1.640032
140 m4a audio only    │    3.2MiB  129k https │ audio only";

    #[test]
    fn selects_largest_resolution() {
        let best = OutputParser::new().select_best_format(LISTING).unwrap();
        assert_eq!(best.format_id.as_deref(), Some("299"));
        assert_eq!(best.resolution(), "1920x1080");
        assert_eq!(best.filesize(), "~1.68GiB");
        assert_eq!(best.pixel_count, 1920 * 1080);
    }

    #[test]
    fn ties_keep_first_seen() {
        let listing = "\
137 mp4 1920x1080 30 │ 900.1MiB
248 webm 1920x1080 30 │ 700.0MiB
22 mp4 1280x720 30 │ 300MiB";
        let best = OutputParser::new().select_best_format(listing).unwrap();
        assert_eq!(best.format_id.as_deref(), Some("137"));
        assert_eq!(best.filesize(), "900.1MiB");
    }

    #[test]
    fn pixel_count_beats_width() {
        let listing = "1 mp4 2000x100\n2 mp4 1000x1000";
        let best = OutputParser::new().select_best_format(listing).unwrap();
        assert_eq!(best.format_id.as_deref(), Some("2"));
    }

    #[test]
    fn missing_id_and_size_are_tolerated() {
        let listing = "hls-720p mp4 1280x720 │ m3u8";
        let best = OutputParser::new().select_best_format(listing).unwrap();
        assert_eq!(best.format_id, None);
        assert_eq!(best.resolution(), "1280x720");
        assert_eq!(best.filesize(), UNKNOWN_FILESIZE);
    }

    #[test]
    fn size_token_accepts_spacing_and_case() {
        let listing = "18 mp4 640x360 │ ~ 1.03 gib";
        let best = OutputParser::new().select_best_format(listing).unwrap();
        assert_eq!(best.filesize(), "~ 1.03 gib");
    }

    #[test]
    fn oversized_resolution_still_counts() {
        let listing = "18 mp4 640x360 | 1.0MiB\n99 mp4 99999999999999999999x1 | 2.0MiB";
        let best = OutputParser::new().select_best_format(listing).unwrap();
        assert_eq!(best.format_id.as_deref(), Some("99"));
        assert_eq!(best.width, u64::MAX);
        assert_eq!(best.height, 1);
    }

    #[test]
    fn no_resolution_means_no_candidate() {
        let listing = "[info] Available formats\n140 m4a audio only │ 3.2MiB";
        assert_eq!(OutputParser::new().select_best_format(listing), None);
        assert_eq!(OutputParser::new().select_best_format(""), None);
    }

    #[test]
    fn reads_progress_percent() {
        let parser = OutputParser::new();
        assert_eq!(
            parser.progress_percent("[download]  45.0% of 1.68GiB at 5.21MiB/s ETA 02:35"),
            Some(45.0)
        );
        assert_eq!(
            parser.progress_percent(
                "[download]   8.3% of ~   1.49GiB at    2.92MiB/s ETA 07:55 (frag 39/457)"
            ),
            Some(8.3)
        );
        assert_eq!(parser.progress_percent("[download] 100% of 10.00MiB"), Some(100.0));
    }

    #[test]
    fn noise_yields_no_progress() {
        let parser = OutputParser::new();
        for chunk in [
            "",
            "[info] Downloading 1 format(s): 299",
            "[download] Destination: /out/v.mp4",
            "WARNING: 45.0% is not a progress line",
            "[download]  1.2.3% broken",
        ] {
            assert_eq!(parser.progress_percent(chunk), None, "chunk: {chunk}");
        }
    }

    #[test]
    fn out_of_range_percent_is_dropped() {
        assert_eq!(OutputParser::new().progress_percent("[download] 250.0%"), None);
    }

    #[test]
    fn normalizes_carriage_returns() {
        assert_eq!(
            normalize_chunk("\r[download]  1.0%\r[download]  2.0%\r\n"),
            "[download]  1.0%\n[download]  2.0%"
        );
    }

    #[test]
    fn progress_uses_first_match_in_chunk() {
        let chunk = normalize_chunk("[download]  1.0%\r[download]  2.0%");
        assert_eq!(OutputParser::shared().progress_percent(&chunk), Some(1.0));
    }
}
