// repack-core/src/pipeline/progress.rs
// Turns the repackaging tool's stdout chatter into progress reports. Pure
// functions so they can be tested without spawning a process.
use std::sync::OnceLock;

use regex::Regex;

use crate::repackager::ToolProgress;

/// Coarse progress attributed to known stage keywords when a line carries
/// no explicit percentage.
const STAGE_HINTS: &[(&str, u8)] = &[
    ("unpack", 5),
    ("extract", 10),
    ("download", 35),
    ("install", 60),
    ("repack", 75),
    ("packag", 90),
];

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3})\s*%").unwrap())
}

/// Extracts a progress report from one line of tool output. Lines with
/// neither a percentage nor a recognized stage keyword yield `None` and are
/// not surfaced.
pub(crate) fn parse_progress_line(line: &str) -> Option<ToolProgress> {
    let message = line.trim();
    if message.is_empty() {
        return None;
    }

    if let Some(caps) = percent_re().captures(message) {
        let percent: u8 = caps[1].parse::<u16>().ok()?.min(100) as u8;
        return Some(ToolProgress {
            percent,
            message: message.to_string(),
        });
    }

    let lowered = message.to_lowercase();
    STAGE_HINTS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, percent)| ToolProgress {
            percent: *percent,
            message: message.to_string(),
        })
}

/// Maps the tool's own 0-100 scale into the job-level window the
/// repackaging step owns (50 to 95).
pub(crate) fn map_tool_percent(tool_percent: u8) -> u8 {
    let tool_percent = tool_percent.min(100) as u32;
    (50 + tool_percent * 45 / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_percent_wins() {
        let report = parse_progress_line("Downloading dependencies... 42%").unwrap();
        assert_eq!(report.percent, 42);
        assert_eq!(report.message, "Downloading dependencies... 42%");
    }

    #[test]
    fn percent_is_clamped_to_hundred() {
        let report = parse_progress_line("999% done").unwrap();
        assert_eq!(report.percent, 100);
    }

    #[test]
    fn stage_keywords_give_coarse_progress() {
        assert_eq!(parse_progress_line("Extracting package").unwrap().percent, 10);
        assert_eq!(
            parse_progress_line("Repacking with bundled wheels").unwrap().percent,
            75
        );
    }

    #[test]
    fn unrecognized_lines_are_skipped() {
        assert!(parse_progress_line("").is_none());
        assert!(parse_progress_line("   ").is_none());
        assert!(parse_progress_line("some unrelated log line").is_none());
    }

    #[test]
    fn tool_percent_maps_into_job_window() {
        assert_eq!(map_tool_percent(0), 50);
        assert_eq!(map_tool_percent(50), 72);
        assert_eq!(map_tool_percent(100), 95);
        assert_eq!(map_tool_percent(200), 95);
    }
}
