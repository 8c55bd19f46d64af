use clap::builder::{
    styling::{AnsiColor, Effects},
    Styles,
};
use std::time::Duration;

/// Format duration for display (e.g., `"2h 30m 45s"`, `"45m 30s"`, `"30s"`).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use runforge::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(1845)), "30m 45s");
/// assert_eq!(format_duration(Duration::from_secs(9045)), "2h 30m 45s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Last `n` characters of `s`, respecting char boundaries. Used to truncate
/// worker stderr before recording it on a failed job.
pub fn tail_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        s.to_string()
    } else {
        s.chars().skip(count - n).collect()
    }
}

/// Replace every non-alphanumeric character with `_` and truncate to
/// `max_len` characters. Keeps user-supplied names safe inside generated ids.
pub fn sanitize_component(name: &str, max_len: usize) -> String {
    name.chars()
        .take(max_len)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn clap_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
        .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
        .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
        .placeholder(AnsiColor::Cyan.on_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_strings_intact() {
        assert_eq!(tail_chars("boom", 500), "boom");
    }

    #[test]
    fn tail_truncates_from_the_front() {
        let long = "x".repeat(600) + "tail";
        let tail = tail_chars(&long, 500);
        assert_eq!(tail.chars().count(), 500);
        assert!(tail.ends_with("tail"));
    }

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize_component("LR sweep #3", 20), "LR_sweep__3");
        assert_eq!(sanitize_component("abcdefghij", 4), "abcd");
    }
}
