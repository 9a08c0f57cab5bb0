use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// CSI color/cursor sequences emitted by scanner CLIs.
    static ref ANSI_CSI: Regex = Regex::new(r"\x1b\[[0-9;]*[mGKH]").unwrap();
}

/// Marker appended when a line is cut at the truncation cap.
const TRUNC_MARKER: &str = "...";

/// Strip ANSI escape sequences, apply the optional per-line character cap,
/// then trim surrounding whitespace.
pub fn clean_line(line: &str, trunc_chars: Option<usize>) -> String {
    let stripped = ANSI_CSI.replace_all(line, "");

    let line = match trunc_chars {
        Some(cap) if stripped.chars().count() > cap => {
            let cut: String = stripped.chars().take(cap).collect();
            format!("{cut}{TRUNC_MARKER}")
        }
        _ => stripped.into_owned(),
    };

    line.trim().to_string()
}
