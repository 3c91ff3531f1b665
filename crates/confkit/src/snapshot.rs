//! Immutable configuration snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lines that change on every read without any configuration change.
const CAPTURE_BANNERS: &[&str] = &[
    "building configuration",
    "current configuration :",
    "! last configuration change",
    "! nvram config last updated",
    "! no configuration change since last restart",
    "## last commit:",
    "## last changed:",
];

/// Point-in-time capture of one device's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    device: String,
    captured_at: DateTime<Utc>,
    lines: Vec<String>,
    checksum: String,
}

impl ConfigSnapshot {
    /// Build a snapshot from already-normalized lines.
    pub fn new(device: impl Into<String>, captured_at: DateTime<Utc>, lines: Vec<String>) -> Self {
        let checksum = checksum_lines(&lines);
        Self {
            device: device.into(),
            captured_at,
            lines,
            checksum,
        }
    }

    /// Build a snapshot from raw device output or file text.
    pub fn from_text(device: impl Into<String>, captured_at: DateTime<Utc>, text: &str) -> Self {
        Self::new(device, captured_at, normalize_capture(text))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// BLAKE3 hex digest of the line sequence.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Configuration text, one `\n` after every line.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// Checksum of a line sequence. Pure function of the lines.
pub fn checksum_lines(lines: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Normalize line endings and strip capture banners and trailing blank lines.
pub fn normalize_capture(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = text
        .split('\n')
        .filter(|line| !is_capture_banner(line))
        .map(str::to_string)
        .collect();

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading);
    lines
}

pub(crate) fn is_capture_banner(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    CAPTURE_BANNERS.iter().any(|b| lower.starts_with(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_line_endings_are_normalized() {
        let crlf = ConfigSnapshot::from_text("r1", at(), "hostname r1\r\nntp server 10.0.0.1\r\n");
        let lf = ConfigSnapshot::from_text("r1", at(), "hostname r1\nntp server 10.0.0.1\n");
        assert_eq!(crlf.lines(), lf.lines());
        assert_eq!(crlf.checksum(), lf.checksum());
    }

    #[test]
    fn test_capture_banners_do_not_affect_checksum() {
        let first = ConfigSnapshot::from_text(
            "r1",
            at(),
            "Building configuration...\n\nCurrent configuration : 1200 bytes\n!\nhostname r1\n",
        );
        let second = ConfigSnapshot::from_text(
            "r1",
            at(),
            "Building configuration...\n\nCurrent configuration : 1244 bytes\n!\nhostname r1\n",
        );
        assert_eq!(first.checksum(), second.checksum());
        assert_eq!(first.lines(), ["!", "hostname r1"]);
    }

    #[test]
    fn test_checksum_is_order_sensitive() {
        let a = checksum_lines(&["a".to_string(), "b".to_string()]);
        let b = checksum_lines(&["b".to_string(), "a".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_separates_line_boundaries() {
        let joined = checksum_lines(&["ab".to_string()]);
        let split = checksum_lines(&["a".to_string(), "b".to_string()]);
        assert_ne!(joined, split);
    }

    #[test]
    fn test_text_round_trips_lines() {
        let snap = ConfigSnapshot::from_text("r1", at(), "a\nb\n");
        assert_eq!(snap.text(), "a\nb\n");
        assert!(ConfigSnapshot::from_text("r1", at(), "\r\n\n").is_empty());
    }
}
