//! # Naming Patterns
//!
//! Small format-string dialect used by the configuration for batch names
//! (`batch_{index:03d}`) and sorted-archive folders
//! (`{year}/{month:02d}/{day:02d}`).
//!
//! Placeholders take the form `{name}` or `{name:0Nd}`; the optional width
//! zero-pads the rendered number. Everything outside a placeholder is copied
//! verbatim.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;

const PLACEHOLDER: &str = r"\{([a-z]+)(?::(0?)(\d+)d)?\}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        name: String,
        width: usize,
        zero_pad: bool,
    },
}

impl Segment {
    fn render(&self, out: &mut String, value: i64) {
        match self {
            Segment::Literal(text) => out.push_str(text),
            Segment::Field {
                width, zero_pad, ..
            } => {
                if *zero_pad {
                    out.push_str(&format!("{:0width$}", value, width = *width));
                } else {
                    out.push_str(&format!("{:width$}", value, width = *width));
                }
            }
        }
    }
}

fn parse_segments(pattern: &str, allowed: &[&str]) -> Result<Vec<Segment>> {
    let placeholder = Regex::new(PLACEHOLDER).map_err(|e| Error::Internal(e.to_string()))?;
    let mut segments = Vec::new();
    let mut cursor = 0;

    for captures in placeholder.captures_iter(pattern) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(Segment::Literal(pattern[cursor..whole.start()].to_string()));
        }

        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !allowed.contains(&name) {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                message: format!("unknown placeholder '{{{}}}'", name),
            });
        }

        let zero_pad = captures.get(2).is_some_and(|m| !m.as_str().is_empty());
        let width = captures
            .get(3)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(0);

        segments.push(Segment::Field {
            name: name.to_string(),
            width,
            zero_pad,
        });
        cursor = whole.end();
    }

    if cursor < pattern.len() {
        segments.push(Segment::Literal(pattern[cursor..].to_string()));
    }

    Ok(segments)
}

// ============================================================================
// Batch naming
// ============================================================================

/// Batch directory naming pattern with a single `{index}` placeholder.
#[derive(Debug, Clone)]
pub struct NamingPattern {
    source: String,
    segments: Vec<Segment>,
    matcher: Regex,
}

impl NamingPattern {
    /// Parse a naming pattern such as `batch_{index:03d}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] when the pattern has no `{index}`
    /// placeholder or uses any other placeholder name.
    pub fn parse(pattern: &str) -> Result<Self> {
        let segments = parse_segments(pattern, &["index"])?;
        let index_count = segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Field { .. }))
            .count();
        if index_count != 1 {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                message: "exactly one {index} placeholder is required".to_string(),
            });
        }

        let mut regex_source = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => regex_source.push_str(&regex::escape(text)),
                Segment::Field { .. } => regex_source.push_str(r"(\d+)"),
            }
        }
        regex_source.push('$');

        let matcher = Regex::new(&regex_source).map_err(|e| Error::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: pattern.to_string(),
            segments,
            matcher,
        })
    }

    /// Render the name for `index`.
    pub fn format(&self, index: u64) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            segment.render(&mut out, index as i64);
        }
        out
    }

    /// Returns the index encoded in `name` if it was produced by this pattern.
    pub fn index_of(&self, name: &str) -> Option<u64> {
        self.matcher
            .captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

// ============================================================================
// Date folders
// ============================================================================

/// Folder layout for the sorted archive built from a capture timestamp.
#[derive(Debug, Clone)]
pub struct DatePattern {
    source: String,
    segments: Vec<Segment>,
}

impl DatePattern {
    /// Parse a date pattern such as `{year}/{month:02d}/{day:02d}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] for unknown placeholders or a pattern
    /// without any date placeholder.
    pub fn parse(pattern: &str) -> Result<Self> {
        let segments = parse_segments(pattern, &["year", "month", "day"])?;
        if !segments
            .iter()
            .any(|segment| matches!(segment, Segment::Field { .. }))
        {
            return Err(Error::Pattern {
                pattern: pattern.to_string(),
                message: "at least one of {year}, {month} or {day} is required".to_string(),
            });
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    /// Render the relative folder for `timestamp`.
    pub fn format(&self, timestamp: &DateTime<Utc>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let value = match segment {
                Segment::Field { name, .. } => match name.as_str() {
                    "year" => timestamp.year() as i64,
                    "month" => timestamp.month() as i64,
                    _ => timestamp.day() as i64,
                },
                Segment::Literal(_) => 0,
            };
            segment.render(&mut out, value);
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_naming_pattern_format() {
        let pattern = NamingPattern::parse("batch_{index:03d}").unwrap();
        assert_eq!(pattern.format(7), "batch_007");
        assert_eq!(pattern.format(1234), "batch_1234");
    }

    #[test]
    fn test_naming_pattern_without_width() {
        let pattern = NamingPattern::parse("upload-{index}").unwrap();
        assert_eq!(pattern.format(12), "upload-12");
        assert_eq!(pattern.index_of("upload-12"), Some(12));
    }

    #[test]
    fn test_naming_pattern_match() {
        let pattern = NamingPattern::parse("batch_{index:03d}").unwrap();
        assert!(pattern.matches("batch_001"));
        assert_eq!(pattern.index_of("batch_042"), Some(42));
        assert!(!pattern.matches("batch_"));
        assert!(!pattern.matches("other_001"));
        assert!(!pattern.matches("batch_001.tmp"));
    }

    #[test]
    fn test_naming_pattern_requires_index() {
        assert!(NamingPattern::parse("batch").is_err());
        assert!(NamingPattern::parse("batch_{year}").is_err());
        assert!(NamingPattern::parse("{index}_{index}").is_err());
    }

    #[test]
    fn test_date_pattern_format() {
        let pattern = DatePattern::parse("{year}/{month:02d}/{day:02d}").unwrap();
        let ts = Utc.with_ymd_and_hms(2021, 5, 4, 10, 30, 0).unwrap();
        assert_eq!(pattern.format(&ts), "2021/05/04");
    }

    #[test]
    fn test_date_pattern_custom_layout() {
        let pattern = DatePattern::parse("photos-{year}-{month}").unwrap();
        let ts = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(pattern.format(&ts), "photos-2020-1");
    }

    #[test]
    fn test_date_pattern_rejects_unknown_placeholder() {
        assert!(DatePattern::parse("{year}/{hour}").is_err());
        assert!(DatePattern::parse("static").is_err());
    }
}
