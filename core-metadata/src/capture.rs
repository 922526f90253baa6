//! # Capture Timestamps
//!
//! Best-effort "when was this taken" for a media file. EXIF tags are
//! consulted in order `DateTimeOriginal`, `DateTimeDigitized`, then the IFD0
//! `DateTime`; values are read as `%Y:%m:%d %H:%M:%S` in UTC. When no tag is
//! usable the caller may fall back to the filesystem modification time.

use crate::error::{MetadataError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::trace;

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// Where a resolved capture timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// Previously recorded on the file row
    Stored,
    Exif,
    /// Filesystem modification time
    Modified,
}

/// Read the EXIF capture time of `path`.
///
/// Returns `None` for missing files, files without EXIF data and files
/// whose date tags do not parse.
pub fn read_capture_time(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "No EXIF data");
            return None;
        }
    };

    DATE_TAGS.iter().find_map(|tag| {
        let field = exif.get_field(*tag, In::PRIMARY)?;
        match &field.value {
            Value::Ascii(values) => values
                .iter()
                .find_map(|raw| parse_exif_datetime(&String::from_utf8_lossy(raw))),
            _ => None,
        }
    })
}

fn parse_exif_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(value, EXIF_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Filesystem modification time of `path` in UTC.
pub fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MetadataError::FileNotFound(path.display().to_string()),
        _ => MetadataError::Io(e),
    })?;
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Resolve the timestamp used to file `path` into the archive.
///
/// `stored` wins when present, then EXIF, then, only if `allow_mtime` is
/// set, the modification time. `Ok(None)` means the file cannot be dated.
pub fn resolve_capture_time(
    path: &Path,
    stored: Option<DateTime<Utc>>,
    allow_mtime: bool,
) -> Result<Option<(DateTime<Utc>, CaptureSource)>> {
    if let Some(ts) = stored {
        return Ok(Some((ts, CaptureSource::Stored)));
    }
    if let Some(ts) = read_capture_time(path) {
        return Ok(Some((ts, CaptureSource::Exif)));
    }
    if !allow_mtime {
        return Ok(None);
    }
    modified_time(path).map(|ts| Some((ts, CaptureSource::Modified)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use filetime::FileTime;

    /// Minimal JPEG carrying IFD0 `DateTime` and Exif `DateTimeOriginal`.
    fn jpeg_with_dates(datetime: &str, original: &str) -> Vec<u8> {
        fn ascii(value: &str) -> Vec<u8> {
            let mut bytes = value.as_bytes().to_vec();
            bytes.push(0);
            assert_eq!(bytes.len(), 20);
            bytes
        }
        fn entry(tiff: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: u32) {
            tiff.extend_from_slice(&tag.to_le_bytes());
            tiff.extend_from_slice(&kind.to_le_bytes());
            tiff.extend_from_slice(&count.to_le_bytes());
            tiff.extend_from_slice(&value.to_le_bytes());
        }

        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        // IFD0 at 8: DateTime and the Exif IFD pointer
        tiff.extend_from_slice(&2u16.to_le_bytes());
        entry(&mut tiff, 0x0132, 2, 20, 56);
        entry(&mut tiff, 0x8769, 4, 1, 38);
        tiff.extend_from_slice(&0u32.to_le_bytes());
        // Exif IFD at 38: DateTimeOriginal
        tiff.extend_from_slice(&1u16.to_le_bytes());
        entry(&mut tiff, 0x9003, 2, 20, 76);
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend(ascii(datetime));
        tiff.extend(ascii(original));

        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        let segment_len = (2 + 6 + tiff.len()) as u16;
        jpeg.extend_from_slice(&segment_len.to_be_bytes());
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend(tiff);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn test_original_date_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(
            &photo,
            jpeg_with_dates("2019:01:01 00:00:00", "2021:05:04 10:30:00"),
        )
        .unwrap();

        assert_eq!(
            read_capture_time(&photo),
            Some(Utc.with_ymd_and_hms(2021, 5, 4, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_unparsable_original_falls_back_to_ifd0() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("photo.jpg");
        std::fs::write(
            &photo,
            jpeg_with_dates("2019:01:01 08:00:00", "0000:00:00 00:00:00"),
        )
        .unwrap();

        assert_eq!(
            read_capture_time(&photo),
            Some(Utc.with_ymd_and_hms(2019, 1, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_non_image_has_no_capture_time() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"hello").unwrap();

        assert_eq!(read_capture_time(&notes), None);
        assert_eq!(read_capture_time(&dir.path().join("missing.jpg")), None);
    }

    #[test]
    fn test_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, b"hello").unwrap();
        let fallback = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 0).unwrap();
        filetime::set_file_mtime(&notes, FileTime::from_unix_time(fallback.timestamp(), 0))
            .unwrap();

        let stored = Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(
            resolve_capture_time(&notes, Some(stored), true).unwrap(),
            Some((stored, CaptureSource::Stored))
        );
        assert_eq!(
            resolve_capture_time(&notes, None, true).unwrap(),
            Some((fallback, CaptureSource::Modified))
        );
        assert_eq!(resolve_capture_time(&notes, None, false).unwrap(), None);
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(
            parse_exif_datetime("2021:05:04 10:30:00\0"),
            Some(Utc.with_ymd_and_hms(2021, 5, 4, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_exif_datetime("2021-05-04 10:30:00"), None);
    }
}
