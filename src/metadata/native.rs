use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{Field, In, Reader, Tag, Value};

use super::{MetadataError, MetadataTool, TagMap};

/// Read-only EXIF reader for hosts without exiftool. Reports the primary
/// image's date fields under the same keys exiftool would use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeReader;

const DATE_FIELDS: &[(Tag, &str)] = &[
    (Tag::DateTimeOriginal, "EXIF:ExifIFD:DateTimeOriginal"),
    (Tag::DateTimeDigitized, "EXIF:ExifIFD:CreateDate"),
    (Tag::DateTime, "EXIF:IFD0:ModifyDate"),
    (Tag::SubSecTimeOriginal, "EXIF:ExifIFD:SubSecTimeOriginal"),
    (Tag::SubSecTimeDigitized, "EXIF:ExifIFD:SubSecTimeDigitized"),
    (Tag::SubSecTime, "EXIF:ExifIFD:SubSecTime"),
    (Tag::OffsetTimeOriginal, "EXIF:ExifIFD:OffsetTimeOriginal"),
    (Tag::OffsetTimeDigitized, "EXIF:ExifIFD:OffsetTimeDigitized"),
    (Tag::OffsetTime, "EXIF:ExifIFD:OffsetTime"),
];

/// (composite key, date key, sub-second key, offset key)
const COMPOSITES: &[(&str, &str, &str, &str)] = &[
    (
        "Composite:SubSecDateTimeOriginal",
        "EXIF:ExifIFD:DateTimeOriginal",
        "EXIF:ExifIFD:SubSecTimeOriginal",
        "EXIF:ExifIFD:OffsetTimeOriginal",
    ),
    (
        "Composite:SubSecCreateDate",
        "EXIF:ExifIFD:CreateDate",
        "EXIF:ExifIFD:SubSecTimeDigitized",
        "EXIF:ExifIFD:OffsetTimeDigitized",
    ),
    (
        "Composite:SubSecModifyDate",
        "EXIF:IFD0:ModifyDate",
        "EXIF:ExifIFD:SubSecTime",
        "EXIF:ExifIFD:OffsetTime",
    ),
];

fn ascii(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn text(tags: &TagMap, key: &str) -> Option<String> {
    tags.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl MetadataTool for NativeReader {
    fn name(&self) -> &str {
        "kamadak-exif"
    }

    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError> {
        let file = File::open(path).map_err(|e| MetadataError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let exif = match Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => exif,
            Err(exif::Error::Io(e)) => {
                return Err(MetadataError::Read {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
            // No EXIF block or a format the reader does not know: nothing to report.
            Err(_) => return Ok(TagMap::new()),
        };

        let mut tags = TagMap::new();
        for (tag, key) in DATE_FIELDS {
            if let Some(value) = exif.get_field(*tag, In::PRIMARY).and_then(ascii) {
                tags.insert(key.to_string(), value.into());
            }
        }

        for (composite, date_key, subsec_key, offset_key) in COMPOSITES {
            let (Some(date), Some(subsec)) = (text(&tags, date_key), text(&tags, subsec_key)) else {
                continue;
            };
            let offset = text(&tags, offset_key).unwrap_or_default();
            tags.insert(composite.to_string(), format!("{date}.{subsec}{offset}").into());
        }

        Ok(tags)
    }

    fn write_tags(
        &self,
        _path: &Path,
        _values: &[(String, String)],
        _preserve_system_time: bool,
    ) -> Result<(), MetadataError> {
        Err(MetadataError::ReadOnly("kamadak-exif"))
    }
}
