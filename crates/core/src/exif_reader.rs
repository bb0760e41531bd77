use crate::tool::{FieldMap, MetadataTool, ToolError};
use exif::{In, Reader, Tag, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Reads EXIF in-process for hosts without exiftool, using exiftool's field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExifReader;

const TEXT_FIELDS: &[(&str, Tag)] = &[
    ("DateTimeOriginal", Tag::DateTimeOriginal),
    ("ModifyDate", Tag::DateTime),
    ("Make", Tag::Make),
    ("Model", Tag::Model),
    ("Software", Tag::Software),
    ("Description", Tag::ImageDescription),
];

const WIDTH_TAGS: &[Tag] = &[Tag::PixelXDimension, Tag::ImageWidth];
const HEIGHT_TAGS: &[Tag] = &[Tag::PixelYDimension, Tag::ImageLength];

impl MetadataTool for NativeExifReader {
    fn name(&self) -> String {
        "native-exif".to_string()
    }

    fn read_fields(&self, path: &Path) -> Result<FieldMap, ToolError> {
        let unreadable = |message: String| ToolError::Unreadable {
            path: path.to_path_buf(),
            message,
        };
        let file = File::open(path).map_err(|err| unreadable(err.to_string()))?;
        let mut buf = BufReader::new(file);
        let exif = Reader::new()
            .read_from_container(&mut buf)
            .map_err(|err| unreadable(err.to_string()))?;

        let mut fields = FieldMap::new();
        for (name, tag) in TEXT_FIELDS {
            if let Some(text) = exif
                .get_field(*tag, In::PRIMARY)
                .and_then(|field| text_value(&field.value))
            {
                fields.insert(name.to_string(), text.into());
            }
        }
        for (name, tags) in [("ImageWidth", WIDTH_TAGS), ("ImageHeight", HEIGHT_TAGS)] {
            let dimension = tags.iter().find_map(|tag| {
                exif.get_field(*tag, In::PRIMARY)
                    .and_then(|field| field.value.get_uint(0))
            });
            if let Some(value) = dimension {
                fields.insert(name.to_string(), value.into());
            }
        }
        Ok(fields)
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => {
            let joined = parts
                .iter()
                .map(|part| String::from_utf8_lossy(part).trim().to_string())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}
