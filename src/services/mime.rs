//! Static extension table used to label stored files.

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Document,
    Video,
    Audio,
    Other,
}

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
];

const DOCUMENT_TYPES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("markdown", "text/markdown"),
    ("md", "text/markdown"),
    ("mdx", "text/mdx"),
    ("pdf", "application/pdf"),
    ("html", "text/html"),
    ("htm", "text/html"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("csv", "text/csv"),
    ("vtt", "text/vtt"),
    ("properties", "text/plain"),
];

const VIDEO_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("mpeg", "video/mpeg"),
    ("mpga", "audio/mpeg"),
];

const AUDIO_TYPES: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("wav", "audio/wav"),
    ("webm", "audio/webm"),
    ("amr", "audio/amr"),
];

const TABLE: [(FileCategory, &[(&str, &str)]); 4] = [
    (FileCategory::Image, IMAGE_TYPES),
    (FileCategory::Document, DOCUMENT_TYPES),
    (FileCategory::Video, VIDEO_TYPES),
    (FileCategory::Audio, AUDIO_TYPES),
];

/// Look up an extension (without the dot, any case).
///
/// Unknown extensions map to `(Other, application/octet-stream)`.
pub fn classify(extension: &str) -> (FileCategory, &'static str) {
    TABLE
        .iter()
        .find_map(|(category, types)| {
            types
                .iter()
                .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
                .map(|(_, mime)| (*category, *mime))
        })
        .unwrap_or((FileCategory::Other, DEFAULT_MIME_TYPE))
}
