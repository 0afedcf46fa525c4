//! Element types used to type-check pipeline composition

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed vocabulary of element categories.
///
/// `Any` is the wildcard: it is compatible with every etype, on either side
/// of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Etype {
    Any,
    Image,
    Video,
    Audio,
    Text,
    Json,
    /// Computer-vision predictions (`{"predictions": [{"label", "score"}]}`)
    CvJson,
}

impl Etype {
    /// Every etype, wildcard first
    pub const ALL: [Etype; 7] = [
        Etype::Any,
        Etype::Image,
        Etype::Video,
        Etype::Audio,
        Etype::Text,
        Etype::Json,
        Etype::CvJson,
    ];

    /// Canonical name, as written in metadata files and caches
    pub fn name(self) -> &'static str {
        match self {
            Etype::Any => "Any",
            Etype::Image => "Image",
            Etype::Video => "Video",
            Etype::Audio => "Audio",
            Etype::Text => "Text",
            Etype::Json => "Json",
            Etype::CvJson => "CvJson",
        }
    }

    /// Whether data of etype `a` may flow into a slot of etype `b`
    pub fn compatible(a: Etype, b: Etype) -> bool {
        a == b || a == Etype::Any || b == Etype::Any
    }

    /// Guess the etype of a media file from its extension
    pub fn from_extension(ext: &str) -> Option<Etype> {
        let ext = ext.to_ascii_lowercase();
        let etype = match ext.as_str() {
            "jpg" | "jpeg" | "png" | "bmp" | "gif" | "tif" | "tiff" | "webp" => Etype::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" => Etype::Video,
            "wav" | "mp3" | "flac" | "ogg" | "m4a" | "aac" => Etype::Audio,
            "txt" | "md" | "srt" | "vtt" => Etype::Text,
            "json" => Etype::Json,
            _ => return None,
        };
        Some(etype)
    }
}

impl fmt::Display for Etype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
