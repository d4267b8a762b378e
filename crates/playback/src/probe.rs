//! Format probes: "can the host decode this mime type?"

use std::collections::HashSet;

use capystream_protocol::metadata::mime_essence;

/// Answers whether a mime type can be decoded by the hosting environment.
pub trait FormatProbe: Send + Sync {
    fn supports(&self, mime_type: &str) -> bool;
}

impl<F> FormatProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn supports(&self, mime_type: &str) -> bool {
        self(mime_type)
    }
}

/// Mime types a headless host can always store and hand to a player.
pub const DEFAULT_AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp4",
    "audio/aac",
    "audio/ogg",
    "audio/opus",
    "audio/webm",
    "audio/flac",
    "audio/wav",
    "audio/x-wav",
];

/// Probe backed by a fixed list of mime types.
///
/// Matching ignores case and parameters (`audio/ogg; codecs=opus` matches
/// `audio/ogg`). An entry of the form `type/*` accepts every subtype.
#[derive(Debug, Clone, Default)]
pub struct MimeAllowList {
    exact: HashSet<String>,
    wildcards: HashSet<String>,
}

impl MimeAllowList {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for t in types {
            let essence = mime_essence(t.as_ref());
            if essence.is_empty() {
                continue;
            }
            match essence.strip_suffix("/*") {
                Some(top) => {
                    list.wildcards.insert(top.to_string());
                }
                None => {
                    list.exact.insert(essence);
                }
            }
        }
        list
    }

    /// Allow list of [`DEFAULT_AUDIO_TYPES`].
    pub fn default_audio() -> Self {
        Self::new(DEFAULT_AUDIO_TYPES)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }
}

impl FormatProbe for MimeAllowList {
    fn supports(&self, mime_type: &str) -> bool {
        let essence = mime_essence(mime_type);
        if self.exact.contains(&essence) {
            return true;
        }
        essence
            .split_once('/')
            .is_some_and(|(top, _)| self.wildcards.contains(top))
    }
}
