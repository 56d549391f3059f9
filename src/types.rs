use std::fmt;

/// itag YouTube reserves for the AAC audio stream of a live broadcast.
pub const AUDIO_ITAG: i64 = 140;

/// Hosts serving fragment URLs end with this suffix.
pub const GVIDEO_HOST_SUFFIX: &str = ".googlevideo.com";

/// Placeholder substituted with the fragment sequence number.
pub const SEQ_PLACEHOLDER: &str = "%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Audio,
    Video,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Audio => "audio",
            DataType::Video => "video",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            DataType::Audio => 0,
            DataType::Video => 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fragment URL with a single sequence number placeholder.
///
/// Literal `%` characters of the underlying URL are stored escaped as `%%` so
/// they survive substitution. An empty template means "no usable source".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    /// Wraps an already escaped template.
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Escapes `base`, then appends `seq_prefix` and the placeholder.
    pub fn from_base(base: &str, seq_prefix: &str) -> Self {
        Self(format!(
            "{}{}{}",
            base.replace('%', "%%"),
            seq_prefix,
            SEQ_PLACEHOLDER
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the download URL for fragment `seq`.
    pub fn fill(&self, seq: i64) -> String {
        let mut out = String::with_capacity(self.0.len() + 8);
        let mut chars = self.0.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }

            match chars.peek() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some('d') => {
                    chars.next();
                    out.push_str(&seq.to_string());
                }
                _ => out.push('%'),
            }
        }

        out
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
