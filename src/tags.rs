use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix that routes a tag to the filesystem instead of the metadata tool.
pub const SYSTEM_PREFIX: &str = "File:System:";

/// Concrete keys written for the `AllDates` destination alias.
pub const ALL_DATES: &[&str] = &["EXIF:DateTimeOriginal", "EXIF:CreateDate", "EXIF:ModifyDate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

/// One of the three OS-level timestamps a file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemTag {
    FileModifyDate,
    FileInodeChangeDate,
    FileCreateDate,
}

impl SystemTag {
    pub const ALL: [SystemTag; 3] = [
        SystemTag::FileModifyDate,
        SystemTag::FileInodeChangeDate,
        SystemTag::FileCreateDate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemTag::FileModifyDate => "FileModifyDate",
            SystemTag::FileInodeChangeDate => "FileInodeChangeDate",
            SystemTag::FileCreateDate => "FileCreateDate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.name() == name)
    }

    /// Fully qualified form, e.g. `File:System:FileModifyDate`.
    pub fn qualified(self) -> String {
        format!("{SYSTEM_PREFIX}{}", self.name())
    }
}

impl fmt::Display for SystemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// A parsed tag reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagSpec {
    /// Opaque metadata tag path, validated by the external tool at write time.
    Exif(String),
    /// Filesystem timestamp.
    System(SystemTag),
    /// Destination alias standing for several metadata keys.
    Alias { name: String, keys: Vec<String> },
    /// Every date-valued metadata tag (source only).
    AnyExif,
    /// Every date-valued metadata tag plus all filesystem timestamps (source only).
    Any,
}

impl TagSpec {
    /// Metadata keys this spec writes to. Empty for non-metadata specs.
    pub fn exif_keys(&self) -> Vec<&str> {
        match self {
            TagSpec::Exif(key) => vec![key.as_str()],
            TagSpec::Alias { keys, .. } => keys.iter().map(String::as_str).collect(),
            TagSpec::System(_) | TagSpec::AnyExif | TagSpec::Any => Vec::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, TagSpec::System(_))
    }
}

impl fmt::Display for TagSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagSpec::Exif(key) => f.write_str(key),
            TagSpec::System(tag) => write!(f, "{tag}"),
            TagSpec::Alias { name, .. } => f.write_str(name),
            TagSpec::AnyExif => f.write_str("EXIF:*"),
            TagSpec::Any => f.write_str("*"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Tag list is empty")]
    Empty,
    #[error("Empty entry in tag list '{0}'")]
    EmptyEntry(String),
    #[error("Unsupported filesystem tag '{0}'; expected one of File:System:FileModifyDate, File:System:FileInodeChangeDate, File:System:FileCreateDate")]
    UnknownSystemTag(String),
    #[error("'{0}' can only be used as a destination tag")]
    DestinationOnly(String),
    #[error("'{0}' can only be used as a source tag")]
    SourceOnly(String),
    #[error("Invalid filename pattern '{pattern}': {reason}")]
    NamePattern { pattern: String, reason: String },
}

/// Parse a comma-separated tag list into specs.
pub fn parse(tag_string: &str, role: Role) -> Result<Vec<TagSpec>, ConfigError> {
    if tag_string.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    tag_string
        .split(',')
        .map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(ConfigError::EmptyEntry(tag_string.to_string()));
            }
            parse_one(entry, role)
        })
        .collect()
}

fn parse_one(entry: &str, role: Role) -> Result<TagSpec, ConfigError> {
    if let Some(rest) = entry.strip_prefix(SYSTEM_PREFIX) {
        return SystemTag::from_name(rest)
            .map(TagSpec::System)
            .ok_or_else(|| ConfigError::UnknownSystemTag(entry.to_string()));
    }

    match entry {
        "AllDates" | "EXIF:AllDates" => match role {
            Role::Destination => Ok(TagSpec::Alias {
                name: entry.to_string(),
                keys: ALL_DATES.iter().map(|k| k.to_string()).collect(),
            }),
            Role::Source => Err(ConfigError::DestinationOnly(entry.to_string())),
        },
        "*" | "ALL" | "EXIF:*" => match role {
            Role::Source if entry == "EXIF:*" => Ok(TagSpec::AnyExif),
            Role::Source => Ok(TagSpec::Any),
            Role::Destination => Err(ConfigError::SourceOnly(entry.to_string())),
        },
        key => Ok(TagSpec::Exif(key.to_string())),
    }
}
