//! Compression CLI Helpers

use crate::Compression;
use crate::error::Error;
use std::str::FromStr;

/// Shape of an optional-value flag such as `--compress[=METHOD]`.
pub type Flag = Option<Option<String>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preference {
    /// Compression method was specified on the command-line
    Explicit(Compression),
    /// Compression flag was enabled on the command-line, but no method was specified
    Implicit,
    /// Compression was omitted from the command-line: a plain backup
    NotSpecified,
}
impl TryFrom<Flag> for Preference {
    type Error = Error;
    fn try_from(value: Flag) -> Result<Self, Self::Error> {
        match value {
            Some(Some(s)) if s.is_empty() => Ok(Self::Implicit),
            Some(Some(s)) => Ok(Self::Explicit(Compression::from_str(&s)?)),
            Some(None) => Ok(Self::Implicit),
            None => Ok(Self::NotSpecified),
        }
    }
}
impl Preference {
    /// The entry compression to archive with, or `None` for a plain backup.
    pub fn resolve(&self, configured: Compression) -> Option<Compression> {
        match self {
            Self::Explicit(c) => Some(*c),
            Self::Implicit => Some(configured),
            Self::NotSpecified => None,
        }
    }
}
