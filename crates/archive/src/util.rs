use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};
use zip::CompressionMethod;

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Compression {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Compression {
    /// Returns the short name for configuration (for displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Stored => "stored",
            Compression::Deflate => "deflate",
            Compression::Bzip2 => "bzip2",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }

    pub(crate) fn method(&self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflate => CompressionMethod::Deflated,
            Compression::Bzip2 => CompressionMethod::Bzip2,
            #[cfg(feature = "zstd")]
            Compression::Zstd => CompressionMethod::Zstd,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::Stored)]
    #[case(Compression::Deflate)]
    #[case(Compression::Bzip2)]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_name_parses_back(#[case] format: Compression) {
        assert_eq!(format.to_string().parse::<Compression>().unwrap(), format);
    }
}
