use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Listing layout detection.
regex!(TOTAL_LINE_REGEX, r"^[a-zA-Z]+ \d+\s*$");
regex!(UNIX_MODE_REGEX, r"^[-dlbcps][-r][-w][-xsStT][-r][-w][-xsStT][-r][-w][-xsStT]");
regex!(WINDOWS_DATE_REGEX, r"^\d{2}-\d{2}-(?:\d{2}|\d{4})$");
regex!(WINDOWS_TIME_REGEX, r"(?i)^(\d{1,2}):(\d{2})\s*(AM|PM)?$");
regex!(ISO_DATE_REGEX, r"^(\d{4})-(\d{2})-(\d{2})$");
regex!(ISO_TIME_REGEX, r"^(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?$");
regex!(ISO_OFFSET_REGEX, r"^[+-]\d{4}$");
regex!(MLSD_MODIFY_REGEX, r"^(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})(?:\.(\d{1,9}))?$");

// Date token shapes for format inference from unknown `ls` layouts.
regex!(NUMERIC_DATE_REGEX, r"^(\d{1,4})(\D+)(\d{1,2})(\D+)(\d{1,4})$");
regex!(SHORT_TIME_REGEX, r"^(\d{1,2}):(\d{1,2})$");
regex!(YEAR_REGEX, r"^\d{4}$");
regex!(DAY_REGEX, r"^\d{1,2}$");
regex!(MONTH_NAME_REGEX, r"^\p{L}{3}$");

// SCP stderr classification, checked in this order.
#[cfg(feature = "scp")]
regex!(STDERR_PERMISSION_REGEX, r"(?i)permission(s)? den(y|ied)?");
#[cfg(feature = "scp")]
regex!(STDERR_FILE_NOT_FOUND_REGEX, r"(?i)(file (path )?does not exist|file not found|no such file)");
#[cfg(feature = "scp")]
regex!(STDERR_DIRECTORY_NOT_FOUND_REGEX, r"(?i)((directory|folder) not found|can't cd to|directory nonexistent)");
#[cfg(feature = "scp")]
regex!(STDERR_NOT_DIRECTORY_REGEX, r"(?i)not a directory");
#[cfg(feature = "scp")]
regex!(STDERR_IS_DIRECTORY_REGEX, r"(?i)is a directory");
