use chainbak_storage::FileHistory;
use time::OffsetDateTime;

/// One completed backup in a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackupHistory {
    /// Local directory that was backed up.
    pub source: String,
    /// Backup directory, or the base path of the archive when compressed.
    pub destination: String,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub utc_start: OffsetDateTime,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub utc_end: OffsetDateTime,
    pub compressed: bool,
}

/// Outcome of comparing a source against a history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComparedHistory {
    /// Source entries that are new or whose timestamp moved.
    pub new_or_changed: Vec<FileHistory>,
    /// History entries with no counterpart in the source.
    pub deleted: Vec<FileHistory>,
}

impl ComparedHistory {
    pub fn is_empty(&self) -> bool {
        self.new_or_changed.is_empty() && self.deleted.is_empty()
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_backup_history_json_shape() {
        let backup = BackupHistory {
            source: "/home/user".to_string(),
            destination: "/backups/full".to_string(),
            utc_start: datetime!(2024-05-01 10:00:00 UTC),
            utc_end: datetime!(2024-05-01 10:05:00 UTC),
            compressed: true,
        };
        let json = serde_json::to_value(&backup).unwrap();
        assert_eq!(json["utc_start"], "2024-05-01T10:00:00Z");
        assert_eq!(json["compressed"], true);
        let back: BackupHistory = serde_json::from_value(json).unwrap();
        assert_eq!(back, backup);
    }
}
