// src/config.rs
// Immutable engine configuration, built once at start-up.

use crate::codec::FileFormat;
use crate::error::{ReplicationError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Insert every batch straight into the target.
    #[default]
    Direct,
    /// Write batches to the staging store, then bulk-load the files.
    Staged,
}

impl FromStr for LoadStrategy {
    type Err = ReplicationError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(LoadStrategy::Direct),
            "staged" | "s3" => Ok(LoadStrategy::Staged),
            other => Err(ReplicationError::Configuration(format!(
                "unknown load strategy: {}",
                other
            ))),
        }
    }
}

/// When successfully loaded staged files are deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CleanupMode {
    AfterEach,
    #[default]
    AfterAll,
    Never,
}

impl FromStr for CleanupMode {
    type Err = ReplicationError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "after_each" => Ok(CleanupMode::AfterEach),
            "after_all" => Ok(CleanupMode::AfterAll),
            "never" => Ok(CleanupMode::Never),
            other => Err(ReplicationError::Configuration(format!(
                "unknown cleanup mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupMode::AfterEach => "after_each",
            CleanupMode::AfterAll => "after_all",
            CleanupMode::Never => "never",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub enabled: bool,
    pub mode: CleanupMode,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy {
            enabled: true,
            mode: CleanupMode::AfterAll,
        }
    }
}

impl CleanupPolicy {
    pub fn disabled() -> Self {
        CleanupPolicy {
            enabled: false,
            mode: CleanupMode::Never,
        }
    }

    /// The mode that actually applies: a disabled policy never deletes.
    pub fn effective_mode(&self) -> CleanupMode {
        if self.enabled {
            self.mode
        } else {
            CleanupMode::Never
        }
    }
}

/// Error policy of a bulk load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnError {
    /// Fail the whole file on the first bad row.
    #[default]
    Abort,
    /// Skip bad rows and load the rest.
    Continue,
}

impl FromStr for OnError {
    type Err = ReplicationError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" | "abort_statement" => Ok(OnError::Abort),
            "continue" | "skip" => Ok(OnError::Continue),
            other => Err(ReplicationError::Configuration(format!(
                "unknown error policy: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub strategy: LoadStrategy,
    /// Key prefix under which batches are staged.
    pub staging_prefix: String,
    pub file_format: FileFormat,
    pub cleanup: CleanupPolicy,
    pub on_error: OnError,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strategy: LoadStrategy::Direct,
            staging_prefix: "staging".to_string(),
            file_format: FileFormat::Csv,
            cleanup: CleanupPolicy::default(),
            on_error: OnError::Abort,
        }
    }
}

impl EngineConfig {
    pub fn direct() -> Self {
        EngineConfig::default()
    }

    pub fn staged(file_format: FileFormat, cleanup: CleanupPolicy) -> Self {
        EngineConfig {
            strategy: LoadStrategy::Staged,
            file_format,
            cleanup,
            ..EngineConfig::default()
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.staging_prefix = prefix.trim_matches('/').to_string();
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        assert_eq!("STAGED".parse::<LoadStrategy>().unwrap(), LoadStrategy::Staged);
        assert_eq!(
            "after_each".parse::<CleanupMode>().unwrap(),
            CleanupMode::AfterEach
        );
        assert_eq!("continue".parse::<OnError>().unwrap(), OnError::Continue);
        assert!(matches!(
            "sometimes".parse::<CleanupMode>(),
            Err(ReplicationError::Configuration(_))
        ));
    }

    #[test]
    fn test_disabled_cleanup_never_deletes() {
        let policy = CleanupPolicy {
            enabled: false,
            mode: CleanupMode::AfterEach,
        };
        assert_eq!(policy.effective_mode(), CleanupMode::Never);
        assert_eq!(
            CleanupPolicy::default().effective_mode(),
            CleanupMode::AfterAll
        );
    }

    #[test]
    fn test_prefix_is_trimmed() {
        let config = EngineConfig::staged(FileFormat::Parquet, CleanupPolicy::disabled())
            .with_prefix("/staging/");
        assert_eq!(config.staging_prefix, "staging");
        assert_eq!(config.strategy, LoadStrategy::Staged);
    }
}
