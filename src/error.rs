use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// Exit status for help requests and unusable invocations.
/// POSIX keeps only the low byte, so a shell observes 0x67.
pub const EXIT_INVALID_USAGE: i32 = 0x667;
pub const EXIT_CONFIG_MISSING: i32 = 2;
pub const EXIT_PLUGIN_LOAD: i32 = 3;
pub const EXIT_INTERNAL: i32 = 1;


#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid command line")]
    InvalidUsage,

    #[error("setting \"processor\" is missing from {}; specify which line processor to use", .path.display())]
    ConfigMissing { path: PathBuf },

    #[error("could not read configuration {}: {source}", .path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration {}: {source}", .path.display())]
    ConfigInvalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("could not create the line processor \"{name}\"; check the \"processor\" setting")]
    PluginLoad { name: String },

    #[error("{} not found", .program.to_string_lossy())]
    LaunchFailed {
        program: OsString,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProxyError::InvalidUsage | ProxyError::LaunchFailed { .. } => EXIT_INVALID_USAGE,
            ProxyError::ConfigMissing { .. }
            | ProxyError::ConfigUnreadable { .. }
            | ProxyError::ConfigInvalid { .. } => EXIT_CONFIG_MISSING,
            ProxyError::PluginLoad { .. } => EXIT_PLUGIN_LOAD,
            ProxyError::Internal(_) => EXIT_INTERNAL,
        }
    }

    /// Errors after which the usage text is shown before exiting.
    pub fn shows_usage(&self) -> bool {
        matches!(self, ProxyError::InvalidUsage | ProxyError::LaunchFailed { .. })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let launch = ProxyError::LaunchFailed {
            program: "miner".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(launch.exit_code(), 0x667);
        assert!(launch.shows_usage());
        assert_eq!(launch.to_string(), "miner not found");

        assert_eq!(ProxyError::InvalidUsage.exit_code(), 0x667);
        assert_eq!(ProxyError::ConfigMissing { path: "a.yml".into() }.exit_code(), 2);
        assert_eq!(ProxyError::PluginLoad { name: "x".into() }.exit_code(), 3);
        assert_eq!(ProxyError::from(anyhow::anyhow!("boom")).exit_code(), 1);
        assert!(!ProxyError::PluginLoad { name: "x".into() }.shows_usage());
    }
}
