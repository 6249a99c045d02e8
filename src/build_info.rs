//! Build identification logged at startup

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "realtime-translate";

/// Immutable description of this build. `GIT_HASH` and `BUILD_TIME` are
/// taken from the build environment when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_time: &'static str,
}

impl BuildInfo {
    pub const fn current() -> Self {
        Self {
            name: APP_NAME,
            version: VERSION,
            git_hash: match option_env!("GIT_HASH") {
                Some(hash) => hash,
                None => "unknown",
            },
            build_time: match option_env!("BUILD_TIME") {
                Some(time) => time,
                None => "unknown",
            },
        }
    }

    pub fn log(&self) {
        tracing::info!(
            version = self.version,
            git_hash = self.git_hash,
            build_time = self.build_time,
            "{} v{} starting",
            self.name,
            self.version
        );
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}, built {})",
            self.name, self.version, self.git_hash, self.build_time
        )
    }
}
