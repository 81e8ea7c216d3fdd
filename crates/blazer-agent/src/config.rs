use std::{path::PathBuf, time::Duration};

const DEFAULT_STARTUP_TIMEOUT_SEC: u64 = 60;
const DEFAULT_PORT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_STOP_TIMEOUT_SEC: u64 = 30;
const DEFAULT_LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_LOG_FILE_MAX_FILES: usize = 3;

const DEFAULT_ARTIFACT_PATH: &str = "blazegraph.jar";
const DEFAULT_JAVA_BIN: &str = "java";
const DEFAULT_INSTANCES_ROOT: &str = "instances";

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Timing policy for launches and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// How long a freshly spawned process gets to bind its port.
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// How long stop waits for the process to exit before SIGKILL.
    pub stop_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SEC),
            poll_interval: Duration::from_millis(DEFAULT_PORT_POLL_INTERVAL_MS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SEC),
        }
    }
}

impl LifecycleSettings {
    pub fn from_env() -> Self {
        Self {
            startup_timeout: Duration::from_secs(
                env_u64("BLAZER_STARTUP_TIMEOUT_SEC")
                    .map(|v| v.clamp(1, 3600))
                    .unwrap_or(DEFAULT_STARTUP_TIMEOUT_SEC),
            ),
            poll_interval: Duration::from_millis(
                env_u64("BLAZER_PORT_POLL_INTERVAL_MS")
                    .map(|v| v.clamp(100, 10_000))
                    .unwrap_or(DEFAULT_PORT_POLL_INTERVAL_MS),
            ),
            stop_timeout: Duration::from_secs(
                env_u64("BLAZER_STOP_TIMEOUT_SEC")
                    .map(|v| v.clamp(1, 600))
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_SEC),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherSettings {
    pub java_bin: String,
    /// The jar copied into every instance folder.
    pub artifact_path: PathBuf,
    /// Base for relative install paths.
    pub instances_root: PathBuf,
    pub log_max_bytes: u64,
    pub log_max_files: usize,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            java_bin: DEFAULT_JAVA_BIN.to_string(),
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_PATH),
            instances_root: PathBuf::from(DEFAULT_INSTANCES_ROOT),
            log_max_bytes: DEFAULT_LOG_FILE_MAX_BYTES,
            log_max_files: DEFAULT_LOG_FILE_MAX_FILES,
        }
    }
}

impl LauncherSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            java_bin: env_string("BLAZER_JAVA_BIN").unwrap_or(defaults.java_bin),
            artifact_path: env_string("BLAZER_ARTIFACT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_path),
            instances_root: env_string("BLAZER_INSTANCES_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.instances_root),
            log_max_bytes: env_u64("BLAZER_LOG_FILE_MAX_BYTES")
                .map(|v| v.clamp(256 * 1024, 1024 * 1024 * 1024))
                .unwrap_or(DEFAULT_LOG_FILE_MAX_BYTES),
            log_max_files: env_usize("BLAZER_LOG_FILE_MAX_FILES")
                .map(|v| v.clamp(1, 20))
                .unwrap_or(DEFAULT_LOG_FILE_MAX_FILES),
        }
    }

    /// File name the launch command refers to inside the instance folder.
    pub fn artifact_file_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_ARTIFACT_PATH.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let s = LifecycleSettings::default();
        assert_eq!(s.startup_timeout, Duration::from_secs(60));
        assert_eq!(s.poll_interval, Duration::from_secs(1));
        assert_eq!(s.stop_timeout, Duration::from_secs(30));
    }

    #[test]
    fn artifact_file_name_strips_directories() {
        let s = LauncherSettings {
            artifact_path: PathBuf::from("/srv/blazer/dist/blazegraph.jar"),
            ..LauncherSettings::default()
        };
        assert_eq!(s.artifact_file_name(), "blazegraph.jar");
    }
}
