use blazer_process::InstanceId;

/// Coarse classification; the HTTP layer derives its status from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    EnvironmentConflict,
    LaunchFailure,
    Persistence,
    StateConflict,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Invalid(String),

    #[error("Instance {name} already exists or port {port} is already in use")]
    Duplicate { name: String, port: u16 },

    #[error(
        "Port {port} is already in use by PID {}",
        .pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
    )]
    PortInUse { port: u16, pid: Option<u32> },

    #[error("Process did not bind to port {port} within {timeout_secs} seconds")]
    LaunchTimeout { port: u16, timeout_secs: u64 },

    #[error("Failed to retrieve PID after starting the process on port {port}")]
    PidResolutionFailed { port: u16 },

    #[error("Failed to launch instance: {0}")]
    Launch(String),

    #[error("Failed to commit to the database: {0}")]
    Persistence(String),

    #[error("Instance {0} not found")]
    NotFound(InstanceId),

    #[error("Instance is already running with PID: {pid}")]
    AlreadyRunning { id: InstanceId, pid: u32 },

    #[error("Instance not found or already stopped")]
    NotFoundOrAlreadyStopped(InstanceId),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Invalid(_) | LifecycleError::Duplicate { .. } => ErrorKind::Validation,
            LifecycleError::PortInUse { .. } => ErrorKind::EnvironmentConflict,
            LifecycleError::LaunchTimeout { .. }
            | LifecycleError::PidResolutionFailed { .. }
            | LifecycleError::Launch(_) => ErrorKind::LaunchFailure,
            LifecycleError::Persistence(_) => ErrorKind::Persistence,
            LifecycleError::NotFound(_)
            | LifecycleError::AlreadyRunning { .. }
            | LifecycleError::NotFoundOrAlreadyStopped(_) => ErrorKind::StateConflict,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Invalid(_) => "invalid",
            LifecycleError::Duplicate { .. } => "duplicate",
            LifecycleError::PortInUse { .. } => "port_in_use",
            LifecycleError::LaunchTimeout { .. } => "launch_timeout",
            LifecycleError::PidResolutionFailed { .. } => "pid_resolution_failed",
            LifecycleError::Launch(_) => "launch_failed",
            LifecycleError::Persistence(_) => "persistence_failed",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::AlreadyRunning { .. } => "already_running",
            LifecycleError::NotFoundOrAlreadyStopped(_) => "not_found_or_already_stopped",
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            LifecycleError::PortInUse { .. } => {
                Some("Stop the process holding the port or choose a different port.")
            }
            LifecycleError::LaunchTimeout { .. } => Some(
                "Check logs/console.log in the instance folder; raise BLAZER_STARTUP_TIMEOUT_SEC for slow hosts.",
            ),
            LifecycleError::Launch(_) => {
                Some("Ensure Java is installed and the instance directory is writable.")
            }
            _ => None,
        }
    }
}

/// `outer: cause: root`, skipping empty and repeated messages.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut causes: Vec<String> = err
        .chain()
        .map(ToString::to_string)
        .filter(|s| !s.is_empty())
        .collect();
    causes.dedup();
    if causes.is_empty() {
        return "unknown error".to_string();
    }
    causes.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn port_in_use_names_the_owner_when_known() {
        let known = LifecycleError::PortInUse {
            port: 9001,
            pid: Some(321),
        };
        assert_eq!(known.to_string(), "Port 9001 is already in use by PID 321");

        let unknown = LifecycleError::PortInUse {
            port: 9001,
            pid: None,
        };
        assert!(unknown.to_string().ends_with("PID unknown"));
        assert_eq!(unknown.kind(), ErrorKind::EnvironmentConflict);
    }

    #[test]
    fn state_conflicts_share_a_kind_but_not_a_code() {
        let running = LifecycleError::AlreadyRunning {
            id: InstanceId(1),
            pid: 10,
        };
        let stopped = LifecycleError::NotFoundOrAlreadyStopped(InstanceId(1));
        assert_eq!(running.kind(), stopped.kind());
        assert_ne!(running.code(), stopped.code());
    }

    #[test]
    fn error_chain_skips_repeated_causes() {
        let err = Err::<(), _>(std::io::Error::other("disk full"))
            .context("copy blazegraph.jar")
            .unwrap_err();
        assert_eq!(format_error_chain(&err), "copy blazegraph.jar: disk full");
    }
}
