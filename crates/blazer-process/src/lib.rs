use std::{fmt, str::FromStr};

/// Record id assigned by the instance store on insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct InstanceId(pub i32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted lifecycle state. Failed launches are never written, so there is
/// no `Failed` variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown instance status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for InstanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(InstanceStatus::Running),
            "stopped" => Ok(InstanceStatus::Stopped),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Launch configuration fixed at creation and reused on every start.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LaunchConfig {
    pub install_path: String,
    pub min_memory: Option<String>,
    pub max_memory: Option<String>,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    #[serde(rename = "instance_name")]
    pub name: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub status: InstanceStatus,
    pub folder: String,
    pub install_path: String,
    pub min_memory: Option<String>,
    pub max_memory: Option<String>,
    pub ip_address: String,
}

impl Instance {
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            install_path: self.install_path.clone(),
            min_memory: self.min_memory.clone(),
            max_memory: self.max_memory.clone(),
            ip_address: self.ip_address.clone(),
        }
    }
}

/// Outcome of a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StopStatus {
    /// The process was alive and has been terminated.
    #[serde(rename = "stopped")]
    Stopped,
    /// The process had already exited; only the record was reconciled.
    #[serde(rename = "already stopped")]
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StopReport {
    pub instance_id: InstanceId,
    pub instance_name: String,
    pub status: StopStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Running".parse::<InstanceStatus>().unwrap(),
            InstanceStatus::Running
        );
        assert_eq!(
            " stopped ".parse::<InstanceStatus>().unwrap(),
            InstanceStatus::Stopped
        );
        assert!("failed".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn instance_serializes_with_public_field_names() {
        let inst = Instance {
            id: InstanceId(7),
            name: "alpha".to_string(),
            port: 9001,
            pid: Some(4242),
            status: InstanceStatus::Running,
            folder: "instances/opt/alpha".to_string(),
            install_path: "/opt/inst".to_string(),
            min_memory: Some("512m".to_string()),
            max_memory: Some("1024m".to_string()),
            ip_address: "localhost".to_string(),
        };
        let v = serde_json::to_value(&inst).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["instance_name"], "alpha");
        assert_eq!(v["status"], "running");
        assert_eq!(v["pid"], 4242);
    }

    #[test]
    fn already_stopped_keeps_its_space() {
        let report = StopReport {
            instance_id: InstanceId(1),
            instance_name: "alpha".to_string(),
            status: StopStatus::AlreadyStopped,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["status"], "already stopped");
        assert_eq!(v["instance_id"], 1);
    }
}
