use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::Context;
use blazer_process::LaunchConfig;
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::config::LauncherSettings;
use crate::console_log::{self, ConsoleLine, Stream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        std::iter::once(self.exec.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// `java -server [-Xms -Xmx] -Djetty.port=.. -Djetty.host=.. -jar <artifact>`.
///
/// Heap flags are only emitted when both bounds are present.
pub fn build_launch_spec(
    java_bin: &str,
    artifact_file: &str,
    port: u16,
    min_memory: Option<&str>,
    max_memory: Option<&str>,
    ip_address: &str,
) -> LaunchSpec {
    let mut args = vec!["-server".to_string()];
    if let (Some(min), Some(max)) = (non_empty(min_memory), non_empty(max_memory)) {
        args.push(format!("-Xms{min}"));
        args.push(format!("-Xmx{max}"));
    }
    args.push(format!("-Djetty.port={port}"));
    args.push(format!("-Djetty.host={ip_address}"));
    args.push("-jar".to_string());
    args.push(artifact_file.to_string());

    LaunchSpec {
        exec: java_bin.to_string(),
        args,
    }
}

/// `instances_root/install_path/name`; an absolute install path replaces the
/// root.
pub fn instance_folder(instances_root: &Path, install_path: &str, name: &str) -> PathBuf {
    instances_root.join(install_path).join(name)
}

/// Create the instance folder (idempotent) and copy the artifact into it.
pub async fn provision_directory(
    instances_root: &Path,
    install_path: &str,
    name: &str,
    artifact: &Path,
) -> anyhow::Result<PathBuf> {
    let dir = instance_folder(instances_root, install_path, name);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("create instance dir {}", dir.display()))?;

    let file_name = artifact
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("artifact path has no file name: {}", artifact.display()))?;
    tokio::fs::copy(artifact, dir.join(file_name))
        .await
        .with_context(|| format!("copy {} into {}", artifact.display(), dir.display()))?;
    Ok(dir)
}

#[derive(Debug, Clone, Serialize)]
struct RunInfo {
    instance: String,
    port: u16,
    started_at_unix_ms: u64,
    manager_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    exec: String,
    args: Vec<String>,
    cwd: String,
}

async fn write_run_json(dir: &Path, info: &RunInfo) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(info).context("serialize run.json")?;
    // Write-then-rename so readers never see a half-written file.
    let staged = dir.join(".run.json.partial");
    tokio::fs::write(&staged, data)
        .await
        .with_context(|| format!("write {}", staged.display()))?;
    tokio::fs::rename(&staged, dir.join("run.json"))
        .await
        .context("persist run.json")
}

#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub name: &'a str,
    pub port: u16,
    pub config: &'a LaunchConfig,
}

/// A spawned process the manager has not yet committed to.
///
/// Exactly one of `terminate` or `detach` should be called; dropping the
/// handle without either terminates the process.
pub trait Launched: Send {
    fn pid(&self) -> Option<u32>;
    fn folder(&self) -> &Path;
    /// Rollback: graceful termination of the whole process group.
    fn terminate(self: Box<Self>);
    /// Success: let the process run on and be reaped in the background.
    fn detach(self: Box<Self>);
}

#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest<'_>) -> anyhow::Result<Box<dyn Launched>>;
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the manager dies, the child follows.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone)]
pub struct JavaLauncher {
    settings: LauncherSettings,
}

impl JavaLauncher {
    pub fn new(settings: LauncherSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl Launcher for JavaLauncher {
    async fn launch(&self, request: &LaunchRequest<'_>) -> anyhow::Result<Box<dyn Launched>> {
        let cfg = request.config;
        let dir = provision_directory(
            &self.settings.instances_root,
            &cfg.install_path,
            request.name,
            &self.settings.artifact_path,
        )
        .await?;

        let spec = build_launch_spec(
            &self.settings.java_bin,
            &self.settings.artifact_file_name(),
            request.port,
            cfg.min_memory.as_deref(),
            cfg.max_memory.as_deref(),
            &cfg.ip_address,
        );

        let mut cmd = Command::new(&spec.exec);
        cmd.args(&spec.args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    set_parent_death_signal()?;
                    // Own process group so rollback can signal the whole tree.
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        tracing::info!(
            instance = request.name,
            port = request.port,
            cwd = %dir.display(),
            command = %spec.command_line(),
            "spawning instance process"
        );

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn `{}` (cwd {})", spec.exec, dir.display()))?;
        let pid = child.id();

        let sink = console_log::spawn_console_sink(
            request.name,
            console_log::console_log_path(&dir),
            self.settings.log_max_bytes,
            self.settings.log_max_files,
        )
        .await;
        if let Some(out) = child.stdout.take() {
            console_log::pipe_lines(out, Stream::Stdout, sink.clone());
        }
        if let Some(err) = child.stderr.take() {
            console_log::pipe_lines(err, Stream::Stderr, sink.clone());
        }
        let _ = sink.send(ConsoleLine::manager(format!(
            "exec: {} (cwd {}) pid={}",
            spec.command_line(),
            dir.display(),
            pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        )));

        let run = RunInfo {
            instance: request.name.to_string(),
            port: request.port,
            started_at_unix_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            manager_version: env!("CARGO_PKG_VERSION").to_string(),
            pid,
            exec: spec.exec.clone(),
            args: spec.args.clone(),
            cwd: dir.display().to_string(),
        };
        if let Err(err) = write_run_json(&dir, &run).await {
            tracing::debug!(instance = request.name, %err, "run.json not written");
        }

        Ok(Box::new(JavaProcess {
            name: request.name.to_string(),
            folder: dir,
            pid,
            child: Some(child),
        }))
    }
}

struct JavaProcess {
    name: String,
    folder: PathBuf,
    pid: Option<u32>,
    child: Option<Child>,
}

impl JavaProcess {
    fn send_sigterm(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            unsafe {
                libc::kill(-pgid, libc::SIGTERM);
            }
        }
    }

    fn release(&mut self) {
        let Some(child) = self.child.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(reap(self.name.clone(), child));
            }
            Err(_) => drop(child),
        }
    }
}

async fn reap(name: String, mut child: Child) {
    match child.wait().await {
        Ok(status) => tracing::info!(instance = %name, %status, "instance process exited"),
        Err(err) => tracing::warn!(instance = %name, %err, "waiting on instance process failed"),
    }
}

impl Launched for JavaProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn folder(&self) -> &Path {
        &self.folder
    }

    fn terminate(mut self: Box<Self>) {
        tracing::info!(instance = %self.name, pid = ?self.pid, "terminating launched process");
        self.send_sigterm();
        self.release();
    }

    fn detach(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for JavaProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::warn!(instance = %self.name, pid = ?self.pid, "launch abandoned; terminating process");
            self.send_sigterm();
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_flags_need_both_bounds() {
        let full = build_launch_spec(
            "java",
            "blazegraph.jar",
            9001,
            Some("512m"),
            Some("1024m"),
            "localhost",
        );
        assert_eq!(
            full.command_line(),
            "java -server -Xms512m -Xmx1024m -Djetty.port=9001 -Djetty.host=localhost -jar blazegraph.jar"
        );

        let half = build_launch_spec("java", "blazegraph.jar", 9001, Some("512m"), None, "0.0.0.0");
        assert_eq!(
            half.command_line(),
            "java -server -Djetty.port=9001 -Djetty.host=0.0.0.0 -jar blazegraph.jar"
        );

        let blank = build_launch_spec("java", "blazegraph.jar", 9001, Some(""), Some("1g"), "h");
        assert!(!blank.args.iter().any(|a| a.starts_with("-X")));
    }

    #[test]
    fn absolute_install_path_replaces_the_root() {
        let root = Path::new("instances");
        assert_eq!(
            instance_folder(root, "team-a", "alpha"),
            PathBuf::from("instances/team-a/alpha")
        );
        assert_eq!(
            instance_folder(root, "/opt/inst", "alpha"),
            PathBuf::from("/opt/inst/alpha")
        );
    }

    #[tokio::test]
    async fn provisioning_copies_the_artifact_and_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("blazegraph.jar");
        tokio::fs::write(&artifact, b"jar-bytes").await.unwrap();
        let root = tmp.path().join("instances");

        let first = provision_directory(&root, "team-a", "alpha", &artifact)
            .await
            .unwrap();
        let second = provision_directory(&root, "team-a", "alpha", &artifact)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, root.join("team-a").join("alpha"));
        let copied = tokio::fs::read(first.join("blazegraph.jar")).await.unwrap();
        assert_eq!(copied, b"jar-bytes");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = provision_directory(
            tmp.path(),
            "x",
            "alpha",
            &tmp.path().join("missing.jar"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("copy"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_process_gets_its_own_folder_and_log() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("blazegraph.jar");
        tokio::fs::write(&artifact, b"jar").await.unwrap();

        // `echo` stands in for the JVM: it prints its argv and exits.
        let launcher = JavaLauncher::new(LauncherSettings {
            java_bin: "echo".to_string(),
            artifact_path: artifact,
            instances_root: tmp.path().join("instances"),
            ..LauncherSettings::default()
        });
        let config = LaunchConfig {
            install_path: "team-a".to_string(),
            min_memory: None,
            max_memory: None,
            ip_address: "localhost".to_string(),
        };
        let launched = launcher
            .launch(&LaunchRequest {
                name: "alpha",
                port: 9001,
                config: &config,
            })
            .await
            .unwrap();

        let folder = launched.folder().to_path_buf();
        assert!(launched.pid().is_some());
        assert!(folder.join("run.json").is_file());
        launched.detach();

        let log = console_log::console_log_path(&folder);
        let mut content = String::new();
        for _ in 0..50 {
            content = tokio::fs::read_to_string(&log).await.unwrap_or_default();
            if content.contains("[stdout]") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(content.contains("[stdout] -server -Djetty.port=9001"));
    }
}
