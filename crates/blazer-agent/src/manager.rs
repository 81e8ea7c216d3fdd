//! Per-instance state machine: `Absent → Launching → Running → Stopped`,
//! with `Launching → Failed` leaving no record behind.
//!
//! A record is written only after the spawned process has been seen bound to
//! its port and its pid resolved. Every failure after spawn terminates the
//! process before the error is returned.

use std::{sync::Arc, time::Duration};

use blazer_process::{
    Instance, InstanceId, InstanceStatus, LaunchConfig, StopReport, StopStatus,
};

use crate::config::LifecycleSettings;
use crate::error::{LifecycleError, format_error_chain};
use crate::host::{Host, Signal};
use crate::launcher::{LaunchRequest, Launched, Launcher};
use crate::port_probe;
use crate::store::{InstanceStore, NewInstance, StoreError};
use crate::validation;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for the kernel to reap a SIGKILLed process.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInstance {
    pub name: String,
    pub port: u16,
    pub config: LaunchConfig,
}

pub struct LifecycleManager {
    store: Arc<dyn InstanceStore>,
    launcher: Arc<dyn Launcher>,
    host: Host,
    settings: LifecycleSettings,
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        LifecycleError::Persistence(err.to_string())
    }
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        launcher: Arc<dyn Launcher>,
        host: Host,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            host,
            settings,
        }
    }

    pub async fn create_and_run(&self, req: CreateInstance) -> Result<Instance, LifecycleError> {
        validation::validate_name(&req.name)?;
        validation::validate_port(req.port)?;
        validation::validate_launch_config(&req.config)?;

        // Fast path only; the unique indexes decide under concurrent creates.
        if self.store.find_by_name(&req.name).await?.is_some()
            || self.store.find_by_port(req.port).await?.is_some()
        {
            return Err(LifecycleError::Duplicate {
                name: req.name,
                port: req.port,
            });
        }

        self.ensure_port_free(&req.config.ip_address, req.port)?;

        let (launched, pid) = self
            .launch_and_confirm(&req.name, req.port, &req.config)
            .await?;

        let new = NewInstance {
            name: req.name.clone(),
            port: req.port,
            pid,
            folder: launched.folder().display().to_string(),
            config: req.config,
        };
        match self.store.insert(new).await {
            Ok(inst) => {
                launched.detach();
                tracing::info!(instance = %inst.name, id = %inst.id, port = inst.port, pid, "instance running");
                Ok(inst)
            }
            Err(err) => {
                tracing::warn!(instance = %req.name, port = req.port, pid, %err, "commit failed; terminating process");
                launched.terminate();
                Err(match err {
                    StoreError::Conflict(_) => LifecycleError::Duplicate {
                        name: req.name,
                        port: req.port,
                    },
                    other => other.into(),
                })
            }
        }
    }

    pub async fn start(&self, id: InstanceId) -> Result<Instance, LifecycleError> {
        let inst = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))?;

        let live_pid = inst
            .pid
            .filter(|pid| self.host.processes.pid_exists(*pid));
        if inst.status == InstanceStatus::Running
            && let Some(pid) = live_pid
        {
            return Err(LifecycleError::AlreadyRunning { id, pid });
        }
        if inst.status == InstanceStatus::Running {
            tracing::info!(instance = %inst.name, id = %id, stale_pid = ?inst.pid, "recorded process is gone; relaunching");
        }

        let config = inst.launch_config();
        self.ensure_port_free(&config.ip_address, inst.port)?;

        let (launched, pid) = self
            .launch_and_confirm(&inst.name, inst.port, &config)
            .await?;

        match self
            .store
            .update_runtime(id, Some(pid), InstanceStatus::Running)
            .await
        {
            Ok(updated) => {
                launched.detach();
                tracing::info!(instance = %updated.name, id = %id, port = updated.port, pid, "instance running");
                Ok(updated)
            }
            Err(err) => {
                tracing::warn!(instance = %inst.name, id = %id, pid, %err, "commit failed; terminating process");
                launched.terminate();
                Err(err.into())
            }
        }
    }

    pub async fn stop(&self, id: InstanceId) -> Result<StopReport, LifecycleError> {
        let inst = match self.store.find_by_id(id).await? {
            Some(inst) if inst.status == InstanceStatus::Running => inst,
            _ => return Err(LifecycleError::NotFoundOrAlreadyStopped(id)),
        };

        let status = match inst.pid {
            Some(pid) if self.host.processes.pid_exists(pid) => {
                self.terminate_and_wait(&inst.name, pid).await;
                StopStatus::Stopped
            }
            _ => {
                tracing::info!(instance = %inst.name, id = %id, pid = ?inst.pid, "process already gone; reconciling record");
                StopStatus::AlreadyStopped
            }
        };

        // The signal cannot be taken back; only the record update can fail here.
        self.store
            .update_runtime(id, None, InstanceStatus::Stopped)
            .await?;

        Ok(StopReport {
            instance_id: inst.id,
            instance_name: inst.name,
            status,
        })
    }

    pub async fn list_all(&self) -> Result<Vec<Instance>, LifecycleError> {
        Ok(self.store.list().await?)
    }

    pub async fn get_by_id(&self, id: InstanceId) -> Result<Option<Instance>, LifecycleError> {
        Ok(self.store.find_by_id(id).await?)
    }

    fn ensure_port_free(&self, host: &str, port: u16) -> Result<(), LifecycleError> {
        if self.host.probe.is_bound(host, port) {
            let pid = self.host.owners.find_pid_by_port(port);
            return Err(LifecycleError::PortInUse { port, pid });
        }
        Ok(())
    }

    /// Spawn, wait for the bind, resolve the owner. On any failure the
    /// process is terminated before returning. If the caller drops this
    /// future mid-wait, dropping the handle terminates the process.
    async fn launch_and_confirm(
        &self,
        name: &str,
        port: u16,
        config: &LaunchConfig,
    ) -> Result<(Box<dyn Launched>, u32), LifecycleError> {
        let launched = self
            .launcher
            .launch(&LaunchRequest { name, port, config })
            .await
            .map_err(|e| LifecycleError::Launch(format_error_chain(&e)))?;

        let timeout = self.settings.startup_timeout;
        let bound = port_probe::await_bound(
            &*self.host.probe,
            &config.ip_address,
            port,
            timeout,
            self.settings.poll_interval,
        )
        .await;
        if !bound {
            tracing::warn!(instance = name, port, spawned_pid = ?launched.pid(), timeout_secs = timeout.as_secs(), "port did not bind in time");
            launched.terminate();
            return Err(LifecycleError::LaunchTimeout {
                port,
                timeout_secs: timeout.as_secs(),
            });
        }

        let Some(pid) = self.host.owners.find_pid_by_port(port) else {
            tracing::warn!(instance = name, port, spawned_pid = ?launched.pid(), "port bound but owner pid not found");
            launched.terminate();
            return Err(LifecycleError::PidResolutionFailed { port });
        };

        if launched.pid().is_some_and(|spawned| spawned != pid) {
            // A wrapper script forked the JVM; the port owner is what gets recorded.
            tracing::info!(instance = name, port, spawned_pid = ?launched.pid(), pid, "port owner differs from spawned process");
        }
        Ok((launched, pid))
    }

    /// SIGTERM, then wait for exit; SIGKILL once the stop timeout passes.
    async fn terminate_and_wait(&self, name: &str, pid: u32) {
        let processes = &self.host.processes;
        if let Err(err) = processes.signal(pid, Signal::Terminate) {
            tracing::warn!(instance = name, pid, %err, "SIGTERM delivery reported an error");
        }
        if self.wait_for_exit(pid, self.settings.stop_timeout).await {
            tracing::info!(instance = name, pid, "instance process stopped");
            return;
        }

        tracing::warn!(instance = name, pid, "process ignored SIGTERM; sending SIGKILL");
        if let Err(err) = processes.signal(pid, Signal::Kill) {
            tracing::warn!(instance = name, pid, %err, "SIGKILL delivery reported an error");
        }
        if self.wait_for_exit(pid, KILL_GRACE).await {
            tracing::info!(instance = name, pid, "instance process killed");
        } else {
            tracing::error!(instance = name, pid, "process still present after SIGKILL; clearing the record anyway");
        }
    }

    /// Poll until `pid` is gone; false if it is still present at the deadline.
    async fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.host.processes.pid_exists(pid) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        true
    }
}
