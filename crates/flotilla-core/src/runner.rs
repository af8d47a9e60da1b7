//! Runner entity and its lifecycle state machine.

use crate::control_plane::ControlPlaneRunner;
use crate::pool::Tags;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a runner.
///
/// Statuses reported by the control plane that this crate does not know are
/// carried through verbatim as [`RunnerStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunnerStatus {
    Creating,
    Respawning,
    Online,
    Running,
    Offline,
    Deleting,
    Other(String),
}

impl RunnerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunnerStatus::Creating => "creating",
            RunnerStatus::Respawning => "respawning",
            RunnerStatus::Online => "online",
            RunnerStatus::Running => "running",
            RunnerStatus::Offline => "offline",
            RunnerStatus::Deleting => "deleting",
            RunnerStatus::Other(s) => s,
        }
    }

    /// Pending provisioning: either a first create or a respawn.
    pub fn is_pending(&self) -> bool {
        matches!(self, RunnerStatus::Creating | RunnerStatus::Respawning)
    }

    /// Registered and reachable by the control plane.
    pub fn is_active(&self) -> bool {
        matches!(self, RunnerStatus::Online | RunnerStatus::Running)
    }
}

impl From<&str> for RunnerStatus {
    fn from(s: &str) -> Self {
        match s {
            "creating" => RunnerStatus::Creating,
            "respawning" => RunnerStatus::Respawning,
            "online" => RunnerStatus::Online,
            "running" => RunnerStatus::Running,
            "offline" => RunnerStatus::Offline,
            "deleting" => RunnerStatus::Deleting,
            other => RunnerStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for RunnerStatus {
    fn from(s: String) -> Self {
        RunnerStatus::from(s.as_str())
    }
}

impl From<RunnerStatus> for String {
    fn from(status: RunnerStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ephemeral execution agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub name: String,
    pub pool_tags: Tags,
    /// Backend handle, unset until provisioning completes.
    pub instance_id: Option<String>,
    /// Control-plane id, unset until the agent self-registers.
    pub registration_id: Option<u64>,
    pub status: RunnerStatus,
    /// Prior statuses, oldest first. Never holds two equal neighbours.
    #[serde(default)]
    pub status_history: Vec<RunnerStatus>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Runner {
    /// A fresh runner awaiting provisioning.
    pub fn new(name: impl Into<String>, pool_tags: Tags, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            pool_tags,
            instance_id: None,
            registration_id: None,
            status: RunnerStatus::Creating,
            status_history: Vec::new(),
            created_at: now,
            started_at: None,
        }
    }

    /// Apply a status transition. Returns whether anything changed.
    ///
    /// A pending runner ignores `offline`: the control plane reports freshly
    /// provisioned agents as offline until they finish registering.
    pub fn update_status(&mut self, status: RunnerStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        if self.status.is_pending() && status == RunnerStatus::Offline {
            return false;
        }

        if self.started_at.is_none() && !self.status.is_active() && status.is_active() {
            self.started_at = Some(now);
        }

        let previous = std::mem::replace(&mut self.status, status);
        if self.status_history.last() != Some(&previous) {
            self.status_history.push(previous);
        }
        true
    }

    /// Fold a control-plane observation into this runner.
    pub fn update_from_control_plane(&mut self, record: &ControlPlaneRunner, now: DateTime<Utc>) {
        self.observe(record.status.clone(), record.busy, Some(record.id), now);
    }

    /// Fold an externally reported `{status, busy}` pair into this runner.
    ///
    /// A busy online agent is `running`; everything else passes through.
    pub fn observe(
        &mut self,
        status: RunnerStatus,
        busy: bool,
        registration_id: Option<u64>,
        now: DateTime<Utc>,
    ) {
        if registration_id.is_some() {
            self.registration_id = registration_id;
        }
        let status = if busy && status == RunnerStatus::Online {
            RunnerStatus::Running
        } else {
            status
        };
        self.update_status(status, now);
    }

    /// Reset in place for re-provisioning under the same identity.
    pub fn reset_for_respawn(&mut self, now: DateTime<Utc>) {
        self.status = RunnerStatus::Respawning;
        self.status_history.clear();
        self.created_at = now;
        self.started_at = None;
        self.instance_id = None;
        self.registration_id = None;
    }

    pub fn is_creating(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_online(&self) -> bool {
        self.status == RunnerStatus::Online
    }

    pub fn is_running(&self) -> bool {
        self.status == RunnerStatus::Running
    }

    pub fn is_deleting(&self) -> bool {
        self.status == RunnerStatus::Deleting
    }

    /// Completed at least one lifecycle attempt and is now offline.
    pub fn has_run(&self) -> bool {
        self.status == RunnerStatus::Offline
            && self.status_history.iter().any(|s| {
                matches!(
                    s,
                    RunnerStatus::Online
                        | RunnerStatus::Running
                        | RunnerStatus::Creating
                        | RunnerStatus::Respawning
                )
            })
    }

    /// Never picked up a job during its current lifecycle.
    pub fn never_ran_job(&self) -> bool {
        !self.is_running() && !self.status_history.contains(&RunnerStatus::Running)
    }

    pub fn time_since_created(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn time_online(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|started| now - started)
    }

    /// Still provisioning after `timeout`: the instance will never come up.
    pub fn should_never_spawn(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.is_creating() && self.time_since_created(now) > timeout
    }

    /// Online and idle since it came up, for longer than `limit`.
    pub fn idle_too_long(&self, limit: Duration, now: DateTime<Utc>) -> bool {
        self.is_online()
            && self.never_ran_job()
            && self.time_online(now).is_some_and(|online| online > limit)
    }
}
