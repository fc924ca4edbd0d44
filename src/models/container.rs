// Container identity as reported by the runtime

/// Whether a container is eligible for a stats read. Every Docker state other
/// than "running" (created, paused, exited, dead, ...) is `NotRunning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    NotRunning,
}

impl ContainerState {
    /// Parse from Docker API state string, case-insensitively.
    pub fn from_docker(s: &str) -> Self {
        if s.eq_ignore_ascii_case("running") {
            ContainerState::Running
        } else {
            ContainerState::NotRunning
        }
    }

    pub fn is_running(self) -> bool {
        self == ContainerState::Running
    }
}

/// One container from a listing. `status` is Docker's free-text status
/// ("Up 5 minutes"), `state` the raw lifecycle string ("running").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub status: String,
    pub state: String,
}

impl Entity {
    pub fn lifecycle(&self) -> ContainerState {
        ContainerState::from_docker(&self.state)
    }
}
