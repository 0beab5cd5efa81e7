use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
}

impl HealthState {
    /// Derives the overall state from the number of failed checks.
    pub fn from_failures(failed: usize, total: usize) -> Self {
        match failed {
            0 => HealthState::Healthy,
            n if n >= total => HealthState::Failed,
            _ => HealthState::Degraded,
        }
    }
}

impl Display for HealthState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "Healthy"),
            HealthState::Degraded => write!(f, "Degraded"),
            HealthState::Failed => write!(f, "Failed"),
        }
    }
}
