use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelStatus {
    #[default]
    Booting,
    Ready,
    CriticalFault,
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KernelStatus::Booting => "BOOTING",
            KernelStatus::Ready => "READY",
            KernelStatus::CriticalFault => "CRITICAL_FAULT",
        })
    }
}

/// Kernel status as seen by the HUD and broadcast collaborators.
/// Written only by the control loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub status: KernelStatus,
    pub is_target_locked: bool,
    pub is_engagement_active: bool,
}

impl SystemStatus {
    pub(crate) fn clear_target(&mut self) {
        self.is_target_locked = false;
        self.is_engagement_active = false;
    }
}
