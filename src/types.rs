// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Scheduling priority of an entity; each tier has its own run queue.
///
/// Higher tiers are drained of ready work before lower ones are looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Min,
    #[default]
    Normal,
    High,
    Kernel,
}

impl Priority {
    pub const COUNT: usize = 4;

    /// All tiers in `index` order.
    pub const ALL: [Priority; Priority::COUNT] =
        [Priority::Min, Priority::Normal, Priority::High, Priority::Kernel];

    /// All tiers, highest first (service order).
    pub const BY_URGENCY: [Priority; Priority::COUNT] =
        [Priority::Kernel, Priority::High, Priority::Normal, Priority::Min];

    /// Slot of this tier in a per-priority array.
    pub fn index(self) -> usize {
        match self {
            Priority::Min => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Kernel => 3,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "min" => Ok(Priority::Min),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "kernel" => Ok(Priority::Kernel),
            other => Err(format!(
                "invalid priority: {other} (expected min, normal, high or kernel)"
            )),
        }
    }
}

/// Hardware engine a scheduler instance feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Graphics.
    Gfx,
    Compute,
    /// System DMA (copy engine).
    Sdma,
    /// Video decode.
    Uvd,
    /// Video encode.
    Vce,
}

impl EngineKind {
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Gfx,
        EngineKind::Compute,
        EngineKind::Sdma,
        EngineKind::Uvd,
        EngineKind::Vce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Gfx => "gfx",
            EngineKind::Compute => "compute",
            EngineKind::Sdma => "sdma",
            EngineKind::Uvd => "uvd",
            EngineKind::Vce => "vce",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!("invalid engine: {s} (expected gfx, compute, sdma, uvd or vce)")
            })
    }
}

/// Identifies the submitter a fence belongs to.
///
/// Lets a consumer tell "my own" fences from foreign ones without comparing
/// opaque pointers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FenceOwner {
    /// Submitted by the driver itself (page-table updates, buffer moves).
    #[default]
    Kernel,
    /// Submitted on behalf of a userspace client.
    Client(u64),
    /// Produced by an engine's hardware completion path.
    Hardware(EngineKind),
}
