//! Administrative playback command definitions

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Commands an administrator can send to the priority renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerCommandKind {
    Play,
    Pause,
    Skip,
}

impl std::fmt::Display for PlayerCommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerCommandKind::Play => write!(f, "play"),
            PlayerCommandKind::Pause => write!(f, "pause"),
            PlayerCommandKind::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for PlayerCommandKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(PlayerCommandKind::Play),
            "pause" => Ok(PlayerCommandKind::Pause),
            "skip" => Ok(PlayerCommandKind::Skip),
            other => Err(Error::InvalidInput(format!("unknown command: {}", other))),
        }
    }
}
