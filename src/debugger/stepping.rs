use serde::{Deserialize, Serialize};

/// Stepping modes for the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteppingMode {
    Into,
    Over,
    Return,
}

/// Instants of keyword execution at which the agent asks whether to suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PausingPoint {
    PreStartKeyword,
    StartKeyword,
    PreEndKeyword,
    EndKeyword,
}
