use serde::{Deserialize, Serialize};

/// Status code returned across the host boundary by every entry point
///
/// `Ok` is always `0`. Every other code names the kind of failure so the host
/// can tell a misuse (wrong lifecycle order) from a broken interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    InvalidArgument = 1,
    InvalidState = 2,
    ScriptError = 3,
    HostFailure = 4,
    Fatal = -1,
}

impl Status {
    /// Raw code handed to the host
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn from_code(code: i32) -> Option<Status> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::InvalidArgument),
            2 => Some(Status::InvalidState),
            3 => Some(Status::ScriptError),
            4 => Some(Status::HostFailure),
            -1 => Some(Status::Fatal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::InvalidArgument => "invalid argument",
            Status::InvalidState => "invalid state",
            Status::ScriptError => "script error",
            Status::HostFailure => "host failure",
            Status::Fatal => "fatal",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Embedded interpreter lifecycle
///
/// `Uninitialized -> Running -> Finalized`. `Finalized` is terminal for the
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Finalized,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Finalized => write!(f, "finalized"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The scripting capability is gone until the process restarts
    Fatal,
    /// The call failed but the bridge is still usable
    Recoverable,
}
