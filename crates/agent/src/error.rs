// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Agent failure classes, each mapped to a process exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Bad local configuration or a missing host facility.
    Config(String),
    /// The hub rejected our credentials.
    Auth(String),
    /// A permanent conflict (hostname taken, key mismatch).
    Conflict(String),
    /// The hub is unreachable after retries.
    Network(String),
    /// A local invariant did not hold.
    InvariantViolated(String),
    /// Anything else.
    Internal(String),
}

impl AgentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Auth(_) => 3,
            Self::Conflict(_) => 4,
            Self::Network(_) => 5,
            Self::InvariantViolated(_) => 10,
            Self::Internal(_) => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Auth(_) => "AUTH",
            Self::Conflict(_) => "CONFLICT",
            Self::Network(_) => "NETWORK",
            Self::InvariantViolated(_) => "INVARIANT_VIOLATED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Auth(m)
            | Self::Conflict(m)
            | Self::Network(m)
            | Self::InvariantViolated(m)
            | Self::Internal(m) => m,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for AgentError {}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
