use std::fmt;

use thiserror::Error;

/// Which settlement call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStep {
    Query,
    Build,
    Sign,
    Submit,
    TxId,
}

impl fmt::Display for SettlementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Query => "query",
            Self::Build => "build",
            Self::Sign => "sign",
            Self::Submit => "submit",
            Self::TxId => "txid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("{step}: `{program}` exited with {status}: {stderr}")]
    Command {
        step: SettlementStep,
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },
    #[error("{step}: failed to run `{program}`: {source}")]
    Spawn {
        step: SettlementStep,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{step}: {source}")]
    Io {
        step: SettlementStep,
        #[source]
        source: std::io::Error,
    },
    #[error("{step}: unexpected tool output: {detail}")]
    InvalidOutput { step: SettlementStep, detail: String },
    #[error("{step} failed: {detail}")]
    Rejected { step: SettlementStep, detail: String },
    #[error("no spendable outputs at {0}")]
    NoFunds(String),
}

impl SettlementError {
    pub fn step(&self) -> SettlementStep {
        match self {
            Self::Command { step, .. }
            | Self::Spawn { step, .. }
            | Self::Io { step, .. }
            | Self::InvalidOutput { step, .. }
            | Self::Rejected { step, .. } => *step,
            Self::NoFunds(_) => SettlementStep::Build,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_keeps_stderr() {
        let err = SettlementError::Command {
            step: SettlementStep::Submit,
            program: "cardano-cli".into(),
            status: "exit status: 1".into(),
            stdout: String::new(),
            stderr: "BadInputsUTxO".into(),
        };
        assert_eq!(err.step(), SettlementStep::Submit);
        assert!(err.to_string().contains("BadInputsUTxO"));
        assert!(err.to_string().starts_with("submit:"));
    }
}
