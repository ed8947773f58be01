//! Result emitter: one output line, diagnostics, and an exit code.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success, or sent without confirmation.
    Success = 0,
    /// Setup or hard failure.
    Failure = 1,
    /// The device was reached but published nothing.
    NoData = 2,
}

impl ExitCode {
    /// Numeric process exit code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// What an orchestrator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// The single structured output line.
    pub line: String,
    /// Exit code to report alongside the line.
    pub exit: ExitCode,
    /// Extra diagnostic text.
    pub diagnostic: Option<String>,
}

impl Outcome {
    /// Successful outcome with a verbatim line.
    pub fn success(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            exit: ExitCode::Success,
            diagnostic: None,
        }
    }

    /// Serialize `value` as the output line.
    pub fn json<T: Serialize>(value: &T, exit: ExitCode) -> Result<Self> {
        let line = serde_json::to_string(value)
            .map_err(|e| crate::error::CloudError::Config(format!("cannot encode output: {e}")))?;
        Ok(Self {
            line,
            exit,
            diagnostic: None,
        })
    }

    /// Attach diagnostic text.
    pub fn with_diagnostic(mut self, text: impl Into<String>) -> Self {
        self.diagnostic = Some(text.into());
        self
    }
}

/// Write an orchestrator result and return the exit code.
///
/// The line goes to `out`; diagnostics and errors go to `err`. Write
/// failures are ignored since there is nowhere left to report them.
pub fn emit(result: Result<Outcome>, out: &mut dyn Write, err: &mut dyn Write) -> ExitCode {
    match result {
        Ok(outcome) => {
            if let Some(diagnostic) = &outcome.diagnostic {
                let _ = writeln!(err, "{diagnostic}");
            }
            let _ = writeln!(out, "{}", outcome.line);
            let _ = out.flush();
            outcome.exit
        }
        Err(e) => {
            let _ = writeln!(err, "error: {e}");
            e.exit_code()
        }
    }
}
