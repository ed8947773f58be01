//! Printer status summary, read from report payloads for diagnostics.

use serde::Serialize;
use serde_json::Value;

/// Printer state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum PrintState {
    /// Printer is idle.
    Idle,
    /// Print in progress.
    Printing,
    /// Print paused.
    Paused,
    /// Print finished.
    Finished,
    /// Error state.
    Error(String),
    /// Preparing to print.
    Preparing,
    /// Unknown state.
    #[default]
    Unknown,
}

impl PrintState {
    /// Parse from a `gcode_state` string.
    pub fn from_gcode_state(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "idle" | "standby" => Self::Idle,
            "printing" | "running" => Self::Printing,
            "paused" | "pause" => Self::Paused,
            "finished" | "finish" | "completed" => Self::Finished,
            "preparing" | "prepare" | "slicing" => Self::Preparing,
            s if s.contains("error") || s.contains("fail") => Self::Error(status.to_string()),
            _ => Self::Unknown,
        }
    }
}

/// Fields of a report payload worth a diagnostic line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSummary {
    /// Current print state.
    pub state: PrintState,
    /// Print progress (0-100).
    pub progress_percent: Option<f64>,
    /// Current layer number.
    pub layer_current: Option<u64>,
    /// Total layer count.
    pub layer_total: Option<u64>,
    /// Remaining time in minutes.
    pub time_remaining_min: Option<u64>,
    /// Nozzle temperature (°C).
    pub nozzle_temp: Option<f64>,
    /// Bed temperature (°C).
    pub bed_temp: Option<f64>,
    /// Current file name.
    pub filename: Option<String>,
}

impl StatusSummary {
    /// Parse from payload text. Returns `None` when the payload is not JSON
    /// or carries no `print` section.
    pub fn from_payload(payload: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(payload).ok()?;
        let print = value.get("print")?;

        Some(Self {
            state: print
                .get("gcode_state")
                .and_then(Value::as_str)
                .map(PrintState::from_gcode_state)
                .unwrap_or_default(),
            progress_percent: print.get("mc_percent").and_then(Value::as_f64),
            layer_current: print.get("layer_num").and_then(Value::as_u64),
            layer_total: print.get("total_layer_num").and_then(Value::as_u64),
            time_remaining_min: print.get("mc_remaining_time").and_then(Value::as_u64),
            nozzle_temp: print.get("nozzle_temper").and_then(Value::as_f64),
            bed_temp: print.get("bed_temper").and_then(Value::as_f64),
            filename: print
                .get("gcode_file")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// One-line human summary.
    pub fn describe(&self) -> String {
        let mut text = format!("state: {:?}", self.state);
        if let Some(p) = self.progress_percent {
            text.push_str(&format!(", progress: {p}%"));
        }
        if let (Some(cur), Some(total)) = (self.layer_current, self.layer_total) {
            text.push_str(&format!(", layer {cur}/{total}"));
        }
        if let Some(min) = self.time_remaining_min {
            text.push_str(&format!(", {min} min left"));
        }
        if let Some(file) = &self.filename {
            text.push_str(&format!(", file: {file}"));
        }
        text
    }
}
