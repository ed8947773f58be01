//! Print job submission parameters and progress tracking.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Submission return code meaning the provider's readiness flag is not set
/// yet. Retried by the print orchestrator.
pub const TRANSIENT_NOT_READY: i32 = -3140;

/// Print job stage reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Stage {
    /// Job created.
    #[default]
    Create,
    /// Uploading; the status code is percent complete.
    Upload,
    /// Waiting.
    Waiting,
    /// Sending to the printer.
    Sending,
    /// Recording the task.
    Record,
    /// Waiting for the printer.
    WaitPrinter,
    /// Terminal success.
    Finished,
    /// Terminal failure.
    Error,
    /// Rate limited.
    Limit,
    /// Ordinal outside the known range.
    Unknown,
}

impl Stage {
    /// Map a provider ordinal (0-8) to a stage.
    pub fn from_ordinal(ordinal: i32) -> Self {
        match ordinal {
            0 => Stage::Create,
            1 => Stage::Upload,
            2 => Stage::Waiting,
            3 => Stage::Sending,
            4 => Stage::Record,
            5 => Stage::WaitPrinter,
            6 => Stage::Finished,
            7 => Stage::Error,
            8 => Stage::Limit,
            _ => Stage::Unknown,
        }
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Create => "Create",
            Stage::Upload => "Upload",
            Stage::Waiting => "Waiting",
            Stage::Sending => "Sending",
            Stage::Record => "Record",
            Stage::WaitPrinter => "WaitPrinter",
            Stage::Finished => "Finished",
            Stage::Error => "ERROR",
            Stage::Limit => "Limit",
            Stage::Unknown => "?",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One print submission, passed by value to the provider.
///
/// Field names follow the provider's parameter block.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintJobRequest {
    pub dev_id: String,
    pub task_name: String,
    pub project_name: String,
    pub preset_name: String,
    pub filename: String,
    pub config_filename: String,
    pub plate_index: i32,
    pub ftp_folder: String,
    pub ftp_file: String,
    pub ftp_file_md5: String,
    pub nozzle_mapping: String,
    pub ams_mapping: String,
    pub ams_mapping2: String,
    pub ams_mapping_info: String,
    pub nozzles_info: String,
    pub connection_type: String,
    pub comments: String,
    pub origin_profile_id: i32,
    pub stl_design_id: i32,
    pub origin_model_id: String,
    pub print_type: String,
    pub dst_file: String,
    pub dev_name: String,
    pub dev_ip: String,
    pub use_ssl_for_ftp: bool,
    pub use_ssl_for_mqtt: bool,
    pub username: String,
    pub password: String,
    pub task_bed_leveling: bool,
    pub task_flow_cali: bool,
    pub task_vibration_cali: bool,
    pub task_layer_inspect: bool,
    pub task_record_timelapse: bool,
    pub task_use_ams: bool,
    pub task_bed_type: String,
    pub extra_options: String,
    pub auto_bed_leveling: i32,
    pub auto_flow_cali: i32,
    pub auto_offset_cali: i32,
    pub extruder_cali_manual_mode: i32,
    pub task_ext_change_assist: bool,
    pub try_emmc_print: bool,
}

impl PrintJobRequest {
    /// Cloud submission of plate 1 with calibration enabled and the default
    /// four-slot AMS mapping.
    pub fn cloud(
        device_id: &str,
        filename: &str,
        config_filename: &str,
        project_name: &str,
    ) -> Self {
        Self {
            dev_id: device_id.to_string(),
            task_name: String::new(),
            project_name: project_name.to_string(),
            preset_name: String::new(),
            filename: filename.to_string(),
            config_filename: config_filename.to_string(),
            plate_index: 1,
            ftp_folder: "sdcard/".into(),
            ftp_file: String::new(),
            ftp_file_md5: String::new(),
            nozzle_mapping: "[]".into(),
            ams_mapping: "[0,1,2,3]".into(),
            ams_mapping2: String::new(),
            ams_mapping_info: String::new(),
            nozzles_info: String::new(),
            connection_type: "cloud".into(),
            comments: String::new(),
            origin_profile_id: 0,
            stl_design_id: 0,
            origin_model_id: String::new(),
            print_type: "from_normal".into(),
            dst_file: String::new(),
            dev_name: String::new(),
            dev_ip: String::new(),
            use_ssl_for_ftp: false,
            use_ssl_for_mqtt: true,
            username: String::new(),
            password: String::new(),
            task_bed_leveling: true,
            task_flow_cali: true,
            task_vibration_cali: true,
            task_layer_inspect: false,
            task_record_timelapse: false,
            task_use_ams: true,
            task_bed_type: "auto".into(),
            extra_options: String::new(),
            auto_bed_leveling: 0,
            auto_flow_cali: 0,
            auto_offset_cali: 0,
            extruder_cali_manual_mode: -1,
            task_ext_change_assist: false,
            try_emmc_print: false,
        }
    }
}

/// Observed progress of one print submission.
///
/// `done` goes false to true once, and `result_code` is set exactly when
/// `done` is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintJobOutcome {
    /// Last reported stage.
    pub stage: Stage,
    /// Last reported code.
    pub last_code: i32,
    /// Terminal result, `0` on success.
    pub result_code: Option<i32>,
    /// Whether a terminal stage was seen.
    pub done: bool,
    /// Last upload percentage.
    pub upload_percent: i32,
}

impl PrintJobOutcome {
    /// Apply one status update. Updates after a terminal stage are ignored.
    pub fn apply(&mut self, stage: Stage, code: i32) {
        if self.done {
            return;
        }
        self.stage = stage;
        self.last_code = code;
        match stage {
            Stage::Upload => self.upload_percent = code,
            Stage::Finished => {
                self.result_code = Some(0);
                self.done = true;
            }
            Stage::Error => {
                self.result_code = Some(code);
                self.done = true;
            }
            _ => {}
        }
    }
}

/// Shared handle written by provider callbacks and read by the waiting
/// orchestrator.
#[derive(Debug, Clone, Default)]
pub struct PrintTracker {
    inner: Arc<Mutex<PrintJobOutcome>>,
}

impl PrintTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw `(stage, code)` update.
    pub fn update(&self, ordinal: i32, code: i32) {
        let stage = Stage::from_ordinal(ordinal);
        let mut outcome = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        outcome.apply(stage, code);
    }

    /// Whether a terminal stage was seen.
    pub fn is_done(&self) -> bool {
        self.snapshot().done
    }

    /// Copy of the current outcome.
    pub fn snapshot(&self) -> PrintJobOutcome {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
