//! `print`: submit a sliced project and follow the job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::channel::DeviceChannel;
use crate::collector::is_noise;
use crate::commands::DeviceCommand;
use crate::config::BridgeConfig;
use crate::credentials::Credentials;
use crate::error::{CloudError, Result};
use crate::job::{PrintJobOutcome, PrintJobRequest, PrintTracker, Stage, TRANSIENT_NOT_READY};
use crate::provider::{Capability, MessageFn, PrintHooks, ProviderFactory};
use crate::report::{ExitCode, Outcome};
use crate::session::{truncate, Session};

/// Default completion timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Default project name.
pub const DEFAULT_PROJECT: &str = "fabprint";

/// Inputs of one print submission.
#[derive(Debug, Clone)]
pub struct PrintArgs {
    /// Sliced 3MF project.
    pub file: PathBuf,
    /// Optional config-only 3MF.
    pub config_file: Option<PathBuf>,
    /// Cloud project name.
    pub project: String,
    /// How long to wait for a completion callback.
    pub timeout: Duration,
}

impl PrintArgs {
    /// Arguments with the default project and timeout.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            config_file: None,
            project: DEFAULT_PROJECT.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Classification of a finished `print` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintResult {
    /// The provider reported the Finished stage.
    Success,
    /// Submission was accepted but completion was not observed.
    Sent,
    /// Submission failed or the job reported an error.
    Error,
}

impl PrintResult {
    /// Classify a submission return code and the observed job progress.
    ///
    /// `-1` is treated like `0`: the provider returns it when the task was
    /// created but the printer answered late.
    pub fn classify(return_code: i32, outcome: &PrintJobOutcome) -> Self {
        match outcome.result_code {
            Some(0) => PrintResult::Success,
            Some(_) => PrintResult::Error,
            None if return_code == 0 || return_code == -1 => PrintResult::Sent,
            None => PrintResult::Error,
        }
    }

    /// Exit code for this result.
    pub fn exit_code(self) -> ExitCode {
        match self {
            PrintResult::Success | PrintResult::Sent => ExitCode::Success,
            PrintResult::Error => ExitCode::Failure,
        }
    }
}

#[derive(Serialize)]
struct PrintReport<'a> {
    result: PrintResult,
    return_code: i32,
    print_result: Option<i32>,
    stage: &'static str,
    upload_percent: i32,
    device_id: &'a str,
    file: &'a str,
}

/// Submit `args.file` to `device_id` and wait up to `args.timeout` for the
/// job to finish.
pub async fn run(
    factory: &dyn ProviderFactory,
    config: &BridgeConfig,
    credentials: &Credentials,
    device_id: &str,
    args: &PrintArgs,
) -> Result<Outcome> {
    std::fs::File::open(&args.file).map_err(|e| {
        CloudError::Config(format!("cannot read 3mf file: {}: {e}", args.file.display()))
    })?;

    let session = Session::initialize(factory, config).await?;
    let provider = session.provider();
    if !provider.supports(Capability::StartPrint) {
        return Err(CloudError::CapabilityMissing(Capability::StartPrint));
    }
    session.login(credentials).await?;
    session.connect().await?;

    let timings = session.timings();
    session.set_message_handler(print_message_logger());
    let channel = DeviceChannel::subscribe(&session, device_id).await;
    super::request_full_state(&channel).await;
    sleep(timings.print_warmup).await;

    let file = args.file.to_string_lossy();
    let config_file = args
        .config_file
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let request = PrintJobRequest::cloud(device_id, &file, &config_file, &args.project);

    // One tracker per submission: callbacks from a rejected attempt never
    // settle the job.
    let mut tracker = PrintTracker::new();
    let mut return_code = TRANSIENT_NOT_READY;
    let mut notes = Vec::new();
    for attempt in 1..=timings.print_retry_attempts {
        return_code = provider
            .start_print(request.clone(), print_hooks(&tracker))
            .await?;
        debug!("start_print attempt {attempt} returned: {return_code}");

        if return_code != TRANSIENT_NOT_READY || attempt == timings.print_retry_attempts {
            break;
        }
        warn!(
            "printer not ready for submission, retrying in {}s",
            timings.print_retry_delay.as_secs()
        );
        let delivery = channel.send(&DeviceCommand::PushAll).await;
        if !delivery.sent() {
            let note = format!("pushall before retry {} failed (code {})", attempt + 1, delivery.code);
            warn!("{note}");
            notes.push(note);
        }
        tracker = PrintTracker::new();
        sleep(timings.print_retry_delay).await;
    }

    let outcome = wait_for_completion(&tracker, args.timeout, timings.print_poll_interval).await;
    let result = PrintResult::classify(return_code, &outcome);
    info!("print {result:?}: return_code={return_code} stage={}", outcome.stage);

    session.restore_message_handler();
    Outcome::json(
        &PrintReport {
            result,
            return_code,
            print_result: outcome.result_code,
            stage: outcome.stage.name(),
            upload_percent: outcome.upload_percent,
            device_id,
            file: &file,
        },
        result.exit_code(),
    )
    .map(|outcome| {
        if notes.is_empty() {
            outcome
        } else {
            outcome.with_diagnostic(format!("{device_id}: {}", notes.join("; ")))
        }
    })
}

/// Poll `tracker` until done or `timeout` elapses; returns what was seen.
async fn wait_for_completion(
    tracker: &PrintTracker,
    timeout: Duration,
    poll: Duration,
) -> PrintJobOutcome {
    let deadline = Instant::now() + timeout;
    while !tracker.is_done() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(poll.min(deadline - now)).await;
    }
    tracker.snapshot()
}

fn print_hooks(tracker: &PrintTracker) -> PrintHooks {
    let updates = tracker.clone();
    PrintHooks {
        on_status: Arc::new(move |stage: i32, code: i32, message: &str| {
            debug!(
                "  [{}] code={code} msg={}",
                Stage::from_ordinal(stage),
                truncate(message, 200)
            );
            updates.update(stage, code);
        }),
        was_cancelled: Arc::new(|| false),
        on_wait: Arc::new(|_: i32, _: &str| false),
    }
}

/// Logs device traffic by kind while a print is being submitted.
fn print_message_logger() -> MessageFn {
    Arc::new(|_device_id: &str, payload: &str| {
        if is_noise(payload) {
            return;
        }
        if payload.contains("project_file") {
            debug!("  PRINT_CMD: {payload}");
        } else if payload.contains("app_cert_list") || payload.contains("security") {
            debug!("  SECURITY: {payload}");
        } else if payload.contains("gcode_state") && payload.contains("PREPARE") {
            debug!("  PREPARING: {}", truncate(payload, 500));
        } else {
            debug!("  mqtt: {}", truncate(payload, 200));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProvider;
    use serde_json::Value;
    use tempfile::NamedTempFile;

    fn creds() -> Credentials {
        Credentials::parse(r#"{"token":"abc"}"#).unwrap()
    }

    fn project() -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"PK").unwrap();
        file
    }

    async fn print(fake: &FakeProvider, timeout_secs: u64) -> (Outcome, Value) {
        let file = project();
        let args = PrintArgs {
            timeout: Duration::from_secs(timeout_secs),
            ..PrintArgs::new(file.path())
        };
        let outcome = run(&fake.factory(), &fake.config(), &creds(), "PRINTER1", &args)
            .await
            .unwrap();
        let report = serde_json::from_str(&outcome.line).unwrap();
        (outcome, report)
    }

    #[test]
    fn test_classify() {
        let mut outcome = PrintJobOutcome::default();
        assert_eq!(PrintResult::classify(0, &outcome), PrintResult::Sent);
        assert_eq!(PrintResult::classify(-1, &outcome), PrintResult::Sent);
        assert_eq!(PrintResult::classify(-3140, &outcome), PrintResult::Error);

        outcome.apply(Stage::Finished, 0);
        assert_eq!(PrintResult::classify(-1, &outcome), PrintResult::Success);

        let mut failed = PrintJobOutcome::default();
        failed.apply(Stage::Error, 42);
        assert_eq!(PrintResult::classify(0, &failed), PrintResult::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_job_is_success() {
        let fake = FakeProvider::new().print_stages(&[(0, 0), (1, 10), (1, 55), (6, 0)]);
        let (outcome, report) = print(&fake, 60).await;
        assert_eq!(outcome.exit, ExitCode::Success);
        assert_eq!(report["result"], "success");
        assert_eq!(report["return_code"], 0);
        assert_eq!(report["print_result"], 0);
        assert_eq!(report["stage"], "Finished");
        assert_eq!(report["upload_percent"], 55);
        assert_eq!(report["device_id"], "PRINTER1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_stage_reports_code() {
        let fake = FakeProvider::new().print_stages(&[(0, 0), (7, 42)]);
        let (outcome, report) = print(&fake, 60).await;
        assert_eq!(outcome.exit, ExitCode::Failure);
        assert_eq!(report["result"], "error");
        assert_eq!(report["print_result"], 42);
        assert_eq!(report["stage"], "ERROR");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_completion_is_sent_not_success() {
        let fake = FakeProvider::new().print_stages(&[(0, 0), (1, 20), (1, 40)]);
        let started = Instant::now();
        let (outcome, report) = print(&fake, 30).await;
        assert_eq!(outcome.exit, ExitCode::Success);
        assert_eq!(report["result"], "sent");
        assert_eq!(report["print_result"], Value::Null);
        assert_eq!(report["upload_percent"], 40);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_retried_exactly_five_times() {
        let fake = FakeProvider::new().print_fallback(TRANSIENT_NOT_READY);
        let (outcome, report) = print(&fake, 5).await;
        assert_eq!(fake.print_requests().len(), 5);
        assert_eq!(report["return_code"], TRANSIENT_NOT_READY);
        assert_eq!(report["result"], "error");
        assert_eq!(outcome.exit, ExitCode::Failure);

        let pushes = fake
            .sent()
            .iter()
            .filter(|s| s.payload.contains("pushall"))
            .count();
        assert_eq!(pushes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_then_accepted() {
        let fake = FakeProvider::new()
            .print_codes(&[TRANSIENT_NOT_READY, TRANSIENT_NOT_READY, 0])
            .print_stages(&[(6, 0)]);
        let (_, report) = print(&fake, 10).await;
        assert_eq!(fake.print_requests().len(), 3);
        assert_eq!(report["result"], "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_attempt_callbacks_do_not_settle_job() {
        let fake = FakeProvider::new()
            .print_codes(&[TRANSIENT_NOT_READY, 0])
            .print_rejection_stages(&[(7, TRANSIENT_NOT_READY)])
            .print_stages(&[(6, 0)]);
        let (outcome, report) = print(&fake, 10).await;
        assert_eq!(fake.print_requests().len(), 2);
        assert_eq!(outcome.exit, ExitCode::Success);
        assert_eq!(report["result"], "success");
        assert_eq!(report["print_result"], 0);
        assert_eq!(report["stage"], "Finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_pushall_is_reported() {
        let fake = FakeProvider::new()
            .print_codes(&[TRANSIENT_NOT_READY, 0])
            .send_fallback(-1);
        let (outcome, report) = print(&fake, 1).await;
        assert_eq!(report["result"], "sent");
        let diagnostic = outcome.diagnostic.unwrap();
        assert!(diagnostic.contains("pushall before retry 2 failed (code -1)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failure_not_retried() {
        let fake = FakeProvider::new().print_fallback(-5);
        let (_, report) = print(&fake, 5).await;
        assert_eq!(fake.print_requests().len(), 1);
        assert_eq!(report["return_code"], -5);
        assert_eq!(report["result"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_carries_cloud_defaults() {
        let fake = FakeProvider::new();
        print(&fake, 1).await;
        let request = &fake.print_requests()[0];
        assert_eq!(request.dev_id, "PRINTER1");
        assert_eq!(request.project_name, "fabprint");
        assert_eq!(request.connection_type, "cloud");
        assert_eq!(request.ams_mapping, "[0,1,2,3]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_file_fails_before_session() {
        let fake = FakeProvider::new();
        let args = PrintArgs::new("/nonexistent/plate.3mf");
        let err = run(&fake.factory(), &fake.config(), &creds(), "P", &args)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Config(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_start_print_fails_before_login() {
        let fake = FakeProvider::new().without(Capability::StartPrint);
        let file = project();
        let err = run(&fake.factory(), &fake.config(), &creds(), "P", &PrintArgs::new(file.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::CapabilityMissing(Capability::StartPrint)));
        assert!(!fake.calls().iter().any(|c| c == "change_user"));
    }
}
