//! bambu_cloud_bridge - Bambu Lab cloud printing CLI
//!
//! Every command writes one JSON line to stdout. Logs and errors go to
//! stderr (`-v` for debug output).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabprint_cloud::ops::{self, print::PrintArgs};
use fabprint_cloud::{
    emit, BridgeConfig, CloudError, Credentials, ExitCode, MqttProviderFactory, Outcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bambu_cloud_bridge")]
#[command(about = "Bambu Lab cloud printing bridge", long_about = None)]
struct Cli {
    /// Verbose debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Bridge configuration file (TOML)
    #[arg(long, global = true, env = "BAMBU_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a 3MF file and start a cloud print job
    Print {
        /// Sliced 3MF project
        file: PathBuf,
        /// Target printer serial
        device_id: String,
        /// Credential file (JSON with a "token" field)
        token_file: PathBuf,
        /// Config-only 3MF file
        #[arg(long = "config-3mf")]
        config_3mf: Option<PathBuf>,
        /// Project name
        #[arg(long, default_value = ops::print::DEFAULT_PROJECT)]
        project: String,
        /// Seconds to wait for the job to finish
        #[arg(long, default_value_t = ops::print::DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },
    /// Query live printer state
    Status {
        /// Target printer serial
        device_id: String,
        /// Credential file
        token_file: PathBuf,
    },
    /// List recent cloud print tasks
    Tasks {
        /// Credential file
        token_file: PathBuf,
        /// Number of tasks to fetch
        #[arg(long, default_value_t = ops::tasks::DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Stop the current print
    Cancel {
        /// Target printer serial
        device_id: String,
        /// Credential file
        token_file: PathBuf,
    },
    /// Send a raw MQTT payload and collect the replies
    SendMqtt {
        /// Target printer serial
        device_id: String,
        /// Credential file
        token_file: PathBuf,
        /// JSON payload, or @path to read it from a file
        payload: String,
        /// Seconds to collect replies
        #[arg(long, default_value_t = ops::send_raw::DEFAULT_WAIT_SECS)]
        wait: u64,
    },
    /// Install the client certificate on a printer
    InstallCert {
        /// Target printer serial
        device_id: String,
        /// Credential file
        token_file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::Failure
        }
    };

    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // Provider teardown can block on its network threads; output is already
    // flushed, so leave without it.
    std::process::exit(code.as_i32());
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "warn,fabprint_cloud=debug,bambu_cloud_bridge=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = BridgeConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading {}", path.display()),
        None => "loading configuration".to_string(),
    })?;

    let result = execute(cli.command, &config).await;
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    Ok(emit(result, &mut stdout.lock(), &mut stderr.lock()))
}

async fn execute(command: Commands, config: &BridgeConfig) -> fabprint_cloud::Result<Outcome> {
    let factory = MqttProviderFactory::new(config);

    match command {
        Commands::Print {
            file,
            device_id,
            token_file,
            config_3mf,
            project,
            timeout,
        } => {
            let credentials = Credentials::from_file(&token_file)?;
            let args = PrintArgs {
                file,
                config_file: config_3mf,
                project,
                timeout: Duration::from_secs(timeout),
            };
            ops::print::run(&factory, config, &credentials, &device_id, &args).await
        }
        Commands::Status {
            device_id,
            token_file,
        } => {
            let credentials = Credentials::from_file(&token_file)?;
            ops::status::run(&factory, config, &credentials, &device_id).await
        }
        Commands::Tasks { token_file, limit } => {
            let credentials = Credentials::from_file(&token_file)?;
            ops::tasks::run(config, &credentials, limit).await
        }
        Commands::Cancel {
            device_id,
            token_file,
        } => {
            let credentials = Credentials::from_file(&token_file)?;
            ops::cancel::run(&factory, config, &credentials, &device_id).await
        }
        Commands::SendMqtt {
            device_id,
            token_file,
            payload,
            wait,
        } => {
            let credentials = Credentials::from_file(&token_file)?;
            let payload = resolve_payload(&payload)?;
            ops::send_raw::run(
                &factory,
                config,
                &credentials,
                &device_id,
                &payload,
                Duration::from_secs(wait),
            )
            .await
        }
        Commands::InstallCert {
            device_id,
            token_file,
        } => {
            let credentials = Credentials::from_file(&token_file)?;
            ops::install_cert::run(&factory, config, &credentials, &device_id).await
        }
    }
}

/// Inline payload, or the contents of the file named after `@`.
fn resolve_payload(arg: &str) -> fabprint_cloud::Result<String> {
    let Some(path) = arg.strip_prefix('@') else {
        return Ok(arg.to_string());
    };
    let text = std::fs::read_to_string(Path::new(path))
        .map_err(|e| CloudError::Config(format!("cannot read payload file {path}: {e}")))?;
    if text.trim().is_empty() {
        return Err(CloudError::Config(format!("payload file {path} is empty")));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_print_defaults() {
        let cli = Cli::try_parse_from(["bambu_cloud_bridge", "print", "a.3mf", "DEV", "tok.json"])
            .unwrap();
        match cli.command {
            Commands::Print {
                project,
                timeout,
                config_3mf,
                ..
            } => {
                assert_eq!(project, "fabprint");
                assert_eq!(timeout, 180);
                assert!(config_3mf.is_none());
            }
            _ => panic!("expected print"),
        }
    }

    #[test]
    fn test_send_mqtt_options() {
        let cli = Cli::try_parse_from([
            "bambu_cloud_bridge",
            "send-mqtt",
            "DEV",
            "tok.json",
            "@payload.json",
            "--wait",
            "5",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::SendMqtt { payload, wait, .. } => {
                assert_eq!(payload, "@payload.json");
                assert_eq!(wait, 5);
            }
            _ => panic!("expected send-mqtt"),
        }
    }

    #[test]
    fn test_tasks_limit_default() {
        let cli = Cli::try_parse_from(["bambu_cloud_bridge", "tasks", "tok.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Tasks { limit: 10, .. }));
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(Cli::try_parse_from(["bambu_cloud_bridge", "status", "DEV"]).is_err());
        assert!(Cli::try_parse_from(["bambu_cloud_bridge", "install-cert"]).is_err());
    }

    #[test]
    fn test_resolve_payload() {
        assert_eq!(resolve_payload(r#"{"a":1}"#).unwrap(), r#"{"a":1}"#);

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"b":2}"#).unwrap();
        let arg = format!("@{}", file.path().display());
        assert_eq!(resolve_payload(&arg).unwrap(), r#"{"b":2}"#);

        std::fs::write(file.path(), "  \n").unwrap();
        assert!(matches!(resolve_payload(&arg), Err(CloudError::Config(_))));
        assert!(resolve_payload("@/nonexistent/payload.json").is_err());
    }
}
