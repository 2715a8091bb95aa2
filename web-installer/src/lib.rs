// Passbolt web installer core
// Library entry point

pub mod api;
pub mod database;
pub mod error;
pub mod installation;
pub mod models;
pub mod security;
pub mod session;
pub mod utils;

use log::{error, info};
use std::path::{Path, PathBuf};

use crate::models::config::InstallerConfig;
use crate::models::responses::InstallResponse;
use crate::session::{FileSettingsStore, SettingsStore};

/// Initialize logging system with dual format (JSON + human-readable)
///
/// Console output goes to stderr; stdout carries the install payload.
pub fn init_logging(log_dir: Option<&Path>, with_console: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = utils::path_resolver::resolve_log_folder(log_dir)?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("web-installer-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("web-installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(log::LevelFilter::Debug);

    if with_console {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stderr()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(fern::log_file(json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(fern::log_file(txt_log_file)?),
        );

    dispatch.apply()?;

    log::info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub db_check: bool,
    pub clear: bool,
    pub quiet: bool,
    pub help: bool,
}

pub const USAGE: &str = "\
Usage: web-installer --settings <file> [--config <file>] [--db-check] [--clear] [--quiet]

  --settings <file>  JSON settings file holding the wizard answers (read and updated)
  --config <file>    installer configuration (TOML); defaults apply when omitted
  --db-check         only test the database answers and count existing administrators
  --clear            discard the settings file and exit
  --quiet            no log output on stderr
";

impl CliArgs {
    /// Accepts `--flag value` and `--flag=value`.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut out = CliArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) => (f, Some(v.to_string())),
                None => (arg.as_str(), None),
            };
            let mut value = |name: &str| -> Result<PathBuf, String> {
                inline
                    .clone()
                    .or_else(|| iter.next().cloned())
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
                    .ok_or_else(|| format!("{} requires a value", name))
            };
            match flag {
                "--config" => out.config = Some(value("--config")?),
                "--settings" => out.settings = Some(value("--settings")?),
                "--db-check" => out.db_check = true,
                "--clear" => out.clear = true,
                "--quiet" | "-q" => out.quiet = true,
                "--help" | "-h" => out.help = true,
                other => return Err(format!("unknown argument: {}", other)),
            }
        }
        if !out.help && out.settings.is_none() {
            return Err("--settings is required".to_string());
        }
        Ok(out)
    }
}

async fn run_cli_async(args: &CliArgs, settings_path: &Path) -> i32 {
    let config = match &args.config {
        Some(path) => match InstallerConfig::load(path).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{:#}", e);
                return 2;
            }
        },
        None => InstallerConfig::default(),
    };

    if !args.quiet || config.log_dir.is_some() {
        if let Err(e) = init_logging(config.log_dir.as_deref(), !args.quiet) {
            eprintln!("Failed to initialize logging: {}", e);
        }
    }

    let store = match FileSettingsStore::load(settings_path).await {
        Ok(s) => s,
        Err(e) => {
            print_payload(&InstallResponse::from(&e));
            return 1;
        }
    };

    if args.clear {
        return match store.clear().await {
            Ok(()) => {
                info!("[PHASE: session] [STEP: clear] Settings cleared");
                0
            }
            Err(e) => {
                print_payload(&InstallResponse::from(&e));
                1
            }
        };
    }

    if args.db_check {
        return match api::installer::check_database(&store).await {
            Ok(admins) => {
                println!(
                    "{}",
                    serde_json::json!({"connected": true, "admin_count": admins})
                );
                0
            }
            Err(resp) => {
                print_payload(&resp);
                1
            }
        };
    }

    let resp = api::installer::run_install(&config, &store).await;
    print_payload(&resp);
    if resp.is_success() {
        0
    } else {
        1
    }
}

fn print_payload(resp: &InstallResponse) {
    match serde_json::to_string_pretty(resp) {
        Ok(s) => println!("{}", s),
        Err(e) => error!("[PHASE: respond] Failed to serialize response: {}", e),
    }
}

/// CLI entry point. Returns the process exit code.
pub fn run_cli(raw_args: &[String]) -> i32 {
    let args = match CliArgs::parse(raw_args) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return 2;
        }
    };
    if args.help {
        print!("{}", USAGE);
        return 0;
    }
    let Some(settings_path) = args.settings.clone() else {
        eprintln!("{}", USAGE);
        return 2;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return 1;
        }
    };
    runtime.block_on(run_cli_async(&args, &settings_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_flags_and_values() {
        let parsed = CliArgs::parse(&args(&[
            "--settings",
            "/tmp/s.json",
            "--config=/etc/passbolt/installer.toml",
            "--db-check",
            "-q",
        ]))
        .unwrap();
        assert_eq!(parsed.settings, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(
            parsed.config,
            Some(PathBuf::from("/etc/passbolt/installer.toml"))
        );
        assert!(parsed.db_check);
        assert!(parsed.quiet);
        assert!(!parsed.clear);
    }

    #[test]
    fn settings_is_required_unless_asking_for_help() {
        assert!(CliArgs::parse(&args(&["--db-check"])).is_err());
        assert!(CliArgs::parse(&args(&["--help"])).unwrap().help);
    }

    #[test]
    fn missing_value_and_unknown_flags_are_errors() {
        let err = CliArgs::parse(&args(&["--settings"])).unwrap_err();
        assert!(err.contains("requires a value"));
        let err = CliArgs::parse(&args(&["--settings", "s.json", "--force"])).unwrap_err();
        assert!(err.contains("--force"));
    }
}
