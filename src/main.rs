#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use davos_boot_harness::{
    keys_for_command, EmulatorConfig, HarnessConfig, KeyName, Orchestrator, Outcome, QemuLauncher,
    RunReport, SystemClock,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    version,
    args_override_self = true,
    about = "Boot a DavOS image in QEMU and check that its shell answers a command",
    long_about = "Boot a DavOS image in QEMU and check that its shell answers a command.\n\n\
        The guest's debug console (port 0xE9) is written to --log. The check waits for \
        --boot-marker, types the key sequence through the QEMU monitor, then waits for \
        --result-marker. Exit status is 0 on pass and 1 on any failure."
)]
struct Args {
    /// Bootable ISO image.
    #[arg(long, env = "DAVOS_IMAGE", default_value = "build/dav-go-os.iso")]
    image: PathBuf,

    /// Debug console log file. Removed before the run and kept afterwards.
    #[arg(long, env = "DAVOS_LOG", default_value = "qemu.log")]
    log: PathBuf,

    /// QEMU system emulator binary.
    #[arg(long, env = "DAVOS_QEMU", default_value = "qemu-system-i386")]
    qemu: PathBuf,

    /// Extra argument appended to the QEMU command line (repeatable).
    #[arg(long = "qemu-arg", value_name = "ARG", allow_hyphen_values = true)]
    qemu_args: Vec<String>,

    /// Text in the log that means the guest finished booting.
    #[arg(long, env = "DAVOS_BOOT_MARKER", default_value = "DavOS")]
    boot_marker: String,

    /// Seconds to wait for the boot marker.
    #[arg(
        long,
        env = "DAVOS_BOOT_TIMEOUT",
        value_name = "SECS",
        default_value = "10",
        value_parser = parse_secs
    )]
    boot_timeout: Duration,

    /// Shell command to type; mapped to QEMU key names and followed by Enter.
    #[arg(long, env = "DAVOS_COMMAND", conflicts_with = "keys")]
    command: Option<String>,

    /// Raw QEMU key names to send instead of --command (default: h,e,l,p,ret).
    #[arg(long, env = "DAVOS_KEYS", value_delimiter = ',')]
    keys: Vec<KeyName>,

    /// Text in the log that means the command produced its output.
    #[arg(long, env = "DAVOS_RESULT_MARKER", default_value = "Commands:")]
    result_marker: String,

    /// Seconds to wait for the result marker.
    #[arg(
        long,
        env = "DAVOS_RESULT_TIMEOUT",
        value_name = "SECS",
        default_value = "5",
        value_parser = parse_secs
    )]
    result_timeout: Duration,

    /// Log polling interval in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Pause after each key in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 100)]
    key_delay_ms: u64,

    /// How long QEMU gets to quit before it is killed, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 3000)]
    terminate_grace_ms: u64,

    /// Trailing QEMU stderr lines shown on failure.
    #[arg(long, value_name = "LINES", default_value_t = 40)]
    stderr_tail_lines: usize,

    /// Write a JSON report of the run to this path.
    #[arg(long, env = "DAVOS_REPORT")]
    report: Option<PathBuf>,

    /// Format of diagnostic logging on stderr (filtered by RUST_LOG).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|err| format!("invalid number of seconds `{value}`: {err}"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| format!("invalid duration `{value}`: {err}"))
}

impl Args {
    fn into_config(self) -> Result<HarnessConfig> {
        let defaults = HarnessConfig::default();
        let key_sequence = match (self.command, self.keys) {
            (Some(command), _) => keys_for_command(&command)
                .with_context(|| format!("cannot type command {command:?}"))?,
            (None, keys) if !keys.is_empty() => keys,
            (None, _) => defaults.key_sequence,
        };

        Ok(HarnessConfig {
            image_path: self.image,
            log_path: self.log,
            emulator: EmulatorConfig {
                program: self.qemu,
                extra_args: self.qemu_args,
                terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            },
            boot_marker: self.boot_marker,
            boot_timeout: self.boot_timeout,
            key_sequence,
            result_marker: self.result_marker,
            result_timeout: self.result_timeout,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            key_delay: Duration::from_millis(self.key_delay_ms),
            stderr_tail_lines: self.stderr_tail_lines,
        })
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Stdout carries the verdict; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_outcome(outcome: &Outcome, github_actions: bool) {
    if let Some(diagnostics) = &outcome.diagnostics {
        if github_actions {
            println!("::group::Boot check diagnostics");
        }
        println!("{diagnostics}");
        if github_actions {
            println!("::endgroup::");
        }
    }
    println!("{outcome}");
}

fn run(args: Args) -> Result<ExitCode> {
    let report_path = args.report.clone();
    let config = args.into_config()?;
    config.validate().context("invalid configuration")?;
    tracing::debug!(?config, "resolved configuration");

    println!(
        "Starting QEMU verification for {}...",
        config.image_path.display()
    );
    println!("Log file: {}", config.log_path.display());

    let launcher = QemuLauncher::new(config.emulator.clone());
    let outcome = Orchestrator::new(config, launcher, SystemClock).run();

    let github_actions = env::var("GITHUB_ACTIONS")
        .map(|v| v == "true")
        .unwrap_or(false);
    print_outcome(&outcome, github_actions);

    if let Some(path) = report_path {
        RunReport::new(&outcome)
            .write_to(&path)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }

    Ok(if outcome.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
