#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sterling_lib::features::FEATURE_DESCRIPTIONS;
use sterling_lib::{load_from_path, Features};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONF: &str = "/etc/sterling/sterling.cfg";
const DEFAULT_PID: &str = "/var/run/sterling.pid";

#[derive(Parser, Debug)]
#[command(
    name = "sterling",
    about = "HTTP/HTTPS reverse-proxy and load-balancer",
    disable_version_flag = true,
    after_help = feature_help()
)]
struct Cli {
    /// Check configuration file syntax and exit
    #[arg(short = 'c')]
    check_only: bool,

    /// Read configuration from FILE
    #[arg(short = 'f', value_name = "FILE", default_value = DEFAULT_CONF)]
    config: PathBuf,

    /// Write PID to FILE
    #[arg(short = 'p', value_name = "FILE", default_value = DEFAULT_PID)]
    pid_file: PathBuf,

    /// Print program version, compilation settings, and exit
    #[arg(short = 'V')]
    version: bool,

    /// Verbose mode
    #[arg(short = 'v')]
    verbose: bool,

    /// Enable or disable optional FEATURE
    #[arg(short = 'W', value_name = "[no-]FEATURE")]
    features: Vec<String>,
}

fn feature_help() -> String {
    let mut out = String::from("FEATUREs are:\n");
    for (name, descr) in FEATURE_DESCRIPTIONS {
        out.push_str(&format!("  {name:<16} {descr}\n"));
    }
    out
}

fn print_version() {
    const VALUE_COLUMN: usize = 28;
    println!("sterling {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Built-in defaults:");
    println!();
    for (kw, val) in [("Configuration file", DEFAULT_CONF), ("PID file", DEFAULT_PID)] {
        let label = format!("{kw}:");
        println!("{label:<VALUE_COLUMN$}{val}");
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        let code = match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
            _ => 1,
        };
        std::process::exit(code);
    });

    if cli.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    init_tracing(cli.verbose);

    let mut features = Features::default();
    for spec in &cli.features {
        if let Err(msg) = features.set(spec) {
            error!("{msg}");
            return ExitCode::from(1);
        }
    }

    let cfg = match load_from_path(&cli.config, &features) {
        Ok(cfg) => cfg,
        Err(_) => {
            // diagnostics already reported at their source locations
            return ExitCode::from(1);
        }
    };

    if cli.check_only {
        info!("Config file {} is OK", cli.config.display());
        return ExitCode::SUCCESS;
    }

    if let Err(err) = cfg.require_listeners() {
        error!("{err}");
        return ExitCode::from(1);
    }

    let services: usize =
        cfg.services.len() + cfg.listeners.iter().map(|l| l.services.len()).sum::<usize>();
    info!(
        listeners = cfg.listeners.len(),
        services,
        pid_file = %cli.pid_file.display(),
        "configuration loaded"
    );

    // the acceptor loop and worker pool take over from here
    ExitCode::SUCCESS
}
