//! NIM agent binary.
//!
//! A minimal flags set per spec §6: `-v` prints version and exits; `-d`
//! enables trace logging; `-s` routes logs to stdout. Exit code 0 on
//! normal shutdown; non-zero is reserved for startup failure.

use clap::Parser;
use nim_agent::{NimAgent, NimConfig};

const CONFIG_PATH: &str = "/etc/nim/config.json";

#[derive(Parser)]
#[command(name = "nim-agent", disable_version_flag = true)]
struct Cli {
    /// Print version and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable trace/debug logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Route logs to stdout instead of stderr.
    #[arg(short = 's', long = "stdout")]
    stdout: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("nim-agent {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    let level = if cli.debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if cli.stdout {
        builder.target(env_logger::Target::Stdout);
    }
    builder.init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(run());
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let config = match NimConfig::load(CONFIG_PATH) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load configuration: {e}");
            return 1;
        }
    };

    let mut agent = match NimAgent::start(config).await {
        Ok(a) => a,
        Err(e) => {
            log::error!("fatal startup error: {e:#}");
            return 1;
        }
    };

    log::info!("nim-agent started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(agent.heartbeat()) => {
                if let Err(e) = agent.tick().await {
                    log::warn!("tick failed: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested, exiting");
                break;
            }
        }
    }

    0
}
