#![forbid(unsafe_code)]

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser};
use mimalloc::MiMalloc;
use thiserror_ext::AsReport;
use tracing::{Level, event};
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::format::FmtSpan,
    prelude::*,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use emojifs::{
    commands::{Command, Shell},
    config::Config,
    version::VERSION_INFO,
    vfs::{EmojiFs, Error},
};

/// Manage the custom emoji of your chat workspaces as files
#[derive(Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Configuration file [default: ./emojifs.toml]
    #[arg(short, long, env = "EMOJIFS_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Log more; repeat for even more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

fn configure_logging(verbose: u8) -> Result<()> {
    LogTracer::init()?;

    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_env_var("EMOJIFS_LOG")
        .with_default_directive(level.into())
        .from_env()?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter);
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

async fn run(opt: &Opt) -> Result<()> {
    let config = Config::load(opt.config.as_deref())?;
    emojifs::metrics::describe();

    let fs = EmojiFs::new(config.namespace()?);
    let mut shell =
        Shell::new(&fs, tokio::io::stdout()).with_mountpoint(config.emojifs.mountpoint.clone());

    opt.cmd.run(&mut shell).await
}

#[tokio::main]
pub async fn main() -> Result<ExitCode> {
    let opt = Opt::parse();
    configure_logging(opt.verbose)?;
    event!(Level::DEBUG, version = %VERSION_INFO, "starting");

    match run(&opt).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(vfs_err) => eprintln!(
                    "emojifs: {} ({})",
                    vfs_err.as_report(),
                    std::io::Error::from_raw_os_error(vfs_err.errno().raw_os_error())
                ),
                None => eprintln!("emojifs: {err:#}"),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
