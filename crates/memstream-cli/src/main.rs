use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use memstream_core::{Pid, Process, SystemEndpoint};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod shutdown;

use commands::hex_utils::parse_hex_address;
use commands::watch::{FieldArg, WatchOptions, parse_field_arg};
use config::CliConfig;
use shutdown::ShutdownSignal;

#[derive(Parser)]
#[command(name = "memstream")]
#[command(about = "Batched remote process memory access")]
struct Args {
    /// Target process id
    #[arg(short, long, global = true, env = "MEMSTREAM_PID")]
    pid: Option<u32>,

    #[arg(short, long, global = true, default_value = "memstream.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump memory as hex
    Hexdump {
        #[arg(value_parser = parse_hex_address)]
        address: u64,
        #[arg(default_value_t = 256)]
        size: usize,
        /// Hide the ASCII column
        #[arg(long)]
        no_ascii: bool,
    },
    /// Write hex bytes, e.g. `write 0x1000 "DE AD BE EF"`
    Write {
        #[arg(value_parser = parse_hex_address)]
        address: u64,
        bytes: String,
    },
    /// Find the first match of a byte pattern such as "48 8B ?? ?? C3"
    Scan {
        #[arg(value_parser = parse_hex_address)]
        start: u64,
        #[arg(value_parser = parse_hex_address)]
        stop: u64,
        pattern: String,
    },
    /// Refresh fields of a structure and print JSON lines until Ctrl+C
    Watch {
        #[arg(value_parser = parse_hex_address)]
        base: u64,
        /// Field as off:size[:policy], policy one of fresh, ttl=<ms>, once, once-zero
        #[arg(short, long = "field", required = true, value_parser = parse_field_arg)]
        fields: Vec<FieldArg>,
        /// Refresh interval in milliseconds (overrides the config file)
        #[arg(short, long)]
        interval_ms: Option<u64>,
        /// Stop after this many refreshes
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let directive = if args.verbose {
        "memstream=debug"
    } else {
        "memstream=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = match CliConfig::load(&args.config) {
        Ok(c) => {
            info!("Loaded config from {:?}", args.config);
            c
        }
        Err(e) => {
            warn!("{:#}, using defaults", e);
            CliConfig::default()
        }
    };

    let Some(pid) = args.pid else {
        bail!("No target process: pass --pid or set MEMSTREAM_PID");
    };
    let pid = Pid::new(pid);

    let endpoint = SystemEndpoint::shared();
    endpoint.open(pid)?;
    let mut process = Process::with_config(endpoint, pid, config.engine.clone())?;
    debug!("Attached to pid {:?}", pid);

    match args.command {
        Command::Hexdump {
            address,
            size,
            no_ascii,
        } => commands::hexdump::run(&process, address, size, !no_ascii),
        Command::Write { address, bytes } => commands::write::run(&process, address, &bytes),
        Command::Scan {
            start,
            stop,
            pattern,
        } => commands::scan::run(&process, start, stop, &pattern).map(|_| ()),
        Command::Watch {
            base,
            fields,
            interval_ms,
            count,
        } => {
            let shutdown = Arc::new(ShutdownSignal::new());
            let shutdown_ctrlc = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                info!("Received shutdown signal, stopping...");
                shutdown_ctrlc.trigger();
            })?;

            let options = WatchOptions {
                base,
                fields,
                interval: Duration::from_millis(
                    interval_ms.unwrap_or(config.watch.interval_ms),
                ),
                count,
            };
            let cycles = commands::watch::run(
                &mut process,
                &options,
                &shutdown,
                &mut std::io::stdout().lock(),
            )?;
            info!("Watched {} refreshes", cycles);
            Ok(())
        }
    }
}
