//! Command line interface: `launch`, `process`, and `watch`.

use std::fs::OpenOptions;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use log::info;

use crate::config::{self, Config};
use crate::server::{self, client};
use crate::service::{ProcessRequest, Service, WatchRequest, API_VERSION};

#[derive(Parser)]
#[command(author, version, about = "Amplicon read screening microservice", long_about = None)]
pub struct Cli {
    /// Address of the service
    #[arg(short, long, default_value = config::DEFAULT_ADDRESS)]
    pub address: String,

    /// TCP port of the service
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    pub port: u16,

    /// Where to write the log (use '-' for standard error)
    #[arg(short, long, default_value = "-")]
    pub log_file: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the screening service
    Launch {
        /// Directory holding the sample database
        #[arg(long, default_value = config::DEFAULT_DB_PATH)]
        db_path: PathBuf,

        /// Location of the primer scheme manifest
        #[arg(long, default_value = config::DEFAULT_MANIFEST_URL)]
        manifest_url: String,

        /// Number of processing workers
        #[arg(long, default_value_t = config::DEFAULT_WORKERS)]
        num_workers: usize,

        /// S3 bucket receiving filtered reads; credentials come from
        /// AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
        #[arg(long)]
        bucket_name: Option<String>,

        /// Region of the S3 bucket
        #[arg(long, default_value = config::DEFAULT_BUCKET_REGION)]
        bucket_region: String,

        /// Directory receiving filtered reads when no bucket is configured
        #[arg(long, default_value = config::DEFAULT_OUT_DIR)]
        out_dir: PathBuf,
    },

    /// Submit a sample; the request is read as JSON from standard input
    Process,

    /// Stream completed samples from a running service
    Watch {
        /// Only stream new completions, skipping the replay of samples that
        /// finished before this watcher attached
        #[arg(long)]
        live_only: bool,
    },
}

/// Installs the logger, honouring the `--log-file` flag.
pub fn init_logging(log_file: &str) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if log_file != "-" {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("could not open log file {log_file}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

pub fn run(cli: Cli) -> Result<()> {
    let addr = format!("{}:{}", cli.address, cli.port);
    match cli.command {
        Commands::Launch {
            db_path,
            manifest_url,
            num_workers,
            bucket_name,
            bucket_region,
            out_dir,
        } => {
            let config = Config {
                address: cli.address,
                port: cli.port,
                num_workers,
                db_path,
                manifest_url,
                bucket_name,
                bucket_region,
                out_dir,
            };
            launch(config, &addr)
        }
        Commands::Process => process(&addr),
        Commands::Watch { live_only } => watch(&addr, !live_only),
    }
}

/// Runs the service until an interrupt or termination signal arrives.
fn launch(config: Config, addr: &str) -> Result<()> {
    let service = Service::start(config).context("service startup failed")?;
    let listener =
        TcpListener::bind(addr).with_context(|| format!("could not listen on {addr}"))?;
    info!("listening on {}", addr);

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("could not install the shutdown signal handler")?;

    let accept_service = Arc::clone(&service);
    let accept_listener = listener.try_clone()?;
    let accept = thread::spawn(move || server::run(&accept_service, accept_listener));

    let _ = stop_rx.recv();
    info!("shutdown signal received");
    service.shutdown().context("shutdown failed")?;
    server::nudge(addr);
    accept
        .join()
        .map_err(|_| anyhow!("the accept loop panicked"))?
        .context("the accept loop failed")?;
    info!("finished");
    Ok(())
}

/// Reads a submission from standard input and prints the acknowledgement.
fn process(addr: &str) -> Result<()> {
    let request: ProcessRequest = serde_json::from_reader(std::io::stdin())
        .context("could not parse the submission JSON on standard input")?;
    let response = client::submit(addr, request)?;
    println!("sample accepted: {}", response.id);
    Ok(())
}

/// Prints one line per completed sample as the service reports them.
fn watch(addr: &str, send_finished: bool) -> Result<()> {
    println!("completed samples:");
    client::watch(
        addr,
        WatchRequest {
            api_version: API_VERSION.to_string(),
            send_finished,
        },
        |batch| {
            for sample in batch.samples {
                match &sample.process_stats {
                    Some(stats) => {
                        let (covered, total, mean) = stats.coverage_summary();
                        println!(
                            "\t- {}\t({}/{} reads kept, {}/{} amplicons covered (mean coverage = {:.0}))\t{}\tprocessed in {} seconds",
                            sample.sample_id,
                            stats.kept_reads,
                            stats.total_reads,
                            covered,
                            total,
                            mean,
                            sample.endpoint,
                            sample.processing_seconds(),
                        );
                    }
                    None => println!("\t- {}\t{}", sample.sample_id, sample.state),
                }
            }
            true
        },
    )
}
