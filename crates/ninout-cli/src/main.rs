mod demos;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use ninout_core::{RunOptions, Runner};
use ninout_log::resolve_logs_dir;

#[derive(Parser, Debug)]
#[command(name = "ninout", version, about = "DAG pipeline engine with a run-history API")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve the read-only dashboard API over a logs directory.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Logs directory; defaults to $NINOUT_LOGS_DIR, then "logs".
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Run a bundled example pipeline, writing its run log.
    Demo {
        /// Which example to run.
        name: DemoName,
        /// Logs directory; defaults to $NINOUT_LOGS_DIR, then "logs".
        #[arg(long)]
        logs_dir: Option<PathBuf>,
        /// Row count for the row-stream example.
        #[arg(long, default_value_t = 500)]
        rows: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DemoName {
    /// Extract, branch, conditional transform, load.
    Branching,
    /// Chain with a disabled hop; skips propagate downstream.
    DisabledEdge,
    /// Streaming row pipeline with live progress.
    RowStream,
    /// task -> row -> sql -> task, all modes in one graph.
    Hybrid,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Serve { addr, logs_dir } => {
            let logs_dir = resolve_logs_dir(logs_dir);
            let runtime = tokio::runtime::Runtime::new().context("start async runtime")?;
            runtime.block_on(ninout_api::serve(addr, logs_dir))
        }
        Cmd::Demo {
            name,
            logs_dir,
            rows,
        } => {
            let logs_dir = resolve_logs_dir(logs_dir);
            let (dag, dag_name) = match name {
                DemoName::Branching => (demos::branching()?, "branching_example"),
                DemoName::DisabledEdge => (demos::disabled_edge()?, "disabled_edge_example"),
                DemoName::RowStream => (demos::row_stream(rows)?, "row_stream_example"),
                DemoName::Hybrid => (demos::hybrid()?, "hybrid_modes_example"),
            };
            let outcome = Runner::run(
                &dag,
                RunOptions {
                    dag_name: dag_name.to_string(),
                    logs_dir,
                    ..RunOptions::default()
                },
            )
            .with_context(|| format!("run demo `{dag_name}`"))?;

            for (step, status) in &outcome.status {
                println!("{step}: {status}");
            }
            println!("Run dir: {}", outcome.run_dir.display());
            Ok(())
        }
    }
}
