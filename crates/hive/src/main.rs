mod cli;

use std::io;

use clap::Parser;
use cli::{Opts, OptsCmd};
use hive_util::FmtCompact as _;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "hive::cli";

type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("invalid configuration: {message}"))]
    Config { message: String },
    #[snafu(display("cluster service error: {source}"))]
    Cluster { source: hive_cluster::ClusterError },
    #[snafu(display("failed to serialize config: {source}"))]
    Serialize { source: toml::ser::Error },
    #[snafu(display("{source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    match opts.cmd {
        OptsCmd::Serve(serve_opts) => serve(serve_opts).await,
        OptsCmd::PrintConfig(serve_opts) => print_config(serve_opts),
    }
}

async fn serve(serve_opts: cli::ServeOpts) -> CliResult<()> {
    let config = cli::resolve_config(&serve_opts).map_err(|message| ConfigSnafu { message }.build())?;

    let mut service = hive_cluster::ClusterService::new(config).await.context(ClusterSnafu)?;
    service.start().await.context(ClusterSnafu)?;

    info!(
        target: LOG_TARGET,
        node_id = %service.node_id(),
        addr = ?service.server_addr(),
        enabled = service.is_enabled(),
        "hive node running"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target: LOG_TARGET, "received shutdown signal"),
        Err(error) => tracing::warn!(target: LOG_TARGET, err = %error.fmt_compact(), "failed to listen for ctrl-c"),
    }

    service.stop();
    Ok(())
}

fn print_config(serve_opts: cli::ServeOpts) -> CliResult<()> {
    let config = cli::resolve_config(&serve_opts).map_err(|message| ConfigSnafu { message }.build())?;
    let rendered = toml::to_string_pretty(&config).context(SerializeSnafu)?;
    println!("{rendered}");
    Ok(())
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("failed to initialize logging".to_string()))?;

    Ok(())
}
