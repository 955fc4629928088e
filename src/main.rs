use std::net::SocketAddr;

use futures::future::join_all;
use thiserror::Error;

use crate::api::server::RouteError;
use crate::util::telemetry;

mod api;
mod db;
mod engine;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = telemetry::Telemetry::init().await?;

    tracing::info!("starting progress server");

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();
    let handles = api::server::start_server(tx_server_ready, rx_server_ready).await?;

    _ = join_all(handles).await;

    telemetry.shutdown();
    Ok(())
}
