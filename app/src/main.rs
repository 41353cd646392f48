use anyhow::{
    anyhow,
    Result,
};
use clap::Parser;
use lb_writer_services::{
    connection::ConnectionManager,
    consumer::QueueConsumer,
    writer::BatchWriter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;
use args::Args;


fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let res = if args.log_json { builder.json().try_init() } else { builder.try_init() };
    res.map_err(|e| anyhow!(e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    info!("timescale-writer init");
    let manager = ConnectionManager::new(args.store_config(), args.broker_config(), args.reconnect_policy());
    let store = manager.connect_store().await;
    let writer = BatchWriter::new(store, args.write_policy());

    match QueueConsumer::new(manager, writer, args.consumer_options()).run().await {}
}
