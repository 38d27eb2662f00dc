use std::{error::Error, net::SocketAddr, num::NonZeroUsize, path::PathBuf, process, sync::Arc};

use clap::Parser;
use log::info;
use sqlrunner::{Config, Dispatcher, protocol::StorageServer};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the database files
    path: PathBuf,
    /// Listen for new connection at address
    address: SocketAddr,
    /// Bound every database queue at this many pending commands
    #[arg(long, env = "SQLRUNNER_QUEUE_CAPACITY")]
    queue_capacity: Option<NonZeroUsize>,
    /// Number of connections served concurrently
    #[arg(long, default_value = "15")]
    workers: NonZeroUsize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    if !cli.path.is_dir() {
        return Err(format!("'{}' is not a directory", cli.path.display()).into());
    }

    let mut config = Config::new(cli.path);
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    let dispatcher = Arc::new(Dispatcher::new(config));

    let handle = Arc::clone(&dispatcher);
    ctrlc::set_handler(move || {
        info!("shutting down, stopping {} databases", handle.open_count());
        handle.shutdown_all();
        process::exit(0);
    })?;

    let server = StorageServer::new(cli.address, dispatcher, cli.workers.get());
    server.listen()?;
    Ok(())
}
