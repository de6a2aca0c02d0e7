use std::{
    io::{BufReader, IsTerminal},
    net::TcpListener,
    path::PathBuf,
    sync::Arc,
};

use clap::Parser;
use debugger::DebugAdapter;
use eyre::WrapErr;
use trafficlog::JsonLinesObserver;
use tracing_subscriber::EnvFilter;
use transport::Tap;

#[derive(Debug, Parser)]
struct Args {
    /// Configuration file, defaults to the user config directory
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Serve one host on this TCP port instead of stdio
    #[clap(short, long)]
    listen: Option<u16>,

    /// Record interpreter traffic as JSON lines
    #[clap(short, long)]
    traffic_log: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // stdout may carry the DAP stream
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if std::io::stderr().is_terminal() {
        builder.init();
    } else {
        builder.json().init();
    }

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let config = config::load(args.config.as_deref()).wrap_err("loading configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let tap = match args.traffic_log.or(config.logging.traffic_log.clone()) {
        Some(path) => {
            let observer = JsonLinesObserver::create(&path)
                .wrap_err_with(|| format!("opening traffic log {}", path.display()))?;
            Some(Tap::new(Arc::new(observer)))
        }
        None => None,
    };

    let adapter = DebugAdapter::new(
        server::connector(&config),
        server::adapter_settings(&config, tap),
    );

    match args.listen {
        Some(port) => {
            let listener = TcpListener::bind(("127.0.0.1", port))
                .wrap_err_with(|| format!("binding port {port}"))?;
            tracing::info!(%port, "waiting for host");
            let (stream, peer) = listener.accept().wrap_err("accepting host")?;
            tracing::info!(%peer, "host connected");
            let output = stream.try_clone().wrap_err("cloning host stream")?;
            server::serve(BufReader::new(stream), output, adapter)
        }
        None => {
            let stdin = std::io::stdin();
            server::serve(stdin.lock(), std::io::stdout(), adapter)
        }
    }
}
