use clap::Parser;
use classdeck_core::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "classdeck",
    about = "Realtime backend for classroom coding sessions",
    version
)]
struct Opts {
    /// Listen port; overrides $PORT.
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let opts = Opts::parse();
    let mut config = Config::from_env();
    if let Some(port) = opts.port {
        config.port = port;
    }
    classdeck_server::run_main(config).await
}
