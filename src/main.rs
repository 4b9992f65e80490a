use std::env;

use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "drip=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let raw_args: Vec<String> = env::args().collect();
    if raw_args.get(1).map(|s| s.as_str()) == Some("serve") {
        let port = raw_args
            .get(2)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(8080);
        if let Err(e) = drip::api::run_http_server(port).await {
            error!("server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = drip::api::run_cli() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
