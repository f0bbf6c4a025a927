use std::sync::Arc;

use clap::Parser;

use gemini_relay::config::{RelayConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT_SECS};
use gemini_relay::daemon::{self, AppState};
use gemini_relay::error::Result;
use gemini_relay::relay::GeminiRelay;
use gemini_relay::transcript::TranscriptStore;

#[derive(Parser, Debug)]
#[command(name = "gemini-relayd")]
#[command(about = "Gemini chat relay daemon")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Directory for per-user transcript files.
    #[arg(long, default_value_t = gemini_relay::runtime_paths::default_transcript_dir())]
    data_dir: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Hard deadline for one generation round trip, in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    gemini_relay::logging::init_tracing("gemini_relayd");
    let cli = Cli::parse();

    let config = RelayConfig {
        api_key: cli.api_key,
        model: cli.model,
        base_url: cli.base_url,
        request_timeout_secs: cli.request_timeout_secs,
    };
    let state = AppState {
        relay: Arc::new(GeminiRelay::new(config)),
        store: Arc::new(TranscriptStore::new(&cli.data_dir)?),
    };

    daemon::run(&cli.host, cli.port, state).await
}
