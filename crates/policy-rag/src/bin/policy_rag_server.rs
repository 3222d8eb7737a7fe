use anyhow::Result;
use clap::Parser;
use policy_rag::config::{load_dotenv, Settings};
use policy_rag::logging;
use policy_rag::server::startup::start_server;

#[derive(Parser)]
#[command(name = "policy_rag_server", version, about = "Policy clause search REST server")]
struct Cli {
  #[command(flatten)]
  settings: Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
  let env_file = load_dotenv();
  let cli = Cli::parse();
  cli.settings.validate()?;
  logging::init(&cli.settings.logging)?;

  if let Some(path) = env_file {
    tracing::debug!(path = %path.display(), "Loaded environment file");
  }
  tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting policy RAG server");
  start_server(cli.settings).await
}
