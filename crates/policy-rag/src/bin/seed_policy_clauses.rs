use clap::Parser;
use policy_rag::config::load_dotenv;
use policy_rag::logging;
use policy_rag::seeding::{self, SeedArgs};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
  let env_file = load_dotenv();
  let args = SeedArgs::parse();
  if let Err(e) = logging::init(&args.logging) {
    eprintln!("{e}");
    return ExitCode::FAILURE;
  }
  if let Some(path) = env_file {
    tracing::debug!(path = %path.display(), "Loaded environment file");
  }

  match seeding::run(&args).await {
    Ok(report) => {
      tracing::info!(seeded = report.seeded, total = report.total, "Vector store initialized");
      ExitCode::SUCCESS
    }
    Err(e) => {
      tracing::error!(error = %format!("{e:#}"), "Failed to seed policy clauses");
      ExitCode::FAILURE
    }
  }
}
