use clap::Parser;
use cptrack::app::{self, App};
use cptrack::cli::{Args, Command};
use cptrack::config::Config;
use cptrack::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config before anything else so startup logs are never silently dropped
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config.log_level, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting cptrack"
    );

    let command = args.command.unwrap_or(Command::Serve);

    // Validation only needs the HTTP adapters
    if let Command::Validate { platform, handle } = &command {
        return app::validate_handle(&config, *platform, handle).await;
    }

    let app = match App::new(config, args.roster.as_deref()).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    app.run(command).await
}
