mod cli;
mod config;
mod engine;
mod host;
mod locale;
mod printer;

use std::path::Path;

use anyhow::{Context, Result};
use config::Config;
use engine::pwsh::{compose_script, PwshEngine};
use host::HostController;
use locale::Locale;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = cli::Cli::parse();
    let cfg = Config::load();
    init_logging(&cfg);
    tracing::debug!(config = %cfg.config_path.display(), "configuration loaded");

    if args.print_script {
        let status = match print_script() {
            Ok(()) => 0,
            Err(e) => {
                printer::print_error(&e);
                1
            }
        };
        std::process::exit(status);
    }

    // CLI overrides config
    let program = args.engine.clone().unwrap_or_else(|| cfg.engine());
    let engine = PwshEngine::new(&program);
    let controller = HostController::new();

    let mut stdout = tokio::io::stdout();
    let result = controller
        .run(&engine, &mut stdout)
        .await
        .with_context(|| format!("running pipeline with {}", engine.program()));
    if let Err(e) = &result {
        printer::print_error(e);
    }
    if let Some(code) = controller.exit_state().requested_code() {
        tracing::info!(code, "engine requested exit");
    }

    if cfg.wait_for_key() && !args.no_wait {
        if let Err(e) = printer::wait_for_key(printer::EXIT_PROMPT) {
            tracing::warn!("key wait failed: {e:#}");
        }
    }

    std::process::exit(controller.exit_status(&result));
}

fn init_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_script() -> Result<()> {
    let pipeline = HostController::pipeline()?;
    let locale = Locale::resolve(host::LOCALE_ID);
    // The real failure file lives in the session's scratch directory.
    print!("{}", compose_script(&locale, &pipeline, Path::new("failure.txt")));
    Ok(())
}
