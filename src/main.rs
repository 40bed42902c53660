use clap::Parser;
use copilot::cli::{run, Cli};
use copilot::config::{AppConfig, LoggingConfig};
use copilot::error::{CopilotError, Result};
use copilot::schema::SchemaRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {e}");
        }
        return Err(CopilotError::Validation(errors.join("; ")));
    }

    let registry = SchemaRegistry::from_schemas(
        config.engine.registry_options(),
        copilot::schema::builtin_schemas(),
    )?;
    for dir in &config.schemas.dirs {
        registry.load_dir(dir)?;
    }
    info!(types = ?registry.get_types(), "schema registry ready");

    let ok = run(&cli, &registry, &config.context.to_context())?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,copilot={}", logging.level.to_ascii_lowercase()))
    });

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so preflight writability.
    let file_layer = logging.dir.as_ref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            return None;
        }
        let test_path = log_dir.join(".copilot_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "copilot.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // flushes on drop; keep it for the life of the process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir.display(),
                    e
                );
                None
            }
        }
    });

    // Console goes to stderr so command output on stdout stays parseable
    let console_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}
