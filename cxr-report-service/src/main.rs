use anyhow::Context as _;
use clap::{Parser, Subcommand};
use cxr_report_service::{
    Config, build_driver, create_app, export::MarkdownExporter, records::ManifestRecordSource,
    terminal::Terminal,
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cxr-report-service", about = "Chest X-ray report drafting service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Process the records interactively in the terminal
    Chat,
}

/// Initialize structured tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "cxr_report_service=debug,cxr_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Chat => chat(&config).await,
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let app = create_app(config)?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    let addr = listener.local_addr()?;

    info!(records = %config.records_path.display(), "CXR Report Service starting on {}", addr);
    info!("API Documentation available at http://{}/", addr);
    info!("Workflow endpoint: http://{}/workflow", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat(config: &Config) -> anyhow::Result<()> {
    let records = ManifestRecordSource::new(&config.records_path, config.patient_filter);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());

    let terminal = Terminal::new(
        build_driver(config),
        &records,
        MarkdownExporter::new()?,
        stdin,
        std::io::stdout(),
    );
    terminal.run().await?;
    Ok(())
}
