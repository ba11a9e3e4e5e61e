use anyhow::Result;
use clap::{Parser, Subcommand};
use faceattend::config::Config;
use faceattend::engine::{OnnxExtractor, RecognitionEngine};
use faceattend::{api, db, export, scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "faceattend")]
#[command(about = "Face recognition attendance server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "configs/faceattend.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the background session sweep
    Serve,
    /// Create the database and schema, then exit
    InitDb,
    /// Export a session's attendance sheet as CSV
    Export {
        #[arg(short, long)]
        session_id: i64,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config)?;
    let db_path = config.storage.resolve_database_path()?;

    match cli.command {
        Commands::Serve => {
            let pool = db::connect(&db_path).await?;

            let extractor = OnnxExtractor::new(&config.models)?;
            let engine = Arc::new(RecognitionEngine::new(
                Box::new(extractor),
                config.recognition.clone(),
                config.quality.clone(),
                config.enrollment.clone(),
            ));

            tokio::spawn(scheduler::run(pool.clone(), config.session.clone()));

            let state = api::AppState::new(pool, engine, config.session.clone());
            let app = api::build_router(state);

            let addr = format!("{}:{}", config.server.bind, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("faceattend listening on http://{}", addr);

            axum::serve(listener, app).await?;
        }
        Commands::InitDb => {
            db::connect(&db_path).await?;
            println!("Database ready at {}", db_path.display());
        }
        Commands::Export { session_id, output } => {
            let pool = db::connect(&db_path).await?;

            let rows = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)?;
                    let rows = export::write_session_csv(&pool, session_id, file).await?;
                    println!("Wrote {} rows to {}", rows, path.display());
                    rows
                }
                None => export::write_session_csv(&pool, session_id, std::io::stdout()).await?,
            };

            if rows == 0 {
                eprintln!("Session {} has no attendance records", session_id);
            }
        }
    }

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
