use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use poem::{Route, Server, listener::TcpListener};
use poem_openapi::OpenApiService;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cadence::application::services::crypto::CredentialCipher;
use cadence::application::services::resilience::ResilienceExecutor;
use cadence::application::usecases::{
    archive_sequence_replies::ArchiveSequenceReplies,
    record_events::RecordSequenceEvents,
    run_delivery_pass::{PassRequest, PassSettings, RunDeliveryPass},
    sequence_status::GetSequenceStatus,
};
use cadence::application::worker::{DeliveryWorker, FallbackIngest, WorkerConfig};
use cadence::config::Config;
use cadence::infrastructure::events::file_drop::FileDropScanner;
use cadence::infrastructure::mail::smtp::SmtpMailTransport;
use cadence::infrastructure::repositories::postgres::{
    PostgresContactRepository, PostgresDeliveryLogRepository, PostgresEnrollmentRepository,
    PostgresSenderRepository, PostgresSequenceRepository,
};
use cadence::presentation::http::endpoints::{
    events::EventsEndpoints,
    root::{ApiState, Endpoints},
    sequences::SequencesEndpoints,
    worker::WorkerEndpoints,
};

#[derive(Parser)]
#[command(name = "cadence", about = "Sequence delivery engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API together with the background delivery worker.
    Serve,
    /// Run the delivery worker without the HTTP API.
    Worker {
        /// Rows selected per pass.
        #[arg(long)]
        limit: Option<u32>,
        /// Restrict passes to one team.
        #[arg(long)]
        team: Option<Uuid>,
        /// Run a single pass and exit.
        #[arg(long)]
        once: bool,
    },
}

struct Engine {
    pass: Arc<RunDeliveryPass>,
    events: Arc<RecordSequenceEvents>,
    status: Arc<GetSequenceStatus>,
    archive: Arc<ArchiveSequenceReplies>,
    scanner: Option<Arc<FileDropScanner>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::try_parse().map_err(anyhow::Error::msg)?;

    // A bad credentials key or unreachable storage is fatal at startup.
    let cipher = Arc::new(
        CredentialCipher::from_base64(&config.credentials_key)
            .context("CREDENTIALS_KEY is not a valid base64 AES-256 key")?,
    );
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let engine = build_engine(&config, cipher, pool);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, engine).await,
        Command::Worker { limit, team, once } => run_worker(config, engine, limit, team, once).await,
    }
}

fn build_engine(config: &Config, cipher: Arc<CredentialCipher>, pool: sqlx::PgPool) -> Engine {
    let sequences = PostgresSequenceRepository::new(pool.clone());
    let contacts = PostgresContactRepository::new(pool.clone());
    let senders = PostgresSenderRepository::new(pool.clone());
    let enrollments = PostgresEnrollmentRepository::new(pool.clone());
    let logs = PostgresDeliveryLogRepository::new(pool);

    let transport = SmtpMailTransport::new(Duration::from_secs(30));
    let resilience = Arc::new(ResilienceExecutor::new());

    let settings = PassSettings {
        batch_limit: config.worker_batch_limit,
        max_attempts: config.max_attempts,
        retry_cooldown: config.retry_cooldown,
        breaker_threshold: config.breaker_threshold,
        breaker_reset: config.breaker_reset,
        fallback_timezone: config.fallback_timezone.clone(),
        ..PassSettings::default()
    };

    let pass = Arc::new(RunDeliveryPass::new(
        sequences.clone(),
        contacts,
        senders,
        enrollments.clone(),
        logs.clone(),
        transport,
        resilience,
        cipher,
        settings,
    ));
    let events = Arc::new(RecordSequenceEvents::new(enrollments.clone(), logs.clone()));
    let status = Arc::new(GetSequenceStatus::new(sequences, enrollments, logs.clone()));
    let archive = Arc::new(ArchiveSequenceReplies::new(logs));

    let scanner = config
        .event_drop_dir
        .clone()
        .map(|dir| FileDropScanner::new(dir, events.clone()));

    Engine {
        pass,
        events,
        status,
        archive,
        scanner,
    }
}

async fn serve(config: Config, engine: Engine) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = DeliveryWorker::new(
        engine.pass.clone(),
        engine
            .scanner
            .clone()
            .map(|scanner| scanner as Arc<dyn FallbackIngest>),
        WorkerConfig {
            batch_limit: config.worker_batch_limit,
            active_delay: config.worker_active_delay,
            idle_delay: config.worker_idle_delay,
            ..WorkerConfig::default()
        },
        shutdown_rx,
    );
    let worker_handle = tokio::spawn(worker.run());

    let state = Arc::new(ApiState {
        run_pass_usecase: engine.pass,
        record_events_usecase: engine.events,
        sequence_status_usecase: engine.status,
        archive_replies_usecase: engine.archive,
        api_secret: config.api_secret.clone(),
    });

    let server_url = format!("{}://{}:{}", config.scheme, config.host, config.port);
    info!(%server_url, "starting server");

    let api_service = OpenApiService::new(
        (
            Endpoints,
            WorkerEndpoints::new(state.clone()),
            EventsEndpoints::new(state.clone()),
            SequencesEndpoints::new(state),
        ),
        "Cadence API",
        "0.1.0",
    )
    .server(format!("{server_url}/api"));
    let ui = api_service.swagger_ui();
    let app = Route::new().nest("/api", api_service).nest("/", ui);

    Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            },
            Some(Duration::from_secs(10)),
        )
        .await?;

    // The worker finishes its in-flight pass before stopping.
    let _ = shutdown_tx.send(true);
    worker_handle.await?;
    Ok(())
}

async fn run_worker(
    config: Config,
    engine: Engine,
    limit: Option<u32>,
    team: Option<Uuid>,
    once: bool,
) -> anyhow::Result<()> {
    if once {
        if let Some(scanner) = &engine.scanner {
            let ingested = scanner.ingest().await?;
            info!(ingested, "fallback events ingested");
        }
        let report = engine
            .pass
            .execute(PassRequest {
                limit,
                team_id: team,
                manual: false,
            })
            .await?;
        info!(
            scanned = report.scanned,
            sent = report.sent,
            failed = report.failed,
            retried = report.retried,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "pass complete"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = DeliveryWorker::new(
        engine.pass,
        engine
            .scanner
            .map(|scanner| scanner as Arc<dyn FallbackIngest>),
        WorkerConfig {
            batch_limit: limit.unwrap_or(config.worker_batch_limit),
            team_id: team,
            active_delay: config.worker_active_delay,
            idle_delay: config.worker_idle_delay,
            ..WorkerConfig::default()
        },
        shutdown_rx,
    );
    let handle = tokio::spawn(worker.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
