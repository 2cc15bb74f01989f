use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use roomfinder::config::{load_enrollments_file, load_rooms_file, AppConfig};
use roomfinder::coord::{LockService, MemoryCoordinator, RedisCoordinator, TaskMarkers, WarmCache};
use roomfinder::crawler::{
    CookieServerTokenSource, CrawlerConfig, HttpRoomCrawler, ProxyPool, RoomCrawler,
    ScheduleClient, SessionTokenSource,
};
use roomfinder::db::CampusDb;
use roomfinder::pipeline::Reindexer;
use roomfinder::resolver::AvailabilityResolver;
use roomfinder::scheduler::{SchedulePlan, Scheduler};
use roomfinder::server::create_router;
use roomfinder::types::AppState;
use roomfinder::warmer::{CacheWarmer, WarmQueue};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the maintenance scheduler
    Serve,
    /// Rebuild the index for the configured term once
    Reindex,
    /// Delete index documents belonging to any other term
    ClearTerm,
    /// Warm the free-room cache for one week of the configured term
    Warm {
        #[arg(long)]
        week: u8,
        /// Defaults to ROOMFINDER_WARM_STUDENT_ID
        #[arg(long)]
        student_id: Option<String>,
    },
    /// Add the rooms in a JSON array file to the catalog
    SeedRooms { file: PathBuf },
    /// Load a JSON array of enrollment rows into the roster that reindex reads
    SeedEnrollments { file: PathBuf },
}

/// Everything the subcommands share.
struct Components {
    config: AppConfig,
    db: Arc<CampusDb>,
    locks: Arc<dyn LockService>,
    markers: Arc<dyn TaskMarkers>,
    cache: Arc<dyn WarmCache>,
    crawler: Arc<dyn RoomCrawler>,
    tokens: Arc<dyn SessionTokenSource>,
    proxies: Option<Arc<ProxyPool>>,
}

impl Components {
    async fn build(config: AppConfig) -> Result<Self> {
        let db = Arc::new(
            CampusDb::open(&config.db_path)
                .with_context(|| format!("opening database {}", config.db_path))?,
        );

        let (locks, markers, cache): (Arc<dyn LockService>, Arc<dyn TaskMarkers>, Arc<dyn WarmCache>) =
            match config.redis_url.as_deref() {
                Some(url) => {
                    let redis = Arc::new(
                        RedisCoordinator::connect(url, Duration::from_secs(5))
                            .await
                            .context("connecting to Redis")?,
                    );
                    (redis.clone(), redis.clone(), redis)
                }
                None => {
                    warn!("ROOMFINDER_REDIS_URL not set, locks and warm cache are process-local");
                    let memory = Arc::new(MemoryCoordinator::new());
                    (memory.clone(), memory.clone(), memory)
                }
            };

        let proxies = match config.proxy_list_url.as_ref() {
            Some(url) => Some(
                ProxyPool::init(url.as_str(), config.request_timeout)
                    .await
                    .context("loading proxy list")?,
            ),
            None => None,
        };

        let mut crawler = HttpRoomCrawler::new(CrawlerConfig::new(
            config.room_query_url.as_str(),
            config.request_timeout,
        ))?;
        if let Some(pool) = proxies.as_ref() {
            crawler = crawler.with_proxies(Arc::clone(pool));
        }

        let tokens = CookieServerTokenSource::new(config.cookie_server.as_str(), config.request_timeout)?;

        Ok(Self {
            config,
            db,
            locks,
            markers,
            cache,
            crawler: Arc::new(crawler),
            tokens: Arc::new(tokens),
            proxies,
        })
    }

    fn reindexer(&self) -> Reindexer {
        Reindexer::new(
            self.db.clone(),
            self.db.clone(),
            self.locks.clone(),
            self.markers.clone(),
            self.config.reindex_config(),
        )
    }

    fn warmer(&self) -> CacheWarmer {
        CacheWarmer::new(
            self.crawler.clone(),
            self.tokens.clone(),
            self.locks.clone(),
            self.cache.clone(),
            self.config.warmer_config(),
        )
    }

    async fn shutdown(&self) {
        if let Some(pool) = self.proxies.as_ref() {
            pool.shutdown().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;
    let components = Components::build(config).await?;
    let result = run(&args.command, &components).await;
    components.shutdown().await;
    result
}

async fn run(command: &Command, c: &Components) -> Result<()> {
    let year = c.config.year.as_str();
    let semester = c.config.semester.as_str();

    match command {
        Command::Serve => serve(c).await,
        Command::Reindex => {
            let report = c.reindexer().reindex(year, semester).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::ClearTerm => {
            let deleted = c.reindexer().clear_other_terms(year, semester).await?;
            println!("Deleted {deleted} documents from other terms");
            Ok(())
        }
        Command::Warm { week, student_id } => {
            let student_id = student_id
                .clone()
                .or_else(|| c.config.warm_student_id.clone())
                .context("no student id: pass --student-id or set ROOMFINDER_WARM_STUDENT_ID")?;
            let report = c.warmer().warm_week(year, semester, *week, &student_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::SeedRooms { file } => {
            let added = c.db.register_rooms(load_rooms_file(file)?)?;
            println!("Added {added} rooms to the catalog");
            Ok(())
        }
        Command::SeedEnrollments { file } => {
            let loaded = c.db.insert_enrollments(&load_enrollments_file(file)?)?;
            println!("Loaded {loaded} enrollment rows");
            Ok(())
        }
    }
}

async fn serve(c: &Components) -> Result<()> {
    if let Some(path) = c.config.rooms_file.as_ref() {
        let added = c.db.register_rooms(load_rooms_file(path)?)?;
        info!(added, "Seeded room catalog from {}", path.display());
    }
    if let Some(path) = c.config.enrollments_file.as_ref() {
        let loaded = c.db.insert_enrollments(&load_enrollments_file(path)?)?;
        info!(loaded, "Loaded enrollment roster from {}", path.display());
    }
    if let Some(pool) = c.proxies.as_ref() {
        pool.spawn_refresher(Duration::from_secs(10 * 60));
    }

    let warm_queue = Arc::new(WarmQueue::start(Arc::new(c.warmer()), None));
    let resolver = AvailabilityResolver::new(
        c.cache.clone(),
        c.crawler.clone(),
        c.tokens.clone(),
        c.db.clone(),
        c.config.resolver_config(),
    )
    .with_warm_queue(warm_queue.clone());

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(c.reindexer()),
        Some(warm_queue.clone()),
        SchedulePlan {
            year: c.config.year.clone(),
            semester: c.config.semester.clone(),
            term_start: c.config.term_start,
            warm_student_id: c.config.warm_student_id.clone(),
        },
    ));
    scheduler.spawn(c.config.reindex_interval);

    let schedules = ScheduleClient::new(
        c.config.undergrad_schedule_url.as_str(),
        c.config.grad_schedule_url.as_str(),
        c.config.request_timeout,
    )?;
    let state = Arc::new(AppState {
        resolver,
        index: c.db.clone(),
        tokens: c.tokens.clone(),
        schedules: Arc::new(schedules),
        warm_queue: Some(warm_queue.clone()),
        started_at: Instant::now(),
    });

    let address = format!("0.0.0.0:{}", c.config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    scheduler.shutdown().await;
    warm_queue.shutdown_and_drain().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
