//! Builds every component from [`Config`] and runs the server until
//! shutdown, using the same structured-concurrency pattern
//! [`caseloot_concurrency::task::try_join_static_tasks`] was written for:
//! a handful of long-lived tasks (HTTP server, queue workers, optional
//! long-poll runner) joined against a single shutdown signal.

use std::{sync::Arc, time::Duration};

use caseloot_admin::{AdminBanlistService, AdminWebhookService, EconomyService};
use caseloot_antifraud::{Banlist, VelocityConfig, VelocityScorer};
use caseloot_cases::{load_file, CasesRegistry, CasesSnapshot};
use caseloot_concurrency::{
    task::{try_join_static_tasks, CaseTask},
    NotifyOnce,
};
use caseloot_payments::{InvoiceService, PreCheckoutService, RefundService, SuccessService};
use caseloot_queue::UpdateQueue;
use caseloot_ratelimit::{RateLimitConfig, RateLimiter};
use caseloot_rng::RngService;
use caseloot_storage::{
    BucketParams, BucketStore, FileIpBanStore, FilePaymentStore, FileRngStore, InMemoryBucketStore,
    InMemoryIpBanStore, InMemoryPaymentStore, InMemoryRngStore, InMemoryVelocityStore, IpBanStore,
    PaymentStore, PostgresPaymentStore, PostgresRngStore, RngStore,
};
use caseloot_telegram::{HttpTelegramClient, IngestMode, LongPollRunner, ModeGuard, TelegramClient, WebhookIngest};
use tokio::sync::mpsc;

use crate::{
    config::{BotMode, Config, StorageBackend},
    dispatch::PaymentDispatcher,
    http::AppState,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        ip: BucketParams { capacity: 30.0, refill_per_sec: 1.0, ttl_sec: 3600, initial_tokens: 30.0 },
        subject: BucketParams { capacity: 20.0, refill_per_sec: 0.5, ttl_sec: 3600, initial_tokens: 20.0 },
        path: BucketParams { capacity: 200.0, refill_per_sec: 10.0, ttl_sec: 3600, initial_tokens: 200.0 },
        composite: BucketParams { capacity: 10.0, refill_per_sec: 0.2, ttl_sec: 3600, initial_tokens: 10.0 },
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let handle = caseloot_metrics::install_recorder();

    tokio::fs::create_dir_all(&config.data_dir).await.ok();

    let pg_pool = if config.rng_storage == StorageBackend::Db {
        let url = config.database_url.as_deref().expect("checked in Config::from_env");
        Some(sqlx::PgPool::connect(url).await?)
    } else {
        None
    };

    let rng_store: Arc<dyn RngStore> = match config.rng_storage {
        StorageBackend::Memory => Arc::new(InMemoryRngStore::new()),
        StorageBackend::File => Arc::new(FileRngStore::open(config.data_dir.join("rng")).await?),
        StorageBackend::Db => Arc::new(PostgresRngStore::new(pg_pool.clone().expect("db pool present"))),
    };
    let payment_store: Arc<dyn PaymentStore> = match config.rng_storage {
        StorageBackend::Memory => Arc::new(InMemoryPaymentStore::new()),
        StorageBackend::File => {
            Arc::new(FilePaymentStore::open(config.data_dir.join("payments.jsonl")).await?)
        }
        StorageBackend::Db => Arc::new(PostgresPaymentStore::new(pg_pool.clone().expect("db pool present"))),
    };
    let ip_ban_store: Arc<dyn IpBanStore> = match config.rng_storage {
        StorageBackend::Memory => Arc::new(InMemoryIpBanStore::new()),
        StorageBackend::File => Arc::new(FileIpBanStore::open(config.data_dir.join("ip_bans.json")).await?),
        // No relational IP ban backend exists today; fall back to the file
        // journal so a `db`-configured deployment still persists bans.
        StorageBackend::Db => Arc::new(FileIpBanStore::open(config.data_dir.join("ip_bans.json")).await?),
    };

    let bucket_store: Arc<dyn BucketStore> = Arc::new(InMemoryBucketStore::new());
    let velocity_store = Arc::new(InMemoryVelocityStore::new());

    let rate_limiter = Arc::new(RateLimiter::new(bucket_store, rate_limit_config()));
    let scorer = Arc::new(VelocityScorer::new(velocity_store, VelocityConfig::default()));
    let banlist = Arc::new(Banlist::new(ip_ban_store));
    let rng = Arc::new(RngService::new(rng_store));

    let cases_root = load_file(&config.cases_path).await?;
    let cases = Arc::new(CasesRegistry::new(CasesSnapshot::from_root(cases_root)));

    let telegram_client: Arc<dyn TelegramClient> = Arc::new(HttpTelegramClient::new(config.bot_token.clone()));

    let invoices = Arc::new(InvoiceService::new(
        Arc::clone(&telegram_client),
        Arc::clone(&cases),
        Arc::clone(&scorer),
        config.fairness_key.clone(),
    ));
    let precheckout = Arc::new(PreCheckoutService::new(
        Arc::clone(&telegram_client),
        Arc::clone(&cases),
        Arc::clone(&scorer),
        config.fairness_key.clone(),
    ));
    let refunds = Arc::new(RefundService::new(Arc::clone(&telegram_client), Arc::clone(&payment_store)));
    let success = Arc::new(SuccessService::new(
        Arc::clone(&telegram_client),
        Arc::clone(&payment_store),
        Arc::clone(&cases),
        Arc::clone(&rng),
        Arc::clone(&refunds),
        Arc::clone(&scorer),
        config.fairness_key.clone(),
    ));

    let queue = Arc::new(UpdateQueue::new(config.queue_capacity));
    let dispatcher = Arc::new(PaymentDispatcher::new(Arc::clone(&precheckout), Arc::clone(&success)));
    let queue_workers = queue.start(dispatcher, config.queue_workers);

    let mode_guard = Arc::new(ModeGuard::new());
    let webhook_ingest = Arc::new(WebhookIngest::new(
        config.webhook_secret_token.clone(),
        Arc::clone(&rate_limiter),
        Arc::clone(&scorer),
        Arc::clone(&banlist),
        Arc::clone(&queue),
    ));

    let admin_webhooks = config.admin_token.as_ref().map(|_| {
        Arc::new(AdminWebhookService::new(
            Arc::clone(&telegram_client),
            config.webhook_secret_token.clone(),
            config.public_base_url.clone(),
            config.webhook_path.clone(),
        ))
    });
    let admin_economy = config
        .admin_token
        .as_ref()
        .map(|_| Arc::new(EconomyService::new(Arc::clone(&cases), config.cases_path.clone())));
    let admin_banlist = config
        .admin_token
        .as_ref()
        .map(|_| Arc::new(AdminBanlistService::new(Arc::clone(&banlist))));

    let mut static_tasks = Vec::new();

    let long_poll_runner = match config.bot_mode {
        BotMode::Webhook => {
            mode_guard.claim_webhook().map_err(anyhow::Error::from)?;
            None
        }
        BotMode::LongPolling => {
            mode_guard.claim_long_polling().map_err(anyhow::Error::from)?;
            let runner = Arc::new(LongPollRunner::new(Arc::clone(&telegram_client), Arc::clone(&webhook_ingest)));
            let runner_clone = Arc::clone(&runner);
            static_tasks.push(CaseTask::spawn("long-poll-runner", async move {
                runner_clone.run(|| chrono::Utc::now().timestamp_millis()).await;
            }));
            Some(runner)
        }
    };

    let state = AppState {
        metrics_handle: handle,
        health_path: config.health_path.clone(),
        metrics_path: config.metrics_path.clone(),
        admin_token: config.admin_token.clone(),
        bot_token: config.bot_token.clone(),
        cases: Arc::clone(&cases),
        invoices,
        webhook_ingest,
        admin_webhooks,
        admin_economy,
        admin_banlist,
        mode_guard: Arc::clone(&mode_guard),
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let shutdown = NotifyOnce::new();
    let server_shutdown = shutdown.clone();
    let router = crate::http::build_router(state);
    let server_task = CaseTask::spawn("http-server", crate::http::serve(addr, router, server_shutdown));
    static_tasks.push(server_task);

    let (_eph_tx, eph_rx) = mpsc::channel(16);

    let ctrlc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        ctrlc_shutdown.send();
    });

    let result = try_join_static_tasks(static_tasks, eph_rx, shutdown, SHUTDOWN_TIMEOUT).await;

    if let Some(runner) = &long_poll_runner {
        runner.stop_handle().store(true, std::sync::atomic::Ordering::SeqCst);
    }
    queue.close_and_join(queue_workers, SHUTDOWN_TIMEOUT).await.ok();

    result.map_err(anyhow::Error::from)
}
