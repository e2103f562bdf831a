use compledger::domain::{CommissionRule, RateSpec, TimeMs};
use compledger::engine::{
    BalanceProjector, CommissionCalculator, Ledger, ReconciliationGuard, TopologyManager,
};
use compledger::orchestration::{Orchestrator, TracingListener};
use compledger::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));

    if let Err(e) = seed_commission_rules(&repo, &config).await {
        eprintln!("Failed to seed commission rules: {}", e);
        std::process::exit(1);
    }

    let ledger = Ledger::new(repo.clone());
    let topology = TopologyManager::new(repo.clone(), config.matrix_width, config.matrix_depth);
    let calculator = CommissionCalculator::new(
        repo.clone(),
        ledger.clone(),
        topology.clone(),
        config.commissionable_categories.clone(),
    );
    let orchestrator = Arc::new(
        Orchestrator::new(
            repo.clone(),
            ledger,
            topology.clone(),
            calculator,
            config.clone(),
        )
        .with_listener(Arc::new(TracingListener)),
    );
    let projector = Arc::new(BalanceProjector::new(repo.clone()));
    let guard = Arc::new(ReconciliationGuard::new(repo.clone()));

    if config.reconcile_interval_ms > 0 {
        spawn_reconcile_sweep(guard.clone(), config.reconcile_interval_ms);
    }

    // Create router
    let app = api::create_router(api::AppState {
        repo,
        config,
        orchestrator,
        topology: Arc::new(topology),
        projector,
        guard,
    });

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Install the configured rule set at the epoch, only when the table is
/// empty. An operator who has since written rule versions owns the table.
async fn seed_commission_rules(repo: &Repository, config: &Config) -> Result<(), sqlx::Error> {
    if repo.has_commission_rules().await? {
        return Ok(());
    }

    for seed in &config.commission_rule_seeds {
        repo.insert_commission_rule(&CommissionRule {
            effective_from_ms: TimeMs::new(0),
            level: seed.level,
            rate: RateSpec::Bps(seed.rate_bps),
            min_tier: seed.min_tier,
            require_active: true,
        })
        .await?;
    }

    tracing::info!(
        levels = config.commission_rule_seeds.len(),
        "Seeded commission rules"
    );
    Ok(())
}

fn spawn_reconcile_sweep(guard: Arc<ReconciliationGuard>, interval_ms: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms as u64));
        loop {
            interval.tick().await;
            if let Err(e) = guard.scan().await {
                tracing::error!(error = %e, "Reconciliation sweep failed");
            }
        }
    });
}
