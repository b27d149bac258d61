//! SWARM: sentiment-driven agent spawner.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the sentiment source, analysis backend and venue together, and
//! runs the single event loop that drives spawn ticks and health checks
//! with graceful shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use swarm::analysis::AnalysisEngine;
use swarm::config::AppConfig;
use swarm::dashboard::{self, routes::DashboardState};
use swarm::engine::audit::AuditLog;
use swarm::engine::health::{HealthConfig, HealthSupervisor};
use swarm::engine::spawner::{SpawnOutcome, Spawner, SpawnerConfig, TickReport};
use swarm::engine::SwarmSnapshot;
use swarm::execution::paper::PaperVenue;
use swarm::execution::rpc::RpcProbe;
use swarm::execution::service::ExecutionService;
use swarm::llm::anthropic::AnthropicClient;
use swarm::llm::openrouter::OpenRouterClient;
use swarm::llm::LlmBackend;
use swarm::sentiment::fallback::FallbackCorpus;
use swarm::sentiment::twitter::TwitterSource;
use swarm::sentiment::SentimentSource;
use swarm::strategy::judge::Judge;

const BANNER: &str = r#"
 ____  _    _    _    ____  __  __
/ ___|| |  | |  / \  |  _ \|  \/  |
\___ \| |/\| | / _ \ | |_) | |\/| |
 ___) |  /\  |/ ___ \|  _ <| |  | |
|____/|_/  \_/_/   \_\_| \_\_|  |_|

  Sentiment-Weighted Agent Replication Manager
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        tokens = ?cfg.agent.tokens,
        monitoring_interval_secs = cfg.agent.monitoring_interval_secs,
        health_check_interval_secs = cfg.health.check_interval_secs,
        max_agents_per_token = cfg.agent.max_agents_per_token,
        "SWARM starting up"
    );

    // -- Initialise components -------------------------------------------

    let source = build_source(&cfg)?;
    let llm = build_llm(&cfg)?;

    if let Some(url) = &cfg.chain.rpc_url {
        let probe = RpcProbe::new(url.clone())?;
        let chain_id = probe.verify().await?;
        info!(chain_id, rpc = %url, "RPC endpoint reachable");
        match probe.get_balance(&cfg.chain.treasury_address).await {
            Ok(bal) => info!(
                treasury = %cfg.chain.treasury_address,
                balance = %bal,
                symbol = %cfg.chain.base_symbol,
                "Treasury balance on chain"
            ),
            Err(e) => warn!(error = %e, "Treasury balance read failed"),
        }
    }

    if !cfg.paper.enabled {
        anyhow::bail!("No live swap venue is available; set [paper] enabled = true");
    }
    let venue = Arc::new(PaperVenue::from_config(&cfg.chain, &cfg.paper));
    info!(
        wallet = %cfg.chain.wallet_address,
        balance = %cfg.paper.wallet_balance,
        pools = cfg.paper.prices.len(),
        "Paper venue seeded"
    );

    for symbol in &cfg.agent.tokens {
        if !cfg.chain.tokens.keys().any(|t| t.eq_ignore_ascii_case(symbol)) {
            warn!(symbol = %symbol, "Monitored token has no venue address; it will never spawn");
        }
    }

    let execution = ExecutionService::new(venue, &cfg.chain, &cfg.agent);
    let audit = AuditLog::new(cfg.audit.path.as_ref().map(PathBuf::from))
        .with_retention(cfg.audit.retain_records);
    let health = HealthSupervisor::new(HealthConfig::from(&cfg.health), audit);

    let mut spawner = Spawner::new(
        SpawnerConfig {
            name: cfg.agent.name.clone(),
            tokens: cfg.agent.tokens.clone(),
            max_agents_per_token: cfg.agent.max_agents_per_token,
        },
        source,
        AnalysisEngine::new(llm),
        Judge::new(cfg.judge.clone().into()),
        execution,
        health,
    );

    let dash = Arc::new(DashboardState::new(SwarmSnapshot::default()));
    publish(&dash, &spawner).await;
    if cfg.dashboard.enabled {
        dashboard::spawn_dashboard(dash.clone(), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let mut spawn_tick = tokio::time::interval(Duration::from_secs(cfg.agent.monitoring_interval_secs));
    let health_fallback = HealthConfig::from(&cfg.health).interval();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        let now = Utc::now();
        let next_health = spawner.next_health_due().unwrap_or(now + health_fallback);
        let health_wait = (next_health - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = spawn_tick.tick() => {
                let report = spawner.check_and_spawn_agents(Utc::now()).await;
                log_tick_report(&report);
                publish(&dash, &spawner).await;
            }
            _ = tokio::time::sleep(health_wait) => {
                let killed = spawner.run_health_checks(Utc::now()).await;
                if !killed.is_empty() {
                    info!(
                        killed = killed.len(),
                        remaining = spawner.registry().len(),
                        "Health sweep terminated agents"
                    );
                }
                publish(&dash, &spawner).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let ledger = spawner.execution().ledger();
    info!(
        active_agents = spawner.registry().len(),
        trades = ledger.trade_count(),
        positions = ledger.positions().len(),
        terminated = spawner.health().audit().total(),
        "SWARM shut down cleanly."
    );
    if !spawner.registry().is_empty() {
        warn!(
            active_agents = spawner.registry().len(),
            "Agents left running; their funds stay in their sub-accounts"
        );
    }

    Ok(())
}

/// Live feed when a bearer token is available, fixed corpus otherwise.
fn build_source(cfg: &AppConfig) -> Result<Arc<dyn SentimentSource>> {
    let bearer = cfg
        .sentiment
        .bearer_token_env
        .as_deref()
        .and_then(AppConfig::resolve_secret);

    match (cfg.sentiment.source.as_str(), bearer) {
        ("twitter", Some(token)) => {
            info!(max_posts = cfg.sentiment.max_posts, "Using Twitter sentiment source");
            Ok(Arc::new(TwitterSource::new(token, cfg.sentiment.max_posts)?))
        }
        ("twitter", None) => {
            warn!("No Twitter bearer token configured, using fallback corpus");
            Ok(Arc::new(FallbackCorpus::new()))
        }
        _ => {
            info!("Using fallback sentiment corpus");
            Ok(Arc::new(FallbackCorpus::new()))
        }
    }
}

fn build_llm(cfg: &AppConfig) -> Result<Arc<dyn LlmBackend>> {
    let key = AppConfig::resolve_secret(&cfg.llm.api_key_env)
        .with_context(|| format!("LLM API key missing: set {}", cfg.llm.api_key_env))?;

    let llm: Arc<dyn LlmBackend> = match cfg.llm.provider.as_str() {
        "anthropic" => {
            info!(model = %cfg.llm.model, "Using Anthropic LLM provider");
            Arc::new(AnthropicClient::new(
                key,
                Some(cfg.llm.model.clone()),
                Some(cfg.llm.max_tokens),
            )?)
        }
        other => {
            if other != "openrouter" {
                warn!(provider = other, "Unknown LLM provider, defaulting to OpenRouter");
            }
            info!(
                model = %cfg.llm.model,
                fallback = ?cfg.llm.fallback_model,
                "Using OpenRouter LLM provider"
            );
            Arc::new(OpenRouterClient::new(
                key,
                Some(cfg.llm.model.clone()),
                cfg.llm.fallback_model.clone(),
                Some(cfg.llm.max_tokens),
            )?)
        }
    };
    Ok(llm)
}

/// Copy the spawner's state into the dashboard.
async fn publish(dash: &DashboardState, spawner: &Spawner) {
    let balance = spawner.balance_view().await;
    dash.publish(spawner.snapshot(), balance).await;
}

fn log_tick_report(report: &TickReport) {
    let rejected = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, SpawnOutcome::Rejected { .. }))
        .count();
    let skipped = report
        .outcomes
        .iter()
        .filter(|(_, o)| matches!(o, SpawnOutcome::Skipped { .. }))
        .count();
    info!(
        spawned = report.spawned(),
        rejected,
        skipped,
        "Tick summary"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swarm=info"));

    if std::env::var("SWARM_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
