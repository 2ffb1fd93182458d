// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use haukka::analysis::SemgrepEngine;
use haukka::broadcast::JobRegistry;
use haukka::bulk::BulkAnalysisOrchestrator;
use haukka::config::{AppConfig, RulesConfig};
use haukka::discovery::WpDirectorySource;
use haukka::runner::ScanRunner;
use haukka::scoring::HeuristicScorer;
use haukka::server::{self, AppState};
use haukka::store::SessionStore;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    print!("\x1b[92m");
    println!("    __  __            __   __");
    println!("   / / / /___ ___  __/ /__/ /______ _");
    println!("  / /_/ / __ `/ / / / //_/ //_/ __ `/");
    print!("\x1b[91m");
    println!(" / __  / /_/ / /_/ / ,< / ,< / /_/ /");
    println!("/_/ /_/\\__,_/\\__,_/_/|_/_/|_|\\__,_/");
    print!("\x1b[0m");
    println!();
    print!("\x1b[1m\x1b[97m");
    println!("   WordPress Plugin Recon & Scan Engine");
    print!("\x1b[0m\x1b[92m");
    println!("          v1.2 - (c) 2026 Bountyy Oy");
    print!("\x1b[0m");
    println!();

    info!("Haukka v1.2.0 - Starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("haukka-worker")
        .enable_all()
        .build()?;

    info!(
        "[SUCCESS] Tokio runtime initialized with {} worker threads",
        num_cpus::get()
    );

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    let store = Arc::new(
        SessionStore::open(config.state_path.clone())
            .await
            .context("failed to open session store")?,
    );
    let rules = Arc::new(
        RulesConfig::load(config.rules_path.clone())
            .context("failed to load rules configuration")?,
    );
    let registry = Arc::new(JobRegistry::new());

    if !SemgrepEngine::check_available().await {
        warn!("semgrep binary not found in PATH; bulk analysis runs will fail per item");
    }

    let runner = Arc::new(ScanRunner::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::new(WpDirectorySource::new()),
        Arc::new(HeuristicScorer),
        config.page_retries,
    ));
    let bulk = Arc::new(BulkAnalysisOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::new(SemgrepEngine::new(
            Arc::clone(&rules),
            config.work_dir.clone(),
        )),
        Arc::clone(&rules),
        config.bulk_concurrency,
        Duration::from_secs(config.item_timeout_secs),
    ));

    let state = AppState {
        store,
        registry,
        runner,
        bulk,
        rules,
    };

    server::serve(state, &config.server_host, config.server_port).await
}
