use crate::config::{ClientConfig, TendrilConfig};
use crate::error::{CrawlError, Result};
use crate::expand::{GraphExpander, LevelCallback};
use crate::model::CrawlSnapshot;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tendril_api::{ApiClient, ErrorPolicy};
use tracing::info;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub config: TendrilConfig,
    pub show_progress_bars: bool,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// One client per configured account, all sharing the same error table.
pub fn build_clients(config: &ClientConfig) -> Result<Vec<Arc<ApiClient>>> {
    if config.accounts.is_empty() {
        return Err(CrawlError::NoAccounts);
    }

    let policy: Arc<ErrorPolicy> = Arc::new(config.api.load_policy()?);
    let client_options = config.api.client_options();

    config
        .accounts
        .iter()
        .map(|account| {
            ApiClient::new(account.clone(), policy.clone(), client_options.clone())
                .map(Arc::new)
                .map_err(CrawlError::from)
        })
        .collect()
}

/// Resolve the configured seeds and expand them.
/// Returns the finished snapshot; nothing is written to disk here.
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CrawlSnapshot> {
    let CrawlOptions {
        config,
        show_progress_bars,
    } = options;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Resolving seeds...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let clients = build_clients(&config.client_config())?;
    let mut expander = GraphExpander::new(clients, config.crawl.expand_options())?;

    if progress_bar.is_some() || progress_callback.is_some() {
        let pb_clone = progress_bar.clone();
        let callback_clone = progress_callback.clone();
        let level_callback: LevelCallback = Arc::new(move |level: usize, frontier: usize| {
            let message = format!("Level {}: expanding {} identities", level, frontier);
            if let Some(ref pb) = pb_clone {
                pb.set_message(message.clone());
            }
            if let Some(ref callback) = callback_clone {
                callback(message);
            }
        });
        expander = expander.with_level_callback(level_callback);
    }

    let result = async {
        let seeds = expander.resolve_seeds(&config.crawl.seeds).await?;
        info!(
            "Resolved {} seed names to {} identities",
            config.crawl.seeds.len(),
            seeds.len()
        );
        if let Some(ref callback) = progress_callback {
            callback(format!("Resolved {} seeds", seeds.len()));
        }
        expander.expand(&seeds).await
    }
    .await;

    if let Some(ref pb) = progress_bar {
        match result {
            Ok(ref snapshot) => pb.finish_with_message(format!(
                "Crawl complete! {} identities visited, {} edges",
                snapshot.visited.len(),
                snapshot.edges.len()
            )),
            Err(_) => pb.finish_and_clear(),
        }
    }

    result
}

/// Generate a crawl report from a snapshot
pub fn generate_crawl_report(snapshot: &CrawlSnapshot) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str(&format!(
        "# Summary ({}):\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    report.push_str(&format!("  Seeds: {}\n", snapshot.seeds.len()));
    report.push_str(&format!("  Identities visited: {}\n", snapshot.visited.len()));
    report.push_str(&format!("  Adjacency lists fetched: {}\n", snapshot.fetched));
    report.push_str(&format!("  Pairs emitted: {}\n", snapshot.emitted.len()));
    report.push_str(&format!(
        "  Edges ({}, {}): {}\n",
        snapshot.edge_convention.as_str(),
        snapshot.edge_filter.as_str(),
        snapshot.edges.len()
    ));

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    report.push_str("## Levels\n");
    for (level, ids) in snapshot.levels.iter().enumerate() {
        report.push_str(&format!("  {}: {} identities\n", level, ids.len()));
    }

    report
}
