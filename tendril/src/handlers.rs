use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tendril_core::config::{ClientConfig, TendrilConfig, expand_path};
use tendril_core::crawl::{CrawlOptions, build_clients, execute_crawl, generate_crawl_report};
use tendril_core::snapshot::write_pairs;
use tendril_core::expand::DEFAULT_CHUNK_SIZE;
use tendril_core::{GraphLoader, GraphStore, resolve_names};
use tracing::info;

// Helper functions for crawl handler

/// Load seeds from a newline-delimited file
pub fn load_seeds_from_file(path: &Path) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read seeds file {}: {}", path.display(), e))?;

    let seeds: Vec<String> = content.lines().filter_map(parse_seed_line).collect();

    if seeds.is_empty() {
        return Err(format!("No seeds found in {}", path.display()));
    }

    Ok(seeds)
}

/// Parse a single line as a seed: a screen name, a numeric id or a profile
/// link. Blank lines and `#` comments yield nothing.
pub fn parse_seed_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let name = line
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_start_matches("m.")
        .trim_start_matches("vk.com/")
        .trim_start_matches('@')
        .trim_end_matches('/');

    if name.is_empty() || name.contains(char::is_whitespace) || name.contains('/') {
        eprintln!("{} Skipping invalid seed '{}'", "⚠".yellow(), line);
        return None;
    }

    Some(name.to_string())
}

/// Apply command-line overrides on top of the loaded configuration
pub fn apply_crawl_overrides(config: &mut TendrilConfig, args: &ArgMatches) -> Result<()> {
    if let Some(seeds_file) = args.get_one::<PathBuf>("seeds-file") {
        config.crawl.seeds = load_seeds_from_file(seeds_file).map_err(anyhow::Error::msg)?;
    }
    if let Some(depth) = args.get_one::<usize>("depth") {
        config.crawl.max_depth = *depth;
        if let Some(materialize) = config.crawl.materialize_depth
            && materialize > *depth
        {
            config.crawl.materialize_depth = Some(*depth);
        }
    }
    if let Some(output) = args.get_one::<String>("output") {
        config.output.csv_file = output.clone();
    }

    config
        .crawl
        .expand_options()
        .validate()
        .context("Invalid crawl options")?;
    Ok(())
}

fn config_path(args: &ArgMatches) -> PathBuf {
    args.get_one::<PathBuf>("config")
        .map(|p| expand_path(&p.to_string_lossy()))
        .unwrap_or_else(|| PathBuf::from("tendril.toml"))
}

fn load_config(args: &ArgMatches) -> Result<TendrilConfig> {
    let path = config_path(args);
    TendrilConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

fn open_store(args: &ArgMatches) -> Result<GraphStore> {
    let db = args
        .get_one::<String>("db")
        .map(String::as_str)
        .unwrap_or("~/.local/share/tendril/graph.db");
    let path = expand_path(db);

    GraphStore::open(&path).with_context(|| format!("Failed to open graph store {}", path.display()))
}

fn arg_str<'a>(args: &'a ArgMatches, name: &str, default: &'a str) -> &'a str {
    args.get_one::<String>(name).map(String::as_str).unwrap_or(default)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> Result<()> {
    let mut config = load_config(args)?;
    apply_crawl_overrides(&mut config, args)?;
    let load = !args.get_flag("no-load");

    if !quiet {
        print_divider();
        println!("{}", "  TENDRIL CRAWL".bright_white().bold());
        print_divider();
        println!("{} Seeds: {}", "→".blue(), config.crawl.seeds.len());
        println!("{} Accounts: {}", "→".blue(), config.accounts.len());
        println!("{} Max depth: {}", "→".blue(), config.crawl.max_depth);
        println!(
            "{} Edges: {}, {}",
            "→".blue(),
            config.crawl.edge_filter.as_str(),
            config.crawl.edge_convention.as_str()
        );
        println!(
            "{} Snapshot: {}",
            "→".blue(),
            config.csv_path().display().to_string().bright_white()
        );
        println!();
    }

    // The session is opened before crawling so a break still leaves a record
    let session = if load {
        let store = GraphStore::open(&config.store_path()).with_context(|| {
            format!("Failed to open graph store {}", config.store_path().display())
        })?;
        let crawl_json = serde_json::to_string(&config.crawl)?;
        let session_id = store.begin_session(&config.crawl.seeds, &crawl_json)?;
        info!("Opened crawl session {}", session_id);
        Some((store, session_id))
    } else {
        None
    };

    let csv_path = config.csv_path();
    let store_config = config.store.clone();
    let options = CrawlOptions {
        config,
        show_progress_bars: !quiet,
    };

    let snapshot = match execute_crawl(options, None).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            if let Some((ref store, ref session_id)) = session {
                store.fail_session(session_id)?;
            }
            if e.is_break() {
                bail!("Crawl aborted by the API: {}", e);
            }
            return Err(e).context("Crawl failed");
        }
    };

    write_pairs(&csv_path, &snapshot.edges)
        .with_context(|| format!("Failed to write snapshot {}", csv_path.display()))?;

    if let Some((store, session_id)) = session {
        let loaded = (|| -> Result<usize> {
            if store_config.reset {
                let deleted = store.delete_all_of_label(&store_config.node_label)?;
                info!("Reset removed {} `{}` nodes", deleted, store_config.node_label);
            }
            let summary = store.load_from_delimited(
                &csv_path,
                &store_config.node_label,
                &store_config.relationship,
            )?;
            Ok(summary.records)
        })();

        match loaded {
            Ok(records) => {
                store.complete_session(&session_id, records)?;
                if !quiet {
                    println!(
                        "{} Loaded {} edges into {}",
                        "✓".green().bold(),
                        records,
                        expand_path(&store_config.path).display()
                    );
                }
            }
            Err(e) => {
                store.fail_session(&session_id)?;
                return Err(e).context("Failed to load snapshot into the graph store");
            }
        }
    }

    let report = generate_crawl_report(&snapshot);
    if let Some(report_path) = args.get_one::<PathBuf>("report") {
        fs::write(report_path, &report)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
        if !quiet {
            println!("{} Report saved to {}", "✓".green().bold(), report_path.display());
        }
    }

    if !quiet {
        println!("\n{} Crawl complete!\n", "✓".green().bold());
        print!("{}", report);
    }
    Ok(())
}

pub async fn handle_resolve(args: &ArgMatches) -> Result<()> {
    // Only accounts and API tuning are needed here; crawl settings may be absent
    let path = config_path(args);
    let config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let names: Vec<String> = args
        .get_many::<String>("NAMES")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let clients = build_clients(&config)?;
    let ids = resolve_names(&clients, &names, DEFAULT_CHUNK_SIZE).await?;

    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

pub fn handle_load(args: &ArgMatches, quiet: bool) -> Result<()> {
    let input = args
        .get_one::<PathBuf>("input")
        .context("--input is required")?;
    let label = arg_str(args, "label", "Person");
    let relationship = arg_str(args, "relationship", "FRIENDS_WITH");
    let store = open_store(args)?;

    if args.get_flag("reset") {
        let deleted = store.delete_all_of_label(label)?;
        if !quiet {
            println!("{} Removed {} `{}` nodes", "✓".green().bold(), deleted, label);
        }
    }

    let summary = store
        .load_from_delimited(input, label, relationship)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    if !quiet {
        println!(
            "{} Loaded {} records ({} new edges)",
            "✓".green().bold(),
            summary.records,
            summary.new_edges
        );
    }
    Ok(())
}

pub fn handle_reset(args: &ArgMatches, quiet: bool) -> Result<()> {
    let label = arg_str(args, "label", "Person");
    let store = open_store(args)?;

    let deleted = store.delete_all_of_label(label)?;
    if !quiet {
        println!("{} Removed {} `{}` nodes", "✓".green().bold(), deleted, label);
    }
    Ok(())
}

pub fn handle_stats(args: &ArgMatches) -> Result<()> {
    let db = expand_path(arg_str(args, "db", "~/.local/share/tendril/graph.db"));
    if !GraphStore::exists(&db) {
        bail!("No graph store at {}", db.display());
    }

    let label = arg_str(args, "label", "Person");
    let relationship = arg_str(args, "relationship", "FRIENDS_WITH");
    let limit = *args.get_one::<usize>("sessions").unwrap_or(&5);
    let store = open_store(args)?;

    print_divider();
    println!("{}", "  GRAPH STORE".bright_white().bold());
    print_divider();
    println!("{} {} nodes: {}", "→".blue(), label, store.count_nodes(label)?);
    println!(
        "{} {} edges: {}",
        "→".blue(),
        relationship,
        store.count_edges(relationship)?
    );

    let sessions = store.list_sessions(limit)?;
    if sessions.is_empty() {
        return Ok(());
    }

    println!("\n{}", "Recent sessions:".bright_white().bold());
    for session in sessions {
        let started = chrono::DateTime::from_timestamp(session.start_time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| session.start_time.to_string());
        let status = match session.status.as_str() {
            "completed" => session.status.green(),
            "failed" => session.status.red(),
            _ => session.status.yellow(),
        };
        let edges = session
            .edges_loaded
            .map(|n| format!("{} edges", n))
            .unwrap_or_default();
        println!("  {} {} {} {}", started, status, session.id.dimmed(), edges);
    }
    Ok(())
}
