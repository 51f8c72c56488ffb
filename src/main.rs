//! pennyledger main entry point

use anyhow::Context;
use clap::Parser;
use pennyledger_config::{Config, ConfigError};
use pennyledger_core::{
    Category, ImportReconciler, ImportRecord, InMemoryStore, LedgerController, LedgerView,
    PageView, Transaction, UserScope,
};
use pennyledger_utils::{format_amount, CurrencyFormat};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "pennyledger")]
#[command(version = "0.1.0")]
#[command(about = "A personal finance ledger with optimistic editing and bulk import", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Ledger page to print (1-based, clamped)
    #[arg(short, long, default_value_t = 1)]
    page: usize,

    /// JSON file of records to preview for import
    #[arg(short, long)]
    import: Option<PathBuf>,

    /// Persist the previewed import
    #[arg(long, requires = "import")]
    confirm: bool,

    /// Print the page as JSON
    #[arg(long)]
    json: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

fn load_config(path: &Path) -> anyhow::Result<(Config, bool)> {
    match Config::load(path.to_path_buf()) {
        Ok(config) => Ok((config, true)),
        Err(ConfigError::FileNotFound { .. }) => Ok((Config::default(), false)),
        Err(e) => Err(anyhow::anyhow!("{}", e.to_details()))
            .with_context(|| format!("invalid configuration in {}", path.display())),
    }
}

/// Seed file: a bare transaction array, or transactions plus categories
#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    Transactions(Vec<Transaction>),
    Full {
        transactions: Vec<Transaction>,
        #[serde(default)]
        categories: Vec<Category>,
    },
}

fn seed_store(config: &Config, scope: &UserScope) -> anyhow::Result<InMemoryStore> {
    let path = &config.data.seed_file;
    if !path.exists() {
        log::warn!("seed file not found: {}; starting empty", path.display());
        return Ok(InMemoryStore::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let seed: SeedFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse seed file {}", path.display()))?;
    let (transactions, mut categories) = match seed {
        SeedFile::Transactions(transactions) => (transactions, Vec::new()),
        SeedFile::Full {
            transactions,
            categories,
        } => (transactions, categories),
    };

    // Categories used by transactions but not declared
    let declared: BTreeSet<String> = categories.iter().map(|c| c.name.clone()).collect();
    let used: BTreeSet<&str> = transactions
        .iter()
        .filter(|t| !t.is_uncategorised() && !declared.contains(&t.category))
        .map(|t| t.category.as_str())
        .collect();
    categories.extend(used.into_iter().map(Category::new));
    log::info!(
        "seeding {} transactions and {} categories from {}",
        transactions.len(),
        categories.len(),
        path.display()
    );

    Ok(InMemoryStore::new()
        .with_transactions(scope, transactions)
        .with_categories(scope, categories))
}

fn read_import(path: &Path) -> anyhow::Result<Vec<ImportRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    let records = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse import file {}", path.display()))?;
    Ok(records)
}

fn print_page(page: &PageView) {
    println!("Page {} of {} ({} transactions)", page.page, page.total_pages, page.total_rows);
    for row in &page.rows {
        let category = if row.category.is_empty() { "-" } else { row.category.as_str() };
        let marker = if row.pending { " (unconfirmed)" } else { "" };
        println!(
            "  {:<10} {:<32} {:<16} {:>14}{}",
            row.date, row.description, category, row.amount, marker
        );
    }
}

async fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    let scope = UserScope::new(&config.session.user_id);
    let store = Arc::new(seed_store(config, &scope)?);
    let ledger = LedgerController::from_config(store, config);
    let mut view = LedgerView::new();
    let currency = CurrencyFormat::new(
        &config.currency.symbol,
        &config.currency.thousands_separator,
        &config.currency.decimal_separator,
    );

    if let Err(e) = ledger.refresh().await {
        log::warn!("ledger refresh incomplete: {}", e);
    }

    if let Some(ref path) = args.import {
        let reconciler = ImportReconciler::new(&ledger);
        let batch = reconciler.preview(read_import(path)?)?;
        println!("Import preview: {} records", batch.len());
        for row in batch.rows() {
            let flag = if row.possible_duplicate { " [possible duplicate]" } else { "" };
            let suggestion = row
                .suggested_category
                .as_deref()
                .map(|c| format!(" (suggested: {})", c))
                .unwrap_or_default();
            println!(
                "  {} {} {}{}{}",
                row.transaction.transaction_date_time,
                row.transaction.description,
                format_amount(row.transaction.amount),
                suggestion,
                flag
            );
        }

        if args.confirm {
            match reconciler.confirm(batch).await {
                Ok(persisted) => println!("Imported {} records", persisted.len()),
                Err(e) => log::error!("import not applied: {}", e),
            }
        }
    }

    ledger.set_page(args.page);
    let page = view.render_page(&ledger, &currency);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_page(&page);
        let summary = ledger.summary();
        println!(
            "Credit {}  Debit {}  Net {}  Uncategorised {}",
            currency.format(summary.total_credit),
            currency.format(summary.total_debit),
            currency.format(summary.net),
            summary.uncategorised
        );
    }

    for notification in ledger.drain_notifications() {
        eprintln!("{}", notification);
    }

    view.teardown();
    ledger.teardown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", Config::generate_default());
        return Ok(());
    }

    let (config, from_file) = load_config(&args.config)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level))
        .init();
    if !from_file {
        log::warn!("config file {} not found, using defaults", args.config.display());
    }

    let rt = Runtime::new()?;
    rt.block_on(run(&args, &config))
}
