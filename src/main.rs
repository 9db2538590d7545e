//! folo - following-list mirror and batch manager CLI
//!
//! Main entry point for the folo command-line tool.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::Arc;

use folo::api::ApiClient;
use folo::config::Config;
use folo::governor::Governor;
use folo::search::SearchService;
use folo::sync::{BatchReport, SyncOrchestrator};
use folo::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_cli_logging(cli.quiet, cli.verbose);

    match &cli.command {
        Commands::Fetch(args) => cmd_fetch(&cli, args).await,
        Commands::Search(args) => cmd_search(&cli, args),
        Commands::Unfollow(args) => cmd_unfollow(&cli, args).await,
        Commands::Follow(args) => cmd_follow(&cli, args).await,
        Commands::Export(args) => cmd_export(&cli, args),
        Commands::Stats => cmd_stats(&cli),
        Commands::History(args) => cmd_history(&cli, args),
        Commands::Clear(args) => cmd_clear(&cli, args),
        Commands::Whoami => cmd_whoami(&cli).await,
        Commands::Config(args) => cmd_config(&cli, args),
        Commands::Completions(args) => cmd_completions(args.clone()),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_required(path)?,
        None => Config::load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.paths.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<RelationStore>> {
    Ok(Arc::new(RelationStore::open(config.data_dir())?))
}

fn build_engine(config: &Config) -> Result<(Arc<SyncOrchestrator<ApiClient>>, Arc<RelationStore>)> {
    let governor = Arc::new(Governor::new(&config.pacing));
    let client = ApiClient::new(&config.api, config.session.clone(), governor)?;
    let store = open_store(config)?;
    let orchestrator = SyncOrchestrator::new(client, Arc::clone(&store), config.sync.page_size)
        .with_test_mode(config.sync.test_mode, config.sync.max_test_operations);
    Ok((Arc::new(orchestrator), store))
}

/// Turn the first Ctrl-C into a cancellation request; the batch stops
/// after its current item and reports what it finished.
fn cancel_on_ctrl_c(
    orchestrator: &Arc<SyncOrchestrator<ApiClient>>,
) -> tokio::task::JoinHandle<()> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current item...");
            orchestrator.request_cancel();
        }
    })
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb
}

fn batch_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );
    pb
}

/// Ask before a destructive step. `--yes` skips the prompt.
fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_report(action: &str, report: &BatchReport) {
    println!();
    if report.cancelled {
        println!("{}", format!("{action} cancelled.").yellow().bold());
    } else {
        println!("{}", format!("{action} finished.").bold());
    }
    println!("  {:<10} {}", "Total:", format_number_usize(report.total));
    println!(
        "  {:<10} {}",
        "Success:",
        format_number_usize(report.success).green()
    );
    if report.failed > 0 {
        println!(
            "  {:<10} {}",
            "Failed:",
            format_number_usize(report.failed).red()
        );
    }
}

async fn cmd_fetch(cli: &Cli, args: &cli::FetchArgs) -> Result<()> {
    let mut config = load_config(cli)?;
    if let Some(ps) = args.page_size {
        config.sync.page_size = ps;
    }
    let (orchestrator, store) = build_engine(&config)?;

    println!("{}", "Refreshing following mirror...".bold().cyan());
    let watcher = cancel_on_ctrl_c(&orchestrator);
    let pb = spinner("Fetching page 1...");
    let count = orchestrator
        .fetch_all(|p| {
            pb.set_message(format!(
                "Fetched {} of ~{} (page {})",
                p.fetched, p.reported_total, p.page
            ));
        })
        .await?;
    pb.finish_and_clear();
    watcher.abort();

    println!(
        "{} Mirror holds {} accounts.",
        "✓".green(),
        format_number_usize(count).cyan()
    );
    println!("  Data file: {}", store.data_file().display());
    Ok(())
}

fn cmd_search(cli: &Cli, args: &cli::SearchArgs) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;
    let service = SearchService::open(config.data_dir());

    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        println!("{}", "Mirror is empty. Run 'folo fetch' first.".yellow());
        return Ok(());
    }

    let page = service.search(&snapshot, &args.query, args.exact, args.page, args.page_size);

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&page)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&page)?),
        OutputFormat::Text => print_search_page(&page),
    }
    Ok(())
}

fn print_search_page(page: &SearchPage) {
    if page.results.is_empty() {
        println!("{}", "No results found.".yellow());
        return;
    }

    println!(
        "{} matches for \"{}\" (page {}/{}, {:.1}ms):\n",
        format_number_usize(page.total).cyan(),
        page.query.bold(),
        page.page,
        page.total_pages,
        page.elapsed_ms
    );

    let first = (page.page - 1) * page.page_size;
    for (i, user) in page.results.iter().enumerate() {
        println!(
            "{}. {} {}",
            (first + i + 1).to_string().dimmed(),
            user.display_name.bold(),
            format!("({})", user.id).dimmed()
        );
        if !user.bio.is_empty() {
            println!("   {}", truncate_text(&user.bio, 78));
        }
        let mut meta = format!("   followed {}", user.followed_at_display());
        if let Some(label) = user.verified_label() {
            meta.push_str(&format!("  ·  {label}"));
        }
        println!("{}", meta.dimmed());
        println!();
    }
}

async fn cmd_unfollow(cli: &Cli, args: &cli::UnfollowArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (orchestrator, store) = build_engine(&config)?;

    let ids: Vec<String> = if args.all {
        store.snapshot().users.keys().cloned().collect()
    } else {
        args.ids.clone()
    };
    if ids.is_empty() {
        println!("{}", "Nothing to unfollow.".yellow());
        return Ok(());
    }

    let prompt = format!(
        "Unfollow {} account(s)? This cannot be batch-undone.",
        format_number_usize(ids.len())
    );
    if !confirm(&prompt, args.yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let watcher = cancel_on_ctrl_c(&orchestrator);
    let pb = batch_bar(ids.len());
    let report = orchestrator
        .batch_unfollow(&ids, |p| {
            pb.set_position(p.done as u64);
            let mark = if p.succeeded { "✓" } else { "✗" };
            pb.set_message(format!("{mark} {}", format_short_id(&p.current_id)));
        })
        .await?;
    pb.finish_and_clear();
    watcher.abort();

    print_report("Unfollow batch", &report);
    Ok(())
}

async fn cmd_follow(cli: &Cli, args: &cli::FollowArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (orchestrator, _store) = build_engine(&config)?;

    let ids = export::import_ids(&args.from_file)?;
    if ids.is_empty() {
        println!("{}", "No usable accounts in the file.".yellow());
        return Ok(());
    }

    let prompt = format!("Follow {} account(s)?", format_number_usize(ids.len()));
    if !confirm(&prompt, args.yes)? {
        println!("Aborted.");
        return Ok(());
    }

    let watcher = cancel_on_ctrl_c(&orchestrator);
    let pb = batch_bar(ids.len());
    let report = orchestrator
        .batch_follow(&ids, |p| {
            pb.set_position(p.done as u64);
            let mark = if p.succeeded { "✓" } else { "✗" };
            pb.set_message(format!("{mark} {}", format_short_id(&p.current_id)));
        })
        .await?;
    pb.finish_and_clear();
    watcher.abort();

    print_report("Follow batch", &report);
    if report.success > 0 {
        println!("Run {} to refresh the mirror.", "folo fetch".bold());
    }
    Ok(())
}

fn cmd_export(cli: &Cli, args: &cli::ExportArgs) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;

    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        println!("{}", "Mirror is empty. Run 'folo fetch' first.".yellow());
        return Ok(());
    }

    let dir = args.output.clone().unwrap_or_else(|| config.data_dir());
    let path = if let Some(query) = &args.query {
        let service = SearchService::open(config.data_dir());
        let page = service.search(&snapshot, query, false, 1, snapshot.total_count.max(1));
        if page.results.is_empty() {
            println!("{}", "No accounts match the query.".yellow());
            return Ok(());
        }
        export::write_export(page.results.iter(), &dir)?
    } else {
        export::export_snapshot(&snapshot, &dir)?
    };

    println!("{} Export written to {}", "✓".green(), path.display());
    Ok(())
}

fn cmd_stats(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;
    let stats = store.statistics();

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&stats)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("{}", "Mirror Statistics".bold().cyan());
            println!("{}", "─".repeat(40));
            println!(
                "  {:<22} {:>10}",
                "Accounts:",
                format_number_usize(stats.total_users)
            );
            println!(
                "  {:<22} {:>10}",
                "Name prefix keys:",
                format_number_usize(stats.name_prefix_keys)
            );
            println!(
                "  {:<22} {:>10}",
                "Id prefix keys:",
                format_number_usize(stats.id_prefix_keys)
            );
            println!(
                "  {:<22} {:>10}",
                "Bio token keys:",
                format_number_usize(stats.bio_token_keys)
            );
            println!("{}", "─".repeat(40));
            println!(
                "  Last update: {}",
                stats
                    .last_update
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .green()
            );

            if !stats.name_length_dist.is_empty() {
                println!("\n  {}", "Name lengths".bold());
                for (bucket, count) in &stats.name_length_dist {
                    println!("    {:<10} {}", bucket, format_number(*count));
                }
            }
        }
    }
    Ok(())
}

fn cmd_history(cli: &Cli, args: &cli::HistoryArgs) -> Result<()> {
    let config = load_config(cli)?;
    let service = SearchService::open(config.data_dir());

    if args.clear {
        service.clear_history();
        println!("{} Search history cleared.", "✓".green());
        return Ok(());
    }

    let entries = service.history(args.limit);
    if entries.is_empty() {
        println!("{}", "No recorded queries.".yellow());
        return Ok(());
    }
    println!("{}", "Recent queries".bold().cyan());
    for (i, query) in entries.iter().enumerate() {
        println!("{}. {}", (i + 1).to_string().dimmed(), query);
    }
    Ok(())
}

fn cmd_clear(cli: &Cli, args: &cli::ClearArgs) -> Result<()> {
    let config = load_config(cli)?;
    let store = open_store(&config)?;

    let count = store.snapshot().total_count;
    if count == 0 {
        println!("{}", "Mirror is already empty.".yellow());
        return Ok(());
    }

    let prompt = format!(
        "Delete the local mirror of {} account(s)? Backups are kept.",
        format_number_usize(count)
    );
    if !confirm(&prompt, args.yes)? {
        println!("Aborted.");
        return Ok(());
    }

    store.clear()?;
    println!("{} Local mirror deleted.", "✓".green());
    Ok(())
}

async fn cmd_whoami(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let governor = Arc::new(Governor::new(&config.pacing));
    let client = ApiClient::new(&config.api, config.session.clone(), governor)?;

    let pb = spinner("Verifying session...");
    let info = client.account_info().await;
    pb.finish_and_clear();

    match info {
        Ok(data) => {
            let name = data["uname"].as_str().unwrap_or("unknown");
            let mid = data["mid"]
                .as_i64()
                .map_or_else(|| "?".to_string(), |m| m.to_string());
            println!("{} Logged in as {} ({})", "✓".green(), name.bold(), mid);
            Ok(())
        }
        Err(FoloError::Unauthenticated { .. }) => {
            println!(
                "{}",
                "Session rejected. Update the cookies in your config file.".red()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_config(cli: &Cli, args: &cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show => {
            let config = load_config(cli)?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        cli::ConfigAction::Path => match &cli.config {
            Some(path) => println!("{}", path.display()),
            None => match Config::user_config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("{}", "No config directory available.".yellow()),
            },
        },
        cli::ConfigAction::Init => {
            let Some(path) = Config::user_config_path() else {
                anyhow::bail!("no config directory available on this system");
            };
            if path.exists() {
                println!(
                    "{}",
                    format!("Config already exists at {}", path.display()).yellow()
                );
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default_config_content())?;
            println!("{} Wrote starter config to {}", "✓".green(), path.display());
            println!("Fill in your DedeUserID and bili_jct cookie values.");
        }
    }
    Ok(())
}

fn cmd_completions(args: cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "folo", &mut io::stdout());
    Ok(())
}
