//! glossaryd - glossary article generation runner
//!
//! CLI entry point for submitting terms, running generation and managing
//! history.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::{ColoredString, Colorize};
use eyre::{Context, Result, eyre};
use kvstore::KvStore;
use tokio::sync::mpsc;
use tracing::{debug, info};

use glossaryd::cli::{Cli, Command};
use glossaryd::deletion::ResourceDeleter;
use glossaryd::{
    Config, DeletionCoordinator, DeletionOutcome, DifyClient, HistoryCache, HistoryStore,
    LocalHistoryStore, NewTerm, TaskRunner, TaskRunnerConfig, Term, TermStatus, USER_MAIL_KEY, WebhookDeleter,
    WebhookHistoryStore,
};

fn setup_logging(log_dir: &Path, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("glossaryd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Early read for log settings only; the real load below reports errors
    let early = Config::load(cli.config.as_ref()).unwrap_or_default();
    setup_logging(
        &early.storage.log_dir(),
        cli.log_level.as_deref(),
        early.log_level.as_deref(),
    )
    .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(data_dir = %config.storage.data_dir.display(), "glossaryd loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Submit {
            topic,
            mail,
            difficulty,
            literacy,
            context,
            wait,
        } => {
            let input = NewTerm {
                topic,
                mail: mail.unwrap_or_default(),
                difficulty,
                literacy,
                context,
            };
            cmd_submit(&config, input, wait).await
        }
        Command::Run => cmd_run(&config).await,
        Command::List { status, refresh } => cmd_list(&config, status, refresh).await,
        Command::Show { id, json } => cmd_show(&config, &id, json).await,
        Command::Delete { id, yes } => cmd_delete(&config, &id, yes).await,
        Command::Mail { address } => cmd_mail(&config, address),
    }
}

fn open_kv(config: &Config) -> Result<Arc<KvStore>> {
    let dir = config.storage.kv_dir();
    let kv = KvStore::open(&dir).context(format!("Failed to open kv store at {}", dir.display()))?;
    Ok(Arc::new(kv))
}

/// Build the history cache over the configured store
fn open_history(config: &Config, kv: Arc<KvStore>) -> Result<HistoryCache> {
    let store: Arc<dyn HistoryStore> = match &config.history.webhook_url {
        Some(url) => {
            debug!(%url, "open_history: using webhook store");
            Arc::new(WebhookHistoryStore::new(url, config.history.timeout()).context("Failed to create history client")?)
        }
        None => {
            debug!("open_history: using local store");
            Arc::new(LocalHistoryStore::new(kv))
        }
    };
    Ok(HistoryCache::spawn(store, config.history.cache_ttl()))
}

fn open_runner(config: &Config, cache: &HistoryCache) -> Result<TaskRunner> {
    config.validate()?;
    let client = DifyClient::from_config(&config.engine).context("Failed to create workflow client")?;
    Ok(TaskRunner::new(Arc::new(client), cache.clone(), TaskRunnerConfig::from(config)))
}

/// Find a term by id or unique id prefix
async fn resolve_term(cache: &HistoryCache, id: &str) -> Result<Term> {
    let terms = cache.refetch(false).await.context("Failed to load history")?;
    if let Some(term) = terms.iter().find(|t| t.id == id) {
        return Ok(term.clone());
    }
    let matches: Vec<&Term> = terms.iter().filter(|t| t.id.starts_with(id)).collect();
    match matches.as_slice() {
        [term] => Ok((*term).clone()),
        [] => Err(eyre!("No term found with id '{}'", id)),
        _ => Err(eyre!("Id prefix '{}' matches {} terms", id, matches.len())),
    }
}

async fn cmd_submit(config: &Config, mut input: NewTerm, wait: bool) -> Result<()> {
    debug!(topic = %input.topic, wait, "cmd_submit: called");
    let kv = open_kv(config)?;

    let mut mail = kv.slot(USER_MAIL_KEY, String::new());
    mail.mount();
    if input.mail.is_empty() {
        input.mail = mail.value().cloned().unwrap_or_default();
    } else {
        mail.set(input.mail.clone()).context("Failed to remember mail address")?;
    }

    let term = Term::create(input)?;
    let cache = open_history(config, kv)?;
    let runner = if wait { Some(open_runner(config, &cache)?) } else { None };

    if let Err(e) = cache.refetch(false).await {
        eprintln!("{} could not load history: {}", "Warning:".yellow(), e);
    }
    cache.add(term.clone());
    println!("{} {} {}", "Submitted".green(), short_id(&term.id).bold(), term.topic);

    match runner {
        Some(runner) => wait_for_term(&cache, runner, &term.id).await?,
        None => println!("Run `gd run` to generate pending terms."),
    }

    cache.flush().await?;
    Ok(())
}

/// Run the generator until `id` reaches a terminal state, printing progress
async fn wait_for_term(cache: &HistoryCache, mut runner: TaskRunner, id: &str) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    let settled = tokio::select! {
        term = cache.settled(id, print_progress) => term,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted; the term stays pending.");
            cache.get(id)
        }
    };

    let _ = shutdown_tx.send(()).await;
    handle.await.context("Runner task failed")??;

    match settled {
        Some(term) => {
            println!();
            print_term(&term);
        }
        None => println!("{} the term is no longer in the history", "Gone:".yellow()),
    }
    Ok(())
}

async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let kv = open_kv(config)?;
    let cache = open_history(config, kv)?;
    let mut runner = open_runner(config, &cache)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    println!("Runner started. Press Ctrl-C to stop.");
    runner.run(shutdown_rx).await?;
    println!("Runner stopped.");
    Ok(())
}

async fn cmd_list(config: &Config, status: Option<TermStatus>, refresh: bool) -> Result<()> {
    debug!(?status, refresh, "cmd_list: called");
    let kv = open_kv(config)?;
    let cache = open_history(config, kv)?;
    let terms = cache.refetch(refresh).await.context("Failed to load history")?;

    let terms: Vec<&Term> = terms.iter().filter(|t| status.is_none_or(|s| t.status == s)).collect();
    if terms.is_empty() {
        println!("No terms found");
        return Ok(());
    }

    println!("{:<10} {:<10} {:>5}  {}", "ID".bold(), "STATUS".bold(), "PROG".bold(), "TOPIC".bold());
    for term in terms {
        let progress = match term.status {
            TermStatus::Completed => "100%".to_string(),
            _ => term.progress.map(|p| format!("{}%", p)).unwrap_or_else(|| "-".to_string()),
        };
        let lock = if term.is_delete_protected() { " 🔒" } else { "" };
        println!(
            "{:<10} {:<10} {:>5}  {}{}",
            short_id(&term.id),
            status_label(term.status),
            progress,
            term.topic,
            lock
        );
    }
    Ok(())
}

async fn cmd_show(config: &Config, id: &str, json: bool) -> Result<()> {
    debug!(%id, json, "cmd_show: called");
    let kv = open_kv(config)?;
    let cache = open_history(config, kv)?;
    let term = resolve_term(&cache, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&term)?);
    } else {
        print_term(&term);
    }
    Ok(())
}

async fn cmd_delete(config: &Config, id: &str, yes: bool) -> Result<()> {
    debug!(%id, yes, "cmd_delete: called");
    let kv = open_kv(config)?;
    let cache = open_history(config, kv)?;
    let term = resolve_term(&cache, id).await?;

    if term.is_delete_protected() {
        println!("{} {} is published and cannot be deleted.", "Protected:".yellow(), term.topic);
        return Ok(());
    }

    if !yes && !confirm(&format!(
        "Delete '{}'? Its WordPress draft and documents are deleted too. [y/N] ",
        term.topic
    ))? {
        println!("Cancelled");
        return Ok(());
    }

    let deleter: Option<Arc<dyn ResourceDeleter>> = match config.deletion_webhook_url() {
        Some(url) => Some(Arc::new(
            WebhookDeleter::new(url, config.history.timeout()).context("Failed to create deletion client")?,
        )),
        None => None,
    };
    let coordinator = DeletionCoordinator::new(cache.clone(), deleter);

    let outcome = coordinator
        .delete(&term.id)
        .await
        .context("Deletion aborted; nothing was deleted")?;
    cache.flush().await?;

    match outcome {
        DeletionOutcome::Deleted { remote_errors } => {
            println!("{} {}", "Deleted".green(), term.topic);
            for e in remote_errors {
                println!("  {} {}", "warning:".yellow(), e);
            }
        }
        DeletionOutcome::NowProtected { .. } => {
            println!(
                "{} the article is already published, so it was not deleted. The term is now protected.",
                "Protected:".yellow()
            );
        }
        DeletionOutcome::Protected => {
            println!("{} {} is published and cannot be deleted.", "Protected:".yellow(), term.topic);
        }
        DeletionOutcome::NotFound => println!("No term found with id '{}'", id),
    }
    Ok(())
}

fn cmd_mail(config: &Config, address: Option<String>) -> Result<()> {
    debug!(?address, "cmd_mail: called");
    let kv = open_kv(config)?;
    let mut slot = kv.slot(USER_MAIL_KEY, String::new());
    let current = slot.mount().clone();

    match address {
        Some(address) => {
            slot.set(address.clone()).context("Failed to save mail address")?;
            println!("{} {}", "✓".green(), address);
        }
        None if current.is_empty() => println!("No default mail address set"),
        None => println!("{}", current),
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn status_label(status: TermStatus) -> ColoredString {
    match status {
        TermStatus::Pending => status.as_str().yellow(),
        TermStatus::Completed => status.as_str().green(),
        TermStatus::Error => status.as_str().red(),
    }
}

fn print_progress(term: &Term) {
    if term.is_pending() {
        println!(
            "[{:>3}%] {}",
            term.progress.unwrap_or(0),
            term.current_node.as_deref().unwrap_or("")
        );
    }
}

fn print_term(term: &Term) {
    println!("{}  {}", term.topic.bold(), status_label(term.status));
    println!("  id:         {}", term.id);
    if let Some(created) = chrono::DateTime::from_timestamp_millis(term.created_at) {
        println!("  created:    {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if !term.mail.is_empty() {
        println!("  mail:       {}", term.mail);
    }
    println!("  difficulty: {:.2}", term.difficulty);
    println!("  literacy:   {:.2}", term.literacy);
    if !term.context.is_empty() {
        println!("  context:    {}", term.context);
    }
    if term.is_pending() {
        println!(
            "  progress:   {}% {}",
            term.progress.unwrap_or(0),
            term.current_node.as_deref().unwrap_or("")
        );
    }
    if let Some(link) = &term.wp_link {
        println!("  article:    {}", link.cyan());
    }
    if let Some(message) = &term.error_message {
        println!("  error:      {}", message.red());
    }
    if term.is_delete_protected() {
        println!("  protected:  yes");
    }
    if let Some(answer) = &term.dify_response {
        println!();
        println!("{}", answer);
    }
}
