use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commodus_core::signal::{DEFAULT_APPROVE_TOKENS, DEFAULT_REJECT_TOKENS};
use commodus_core::{
    parse_comment, ApprovalRecord, Decision, NetVote, RevisionKey, SignalTokens, TallyConfig,
    Threshold,
};
use commodus_server::config::parse_token_list;
use commodus_server::{LedgerStore, SqliteStore};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Commodus: approval gate operator tool
#[derive(Parser, Debug)]
#[command(name = "commodus")]
#[command(about = "Score comments and inspect the approval ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the net vote (-1, 0, +1) a comment body would cast
    Score(ScoreArgs),
    /// Inspect or modify the SQLite ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),
}

#[derive(Parser, Debug)]
struct ScoreArgs {
    /// File containing the comment body (reads stdin if omitted)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Approve tokens, replacing the built-in set
    #[arg(long, value_delimiter = ',', env = "APPROVE_TOKENS")]
    approve: Vec<String>,

    /// Reject tokens, replacing the built-in set
    #[arg(long, value_delimiter = ',', env = "REJECT_TOKENS")]
    reject: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum LedgerCommands {
    /// List every tracked revision
    List(ListArgs),
    /// Delete all records of one pull request
    Purge(PurgeArgs),
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Path to the ledger database
    #[arg(long, default_value = "commodus-ledger.db")]
    db: PathBuf,

    /// Threshold used to show each revision's decision
    #[arg(long, default_value_t = Threshold::default(), env = "REQUIRED_APPROVALS")]
    threshold: Threshold,
}

#[derive(Parser, Debug)]
struct PurgeArgs {
    /// Path to the ledger database
    #[arg(long, default_value = "commodus-ledger.db")]
    db: PathBuf,

    /// Repository full name, e.g. octo/widgets
    #[arg(long)]
    repo: String,

    /// Pull request number
    #[arg(long)]
    number: u64,
}

fn score(body: &str, approve: Vec<String>, reject: Vec<String>) -> Result<NetVote> {
    // Same rules as the server's APPROVE_TOKENS / REJECT_TOKENS.
    let tokens = SignalTokens::new(
        parse_token_list(Some(approve.join(",")), DEFAULT_APPROVE_TOKENS),
        parse_token_list(Some(reject.join(",")), DEFAULT_REJECT_TOKENS),
    );
    let config = TallyConfig::new(Threshold::default(), tokens).context("Invalid token set")?;
    Ok(parse_comment(body, &config.tokens))
}

fn run_score(args: ScoreArgs) -> Result<()> {
    let body = match &args.file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read comment body from stdin")?;
            body
        }
    };

    println!("{}", score(&body, args.approve, args.reject)?);
    Ok(())
}

fn format_record(key: &RevisionKey, record: &ApprovalRecord, threshold: Threshold) -> String {
    format!(
        "{}#{}\t{}\t{}/{}\t{}\t{} voter(s)",
        key.repo,
        key.number,
        record.revision_hash.short(),
        record.approval_count,
        threshold,
        Decision::evaluate(record.approval_count, threshold),
        record.voters.len()
    )
}

fn open_ledger(db: &Path) -> Result<SqliteStore> {
    if !db.exists() {
        anyhow::bail!("Ledger database {} does not exist", db.display());
    }
    SqliteStore::new(db).with_context(|| format!("Failed to open ledger {}", db.display()))
}

async fn run_list(args: ListArgs) -> Result<()> {
    let store = open_ledger(&args.db)?;
    let records = store.get_all().await.context("Failed to list records")?;

    if records.is_empty() {
        println!("No tracked revisions");
        return Ok(());
    }

    for (key, record) in &records {
        println!("{}", format_record(key, record, args.threshold));
    }
    Ok(())
}

async fn run_purge(args: PurgeArgs) -> Result<()> {
    let store = open_ledger(&args.db)?;
    let key = RevisionKey::new(args.repo, args.number);
    let removed = store
        .delete_all(&key)
        .await
        .with_context(|| format!("Failed to purge {}", key))?;
    println!("Removed {} record(s) for {}", removed, key);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Score(args) => run_score(args),
        Commands::Ledger(LedgerCommands::List(args)) => run_list(args).await,
        Commands::Ledger(LedgerCommands::Purge(args)) => run_purge(args).await,
    }
}
