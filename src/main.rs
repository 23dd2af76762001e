use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use shared_ledger::{
    AuthGateway, Block, Config, LedgerService, LedgerStore, NewMember, SqliteStore,
    TransactionInput, Weights,
};

#[derive(Parser)]
#[command(name = "shared-ledger", version, about = "Shared expense ledger")]
struct Cli {
    /// TOML config file
    #[arg(long, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides database_path from the config
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List blocks with their members
    Blocks,

    /// Create a block: --member An --member Binh:2
    CreateBlock {
        period: String,

        /// NAME or NAME:WEIGHT
        #[arg(long = "member", required = true)]
        members: Vec<String>,
    },

    Lock { period: String },

    Unlock { period: String },

    /// Delete a block with all its members and transactions (by block id)
    DeleteBlock { block_id: String },

    /// Record an expense in a block
    Add {
        period: String,

        #[command(flatten)]
        tx: TransactionArgs,
    },

    /// Replace an existing transaction
    Edit {
        tx_id: String,

        #[command(flatten)]
        tx: TransactionArgs,
    },

    /// Delete a transaction and reverse its effect
    DeleteTx { tx_id: String },

    Transactions { period: String },

    Summary { period: String },

    /// Rebuild balances from history and report drift
    Reconcile { period: String },

    /// Write a block's transactions as CSV
    Export {
        period: String,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Create an API user
    Register {
        username: String,

        #[arg(long, env = "LEDGER_PASSWORD")]
        password: String,
    },
}

#[derive(Args)]
struct TransactionArgs {
    #[arg(long)]
    amount: Decimal,

    /// Member name or id
    #[arg(long)]
    payer: String,

    /// MEMBER or MEMBER=WEIGHT, repeated for every participant
    #[arg(long = "split", required = true)]
    splits: Vec<String>,

    #[arg(long, default_value = "")]
    description: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    init_tracing(&config);

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let store = SqliteStore::open_with_timeout(&config.database_path, config.busy_timeout())
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let mut ledger =
        LedgerService::new(store).with_drift_tolerance(config.settlement.drift_tolerance);

    run(cli.command, &mut ledger, &config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command, ledger: &mut LedgerService<SqliteStore>, config: &Config) -> Result<()> {
    match command {
        Command::Blocks => {
            let blocks = ledger.list_blocks()?;
            if blocks.is_empty() {
                println!("No blocks yet");
            }
            for block in blocks {
                let names: Vec<&str> = block.members.iter().map(|m| m.name.as_str()).collect();
                let lock = if block.locked { "🔒" } else { "  " };
                println!("{} {}  {}  [{}]", lock, block.period, block.id, names.join(", "));
            }
        }

        Command::CreateBlock { period, members } => {
            let members = members
                .iter()
                .map(|spec| parse_member(spec))
                .collect::<Result<Vec<_>>>()?;
            let block = ledger.create_block(&period, &members)?;
            println!("✓ Created block {} ({})", block.period, block.id);
        }

        Command::Lock { period } => {
            ledger.lock_block(&period)?;
            println!("🔒 {} locked", period);
        }

        Command::Unlock { period } => {
            ledger.unlock_block(&period)?;
            println!("🔓 {} unlocked", period);
        }

        Command::DeleteBlock { block_id } => {
            ledger.delete_block(&block_id)?;
            println!("✓ Deleted block {}", block_id);
        }

        Command::Add { period, tx } => {
            let block = ledger.block(&period)?;
            let input = tx.into_input(&block)?;
            let receipt = ledger.add_transaction(&period, input)?;
            println!("✓ Recorded transaction {}", receipt.id);
        }

        Command::Edit { tx_id, tx } => {
            let block = block_of_transaction(ledger, &tx_id)?;
            let input = tx.into_input(&block)?;
            let updated = ledger.edit_transaction(&tx_id, input)?;
            println!("✓ Updated transaction {} ({})", updated.id, updated.amount);
        }

        Command::DeleteTx { tx_id } => {
            ledger.delete_transaction(&tx_id)?;
            println!("✓ Deleted transaction {}", tx_id);
        }

        Command::Transactions { period } => {
            let block = ledger.block(&period)?;
            for tx in ledger.transactions_of(&period)? {
                println!(
                    "{}  {}  {:>12}  paid by {:<12} {}",
                    tx.id,
                    tx.created_at.format("%Y-%m-%d"),
                    tx.amount,
                    member_name(&block, &tx.payer),
                    tx.description
                );
            }
        }

        Command::Summary { period } => {
            let summary = ledger.summary(&period)?;
            println!("📊 Balances for {}{}", summary.period, if summary.locked { " (locked)" } else { "" });
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            for entry in &summary.balances {
                println!("{:<20} {:>14}", entry.name, entry.balance);
            }
        }

        Command::Reconcile { period } => {
            let report = ledger.reconcile_block(&period)?;
            println!("{}", report.summary());
            for drift in &report.drifts {
                println!(
                    "  ⚠️  {}: stored {} → {} ({})",
                    drift.name, drift.stored, drift.recomputed, drift.difference
                );
            }
        }

        Command::Export { period, output } => {
            let writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    std::fs::File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?,
                ),
                None => Box::new(std::io::stdout()),
            };
            let count = export_csv(ledger, &period, writer)?;
            if let Some(path) = output {
                println!("✓ Exported {} transactions to {}", count, path.display());
            }
        }

        Command::Register { username, password } => {
            let auth = AuthGateway::new(&config.auth)
                .context("Registration needs auth.jwt_secret (or LEDGER_JWT_SECRET)")?;
            let user = auth.register(ledger.store(), &username, &password)?;
            println!("✓ Registered {}", user.username);
        }
    }

    Ok(())
}

/// "Binh" or "Binh:2"
fn parse_member(spec: &str) -> Result<NewMember> {
    match spec.rsplit_once(':') {
        Some((name, weight)) => {
            let weight = Decimal::from_str(weight.trim())
                .with_context(|| format!("Invalid weight in '{}'", spec))?;
            Ok(NewMember::new(name, weight))
        }
        None => Ok(NewMember::new(spec, Decimal::ONE)),
    }
}

/// A member given by id or by display name
fn resolve_member(block: &Block, reference: &str) -> Result<String> {
    block
        .members
        .iter()
        .find(|m| m.id == reference || m.name == reference)
        .map(|m| m.id.clone())
        .ok_or_else(|| anyhow!("No member '{}' in block {}", reference, block.period))
}

fn member_name<'a>(block: &'a Block, member_id: &'a str) -> &'a str {
    block
        .member(member_id)
        .map(|m| m.name.as_str())
        .unwrap_or(member_id)
}

impl TransactionArgs {
    fn into_input(self, block: &Block) -> Result<TransactionInput> {
        let mut weights = Weights::new();
        for split in &self.splits {
            let (member, weight) = match split.split_once('=') {
                Some((member, weight)) => (
                    member,
                    Decimal::from_str(weight.trim())
                        .with_context(|| format!("Invalid weight in '{}'", split))?,
                ),
                None => (split.as_str(), Decimal::ONE),
            };
            weights.insert(resolve_member(block, member.trim())?, weight);
        }

        let payer = resolve_member(block, &self.payer)?;
        Ok(TransactionInput::new(self.amount, &self.description, &payer, weights))
    }
}

fn block_of_transaction(ledger: &LedgerService<SqliteStore>, tx_id: &str) -> Result<Block> {
    let block = ledger.store().read(|repos| {
        match repos.find_transaction(tx_id)? {
            Some(tx) => repos.find_block(&tx.block_id),
            None => Ok(None),
        }
    })?;

    match block {
        Some(block) => Ok(block),
        None => bail!("Transaction {} not found", tx_id),
    }
}

/// One row per transaction, one share column per member
fn export_csv(ledger: &LedgerService<SqliteStore>, period: &str, writer: Box<dyn Write>) -> Result<usize> {
    let block = ledger.block(period)?;
    let transactions = ledger.transactions_of(period)?;

    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec![
        "id".to_string(),
        "created_at".to_string(),
        "description".to_string(),
        "payer".to_string(),
        "amount".to_string(),
    ];
    header.extend(block.members.iter().map(|m| format!("share:{}", m.name)));
    csv.write_record(&header)?;

    for tx in &transactions {
        let mut record = vec![
            tx.id.clone(),
            tx.created_at.to_rfc3339(),
            tx.description.clone(),
            member_name(&block, &tx.payer).to_string(),
            tx.amount.to_string(),
        ];
        record.extend(block.members.iter().map(|m| {
            tx.shares
                .get(&m.id)
                .copied()
                .unwrap_or(Decimal::ZERO)
                .to_string()
        }));
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(transactions.len())
}
