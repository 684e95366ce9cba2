// Kwacha Ledger - command line
//
// Database maintenance and one-off job runs. The JSON API lives in the
// `kwacha-server` binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kwacha_ledger::entities::user::{self, Role, UserParams};
use kwacha_ledger::{db, import, jobs, logging, AppConfig, ExchangeRates, Job};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kwacha-ledger", version, about = "Personal finance ledger")]
struct Cli {
    /// Database file (overrides config and KWACHA_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Register a user
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        monthly_income: Option<f64>,
        #[arg(long)]
        admin: bool,
    },
    /// Seed economic indicators and BNNB baskets
    Seed,
    /// Run one background job now
    Job {
        #[arg(value_enum)]
        job: Job,
    },
    /// Import payments for a user from CSV
    Import {
        #[arg(long)]
        user: i64,
        file: PathBuf,
    },
    /// Export a user's payments to CSV
    Export {
        #[arg(long)]
        user: i64,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    logging::init(&config.logging.filter);

    let conn = db::open_database(&config.database.path)?;

    match cli.command {
        Command::Init => {
            println!("✓ Database ready at {}", config.database.path.display());
        }
        Command::CreateUser {
            name,
            email,
            monthly_income,
            admin,
        } => {
            let role = if admin { Role::Admin } else { Role::Default };
            let created = user::create(
                &conn,
                UserParams {
                    name: Some(name),
                    email: Some(email),
                    monthly_income,
                    ..Default::default()
                },
                role,
            )?;
            println!("✓ Created user {} ({}) as {}", created.id, created.email, role.as_str());
        }
        Command::Seed => {
            let report = jobs::seed_economic_data(&conn)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Job { job } => {
            let rates = Arc::new(ExchangeRates::from_config(&config.exchange_rate)?);
            let shared = db::shared(conn);
            let outcome = jobs::run(job, &shared, &rates).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Import { user: user_id, file } => {
            let owner = user::find(&conn, user_id)?;
            let report = import::import_from_path(&conn, &owner, &file)?;
            println!(
                "✓ Imported {} payments ({} duplicates, {} new categories)",
                report.inserted, report.duplicates, report.categories_created
            );
            for row_error in &report.errors {
                eprintln!("  row {}: {}", row_error.row, row_error.message);
            }
        }
        Command::Export { user: user_id, file } => {
            let owner = user::find(&conn, user_id)?;
            let rows = import::export_to_path(&conn, owner.id, &file)
                .with_context(|| format!("Failed to export payments for user {}", owner.id))?;
            println!("✓ Exported {} payments to {}", rows, file.display());
        }
    }

    Ok(())
}
