use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Connection shared between request handlers and the job scheduler
pub type SharedDb = Arc<Mutex<Connection>>;

/// Far-future date used as the open end of a date range in SQL comparisons
pub const OPEN_END_DATE: &str = "9999-12-31";

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

/// Wrap a connection for sharing across tasks
pub fn shared(conn: Connection) -> SharedDb {
    Arc::new(Mutex::new(conn))
}

/// Acquire the shared connection
pub fn lock(db: &SharedDb) -> Result<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| anyhow!("database mutex poisoned"))
}

/// Event for the audit trail: every significant write leaves one behind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory" and that's fine
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users & plans
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'default',
            monthly_income REAL,
            currency TEXT NOT NULL DEFAULT 'ZMW',
            phone_number TEXT,
            mtn_momo_number TEXT,
            airtel_money_number TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
            plan_name TEXT NOT NULL DEFAULT 'free',
            status TEXT NOT NULL DEFAULT 'active',
            start_date TEXT NOT NULL,
            end_date TEXT,
            amount REAL NOT NULL DEFAULT 0,
            features TEXT NOT NULL DEFAULT '{}'
        );",
    )?;

    // ==========================================================================
    // Spending: categories, payments, budgets, recurring transactions
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            icon TEXT NOT NULL,
            description TEXT,
            color TEXT NOT NULL DEFAULT '#3778c2',
            icon_name TEXT,
            category_type TEXT NOT NULL DEFAULT 'variable',
            created_at TEXT NOT NULL,
            UNIQUE (name, user_id)
        );

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            payment_method TEXT,
            transaction_reference TEXT,
            is_essential INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS budgets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            monthly_limit REAL NOT NULL,
            start_date TEXT,
            end_date TEXT,
            inflation_adjusted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recurring_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            frequency TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            next_occurrence TEXT,
            last_occurrence TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            payment_method TEXT,
            is_essential INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            occurrences_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Debts, goals, investments
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS debts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            lender_name TEXT NOT NULL,
            principal_amount REAL NOT NULL,
            interest_rate REAL,
            monthly_payment REAL,
            term INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            start_date TEXT,
            end_date TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS financial_goals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            description TEXT,
            target_amount REAL NOT NULL,
            current_amount REAL NOT NULL DEFAULT 0,
            start_date TEXT NOT NULL,
            target_date TEXT NOT NULL,
            completion_date TEXT,
            goal_type TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            priority TEXT NOT NULL DEFAULT 'medium',
            progress_history TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS investments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            investment_type TEXT NOT NULL,
            initial_amount REAL NOT NULL DEFAULT 0,
            current_value REAL NOT NULL DEFAULT 0,
            target_value REAL,
            start_date TEXT,
            target_date TEXT,
            last_updated TEXT,
            risk_level INTEGER,
            institution TEXT,
            account_number TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            value_history TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS investment_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            investment_id INTEGER NOT NULL REFERENCES investments(id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            transaction_date TEXT NOT NULL,
            transaction_type TEXT NOT NULL,
            description TEXT,
            reference_number TEXT,
            created_at TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Reference data: economic indicators & basic needs basket
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS economic_indicators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL UNIQUE,
            inflation_rate REAL,
            usd_zmw_rate REAL,
            source TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bnnb_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            month TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT 'Lusaka',
            total_basket REAL NOT NULL,
            food_basket REAL,
            non_food_basket REAL NOT NULL,
            item_breakdown TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE (month, location)
        );",
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_payments_user_created ON payments(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_payments_user_category ON payments(user_id, category_id);
        CREATE INDEX IF NOT EXISTS idx_payments_reference ON payments(user_id, transaction_reference);
        CREATE INDEX IF NOT EXISTS idx_budgets_user_category ON budgets(user_id, category_id, start_date);
        CREATE INDEX IF NOT EXISTS idx_debts_user_status ON debts(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_goals_user_completed ON financial_goals(user_id, completed);
        CREATE INDEX IF NOT EXISTS idx_recurring_user_active ON recurring_transactions(user_id, active);
        CREATE INDEX IF NOT EXISTS idx_recurring_next ON recurring_transactions(next_occurrence);
        CREATE INDEX IF NOT EXISTS idx_investments_user_active ON investments(user_id, active);
        CREATE INDEX IF NOT EXISTS idx_investment_tx_type ON investment_transactions(investment_id, transaction_type);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| conversion_error(1, e.to_string()))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| conversion_error(5, e.to_string()))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Record an event without letting audit failures break the write it describes
pub fn record_event(conn: &Connection, event: Event) {
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(event_type = %event.event_type, error = %e, "failed to record audit event");
    }
}

// ============================================================================
// Column helpers
// ============================================================================

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

/// Decode an enum stored as text
pub(crate) fn enum_column<T>(
    idx: usize,
    raw: String,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unexpected value '{}'", raw)))
}

/// Decode a JSON document stored as text
pub(crate) fn json_column<T: DeserializeOwned + Default>(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<T> {
    match raw {
        Some(text) if !text.trim().is_empty() => {
            serde_json::from_str(&text).map_err(|e| conversion_error(idx, e.to_string()))
        }
        _ => Ok(T::default()),
    }
}

/// True when the error chain bottoms out in a SQLite constraint violation
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
