// CSV export and idempotent import of payments
//
// Columns: date, name, amount, category, payment_method, is_essential, notes,
// transaction_reference. Rows without a reference get a SHA-256 of
// date + name + amount + category as their reference. A row is skipped when
// its reference already exists for the user, or when a payment with the same
// day, name, amount and category does, so importing the same file twice (or
// re-importing an export of hand-entered payments) inserts nothing.

use crate::db::{record_event, Event};
use crate::entities::category::{self, Category, CategoryParams};
use crate::entities::payment::{self, PaymentParams, Scope};
use crate::entities::user::User;
use crate::error::ValidationFailed;
use crate::period;
use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

/// Icon given to categories created on the fly during import
const IMPORTED_CATEGORY_ICON: &str = "📥";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`
    pub date: String,
    pub name: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub is_essential: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub transaction_reference: Option<String>,
}

impl PaymentRecord {
    /// Deduplication key for rows that carry no reference of their own
    pub fn compute_idempotency_hash(&self) -> String {
        let day = period::parse_timestamp(&self.date)
            .map(|ts| ts.date().to_string())
            .unwrap_or_else(|| self.date.trim().to_string());
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}{}{}{}",
            day,
            self.name.trim(),
            self.amount,
            self.category.trim().to_lowercase()
        ));
        format!("{:x}", hasher.finalize())
    }

    fn reference(&self) -> String {
        match self.transaction_reference.as_deref().map(str::trim) {
            Some(reference) if !reference.is_empty() => reference.to_string(),
            _ => self.compute_idempotency_hash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based data row, header excluded
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub categories_created: usize,
    pub errors: Vec<RowError>,
}

// ============================================================================
// EXPORT
// ============================================================================

/// Write every payment of the user, oldest first. Returns the row count.
pub fn export_payments<W: Write>(conn: &Connection, user_id: i64, writer: W) -> Result<usize> {
    let names: HashMap<i64, String> = category::list(conn, user_id)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let mut payments = payment::list_for_user(conn, user_id, Scope::Recent, None)?;
    payments.reverse();

    let mut wtr = csv::Writer::from_writer(writer);
    for p in &payments {
        let mut record = PaymentRecord {
            date: p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            name: p.name.clone(),
            amount: p.amount,
            category: names.get(&p.category_id).cloned().unwrap_or_default(),
            payment_method: p.payment_method.map(|m| m.as_str().to_string()),
            is_essential: Some(p.is_essential),
            notes: p.notes.clone(),
            transaction_reference: p.transaction_reference.clone(),
        };
        if record.transaction_reference.is_none() {
            record.transaction_reference = Some(record.compute_idempotency_hash());
        }
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(payments.len())
}

pub fn export_to_path(conn: &Connection, user_id: i64, path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    export_payments(conn, user_id, file)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Import payments for `owner`. Bad rows are reported and skipped; the rest commit together.
pub fn import_payments<R: Read>(conn: &Connection, owner: &User, reader: R) -> Result<ImportReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut categories: HashMap<String, Category> = category::list(&tx, owner.id)?
        .into_iter()
        .map(|c| (c.name.to_lowercase(), c))
        .collect();
    let mut report = ImportReport::default();

    for (index, result) in rdr.deserialize::<PaymentRecord>().enumerate() {
        let row = index + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                report.errors.push(RowError {
                    row,
                    message: format!("Failed to deserialize row: {}", e),
                });
                continue;
            }
        };
        if let Err(e) = import_record(&tx, owner, &mut categories, &record, &mut report) {
            report.errors.push(RowError {
                row,
                message: describe(&e),
            });
        }
    }

    record_event(
        &tx,
        Event::new(
            "payments_imported",
            "user",
            &owner.id.to_string(),
            serde_json::json!({
                "inserted": report.inserted,
                "duplicates": report.duplicates,
                "categories_created": report.categories_created,
                "errors": report.errors.len(),
            }),
            "csv_importer",
        ),
    );
    tx.commit()?;

    tracing::info!(
        user_id = owner.id,
        inserted = report.inserted,
        duplicates = report.duplicates,
        errors = report.errors.len(),
        "CSV import finished"
    );
    Ok(report)
}

pub fn import_from_path(conn: &Connection, owner: &User, path: &Path) -> Result<ImportReport> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    import_payments(conn, owner, file)
}

fn import_record(
    conn: &Connection,
    owner: &User,
    categories: &mut HashMap<String, Category>,
    record: &PaymentRecord,
    report: &mut ImportReport,
) -> Result<()> {
    let reference = record.reference();
    if payment::find_by_reference(conn, owner.id, &reference)?.is_some() {
        report.duplicates += 1;
        return Ok(());
    }

    let key = record.category.trim().to_lowercase();
    if let (Some(existing), Some(at)) = (categories.get(&key), period::parse_timestamp(&record.date)) {
        let same = payment::find_same_entry(
            conn,
            owner.id,
            existing.id,
            record.name.trim(),
            record.amount,
            at.date(),
        )?;
        if same.is_some() {
            report.duplicates += 1;
            return Ok(());
        }
    }

    if !categories.contains_key(&key) {
        let created = category::create(
            conn,
            owner,
            CategoryParams {
                name: Some(record.category.trim().to_string()),
                icon: Some(IMPORTED_CATEGORY_ICON.to_string()),
                ..Default::default()
            },
        )?;
        report.categories_created += 1;
        categories.insert(key.clone(), created);
    }
    let Some(target) = categories.get(&key) else {
        return Ok(());
    };

    payment::create(
        conn,
        owner.id,
        target,
        PaymentParams {
            name: Some(record.name.clone()),
            amount: Some(record.amount),
            payment_method: record.payment_method.clone().filter(|m| !m.is_empty()),
            transaction_reference: Some(reference),
            is_essential: record.is_essential,
            notes: record.notes.clone().filter(|n| !n.is_empty()),
            created_at: Some(record.date.clone()),
        },
    )?;
    report.inserted += 1;
    Ok(())
}

fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ValidationFailed>() {
        Some(failed) => failed
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_events_for_entity, setup_database};
    use crate::entities::user::{self, Role, UserParams};

    fn setup() -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let owner = user::create(
            &conn,
            UserParams {
                name: Some("Kondwani".into()),
                email: Some("kondwani@zm.com".into()),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        (conn, owner)
    }

    const SAMPLE: &str = "date,name,amount,category,payment_method,is_essential,notes,transaction_reference
2026-01-05,Mealie meal,180,Food,cash,true,,
2026-01-06 12:30:00,Bus fare,25.5,Transport,mtn_momo,true,to town,
2026-01-07,Airtime,-3,Transport,,,,
";

    #[test]
    fn test_import_is_idempotent() {
        let (conn, owner) = setup();

        let first = import_payments(&conn, &owner, SAMPLE.as_bytes()).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.categories_created, 2);
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.errors[0].row, 3);
        assert!(first.errors[0].message.contains("amount"));

        let second = import_payments(&conn, &owner, SAMPLE.as_bytes()).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.categories_created, 0);

        let payments = payment::list_for_user(&conn, owner.id, Scope::Recent, None).unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].name, "Bus fare");
        assert_eq!(payments[0].created_at.to_string(), "2026-01-06 12:30:00");
        assert_eq!(payments[0].transaction_reference.as_ref().map(String::len), Some(64));

        let events = get_events_for_entity(&conn, "user", &owner.id.to_string()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_hash_ignores_time_of_day_and_category_case() {
        let a = PaymentRecord {
            date: "2026-01-05".into(),
            name: "Mealie meal".into(),
            amount: 180.0,
            category: "Food".into(),
            payment_method: None,
            is_essential: None,
            notes: None,
            transaction_reference: None,
        };
        let b = PaymentRecord {
            date: "2026-01-05 08:00:00".into(),
            category: "food".into(),
            ..a.clone()
        };
        assert_eq!(a.compute_idempotency_hash(), b.compute_idempotency_hash());
        let c = PaymentRecord { amount: 181.0, ..a.clone() };
        assert_ne!(a.compute_idempotency_hash(), c.compute_idempotency_hash());
    }

    #[test]
    fn test_export_then_import_through_files() {
        let (conn, owner) = setup();
        import_payments(&conn, &owner, SAMPLE.as_bytes()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payments.csv");
        assert_eq!(export_to_path(&conn, owner.id, &path).unwrap(), 2);

        let exported = std::fs::read_to_string(&path).unwrap();
        assert!(exported.starts_with("date,name,amount,category"));
        assert!(exported.contains("Mealie meal"));

        // Same user: every row is already present
        let again = import_from_path(&conn, &owner, &path).unwrap();
        assert_eq!(again.duplicates, 2);
        assert_eq!(again.inserted, 0);

        // Another user gets a faithful copy
        let other = user::create(
            &conn,
            UserParams {
                name: Some("Lubinda".into()),
                email: Some("lubinda@zm.com".into()),
                ..Default::default()
            },
            Role::Default,
        )
        .unwrap();
        let copied = import_from_path(&conn, &other, &path).unwrap();
        assert_eq!(copied.inserted, 2);
        let payments = payment::list_for_user(&conn, other.id, Scope::Recent, None).unwrap();
        assert_eq!(payments[1].amount, 180.0);
        assert_eq!(payments[0].notes.as_deref(), Some("to town"));
    }

    #[test]
    fn test_reimporting_hand_entered_payments_skips_them() {
        let (conn, owner) = setup();
        let food = category::create(
            &conn,
            &owner,
            CategoryParams {
                name: Some("Food".into()),
                icon: Some("🍲".into()),
                ..Default::default()
            },
        )
        .unwrap();
        payment::create(
            &conn,
            owner.id,
            &food,
            PaymentParams {
                name: Some("Kapenta".into()),
                amount: Some(95.0),
                created_at: Some("2026-02-03 18:15:00".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let mut csv = Vec::new();
        assert_eq!(export_payments(&conn, owner.id, &mut csv).unwrap(), 1);
        let exported = String::from_utf8(csv.clone()).unwrap();
        let hash = PaymentRecord {
            date: "2026-02-03".into(),
            name: "Kapenta".into(),
            amount: 95.0,
            category: "Food".into(),
            payment_method: None,
            is_essential: None,
            notes: None,
            transaction_reference: None,
        }
        .compute_idempotency_hash();
        assert!(exported.contains(&hash));

        let report = import_payments(&conn, &owner, csv.as_slice()).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.duplicates, 1);
        let payments = payment::list_for_user(&conn, owner.id, Scope::Recent, None).unwrap();
        assert_eq!(payments.len(), 1);
    }
}
