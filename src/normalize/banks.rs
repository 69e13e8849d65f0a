//! Seed bank registry loading and synchronization.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::domain::{BankRecord, slugify};
use crate::error::AppError;

/// Load the seed bank list from the reference CSV.
pub fn load_seed_banks(path: &Path) -> Result<Vec<BankRecord>, AppError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        AppError::config(format!(
            "Seed bank registry not found at '{}': {e}",
            path.display()
        ))
    })?;

    let mut banks = Vec::new();
    for result in reader.deserialize() {
        let bank: BankRecord = result
            .map_err(|e| AppError::config(format!("Invalid seed bank row: {e}")))?;
        banks.push(bank);
    }
    Ok(banks)
}

/// Upsert seed banks into the `banks` table.
pub fn sync_banks(conn: &Connection, banks: &[BankRecord]) -> Result<(), AppError> {
    if banks.is_empty() {
        warn!("No seed banks provided; registry will remain unchanged.");
        return Ok(());
    }
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO banks (bank_id, name, country, regulator)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(bank_id) DO UPDATE SET
            name=excluded.name,
            country=excluded.country,
            regulator=excluded.regulator,
            updated_at=CURRENT_TIMESTAMP
        "#,
    )?;
    for bank in banks {
        stmt.execute(rusqlite::params![
            bank.bank_id,
            bank.name,
            bank.country,
            bank.regulator,
        ])?;
    }
    info!("Synchronized {} banks into the registry", banks.len());
    Ok(())
}

/// Slug map used by the transformer to resolve declared bank names.
///
/// Both the display name and the id are mapped, since catalogs sometimes
/// reference banks by identifier rather than legal name.
pub fn bank_lookup(banks: &[BankRecord]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for bank in banks {
        mapping.insert(slugify(&bank.name), bank.bank_id.clone());
        mapping.insert(slugify(&bank.bank_id), bank.bank_id.clone());
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::io::Write;

    #[test]
    fn seed_banks_round_trip_through_registry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bank_id,name,country,regulator").unwrap();
        writeln!(file, "gt-bi,\"Banco Industrial, S.A.\",Guatemala,SIB").unwrap();
        writeln!(file, "gt-banrural,\"Banco de Desarrollo Rural, S.A.\",Guatemala,SIB").unwrap();

        let banks = load_seed_banks(file.path()).unwrap();
        assert_eq!(banks.len(), 2);

        let conn = Connection::open_in_memory().unwrap();
        db::ensure_schema(&conn).unwrap();
        sync_banks(&conn, &banks).unwrap();
        sync_banks(&conn, &banks).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM banks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn lookup_maps_both_name_and_id_slugs() {
        let banks = vec![BankRecord {
            bank_id: "gt-bi".to_string(),
            name: "Banco Industrial, S.A.".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
        }];
        let lookup = bank_lookup(&banks);
        assert_eq!(lookup[&slugify("Banco Industrial, S.A.")], "gt-bi");
        assert_eq!(lookup[&slugify("gt-bi")], "gt-bi");
    }
}
