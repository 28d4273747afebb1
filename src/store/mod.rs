use std::{path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension};

use crate::page_scrapers::Reading;

const SCHEMA: &str = include_str!("schema.sql");
/// Format SQLite uses for `current_timestamp`, always UTC.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";


/// Lowest price ever stored and when it was first seen.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MinimumPrice {
    pub(crate) price: f64,
    pub(crate) created_at: DateTime<Utc>,
}


/// The most recently stored reading.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LatestReading {
    pub(crate) price: f64,
    pub(crate) stock: u32,
    pub(crate) created_at: DateTime<Utc>,
}


fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, SQLITE_DATETIME)
        .map(|dt| dt.and_utc())
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}


/// Append-only history of readings, backed by a single SQLite table.
///
/// A `Store` is opened once per run. [`Store::close`] should be called on every
/// path out of the run so close errors get logged, dropping it closes silently.
pub(crate) struct Store {
    conn: Connection,
}


impl Store {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("failed to set busy timeout")?;

        info!("Database opened at {}", path.display());
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    /// Creates the `items` table unless it already exists.
    pub(crate) fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("failed to create items table")
    }

    pub(crate) fn insert(&self, reading: &Reading) -> Result<()> {
        debug!("Inserting price {} stock {} for {}", reading.price, reading.stock, reading.url);
        self.conn
            .execute(
                "INSERT INTO items (url, price, stock) VALUES (?1, ?2, ?3)",
                params![reading.url.as_str(), reading.price, reading.stock],
            )
            .with_context(|| "failed to insert reading")?;
        Ok(())
    }

    /// `None` while the table holds no priced rows. Ties go to the earliest row.
    pub(crate) fn minimum_price(&self) -> Result<Option<MinimumPrice>> {
        let row = self
            .conn
            .query_row(
                "SELECT price, created_at FROM items
                 WHERE price IS NOT NULL
                 ORDER BY price ASC, rowid ASC
                 LIMIT 1",
                [],
                |row| Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("failed to query minimum price")?;

        match row {
            Some((price, created_at)) => Ok(Some(MinimumPrice {
                price,
                created_at: parse_datetime(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    /// The last row inserted, by arrival order rather than by timestamp since
    /// `current_timestamp` only has second resolution.
    pub(crate) fn latest_reading(&self) -> Result<Option<LatestReading>> {
        let row = self
            .conn
            .query_row(
                "SELECT price, stock, created_at FROM items
                 WHERE price IS NOT NULL
                 ORDER BY rowid DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, Option<u32>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query latest reading")?;

        match row {
            Some((price, stock, created_at)) => Ok(Some(LatestReading {
                price,
                stock: stock.unwrap_or(0),
                created_at: parse_datetime(&created_at)?,
            })),
            None => Ok(None),
        }
    }

    pub(crate) fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .context("failed to count readings")?;
        u64::try_from(count).map_err(|_| anyhow!("negative row count {count}"))
    }

    pub(crate) fn close(self) {
        match self.conn.close() {
            Ok(()) => debug!("Database closed"),
            Err((_, err)) => error!("Failed to close database: {err}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use chrono::Local;

    use super::*;

    fn reading(price: f64, stock: u32) -> Reading {
        Reading {
            url: "https://example.com/p/1".parse().unwrap(),
            price,
            stock,
            checked_at: Local::now(),
        }
    }

    fn store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn rows(store: &Store) -> Vec<(String, f64, u32)> {
        let mut stmt = store
            .conn
            .prepare("SELECT url, price, stock FROM items ORDER BY rowid ASC")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        rows
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let store = store();
        store.ensure_schema().unwrap();
        store.insert(&reading(10.0, 1)).unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn empty_table_has_no_aggregates() {
        let store = store();
        assert_eq!(store.minimum_price().unwrap(), None);
        assert_eq!(store.latest_reading().unwrap(), None);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn inserts_are_kept_in_order() {
        let store = store();
        let prices = [120.0, 99.5, 130.0, 99.5, 150.0];
        for (i, price) in prices.iter().enumerate() {
            store.insert(&reading(*price, i as u32)).unwrap();
        }

        let stored = rows(&store);
        assert_eq!(stored.len(), prices.len());
        for (i, (url, price, stock)) in stored.into_iter().enumerate() {
            assert_eq!(url, "https://example.com/p/1");
            assert_eq!(price, prices[i]);
            assert_eq!(stock, i as u32);
        }
    }

    #[test]
    fn minimum_and_latest_track_inserts() {
        let store = store();
        store.insert(&reading(120.0, 5)).unwrap();
        assert_eq!(store.minimum_price().unwrap().unwrap().price, 120.0);

        store.insert(&reading(99.0, 4)).unwrap();
        store.insert(&reading(110.0, 3)).unwrap();

        assert_eq!(store.minimum_price().unwrap().unwrap().price, 99.0);
        let latest = store.latest_reading().unwrap().unwrap();
        assert_eq!(latest.price, 110.0);
        assert_eq!(latest.stock, 3);
    }

    #[test]
    fn duplicate_readings_are_allowed() {
        let store = store();
        store.insert(&reading(100.0, 2)).unwrap();
        store.insert(&reading(100.0, 2)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn store_stamps_creation_time() {
        let store = store();
        let before = Utc::now() - chrono::Duration::seconds(2);
        store.insert(&reading(10.0, 1)).unwrap();
        let latest = store.latest_reading().unwrap().unwrap();
        assert!(latest.created_at >= before);
        assert!(latest.created_at <= Utc::now() + chrono::Duration::seconds(2));
    }

    #[test]
    fn opens_database_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let store = Store::open(&path).unwrap();
        store.ensure_schema().unwrap();
        store.insert(&reading(1.0, 1)).unwrap();
        store.close();

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        reopened.close();
    }
}
