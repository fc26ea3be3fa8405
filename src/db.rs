//! Database operations for the query service.
//!
//! This module provides the SQLite store holding profiles, their NAPTR
//! records and the phones activated against them. Lookups used by the
//! resolution engine run on the blocking thread pool.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::{Phone, PhoneLookup, PhoneStatus, Profile, Record, RecordLookup};
use crate::errors::DnsError;

/// Maximum number of pooled SQLite connections.
const POOL_SIZE: u32 = 8;

/// Schema of the provisioning tables.
const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS profiles (
        profile_id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL UNIQUE,
        tier INTEGER NOT NULL,
        created TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        record_id TEXT PRIMARY KEY NOT NULL,
        profile_id TEXT NOT NULL REFERENCES profiles(profile_id),
        "order" INTEGER NOT NULL,
        preference INTEGER NOT NULL,
        ttl INTEGER NOT NULL,
        domain_name TEXT NOT NULL,
        flags TEXT NOT NULL,
        service TEXT NOT NULL,
        regexp TEXT NOT NULL,
        uri TEXT NOT NULL,
        replacement TEXT NOT NULL,
        partner_id TEXT,
        created TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS records_profile_id_index ON records(profile_id);

    CREATE TABLE IF NOT EXISTS phones (
        phone_id TEXT PRIMARY KEY NOT NULL,
        profile_id TEXT NOT NULL REFERENCES profiles(profile_id),
        number TEXT NOT NULL,
        country_code TEXT NOT NULL,
        status TEXT NOT NULL,
        created TEXT NOT NULL,
        UNIQUE (number, country_code)
    );
    CREATE INDEX IF NOT EXISTS phones_profile_id_index ON phones(profile_id);
    CREATE INDEX IF NOT EXISTS phones_number_country_status_index
        ON phones(number, country_code, status);
"#;

const PHONE_COLUMNS: &str = "phone_id, number, country_code, profile_id, status, created";

const RECORD_COLUMNS: &str = r#"record_id, profile_id, "order", preference, flags, service,
    regexp, uri, replacement, ttl, domain_name, partner_id, created"#;

/// Fields of a record to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub record_id: String,
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    pub regexp: String,
    pub uri: String,
    pub replacement: String,
    pub ttl: u32,
    pub domain_name: String,
    pub partner_id: Option<String>,
}

/// Create the schema if it does not exist yet.
///
/// # Arguments
/// * `conn` - An open SQLite connection.
///
/// # Returns
/// A `Result` indicating success or failure.
pub fn init_db(conn: &Connection) -> Result<(), DnsError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// SQLite backed store of profiles, records and phones.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file.
    ///
    /// # Returns
    /// The store, or a `DnsError` if the pool or the schema cannot be set up.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, DnsError> {
        let manager = SqliteConnectionManager::file(db_path.as_ref())
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(POOL_SIZE).build(manager)?;

        init_db(&*pool.get()?)?;
        info!("Database ready at {}", db_path.as_ref().display());
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, DnsError> {
        Ok(self.pool.get()?)
    }

    /// Insert a profile.
    pub fn create_profile(&self, profile_id: &str, name: &str, tier: i64) -> Result<Profile, DnsError> {
        let created = Utc::now();
        self.conn()?.execute(
            "INSERT INTO profiles (profile_id, name, tier, created) VALUES (?1, ?2, ?3, ?4)",
            params![profile_id, name, tier, timestamp(&created)],
        )?;
        Ok(Profile {
            profile_id: profile_id.to_string(),
            name: name.to_string(),
            tier,
            created,
        })
    }

    /// Find a profile by id.
    pub fn get_profile_by_id(&self, profile_id: &str) -> Result<Option<Profile>, DnsError> {
        self.find_profile("profile_id", profile_id)
    }

    /// Find a profile by its unique name.
    pub fn get_profile_by_name(&self, name: &str) -> Result<Option<Profile>, DnsError> {
        self.find_profile("name", name)
    }

    fn find_profile(&self, column: &str, value: &str) -> Result<Option<Profile>, DnsError> {
        let sql = format!(
            "SELECT profile_id, name, tier, created FROM profiles WHERE {} = ?1",
            column
        );
        let profile = self
            .conn()?
            .query_row(&sql, params![value], |row| {
                Ok(Profile {
                    profile_id: row.get(0)?,
                    name: row.get(1)?,
                    tier: row.get(2)?,
                    created: created_at(row, 3)?,
                })
            })
            .optional()?;
        Ok(profile)
    }

    /// Insert a record for a profile.
    pub fn create_record(&self, profile_id: &str, record: &NewRecord) -> Result<Record, DnsError> {
        let created = Utc::now();
        self.conn()?.execute(
            &format!(
                "INSERT INTO records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                RECORD_COLUMNS
            ),
            params![
                record.record_id,
                profile_id,
                record.order,
                record.preference,
                record.flags,
                record.service,
                record.regexp,
                record.uri,
                record.replacement,
                record.ttl,
                record.domain_name,
                record.partner_id,
                timestamp(&created),
            ],
        )?;

        Ok(Record {
            record_id: record.record_id.clone(),
            profile_id: profile_id.to_string(),
            order: record.order,
            preference: record.preference,
            flags: record.flags.clone(),
            service: record.service.clone(),
            regexp: record.regexp.clone(),
            uri: record.uri.clone(),
            replacement: record.replacement.clone(),
            ttl: record.ttl,
            domain_name: record.domain_name.clone(),
            partner_id: record.partner_id.clone(),
            created,
        })
    }

    /// Records of a profile ordered by `(order, preference)` ascending.
    pub fn records_by_profile_id(&self, profile_id: &str) -> Result<Vec<Record>, DnsError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM records WHERE profile_id = ?1 ORDER BY "order" ASC, preference ASC"#,
            RECORD_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![profile_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Found {} records for profile {}", records.len(), profile_id);
        Ok(records)
    }

    /// Delete every record of a profile.
    ///
    /// # Returns
    /// The number of deleted records.
    pub fn remove_records_for_profile(&self, profile_id: &str) -> Result<usize, DnsError> {
        Ok(self
            .conn()?
            .execute("DELETE FROM records WHERE profile_id = ?1", params![profile_id])?)
    }

    /// Activate or register a phone against a profile.
    pub fn create_phone(
        &self,
        phone_id: &str,
        number: &str,
        country_code: &str,
        profile_id: &str,
        status: PhoneStatus,
    ) -> Result<Phone, DnsError> {
        let created = Utc::now();
        self.conn()?.execute(
            &format!("INSERT INTO phones ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", PHONE_COLUMNS),
            params![
                phone_id,
                number,
                country_code,
                profile_id,
                status.as_str(),
                timestamp(&created)
            ],
        )?;
        Ok(Phone {
            phone_id: phone_id.to_string(),
            number: number.to_string(),
            country_code: country_code.to_string(),
            profile_id: profile_id.to_string(),
            status: status.as_str().to_string(),
            created,
        })
    }

    /// Change the status of a phone.
    ///
    /// # Returns
    /// `true` if a phone with that id existed.
    pub fn update_phone_status(&self, phone_id: &str, status: PhoneStatus) -> Result<bool, DnsError> {
        let updated = self.conn()?.execute(
            "UPDATE phones SET status = ?1 WHERE phone_id = ?2",
            params![status.as_str(), phone_id],
        )?;
        Ok(updated > 0)
    }

    /// Delete a phone.
    pub fn remove_phone(&self, phone_id: &str) -> Result<bool, DnsError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM phones WHERE phone_id = ?1", params![phone_id])?;
        Ok(removed > 0)
    }

    /// Find the phone for a national number and country code.
    pub fn phone_by_number(&self, number: &str, country_code: &str) -> Result<Option<Phone>, DnsError> {
        let phone = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM phones WHERE number = ?1 AND country_code = ?2",
                    PHONE_COLUMNS
                ),
                params![number, country_code],
                phone_from_row,
            )
            .optional()?;
        Ok(phone)
    }

    /// Phones of a profile, oldest first.
    pub fn phones_by_profile_id(&self, profile_id: &str) -> Result<Vec<Phone>, DnsError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM phones WHERE profile_id = ?1 ORDER BY created ASC, rowid ASC",
            PHONE_COLUMNS
        ))?;
        let phones = stmt
            .query_map(params![profile_id], phone_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(phones)
    }

    /// Run a blocking store call on the blocking thread pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, DnsError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, DnsError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DnsError::Lookup(format!("lookup task failed: {}", e)))?
    }
}

#[async_trait]
impl PhoneLookup for SqliteStore {
    async fn get_by_number(
        &self,
        number: &str,
        country_code: &str,
    ) -> Result<Option<Phone>, DnsError> {
        let (number, country_code) = (number.to_string(), country_code.to_string());
        self.blocking(move |store| store.phone_by_number(&number, &country_code))
            .await
    }

    async fn get_by_profile_id(&self, profile_id: &str) -> Result<Vec<Phone>, DnsError> {
        let profile_id = profile_id.to_string();
        self.blocking(move |store| store.phones_by_profile_id(&profile_id))
            .await
    }
}

#[async_trait]
impl RecordLookup for SqliteStore {
    async fn get_records_by_profile_id(&self, profile_id: &str) -> Result<Vec<Record>, DnsError> {
        let profile_id = profile_id.to_string();
        self.blocking(move |store| store.records_by_profile_id(&profile_id))
            .await
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn created_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn phone_from_row(row: &Row<'_>) -> rusqlite::Result<Phone> {
    Ok(Phone {
        phone_id: row.get(0)?,
        number: row.get(1)?,
        country_code: row.get(2)?,
        profile_id: row.get(3)?,
        status: row.get(4)?,
        created: created_at(row, 5)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        record_id: row.get(0)?,
        profile_id: row.get(1)?,
        order: row.get(2)?,
        preference: row.get(3)?,
        flags: row.get(4)?,
        service: row.get(5)?,
        regexp: row.get(6)?,
        uri: row.get(7)?,
        replacement: row.get(8)?,
        ttl: row.get(9)?,
        domain_name: row.get(10)?,
        partner_id: row.get(11)?,
        created: created_at(row, 12)?,
    })
}
