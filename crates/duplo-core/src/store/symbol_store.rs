//! SQLite persistence for origin-tracked symbols.
//!
//! Each public method opens its own connection so callers never manage
//! connection lifetime. Symbols are keyed by origin signature plus location
//! and are replaced wholesale per file on every scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{DuploError, DuploResult};
use crate::indexer::pipeline::{FileRecord, ProjectExtraction};
use crate::models::Symbol;
use crate::store::schema;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw == "~" || raw.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if raw.len() > 2 {
                expanded.push(&raw[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

/// Stable positive integer id for a symbol, for consumers that need a
/// numeric key (similarity backends, external indexes).
pub fn numeric_symbol_id(symbol_id: &str) -> i64 {
    (crc32fast::hash(symbol_id.as_bytes()) & 0x7FFF_FFFF) as i64
}

pub struct SymbolStore {
    db_path: PathBuf,
}

impl SymbolStore {
    /// Create a store at `db_path`, creating parent directories as needed.
    /// The schema is not touched until [`SymbolStore::init_schema`].
    pub fn new(db_path: impl AsRef<Path>) -> DuploResult<Self> {
        let db_path = expand_tilde(db_path.as_ref());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { db_path })
    }

    /// Open the store and bring its schema up to date.
    pub fn open(db_path: impl AsRef<Path>) -> DuploResult<Self> {
        let store = Self::new(db_path)?;
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> DuploResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    pub fn init_schema(&self) -> DuploResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    pub fn set_repo_meta(&self, key: &str, value: &str) -> DuploResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO repo_meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_repo_meta(&self, key: &str) -> DuploResult<Option<String>> {
        let conn = self.connect()?;
        let value = conn
            .query_row(
                "SELECT value FROM repo_meta WHERE key = ?1;",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn upsert_files(&self, files: &[FileRecord]) -> DuploResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO files(path, language, content_hash, size_bytes) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(path) DO UPDATE SET \
                     language = excluded.language, \
                     content_hash = excluded.content_hash, \
                     size_bytes = excluded.size_bytes, \
                     last_indexed_at = CURRENT_TIMESTAMP;",
            )?;
            for file in files {
                stmt.execute(params![
                    file.path,
                    file.language,
                    file.content_hash,
                    file.size_bytes
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Replace every symbol stored for `file_path`. The file must already be
    /// registered via [`SymbolStore::upsert_files`]. Symbols are deduped by
    /// `(origin_signature, file, line)`; returns how many rows were written.
    pub fn replace_file_symbols(&self, file_path: &str, symbols: &[Symbol]) -> DuploResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file_path = ?1;", params![file_path])?;

        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO symbols ( \
                     id, numeric_id, origin_signature, name, kind, file_path, \
                     line, end_line, is_definition, body, metadata_json \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            )?;
            let mut seen: HashSet<(String, i64)> = HashSet::new();
            for sym in symbols.iter().filter(|s| s.file == file_path) {
                if !seen.insert((sym.origin_signature.clone(), sym.line)) {
                    continue;
                }
                let id = sym.id();
                let metadata = serde_json::to_string(&Value::Object(sym.to_metadata()))?;
                stmt.execute(params![
                    id,
                    numeric_symbol_id(&id),
                    sym.origin_signature,
                    sym.name,
                    sym.kind.as_str(),
                    sym.file,
                    sym.line,
                    sym.end_line,
                    sym.is_definition as i64,
                    sym.body,
                    metadata,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Drop a file and its symbols.
    pub fn remove_file(&self, file_path: &str) -> DuploResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file_path = ?1;", params![file_path])?;
        tx.execute("DELETE FROM files WHERE path = ?1;", params![file_path])?;
        tx.commit()?;
        Ok(())
    }

    /// Persist a whole extraction pass: files first, then each file's
    /// symbols, then drop files that disappeared since the last pass.
    pub fn persist_extraction(&self, extraction: &ProjectExtraction) -> DuploResult<usize> {
        self.upsert_files(&extraction.files)?;

        let mut by_file: IndexMap<&str, Vec<Symbol>> = IndexMap::new();
        for file in &extraction.files {
            by_file.entry(file.path.as_str()).or_default();
        }
        for symbol in &extraction.symbols {
            if let Some(bucket) = by_file.get_mut(symbol.file.as_str()) {
                bucket.push(symbol.clone());
            }
        }

        let mut written = 0usize;
        for (file_path, symbols) in &by_file {
            written += self.replace_file_symbols(file_path, symbols)?;
        }

        let current: HashSet<&str> = by_file.keys().copied().collect();
        for stale in self.file_paths()? {
            if !current.contains(stale.as_str()) {
                self.remove_file(&stale)?;
            }
        }
        debug!(files = by_file.len(), symbols = written, "symbol store updated");
        Ok(written)
    }

    pub fn file_paths(&self) -> DuploResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path;")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    pub fn count_symbols(&self) -> DuploResult<i64> {
        let conn = self.connect()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM symbols;", [], |row| row.get(0))?)
    }

    /// Load every stored symbol, ordered by file and line.
    pub fn load_symbols(&self) -> DuploResult<Vec<Symbol>> {
        self.load_where("1 = 1", &[])
    }

    /// All occurrences sharing one origin signature.
    pub fn symbols_for_signature(&self, signature: &str) -> DuploResult<Vec<Symbol>> {
        self.load_where("origin_signature = ?1", &[signature])
    }

    fn load_where(&self, clause: &str, args: &[&str]) -> DuploResult<Vec<Symbol>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT metadata_json, body FROM symbols WHERE {clause} ORDER BY file_path, line;"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(metadata_json, body)| {
                let meta: Map<String, Value> = match serde_json::from_str(&metadata_json)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(DuploError::Database(
                            "symbol metadata is not a JSON object".to_string(),
                        ))
                    }
                };
                Symbol::from_metadata(&meta, &body)
            })
            .collect()
    }
}
