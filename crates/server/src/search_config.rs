// crates/server/src/search_config.rs
//! Persistent search configuration.
//!
//! Stored as six lines, one value per line, in [`SearchConfig::KEYS`] order.
//! Blank or missing lines fall back to the defaults.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub filter: String,
    pub output_qty: String,
    pub program: String,
    pub database: String,
    pub non_anomaly: String,
    pub species_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            filter: "mL".into(),
            output_qty: "1000".into(),
            program: "blastn".into(),
            database: "nt".into(),
            non_anomaly: "sus scrofa".into(),
            species_name: "Sample".into(),
        }
    }
}

impl SearchConfig {
    /// Canonical key order, shared by the file format and `GET /getconfig`.
    pub const KEYS: [&'static str; 6] = [
        "filter",
        "output_qty",
        "program",
        "database",
        "non_anomaly",
        "species_name",
    ];

    /// Build from values in canonical order. Missing or blank entries keep
    /// their default; the rest are trimmed.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for (slot, value) in config.slots_mut().into_iter().zip(values) {
            let value = value.as_ref().trim();
            if !value.is_empty() {
                *slot = value.to_string();
            }
        }
        config
    }

    pub fn parse(text: &str) -> Self {
        Self::from_values(text.lines())
    }

    pub fn values(&self) -> [&str; 6] {
        [
            self.filter.as_str(),
            self.output_qty.as_str(),
            self.program.as_str(),
            self.database.as_str(),
            self.non_anomaly.as_str(),
            self.species_name.as_str(),
        ]
    }

    pub fn to_file_contents(&self) -> String {
        self.values().join("\n")
    }

    fn slots_mut(&mut self) -> [&mut String; 6] {
        [
            &mut self.filter,
            &mut self.output_qty,
            &mut self.program,
            &mut self.database,
            &mut self.non_anomaly,
            &mut self.species_name,
        ]
    }
}

/// File-backed store; reads and writes are serialised.
pub struct SearchConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SearchConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored config, creating the file with defaults if absent.
    pub async fn load(&self) -> io::Result<SearchConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(SearchConfig::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let config = SearchConfig::default();
                write_file(&self.path, &config).await?;
                tracing::info!(path = %self.path.display(), "created default search config");
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Normalise and persist `config`, returning what was written.
    pub async fn save(&self, config: &SearchConfig) -> io::Result<SearchConfig> {
        let normalized = SearchConfig::from_values(config.values());
        let _guard = self.lock.lock().await;
        write_file(&self.path, &normalized).await?;
        tracing::debug!(path = %self.path.display(), "search config saved");
        Ok(normalized)
    }
}

async fn write_file(path: &Path, config: &SearchConfig) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, config.to_file_contents()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_file() {
        let config = SearchConfig::parse("mL\n500\nblastp\nrefseq\nbos taurus\nCow\n");
        assert_eq!(
            config.values(),
            ["mL", "500", "blastp", "refseq", "bos taurus", "Cow"]
        );
    }

    #[test]
    fn test_blank_and_missing_lines_use_defaults() {
        let config = SearchConfig::parse("  F \n\n   \nnr");
        assert_eq!(config.filter, "F");
        assert_eq!(config.output_qty, "1000");
        assert_eq!(config.program, "blastn");
        assert_eq!(config.database, "nr");
        assert_eq!(config.non_anomaly, "sus scrofa");
        assert_eq!(config.species_name, "Sample");
    }

    #[test]
    fn test_serializes_with_canonical_keys() {
        let json = serde_json::to_value(SearchConfig::default()).unwrap();
        for key in SearchConfig::KEYS {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["non_anomaly"], "sus scrofa");
    }

    #[tokio::test]
    async fn test_load_creates_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchConfigStore::new(dir.path().join("nested").join("config"));

        let config = store.load().await.unwrap();
        assert_eq!(config, SearchConfig::default());

        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(on_disk, "mL\n1000\nblastn\nnt\nsus scrofa\nSample");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SearchConfigStore::new(dir.path().join("config"));
        let update = SearchConfig {
            database: "  refseq_rna ".into(),
            ..SearchConfig::default()
        };

        let saved = store.save(&update).await.unwrap();
        assert_eq!(saved.database, "refseq_rna");
        assert_eq!(store.load().await.unwrap(), saved);
    }
}
