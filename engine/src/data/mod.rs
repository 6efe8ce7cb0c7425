//! Market data access
//!
//! Lanes read quantitative and macro context through [`MarketDataProvider`].
//! The shipped adapter reads JSON snapshots dropped into
//! `<data_dir>/market/` by whatever feed the deployment uses:
//!
//! - `<TICKER>.json`: a [`QuantSnapshot`]
//! - `macro.json`: a [`MacroSnapshot`]
//! - `universe.json`: a list of [`QuantSnapshot`] for idea discovery
//!
//! Missing files and missing fields are normal and produce empty snapshots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::types::{MacroSnapshot, QuantSnapshot};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn quant(&self, ticker: &str) -> Result<QuantSnapshot>;

    async fn macro_snapshot(&self) -> Result<MacroSnapshot>;

    /// Candidates for idea discovery
    async fn universe(&self) -> Result<Vec<QuantSnapshot>>;
}

/// Snapshot files on disk
pub struct JsonFileMarketData {
    dir: PathBuf,
}

impl JsonFileMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_dir>/market`
    pub fn under_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("market"))
    }

    async fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.dir.join(file);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No market data at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl MarketDataProvider for JsonFileMarketData {
    async fn quant(&self, ticker: &str) -> Result<QuantSnapshot> {
        let ticker = ticker.trim().to_uppercase();
        let mut snapshot = self
            .read::<QuantSnapshot>(&format!("{}.json", ticker))
            .await?
            .unwrap_or_else(|| QuantSnapshot::empty(&ticker));
        if snapshot.ticker.is_empty() {
            snapshot.ticker = ticker;
        }
        Ok(snapshot)
    }

    async fn macro_snapshot(&self) -> Result<MacroSnapshot> {
        Ok(self.read("macro.json").await?.unwrap_or_default())
    }

    async fn universe(&self) -> Result<Vec<QuantSnapshot>> {
        Ok(self.read("universe.json").await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_files_yield_empty_snapshots() {
        let dir = TempDir::new().unwrap();
        let data = JsonFileMarketData::under_data_dir(dir.path());

        let quant = data.quant("acme").await.unwrap();
        assert_eq!(quant.ticker, "ACME");
        assert!(quant.price.is_none());
        assert!(data.macro_snapshot().await.unwrap().vix.is_none());
        assert!(data.universe().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_snapshot_tolerated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ACME.json"),
            r#"{"price": 42.0, "pe_ratio": null, "week52_high": 55.5}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("macro.json"), r#"{"vix": 18.2, "regime": "expansion"}"#)
            .unwrap();

        let data = JsonFileMarketData::new(dir.path());
        let quant = data.quant("ACME").await.unwrap();
        assert_eq!(quant.ticker, "ACME");
        assert_eq!(quant.price, Some(42.0));
        assert_eq!(quant.pe_ratio, None);
        assert_eq!(quant.week52_high, Some(55.5));

        let snapshot = data.macro_snapshot().await.unwrap();
        assert_eq!(snapshot.regime.as_deref(), Some("expansion"));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("macro.json"), "not json").unwrap();

        let data = JsonFileMarketData::new(dir.path());
        assert!(data.macro_snapshot().await.is_err());
    }
}
