//! Loading long-format price files.
//!
//! One row per observation: `date,asset_id,adj_close`. Rows may appear in any
//! order; they are grouped by asset and sorted by date.

use crate::error::{PipelineError, Result};
use crate::types::{AssetId, PriceSeries};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: String,
    #[serde(alias = "ticker", alias = "symbol", alias = "Ticker", alias = "Symbol")]
    asset_id: String,
    #[serde(
        alias = "Adj Close",
        alias = "adj close",
        alias = "adjusted_close",
        alias = "close",
        alias = "Close"
    )]
    adj_close: f64,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub date_format: String,
    pub delimiter: u8,
    /// Skip malformed rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d".to_string(),
            delimiter: b',',
            skip_invalid: false,
        }
    }
}

/// Load every asset's series from a long-format CSV file.
pub fn load_prices(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<PriceSeries>> {
    let path = path.as_ref();
    info!("Loading prices from: {}", path.display());
    let file = std::fs::File::open(path)?;
    read_prices(file, config)
}

/// Parse long-format CSV from any reader.
pub fn read_prices<R: Read>(reader: R, config: &DataConfig) -> Result<Vec<PriceSeries>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(config.delimiter)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut grouped: BTreeMap<AssetId, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    let mut skipped = 0;

    for (i, result) in reader.deserialize::<PriceRow>().enumerate() {
        let row_num = i + 1;
        let parsed = result.map_err(PipelineError::from).and_then(|row| {
            let date = NaiveDate::parse_from_str(&row.date, &config.date_format)?;
            Ok((row.asset_id, date, row.adj_close))
        });
        match parsed {
            Ok((asset, date, close)) => grouped.entry(asset).or_default().push((date, close)),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    let mut series = Vec::with_capacity(grouped.len());
    for (asset, mut points) in grouped {
        points.sort_by_key(|(date, _)| *date);
        if let Some(w) = points.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(PipelineError::InvalidInput(format!(
                "{}: duplicate observation on {}",
                asset, w[0].0
            )));
        }
        series.push(PriceSeries::from_pairs(asset, points)?);
    }

    info!("Loaded {} price series", series.len());
    Ok(series)
}
