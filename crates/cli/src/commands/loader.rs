//! Observation table loading.
//!
//! Expected header: `timestamp,label,odds,<feature>...`. Timestamps are
//! RFC 3339, labels are `1`/`0` or `true`/`false`, and an empty odds cell
//! means no market existed.

use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use matchday_core::ObservationRow;

const FIXED_COLUMNS: usize = 3;

/// Loads every row of a CSV file.
///
/// # Errors
/// Returns an error if the file cannot be opened or any record is malformed.
pub fn load_rows(path: &str) -> Result<Vec<ObservationRow>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Failed to open CSV file: {path}"))?;
    let rows = read_rows(file).with_context(|| format!("Failed to read {path}"))?;
    tracing::info!(rows = rows.len(), path, "Observation table loaded");
    Ok(rows)
}

/// Parses rows from any CSV reader.
///
/// # Errors
/// Returns an error naming the first malformed record.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<ObservationRow>> {
    let mut reader = csv::Reader::from_reader(reader);

    let headers = reader.headers().context("Missing CSV header")?.clone();
    if headers.len() <= FIXED_COLUMNS {
        bail!(
            "Expected timestamp,label,odds and at least one feature column, found {} columns",
            headers.len()
        );
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record {}", line + 1))?;
        let row = parse_record(&record).with_context(|| format!("Invalid record {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn parse_record(record: &csv::StringRecord) -> Result<ObservationRow> {
    let timestamp: DateTime<Utc> = record[0]
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid timestamp '{}'. Use RFC 3339", &record[0]))?;

    let label = match record[1].trim().to_lowercase().as_str() {
        "1" | "true" | "win" => true,
        "0" | "false" | "loss" => false,
        other => bail!("Invalid label '{other}'"),
    };

    let odds = match record[2].trim() {
        "" => None,
        raw => Some(Decimal::from_str(raw).with_context(|| format!("Invalid odds '{raw}'"))?),
    };

    let features = record
        .iter()
        .skip(FIXED_COLUMNS)
        .map(|cell| {
            cell.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid feature value '{cell}'"))
        })
        .collect::<Result<Vec<f64>>>()?;

    let row = ObservationRow::new(timestamp, features, label);
    Ok(match odds {
        Some(odds) => row.with_odds(odds),
        None => row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_rows_with_and_without_odds() {
        let csv = "timestamp,label,odds,elo_diff,rest_days\n\
                   2024-01-05T19:00:00Z,1,1.85,42.5,2\n\
                   2024-01-06T19:00:00Z,false,,-10,1\n";
        let rows = read_rows(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].label);
        assert_eq!(rows[0].decimal_odds, Some(dec!(1.85)));
        assert_eq!(rows[0].features, vec![42.5, 2.0]);
        assert!(!rows[1].label);
        assert_eq!(rows[1].decimal_odds, None);
    }

    #[test]
    fn rejects_table_without_features() {
        let csv = "timestamp,label,odds\n2024-01-05T19:00:00Z,1,1.85\n";
        assert!(read_rows(csv.as_bytes()).is_err());
    }

    #[test]
    fn reports_bad_label_with_record_number() {
        let csv = "timestamp,label,odds,x\n\
                   2024-01-05T19:00:00Z,1,1.85,0.1\n\
                   2024-01-06T19:00:00Z,maybe,1.85,0.2\n";
        let err = read_rows(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid record 2"));
        assert!(format!("{err:#}").contains("maybe"));
    }
}
