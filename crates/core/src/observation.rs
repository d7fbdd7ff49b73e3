//! Historical observation rows and the validated dataset wrapper.
//!
//! One [`ObservationRow`] is one contest seen from one side. Rows are produced
//! once by upstream feature engineering and never mutated afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// A single historical contest from one team's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    /// When the contest started.
    pub timestamp: DateTime<Utc>,
    /// Numeric features, fixed dimensionality per sport.
    pub features: Vec<f64>,
    /// Whether this side won.
    pub label: bool,
    /// Closing decimal odds for this side, if a market existed.
    pub decimal_odds: Option<Decimal>,
}

impl ObservationRow {
    /// Creates a row without odds.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, features: Vec<f64>, label: bool) -> Self {
        Self {
            timestamp,
            features,
            label,
            decimal_odds: None,
        }
    }

    /// Attaches decimal odds to the row.
    #[must_use]
    pub fn with_odds(mut self, decimal_odds: Decimal) -> Self {
        self.decimal_odds = Some(decimal_odds);
        self
    }

    /// Number of features on this row.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.features.len()
    }
}

/// A row table that has passed the structural checks the pipeline relies on.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    rows: Vec<ObservationRow>,
    dimension: usize,
}

impl Dataset {
    /// Validates and wraps a row table.
    ///
    /// Checks fixed dimensionality, finite features and positive odds. Row
    /// order is preserved; the splitter establishes chronological order itself.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] describing the first offending row.
    pub fn new(rows: Vec<ObservationRow>) -> Result<Self, DatasetError> {
        let first = rows.first().ok_or(DatasetError::Empty)?;
        let dimension = first.dimension();

        for (idx, row) in rows.iter().enumerate() {
            if row.dimension() != dimension {
                return Err(DatasetError::DimensionMismatch {
                    row: idx,
                    expected: dimension,
                    found: row.dimension(),
                });
            }
            if let Some(feature) = row.features.iter().position(|v| !v.is_finite()) {
                return Err(DatasetError::NonFiniteFeature { row: idx, feature });
            }
            if let Some(odds) = row.decimal_odds {
                if odds <= Decimal::ZERO {
                    return Err(DatasetError::NonPositiveOdds { row: idx, odds });
                }
            }
        }

        Ok(Self { rows, dimension })
    }

    /// The validated rows in input order.
    #[must_use]
    pub fn rows(&self) -> &[ObservationRow] {
        &self.rows
    }

    /// Feature dimensionality shared by every row.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false for a constructed dataset, kept for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if rows are already in non-decreasing timestamp order.
    #[must_use]
    pub fn is_chronological(&self) -> bool {
        self.rows
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// Earliest and latest timestamps in the table.
    #[must_use]
    pub fn time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let mut min = self.rows[0].timestamp;
        let mut max = min;
        for row in &self.rows {
            min = min.min(row.timestamp);
            max = max.max(row.timestamp);
        }
        (min, max)
    }
}
