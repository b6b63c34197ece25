//! Event tables: one row per cell, one named numeric column per channel
//!
//! An [`EventTable`] wraps a Polars `DataFrame` whose columns are all numeric.
//! Column order is part of the table's identity: every operation here either
//! keeps the existing order or inserts at an explicit position, and row
//! filtering never reorders rows.

use crate::error::{CytoNormError, Result};
use polars::prelude::*;
use std::sync::Arc;

/// Event data stored as a Polars DataFrame, shared cheaply between clones
pub type EventDataFrame = Arc<DataFrame>;

#[derive(Debug, Clone)]
pub struct EventTable {
    data_frame: EventDataFrame,
}

pub(crate) fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

impl EventTable {
    /// Wrap a DataFrame, coercing text columns that hold only numbers
    ///
    /// Integer and float columns keep their dtype so untouched columns are
    /// written back exactly as read. Any other column must cast to `f64`
    /// without losing values.
    ///
    /// # Errors
    /// Returns [`CytoNormError::NonNumericColumn`] for a column with
    /// non-numeric content.
    pub fn from_data_frame(mut data_frame: DataFrame) -> Result<Self> {
        let coerced: Vec<Column> = data_frame
            .get_columns()
            .iter()
            .filter(|c| !is_numeric_dtype(c.dtype()))
            .map(|c| {
                let cast = c.cast(&DataType::Float64)?;
                if cast.null_count() > c.null_count() {
                    return Err(CytoNormError::NonNumericColumn {
                        column: c.name().to_string(),
                        dtype: c.dtype().to_string(),
                    });
                }
                Ok(cast)
            })
            .collect::<Result<_>>()?;

        for column in coerced {
            data_frame.with_column(column)?;
        }

        Ok(Self {
            data_frame: Arc::new(data_frame),
        })
    }

    /// Build a table from named `f64` columns, in the given order
    ///
    /// # Errors
    /// Returns an error if a name repeats or the columns differ in length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut built = Vec::new();
        for (name, values) in columns {
            let name = name.into();
            if seen.contains(&name) {
                return Err(CytoNormError::ConfigError(format!(
                    "Duplicate column name: {name}"
                )));
            }
            built.push(Column::new(name.as_str().into(), values));
            seen.push(name);
        }
        let data_frame = DataFrame::new(built)?;
        Ok(Self {
            data_frame: Arc::new(data_frame),
        })
    }

    pub fn data_frame(&self) -> &DataFrame {
        &self.data_frame
    }

    pub fn into_data_frame(self) -> DataFrame {
        Arc::unwrap_or_clone(self.data_frame)
    }

    /// Number of events (rows)
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.data_frame.height()
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.data_frame.width()
    }

    /// Column names in table order
    pub fn columns(&self) -> Vec<String> {
        self.data_frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data_frame.get_column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.data_frame.get_column_index(name)
    }

    /// Fail with the first name that is not a column of this table
    pub fn require_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        match names.iter().find(|n| !self.has_column(n.as_ref())) {
            Some(missing) => Err(CytoNormError::ColumnNotFound(missing.as_ref().to_string())),
            None => Ok(()),
        }
    }

    /// Column values as `f64`; nulls read as NaN
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>> {
        let column = self
            .data_frame
            .column(name)
            .map_err(|_| CytoNormError::ColumnNotFound(name.to_string()))?;
        column_values(column)
    }

    /// Sub-table with the requested columns, in *table* order
    ///
    /// The order of `names` is ignored: the result lists the columns in the
    /// same relative order they have in this table.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        self.require_columns(names)?;
        let ordered: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| names.iter().any(|n| n.as_ref() == c))
            .collect();
        let selected = self.data_frame.select(ordered)?;
        Ok(Self {
            data_frame: Arc::new(selected),
        })
    }

    /// Replace a column in place, or insert it at `insert_at` (default: last)
    ///
    /// An existing column keeps its position regardless of `insert_at`.
    pub fn with_column(
        &self,
        name: &str,
        values: Vec<f64>,
        insert_at: Option<usize>,
    ) -> Result<Self> {
        if self.n_columns() > 0 && values.len() != self.n_events() {
            return Err(CytoNormError::ConfigError(format!(
                "Column {} has {} values but the table has {} events",
                name,
                values.len(),
                self.n_events()
            )));
        }

        let series = Series::new(name.into(), values);
        let mut data_frame = (*self.data_frame).clone();
        if self.has_column(name) {
            data_frame.with_column(series)?;
        } else {
            let index = insert_at.unwrap_or(self.n_columns()).min(self.n_columns());
            data_frame.insert_column(index, series)?;
        }
        Ok(Self {
            data_frame: Arc::new(data_frame),
        })
    }

    /// Keep the rows whose mask entry is `true`, preserving row order
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self> {
        let n_events = self.n_events();
        if mask.len() != n_events {
            return Err(CytoNormError::StatsError(format!(
                "Mask length {} doesn't match event count {}",
                mask.len(),
                n_events
            )));
        }

        let mask_series = Series::new("mask".into(), mask.to_vec());
        let mask_ca = mask_series.bool()?;
        let filtered = self.data_frame.filter(mask_ca)?;
        Ok(Self {
            data_frame: Arc::new(filtered),
        })
    }

    /// Keep the rows whose index satisfies `predicate`
    pub fn filter_rows_by<F>(&self, predicate: F) -> Result<Self>
    where
        F: Fn(usize) -> bool,
    {
        let mask: Vec<bool> = (0..self.n_events()).map(predicate).collect();
        self.filter_rows(&mask)
    }

    /// True iff every value in row `i` is finite (nulls count as non-finite)
    pub fn is_finite_row(&self, i: usize) -> Result<bool> {
        if i >= self.n_events() {
            return Err(CytoNormError::StatsError(format!(
                "Row {} out of range for table with {} events",
                i,
                self.n_events()
            )));
        }
        for column in self.data_frame.get_columns() {
            let values = column.cast(&DataType::Float64)?;
            match values.f64()?.get(i) {
                Some(v) if v.is_finite() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Per-row flag: every listed column holds a finite value
    pub fn finite_mask<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<bool>> {
        let mut mask = vec![true; self.n_events()];
        for name in columns {
            let values = self.column_f64(name.as_ref())?;
            for (keep, v) in mask.iter_mut().zip(values) {
                *keep &= v.is_finite();
            }
        }
        Ok(mask)
    }
}

/// Values of a numeric column as `f64`, nulls as NaN
pub(crate) fn column_values(column: &Column) -> Result<Vec<f64>> {
    if !is_numeric_dtype(column.dtype()) {
        return Err(CytoNormError::NonNumericColumn {
            column: column.name().to_string(),
            dtype: column.dtype().to_string(),
        });
    }
    let values = column.cast(&DataType::Float64)?;
    Ok(values
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}
