//! Conversion of upstream rows into stored records.

use chrono::NaiveDate;

use crate::models::{ApiRow, DATE_FORMAT, Dimension, Record, SearchType};

/// Maps one page of API rows onto [`Record`]s.
///
/// Row keys are matched positionally against `dimensions`. Dimensions that
/// were not requested, or that the row carries no key for, become `None`.
/// Rows without a parseable `date` key cannot be stored and are dropped.
pub fn to_records(
    property: &str,
    search_type: SearchType,
    dimensions: &[Dimension],
    rows: &[ApiRow],
) -> Vec<Record> {
    let date_index = dimensions.iter().position(|d| *d == Dimension::Date);
    let key_for = |row: &ApiRow, dim: Dimension| -> Option<String> {
        let index = dimensions.iter().position(|d| *d == dim)?;
        row.keys.get(index).cloned()
    };

    rows.iter()
        .filter_map(|row| {
            let raw_date = date_index.and_then(|i| row.keys.get(i))?;
            let date = match NaiveDate::parse_from_str(raw_date, DATE_FORMAT) {
                Ok(date) => date,
                Err(e) => {
                    tracing::debug!(property, date = %raw_date, error = %e, "Dropping row with unparseable date");
                    return None;
                }
            };

            Some(Record {
                property: property.to_string(),
                search_type,
                date,
                query: key_for(row, Dimension::Query),
                page: key_for(row, Dimension::Page),
                device: key_for(row, Dimension::Device),
                country: key_for(row, Dimension::Country),
                clicks: row.clicks.round().max(0.0) as i64,
                impressions: row.impressions.round().max(0.0) as i64,
                ctr: row.ctr,
                position: row.position,
            })
        })
        .collect()
}
