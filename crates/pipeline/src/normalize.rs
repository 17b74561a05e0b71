//! Per-column canonicalization and hand-off to the sink.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::config::NormalizeConfig;
use crate::error::{NormalizationError, PipelineError};
use crate::model::{FactColumn, FactRow, UnifiedRecord};
use crate::sink::FactSink;

/// Format every timestamp is rendered in once normalized.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Categorical values compare case-insensitively; the fact table stores them
/// uppercase.
pub fn canonical_category(value: &str) -> String {
    value.trim().to_uppercase()
}

pub struct Normalizer {
    timestamp_formats: Vec<String>,
    time_formats: Vec<String>,
    anchor_date: Option<NaiveDate>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            timestamp_formats: config.timestamp_formats.clone(),
            time_formats: config.time_formats.clone(),
            anchor_date: config.anchor_date,
        }
    }

    /// Turn a merged record into a typed fact row.
    pub fn normalize(&self, record: &UnifiedRecord) -> Result<FactRow, NormalizationError> {
        let field = |column| Field { record, column };

        Ok(FactRow {
            rowid: field(FactColumn::Rowid).integer()?,
            event_ts: self.timestamp(field(FactColumn::EventTs))?,
            vehicle_number: field(FactColumn::VehicleNumber).text()?,
            vehicle_type: field(FactColumn::VehicleType).category()?,
            number_of_axles: field(FactColumn::NumberOfAxles).integer()?,
            tollplaza_id: field(FactColumn::TollplazaId).integer()?,
            tollplaza_code: field(FactColumn::TollplazaCode).text()?,
            payment_type: field(FactColumn::PaymentType).category()?,
            vehicle_code: field(FactColumn::VehicleCode).text()?,
        })
    }

    /// Try each full date-time format, then time-of-day formats anchored to
    /// `anchor_date` when one is configured.
    pub fn parse_timestamp(&self, value: &str) -> Option<NaiveDateTime> {
        let value = value.trim();
        if let Some(ts) = self
            .timestamp_formats
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        {
            return Some(ts);
        }
        let anchor = self.anchor_date?;
        self.time_formats
            .iter()
            .find_map(|f| NaiveTime::parse_from_str(value, f).ok())
            .map(|t| anchor.and_time(t))
    }

    fn timestamp(&self, field: Field<'_>) -> Result<NaiveDateTime, NormalizationError> {
        let raw = field.raw()?;
        self.parse_timestamp(raw).ok_or_else(|| {
            let reason = if self.anchor_date.is_some() {
                "no configured timestamp or time format matches"
            } else {
                "no configured timestamp format matches"
            };
            field.error(raw, reason)
        })
    }
}

/// One column of one record, for error reporting.
struct Field<'r> {
    record: &'r UnifiedRecord,
    column: FactColumn,
}

impl<'r> Field<'r> {
    fn raw(&self) -> Result<&'r str, NormalizationError> {
        self.record
            .get(self.column)
            .ok_or_else(|| self.error("", "column missing from merged record"))
    }

    fn error(&self, value: &str, reason: &str) -> NormalizationError {
        NormalizationError {
            row_id: self.record.row_id.to_string(),
            column: self.column,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn integer(&self) -> Result<i64, NormalizationError> {
        let raw = self.raw()?;
        raw.trim().parse::<i64>().map_err(|_| self.error(raw, "not an integer"))
    }

    fn category(&self) -> Result<String, NormalizationError> {
        let raw = self.raw()?;
        let value = canonical_category(raw);
        if value.is_empty() {
            return Err(self.error(raw, "empty value"));
        }
        Ok(value)
    }

    fn text(&self) -> Result<String, NormalizationError> {
        Ok(self.raw()?.trim().to_string())
    }
}

/// Normalize one record and submit it to the sink exactly once.
pub fn normalize_and_load(
    record: &UnifiedRecord,
    normalizer: &Normalizer,
    sink: &mut dyn FactSink,
) -> Result<(), PipelineError> {
    let row = normalizer.normalize(record)?;
    sink.append(row)?;
    Ok(())
}
