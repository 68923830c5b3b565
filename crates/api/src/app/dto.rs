use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use tapor_core::{CustomerId, Money};
use tapor_infra::DEFAULT_DASHBOARD_LIMIT;
use tapor_invoicing::{
    DiscountType, InvoiceDraft, InvoiceFilter, InvoiceKind, InvoicePatch, NewInvoiceItem,
};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub invoice: InvoiceDraft,
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
}

/// Omitted `items` keeps the current lines; a present list replaces them all.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoiceRequest {
    #[serde(default)]
    pub invoice: InvoicePatch,
    #[serde(default)]
    pub items: Option<Vec<NewInvoiceItem>>,
}

/// Totals preview for an invoice being assembled.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsPreviewRequest {
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
    #[serde(default)]
    pub discount_type: DiscountType,
    #[serde(default)]
    pub discount_value: Money,
}

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub customer_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
}

impl InvoiceListQuery {
    pub fn into_filter(self) -> Result<InvoiceFilter, axum::response::Response> {
        let kind = match non_blank(self.kind) {
            Some(raw) => Some(
                InvoiceKind::parse(&raw)
                    .map_err(|_| errors::validation_error(Some("type"), "type must be 'invoice' or 'pre-invoice'"))?,
            ),
            None => None,
        };
        let customer_id = match non_blank(self.customer_id) {
            Some(raw) => Some(parse_id::<CustomerId>(&raw, "customerId")?),
            None => None,
        };
        let start_date = match non_blank(self.start_date) {
            Some(raw) => Some(parse_date(&raw, "startDate", DayBound::Start)?),
            None => None,
        };
        let end_date = match non_blank(self.end_date) {
            Some(raw) => Some(parse_date(&raw, "endDate", DayBound::End)?),
            None => None,
        };

        Ok(InvoiceFilter {
            kind,
            customer_id,
            start_date,
            end_date,
            search: non_blank(self.search),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

impl LimitQuery {
    pub fn limit(&self) -> Result<usize, axum::response::Response> {
        match self.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(DEFAULT_DASHBOARD_LIMIT),
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| errors::validation_error(Some("limit"), "limit must be a non-negative integer")),
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

/// Which end of the day a bare `YYYY-MM-DD` date stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBound {
    Start,
    End,
}

/// RFC 3339 timestamp, or a calendar date expanded to the start/end of that UTC day.
pub fn parse_date(
    raw: &str,
    field: &'static str,
    bound: DayBound,
) -> Result<DateTime<Utc>, axum::response::Response> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let invalid = || {
        errors::validation_error(
            Some(field),
            format!("{field} must be an RFC 3339 timestamp or YYYY-MM-DD"),
        )
    };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let time = match bound {
        DayBound::Start => NaiveTime::default(),
        DayBound::End => NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).ok_or_else(invalid)?,
    };
    Ok(date.and_time(time).and_utc())
}

pub fn parse_id<T: FromStr>(raw: &str, field: &'static str) -> Result<T, axum::response::Response> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| errors::validation_error(Some(field), format!("invalid {field}")))
}

/// Unwrap a JSON body or turn the rejection into a 400.
pub fn json_body<T>(
    body: Result<axum::Json<T>, JsonRejection>,
) -> Result<T, axum::response::Response> {
    body.map(|axum::Json(value)| value)
        .map_err(|rejection| errors::validation_error(None, rejection.body_text()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn bare_dates_expand_to_day_bounds() {
        let start = parse_date("2024-03-15", "startDate", DayBound::Start).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());

        let end = parse_date("2024-03-15", "endDate", DayBound::End).unwrap();
        assert!(end > Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 59).unwrap());
        assert!(end < Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn rfc3339_timestamps_are_taken_as_is() {
        let at = parse_date("2024-03-15T12:30:00+03:30", "startDate", DayBound::Start).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn malformed_query_values_are_rejected() {
        assert!(parse_date("15/03/2024", "startDate", DayBound::Start).is_err());

        let query = InvoiceListQuery {
            kind: Some("receipt".to_string()),
            ..InvoiceListQuery::default()
        };
        assert!(query.into_filter().is_err());

        let limit = LimitQuery {
            limit: Some("-1".to_string()),
        };
        assert!(limit.limit().is_err());
    }

    #[test]
    fn blank_query_values_are_ignored() {
        let query = InvoiceListQuery {
            kind: Some(" ".to_string()),
            search: Some("".to_string()),
            ..InvoiceListQuery::default()
        };
        assert_eq!(query.into_filter().unwrap(), InvoiceFilter::default());
        assert_eq!(LimitQuery::default().limit().unwrap(), DEFAULT_DASHBOARD_LIMIT);
    }
}
