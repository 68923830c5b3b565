//! Dashboard aggregates over persisted invoices and products.
//!
//! Day and month windows are computed in a fixed UTC offset (the shop's local
//! time) and converted back to UTC instants before querying storage. Only
//! final invoices (`kind = invoice`) count towards sales.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::instrument;

use tapor_core::Money;
use tapor_invoicing::{InvoiceDetails, InvoiceFilter, InvoiceKind};
use tapor_products::{LOW_STOCK_THRESHOLD, Product};

use crate::engine::{EngineResult, InvoiceEngine};
use crate::store::{ProductSales, Storage};

/// Limit used by the dashboard listings when the caller gives none.
pub const DEFAULT_DASHBOARD_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub today_sales: Money,
    pub today_invoices: u64,
    pub month_sales: Money,
    pub low_stock_count: u64,
}

/// UTC instants bounding "today" and "this month" for a local offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub start_of_today: DateTime<Utc>,
    pub start_of_tomorrow: DateTime<Utc>,
    pub start_of_month: DateTime<Utc>,
}

impl Windows {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let today = now.with_timezone(&offset).date_naive();
        let start_of_today = local_midnight(today, offset);
        let first_of_month = today - Duration::days(i64::from(today.day0()));
        Self {
            start_of_today,
            start_of_tomorrow: start_of_today + Duration::days(1),
            start_of_month: local_midnight(first_of_month, offset),
        }
    }
}

fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::default());
    (local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

pub struct Dashboard<S: ?Sized> {
    engine: InvoiceEngine<S>,
    offset: FixedOffset,
}

impl<S: ?Sized> Clone for Dashboard<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            offset: self.offset,
        }
    }
}

impl<S: ?Sized> Dashboard<S> {
    /// Shares the engine's store and clock.
    pub fn new(engine: InvoiceEngine<S>, offset: FixedOffset) -> Self {
        Self { engine, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl<S: Storage + ?Sized> Dashboard<S> {
    pub async fn stats(&self) -> EngineResult<DashboardStats> {
        self.stats_at(self.engine.clock().now()).await
    }

    #[instrument(skip(self), err)]
    pub async fn stats_at(&self, now: DateTime<Utc>) -> EngineResult<DashboardStats> {
        let windows = Windows::at(now, self.offset);
        let store = self.engine.store();

        let today = store
            .sales_summary(windows.start_of_today, Some(windows.start_of_tomorrow))
            .await?;
        let month = store.sales_summary(windows.start_of_month, None).await?;
        let low_stock_count = store.count_low_stock(LOW_STOCK_THRESHOLD).await?;

        Ok(DashboardStats {
            today_sales: today.total,
            today_invoices: today.count,
            month_sales: month.total,
            low_stock_count,
        })
    }

    /// Best sellers over final invoices; products with no sales rank at zero.
    #[instrument(skip(self), err)]
    pub async fn top_products(&self, limit: usize) -> EngineResult<Vec<ProductSales>> {
        Ok(self.engine.store().top_products(limit).await?)
    }

    /// Most recent final invoices, hydrated, at most `limit` of them.
    #[instrument(skip(self), err)]
    pub async fn recent_invoices(&self, limit: usize) -> EngineResult<Vec<InvoiceDetails>> {
        let invoices = self
            .engine
            .store()
            .list_invoices(&InvoiceFilter::kind(InvoiceKind::Invoice), Some(limit))
            .await?;
        self.engine.hydrate(invoices).await
    }

    pub async fn low_stock_products(&self) -> EngineResult<Vec<Product>> {
        Ok(self
            .engine
            .store()
            .low_stock_products(LOW_STOCK_THRESHOLD)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utc_windows() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let w = Windows::at(now, FixedOffset::east_opt(0).unwrap());
        assert_eq!(w.start_of_today, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(w.start_of_tomorrow, Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap());
        assert_eq!(w.start_of_month, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn positive_offset_shifts_the_local_day() {
        // 22:00 UTC on Mar 31 is already Apr 1 at +03:30.
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 22, 0, 0).unwrap();
        let offset = FixedOffset::east_opt(3 * 3600 + 1800).unwrap();
        let w = Windows::at(now, offset);
        assert_eq!(w.start_of_today, Utc.with_ymd_and_hms(2024, 3, 31, 20, 30, 0).unwrap());
        assert_eq!(w.start_of_month, w.start_of_today);
    }

    #[test]
    fn negative_offset_keeps_the_previous_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let w = Windows::at(now, offset);
        assert_eq!(w.start_of_today, Utc.with_ymd_and_hms(2023, 12, 31, 5, 0, 0).unwrap());
        assert_eq!(w.start_of_month, Utc.with_ymd_and_hms(2023, 12, 1, 5, 0, 0).unwrap());
    }
}
