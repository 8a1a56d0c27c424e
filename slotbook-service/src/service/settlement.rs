//! Settlement of a provider's unpaid bookings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::roles::Actor;
use super::SlotbookService;
use crate::db::{CategoryMode, DurationBucket};
use crate::error::ServiceResult;
use crate::i18n::Localized;

/// One priced booking
#[derive(Debug, Clone, Serialize)]
pub struct SettlementLine {
    pub booking_id: String,
    pub start_time: DateTime<Utc>,
    pub minutes: i64,
    pub bucket: DurationBucket,
    pub category: CategoryMode,
    pub amount: i64,
}

/// Payable total over all unpaid confirmed bookings of a provider
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub count: usize,
    pub total: i64,
    pub currency: String,
    pub lines: Vec<SettlementLine>,
}

impl SlotbookService {
    /// Price every unpaid confirmed booking and sum the result.
    ///
    /// The computed price is written back onto each booking, so running this
    /// again before payment re-prices instead of adding up.
    pub fn settle(&self, provider_id: &str) -> ServiceResult<Settlement> {
        let dynamic = self.runtime_config.dynamic();
        let pricing = &dynamic.pricing;

        let bookings = self.db.list_unpaid_bookings(provider_id)?;
        let mut lines = Vec::with_capacity(bookings.len());

        for booking in &bookings {
            let minutes = booking.duration_minutes();
            let bucket = DurationBucket::for_minutes(minutes, pricing.short_max_minutes);
            let amount = self
                .db
                .find_price(bucket, booking.category)?
                .unwrap_or(pricing.default_amount);

            self.db
                .set_booking_price(&booking.id, amount, &pricing.currency)?;

            lines.push(SettlementLine {
                booking_id: booking.id.clone(),
                start_time: booking.start_time,
                minutes,
                bucket,
                category: booking.category,
                amount,
            });
        }

        let settlement = Settlement {
            count: lines.len(),
            total: lines.iter().map(|line| line.amount).sum(),
            currency: pricing.currency.clone(),
            lines,
        };

        info!(
            provider_id = %provider_id,
            count = settlement.count,
            total = settlement.total,
            "Settlement computed"
        );
        Ok(settlement)
    }

    pub(crate) fn settlement_reply(&self, actor: &Actor) -> ServiceResult<String> {
        let lang = actor.lang();
        let provider = actor.provider()?;
        let settlement = self.settle(&provider.id)?;

        if settlement.count == 0 {
            return Ok(self.text(lang, "settlement-none"));
        }

        let mut reply = self.render(
            lang,
            Localized::new("settlement-header").arg("count", settlement.count),
        );
        for (i, line) in settlement.lines.iter().enumerate() {
            reply.push('\n');
            reply.push_str(&self.render(
                lang,
                Localized::new("settlement-line")
                    .arg("index", i + 1)
                    .arg("start", self.local_time(&line.start_time))
                    .arg("minutes", line.minutes)
                    .arg("mode", self.mode_label(lang, line.category))
                    .arg("amount", line.amount)
                    .arg("currency", &settlement.currency),
            ));
        }
        reply.push('\n');
        reply.push_str(&self.render(
            lang,
            Localized::new("settlement-total")
                .arg("total", settlement.total)
                .arg("currency", &settlement.currency),
        ));
        Ok(reply)
    }
}
