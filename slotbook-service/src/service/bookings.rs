//! Confirmed bookings: listing per side and cancellation with the
//! requester cancellation window.

use chrono::{DateTime, Utc};
use tracing::info;

use super::roles::Actor;
use super::wizard::{has_index, pick, text_after_index};
use super::SlotbookService;
use crate::db::{Booking, Party, Role};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::Localized;

impl SlotbookService {
    /// Which side of its bookings the actor sees, and as whom
    fn booking_side(&self, actor: &Actor) -> ServiceResult<(Party, String)> {
        match actor.effective_role {
            Role::Provider => Ok((Party::Provider, actor.provider()?.id.clone())),
            _ => Ok((Party::Requester, actor.profile.id.clone())),
        }
    }

    pub(crate) fn list_bookings(&self, actor: &Actor) -> ServiceResult<String> {
        let lang = actor.lang();
        let (party, party_id) = self.booking_side(actor)?;

        let bookings = self.db.list_confirmed_bookings(party, &party_id)?;
        if bookings.is_empty() {
            return Ok(self.text(lang, "bookings-none"));
        }

        let ids: Vec<&str> = bookings
            .iter()
            .map(|b| counterpart_id(party, b))
            .collect();
        let names = self.db.profile_names(&ids)?;

        let mut reply = self.text(lang, "bookings-header");
        for (i, booking) in bookings.iter().enumerate() {
            let name = names
                .get(counterpart_id(party, booking))
                .map(String::as_str)
                .unwrap_or("?");
            reply.push('\n');
            reply.push_str(&self.render(
                lang,
                Localized::new("booking-line")
                    .arg("index", i + 1)
                    .arg("name", name)
                    .arg("mode", self.mode_label(lang, booking.category))
                    .arg("start", self.local_time(&booking.start_time))
                    .arg("end", self.local_time(&booking.end_time)),
            ));
        }
        reply.push('\n');
        reply.push_str(&self.text(lang, "bookings-cancel-hint"));
        Ok(reply)
    }

    /// Cancel a confirmed booking by its index in the current list.
    ///
    /// Requesters may not cancel inside the cancellation window; the
    /// provider side (including an impersonating supervisor) always may.
    pub(crate) fn cancel_booking(
        &self,
        actor: &Actor,
        arg: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        if !has_index(arg) {
            return self.list_bookings(actor);
        }

        let (party, party_id) = self.booking_side(actor)?;
        let bookings = self.db.list_confirmed_bookings(party, &party_id)?;
        if bookings.is_empty() {
            return Err(ServiceError::not_found("bookings-none"));
        }
        let booking = pick(&bookings, arg, "cancel booking 1")?;

        if party == Party::Requester {
            let dynamic = self.runtime_config.dynamic();
            let scheduling = &dynamic.scheduling;
            if booking.start_time - now < scheduling.cancel_window() {
                return Err(ServiceError::PolicyViolation(
                    Localized::new("booking-cancel-too-late")
                        .arg("minutes", scheduling.cancel_window_minutes),
                ));
            }
        }

        let reason = text_after_index(arg).unwrap_or(match party {
            Party::Provider => "canceled by provider",
            Party::Requester => "canceled by requester",
        });
        if !self
            .db
            .cancel_booking(&booking.id, &actor.profile.id, reason, now)?
        {
            return Err(ServiceError::not_found("booking-no-longer-confirmed"));
        }

        info!(
            booking_id = %booking.id,
            actor = %actor.external_id(),
            side = ?party,
            "Booking canceled"
        );

        let actor_name = match party {
            Party::Provider => actor.provider()?.name.clone(),
            Party::Requester => actor.profile.name.clone(),
        };
        let mut recipients = vec![counterpart_id(party, booking)];
        // The impersonated provider learns about cancellations made in their name
        if actor.is_impersonating() {
            recipients.push(&booking.provider_id);
        }

        for id in recipients {
            if let Some(recipient) = self.db.get_profile(id)? {
                self.push_to(
                    &recipient,
                    Localized::new("booking-cancel-notice")
                        .arg("actor", &actor_name)
                        .arg("start", self.local_time(&booking.start_time))
                        .arg("end", self.local_time(&booking.end_time)),
                );
            }
        }

        Ok(self.text(actor.lang(), "booking-canceled"))
    }
}

fn counterpart_id(party: Party, booking: &Booking) -> &str {
    match party {
        Party::Provider => &booking.requester_id,
        Party::Requester => &booking.provider_id,
    }
}
