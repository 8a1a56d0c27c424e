//! Provider side of the proposal lifecycle: incoming list, accept and reject,
//! either directly by index or through the review flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use tracing::{info, warn};

use super::roles::Actor;
use super::wizard::{
    Flow, FlowState, StepOutcome, has_index, optional_text, pick, text_after_index,
};
use super::SlotbookService;
use crate::db::{AcceptOutcome, Party, ProposalStatus, TimeProposal};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::Localized;

pub(crate) struct ReviewFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ReviewStep {
    PickItem,
    ChooseAction,
    InputReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ReviewPayload {
    /// Proposal opened in the pick step
    #[serde(default)]
    pub selected: Option<String>,
}

impl Flow for ReviewFlow {
    const NAME: &'static str = "provider_action";
    type Step = ReviewStep;
    type Payload = ReviewPayload;

    fn takes_free_text(step: ReviewStep) -> bool {
        step == ReviewStep::InputReason
    }
}

enum ReviewAction {
    Accept,
    Reject(Option<String>),
}

impl SlotbookService {
    fn incoming(&self, actor: &Actor) -> ServiceResult<Vec<TimeProposal>> {
        let provider = actor.provider()?;
        self.db.list_pending_proposals(Party::Provider, &provider.id)
    }

    /// Pending proposals addressed to the provider; opens the review flow
    pub(crate) fn list_incoming(&self, actor: &Actor) -> ServiceResult<String> {
        let lang = actor.lang();
        let proposals = self.incoming(actor)?;
        if proposals.is_empty() {
            self.finish_flow::<ReviewFlow>(actor.external_id())?;
            return Ok(self.text(lang, "incoming-none"));
        }

        let ids: Vec<&str> = proposals.iter().map(|p| p.proposer_id.as_str()).collect();
        let names = self.db.profile_names(&ids)?;

        let mut reply = self.text(lang, "incoming-header");
        for (i, proposal) in proposals.iter().enumerate() {
            let name = names
                .get(&proposal.proposer_id)
                .map(String::as_str)
                .unwrap_or("?");
            reply.push('\n');
            reply.push_str(&self.proposal_line(lang, i + 1, name, proposal));
        }
        reply.push('\n');
        reply.push_str(&self.text(lang, "incoming-hint"));

        self.save_flow::<ReviewFlow>(
            actor.external_id(),
            ReviewStep::PickItem,
            &ReviewPayload::default(),
        )?;
        Ok(reply)
    }

    pub(crate) fn review_step(
        &self,
        actor: &Actor,
        state: FlowState<ReviewFlow>,
        text: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StepOutcome<ReviewFlow>> {
        let lang = actor.lang();

        match state.step {
            ReviewStep::PickItem => {
                let proposals = self.incoming(actor)?;
                if proposals.is_empty() {
                    return Err(ServiceError::not_found("incoming-none"));
                }
                let proposal = pick(&proposals, text, "1")?;
                let requester = self.display_name(&proposal.proposer_id)?;

                let reply = self.render(
                    lang,
                    Localized::new("review-selected")
                        .arg("name", requester)
                        .arg("mode", self.mode_label(lang, proposal.category))
                        .arg("start", self.local_time(&proposal.start_time))
                        .arg("end", self.local_time(&proposal.end_time)),
                );
                Ok(StepOutcome::Next {
                    step: ReviewStep::ChooseAction,
                    payload: ReviewPayload {
                        selected: Some(proposal.id.clone()),
                    },
                    reply,
                })
            }
            ReviewStep::ChooseAction => {
                let proposal = self.selected_proposal(actor, &state.payload)?;
                match parse_review_action(text) {
                    Some(ReviewAction::Accept) => Ok(StepOutcome::Done {
                        reply: self.accept_proposal(actor, &proposal, now)?,
                    }),
                    Some(ReviewAction::Reject(Some(reason))) => Ok(StepOutcome::Done {
                        reply: self.reject_proposal(actor, &proposal, Some(&reason), now)?,
                    }),
                    Some(ReviewAction::Reject(None)) => Ok(StepOutcome::Next {
                        step: ReviewStep::InputReason,
                        payload: state.payload,
                        reply: self.text(lang, "review-input-reason"),
                    }),
                    None => Err(ServiceError::invalid_input("review-action-invalid")),
                }
            }
            ReviewStep::InputReason => {
                let proposal = self.selected_proposal(actor, &state.payload)?;
                let reason = optional_text(text);
                Ok(StepOutcome::Done {
                    reply: self.reject_proposal(actor, &proposal, reason.as_deref(), now)?,
                })
            }
        }
    }

    /// Re-read the opened proposal; it must still be pending for this provider
    fn selected_proposal(&self, actor: &Actor, payload: &ReviewPayload) -> ServiceResult<TimeProposal> {
        let provider = actor.provider()?;
        let proposal = match payload.selected.as_deref() {
            Some(id) => self.db.get_proposal(id)?,
            None => None,
        };

        proposal
            .filter(|p| p.provider_id == provider.id && p.status == ProposalStatus::Pending)
            .ok_or_else(|| ServiceError::not_found("proposal-no-longer-pending"))
    }

    /// Act on the proposal opened in the review flow, if one is open.
    ///
    /// Lets a bare "accept" or "reject <reason>" follow the pick step.
    fn act_on_selected(
        &self,
        actor: &Actor,
        action: ReviewAction,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<String>> {
        let selected = match self.load_flow::<ReviewFlow>(actor.external_id())? {
            Some(state) if state.step != ReviewStep::PickItem => state.payload,
            _ => return Ok(None),
        };
        let proposal = self.selected_proposal(actor, &selected)?;

        let reply = match action {
            ReviewAction::Accept => self.accept_proposal(actor, &proposal, now)?,
            ReviewAction::Reject(reason) => {
                self.reject_proposal(actor, &proposal, reason.as_deref(), now)?
            }
        };
        self.finish_flow::<ReviewFlow>(actor.external_id())?;
        Ok(Some(reply))
    }

    pub(crate) fn accept_by_index(
        &self,
        actor: &Actor,
        arg: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        if !has_index(arg) {
            if let Some(reply) = self.act_on_selected(actor, ReviewAction::Accept, now)? {
                return Ok(reply);
            }
        }

        let proposals = self.incoming(actor)?;
        if proposals.is_empty() {
            return Err(ServiceError::not_found("incoming-none"));
        }
        let proposal = pick(&proposals, arg, "accept 1")?;

        let reply = self.accept_proposal(actor, proposal, now)?;
        self.finish_flow::<ReviewFlow>(actor.external_id())?;
        Ok(reply)
    }

    pub(crate) fn reject_by_index(
        &self,
        actor: &Actor,
        arg: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        if !has_index(arg) {
            let action = ReviewAction::Reject(optional_text(arg));
            if let Some(reply) = self.act_on_selected(actor, action, now)? {
                return Ok(reply);
            }
        }

        let proposals = self.incoming(actor)?;
        if proposals.is_empty() {
            return Err(ServiceError::not_found("incoming-none"));
        }
        let proposal = pick(&proposals, arg, "reject 1")?;

        let reply = self.reject_proposal(actor, proposal, text_after_index(arg), now)?;
        self.finish_flow::<ReviewFlow>(actor.external_id())?;
        Ok(reply)
    }

    /// Book the proposal and tell the requester, in their language
    fn accept_proposal(
        &self,
        actor: &Actor,
        proposal: &TimeProposal,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        let provider = actor.provider()?;
        let currency = self.runtime_config.dynamic().pricing.currency.clone();

        let booking = match self
            .db
            .accept_proposal(&proposal.id, &actor.profile.id, &currency, now)?
        {
            AcceptOutcome::Accepted(booking) => booking,
            AcceptOutcome::NoLongerPending => {
                return Err(ServiceError::not_found("proposal-no-longer-pending"));
            }
            AcceptOutcome::ProviderConflict(existing) => {
                warn!(proposal_id = %proposal.id, booking_id = %existing.id, "Accept refused: provider overlap");
                return Err(ServiceError::PolicyViolation(
                    Localized::new("accept-conflict-provider")
                        .arg("start", self.local_time(&existing.start_time))
                        .arg("end", self.local_time(&existing.end_time)),
                ));
            }
            AcceptOutcome::RequesterConflict(existing) => {
                warn!(proposal_id = %proposal.id, booking_id = %existing.id, "Accept refused: requester overlap");
                return Err(ServiceError::PolicyViolation(
                    Localized::new("accept-conflict-requester")
                        .arg("start", self.local_time(&existing.start_time))
                        .arg("end", self.local_time(&existing.end_time)),
                ));
            }
        };

        info!(
            proposal_id = %proposal.id,
            booking_id = %booking.id,
            actor = %actor.external_id(),
            "Proposal accepted"
        );

        let start = self.local_time(&booking.start_time);
        let end = self.local_time(&booking.end_time);

        let requester = self.db.get_profile(&booking.requester_id)?;
        if let Some(requester) = &requester {
            self.push_to(
                requester,
                Localized::new("accept-notice")
                    .arg("provider", &provider.name)
                    .arg("start", &start)
                    .arg("end", &end),
            );
        }

        let requester_name = requester.map(|r| r.name).unwrap_or_default();
        Ok(self.render(
            actor.lang(),
            Localized::new("accept-done")
                .arg("name", requester_name)
                .arg("start", start)
                .arg("end", end),
        ))
    }

    /// Close the proposal as rejected and tell the requester why
    fn reject_proposal(
        &self,
        actor: &Actor,
        proposal: &TimeProposal,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        let provider = actor.provider()?;

        if !self.db.close_proposal(
            &proposal.id,
            ProposalStatus::Rejected,
            &actor.profile.id,
            reason,
            now,
        )? {
            return Err(ServiceError::not_found("proposal-no-longer-pending"));
        }

        info!(
            proposal_id = %proposal.id,
            actor = %actor.external_id(),
            has_reason = reason.is_some(),
            "Proposal rejected"
        );

        if let Some(requester) = self.db.get_profile(&proposal.proposer_id)? {
            let reason = reason
                .map(str::to_string)
                .unwrap_or_else(|| self.text(requester.language, "reject-default-reason"));
            self.push_to(
                &requester,
                Localized::new("reject-notice")
                    .arg("provider", &provider.name)
                    .arg("start", self.local_time(&proposal.start_time))
                    .arg("reason", reason),
            );
        }

        Ok(self.text(actor.lang(), "reject-done"))
    }
}

/// `1` accepts; `2` rejects, optionally followed by a reason
fn parse_review_action(text: &str) -> Option<ReviewAction> {
    let text = text.trim();
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };

    match head {
        "1" if rest.is_empty() => Some(ReviewAction::Accept),
        "2" => Some(ReviewAction::Reject(optional_text(rest))),
        _ => None,
    }
}
