//! Requester side of the proposal lifecycle: the five-step creation wizard,
//! listing and withdrawing pending proposals.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use strum::{AsRefStr, EnumString};
use tracing::info;

use super::roles::{Actor, ProviderRef};
use super::wizard::{Flow, FlowState, StepOutcome, has_index, optional_text, pick};
use super::SlotbookService;
use crate::db::{CategoryMode, NewProposal, Party, ProposalStatus, Role, TimeProposal};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::{Language, Localized};

static SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})\s+(\d{1,2}):(\d{2})(?:\s*[~\-～]\s*(\d{1,2}):(\d{2}))?$",
    )
    .expect("slot pattern is valid")
});

pub(crate) struct ProposalFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ProposalStep {
    PickProvider,
    PickCategory,
    InputTime,
    InputNote,
    Confirm,
}

/// Input accumulated by the wizard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ProposalDraft {
    /// Provider list as shown in the first step
    #[serde(default)]
    pub providers: Vec<ProviderRef>,
    #[serde(default)]
    pub provider: Option<ProviderRef>,
    #[serde(default)]
    pub category: Option<CategoryMode>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Flow for ProposalFlow {
    const NAME: &'static str = "proposal_create";
    type Step = ProposalStep;
    type Payload = ProposalDraft;

    fn takes_free_text(step: ProposalStep) -> bool {
        step == ProposalStep::InputNote
    }
}

impl SlotbookService {
    /// Snapshot the provider list and open the wizard
    pub(crate) fn start_proposal(&self, actor: &Actor) -> ServiceResult<String> {
        let providers = self.db.list_profiles_by_role(Role::Provider)?;
        if providers.is_empty() {
            return Err(ServiceError::not_found("no-providers"));
        }

        let draft = ProposalDraft {
            providers: providers.iter().map(ProviderRef::from).collect(),
            ..ProposalDraft::default()
        };

        let mut reply = self.text(actor.lang(), "proposal-pick-provider");
        for (i, provider) in draft.providers.iter().enumerate() {
            reply.push_str(&format!("\n{}) {}", i + 1, provider.name));
        }

        self.save_flow::<ProposalFlow>(actor.external_id(), ProposalStep::PickProvider, &draft)?;
        info!(identity = %actor.external_id(), "Proposal wizard started");
        Ok(reply)
    }

    /// Category prompt; menu numbers follow `CategoryMode::ALL`
    fn category_menu(&self, lang: Language) -> String {
        let mut reply = self.text(lang, "proposal-pick-category");
        for (i, mode) in CategoryMode::ALL.iter().enumerate() {
            reply.push_str(&format!("\n{}) {}", i + 1, self.mode_label(lang, *mode)));
        }
        reply
    }

    pub(crate) fn proposal_step(
        &self,
        actor: &Actor,
        state: FlowState<ProposalFlow>,
        text: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StepOutcome<ProposalFlow>> {
        let lang = actor.lang();
        let FlowState { step, mut payload } = state;

        match step {
            ProposalStep::PickProvider => {
                payload.provider = Some(pick(&payload.providers, text, "1")?.clone());
                Ok(StepOutcome::Next {
                    step: ProposalStep::PickCategory,
                    payload,
                    reply: self.category_menu(lang),
                })
            }
            ProposalStep::PickCategory => {
                let category = CategoryMode::from_external(text)
                    .ok_or_else(|| ServiceError::invalid_input("proposal-category-invalid"))?;
                payload.category = Some(category);
                Ok(StepOutcome::Next {
                    step: ProposalStep::InputTime,
                    payload,
                    reply: self.text(lang, "proposal-input-time"),
                })
            }
            ProposalStep::InputTime => {
                let dynamic = self.runtime_config.dynamic();
                let scheduling = &dynamic.scheduling;
                let (start, end) =
                    parse_slot(text, scheduling.offset(), scheduling.default_duration())?;

                let earliest = now + scheduling.min_lead();
                if start < earliest {
                    return Err(ServiceError::PolicyViolation(
                        Localized::new("proposal-too-soon")
                            .arg("minutes", scheduling.min_lead_minutes)
                            .arg("earliest", self.local_time(&earliest)),
                    ));
                }

                payload.start_time = Some(start);
                payload.end_time = Some(end);
                Ok(StepOutcome::Next {
                    step: ProposalStep::InputNote,
                    payload,
                    reply: self.text(lang, "proposal-input-note"),
                })
            }
            ProposalStep::InputNote => {
                payload.note = optional_text(text);
                let reply = self.confirm_prompt(lang, &payload)?;
                Ok(StepOutcome::Next {
                    step: ProposalStep::Confirm,
                    payload,
                    reply,
                })
            }
            ProposalStep::Confirm => match parse_confirmation(text) {
                Some(true) => {
                    let proposal = self.submit_proposal(actor, &payload)?;
                    let provider_name = payload
                        .provider
                        .map(|p| p.name)
                        .unwrap_or_else(|| proposal.provider_id.clone());
                    Ok(StepOutcome::Done {
                        reply: self.render(
                            lang,
                            Localized::new("proposal-created").arg("provider", provider_name),
                        ),
                    })
                }
                Some(false) => {
                    info!(identity = %actor.external_id(), "Proposal wizard aborted");
                    Ok(StepOutcome::Done {
                        reply: self.text(lang, "proposal-aborted"),
                    })
                }
                None => Err(ServiceError::invalid_input("proposal-confirm-invalid")),
            },
        }
    }

    fn confirm_prompt(&self, lang: Language, draft: &ProposalDraft) -> ServiceResult<String> {
        let (provider, category, start, end) = draft_fields(draft)?;
        let note = draft.note.clone().unwrap_or_else(|| "-".to_string());

        Ok(self.render(
            lang,
            Localized::new("proposal-confirm")
                .arg("provider", &provider.name)
                .arg("mode", self.mode_label(lang, category))
                .arg("start", self.local_time(&start))
                .arg("end", self.local_time(&end))
                .arg("note", note),
        ))
    }

    /// Persist the draft as a pending proposal and tell the provider
    fn submit_proposal(&self, actor: &Actor, draft: &ProposalDraft) -> ServiceResult<TimeProposal> {
        let (provider, category, start_time, end_time) = draft_fields(draft)?;

        let proposal = self.db.insert_proposal(&NewProposal {
            proposer_id: actor.profile.id.clone(),
            provider_id: provider.id.clone(),
            start_time,
            end_time,
            category,
            note: draft.note.clone(),
        })?;

        info!(
            proposal_id = %proposal.id,
            proposer = %actor.external_id(),
            provider_id = %proposal.provider_id,
            start = %proposal.start_time,
            "Proposal created"
        );

        if let Some(provider) = self.db.get_profile(&proposal.provider_id)? {
            let lang = provider.language;
            self.push_to(
                &provider,
                Localized::new("proposal-new-notice")
                    .arg("requester", &actor.profile.name)
                    .arg("start", self.local_time(&proposal.start_time))
                    .arg("end", self.local_time(&proposal.end_time))
                    .arg("mode", self.mode_label(lang, proposal.category)),
            );
        }

        Ok(proposal)
    }

    /// Requester's own pending proposals with provider names
    pub(crate) fn list_my_proposals(&self, actor: &Actor) -> ServiceResult<String> {
        let lang = actor.lang();
        let proposals = self
            .db
            .list_pending_proposals(Party::Requester, &actor.profile.id)?;
        if proposals.is_empty() {
            return Ok(self.text(lang, "proposals-none"));
        }

        let ids: Vec<&str> = proposals.iter().map(|p| p.provider_id.as_str()).collect();
        let names = self.db.profile_names(&ids)?;

        let mut reply = self.text(lang, "proposals-header");
        for (i, proposal) in proposals.iter().enumerate() {
            let name = names
                .get(&proposal.provider_id)
                .map(String::as_str)
                .unwrap_or("?");
            reply.push('\n');
            reply.push_str(&self.proposal_line(lang, i + 1, name, proposal));
        }
        reply.push('\n');
        reply.push_str(&self.text(lang, "proposals-cancel-hint"));
        Ok(reply)
    }

    /// Withdraw a pending proposal by its index in the current list
    pub(crate) fn cancel_proposal(
        &self,
        actor: &Actor,
        arg: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<String> {
        if !has_index(arg) {
            return self.list_my_proposals(actor);
        }

        let proposals = self
            .db
            .list_pending_proposals(Party::Requester, &actor.profile.id)?;
        if proposals.is_empty() {
            return Err(ServiceError::not_found("proposals-none"));
        }
        let proposal = pick(&proposals, arg, "cancel proposal 1")?;

        if !self.db.close_proposal(
            &proposal.id,
            ProposalStatus::Canceled,
            &actor.profile.id,
            None,
            now,
        )? {
            return Err(ServiceError::not_found("proposal-no-longer-pending"));
        }

        info!(proposal_id = %proposal.id, identity = %actor.external_id(), "Proposal canceled");
        Ok(self.text(actor.lang(), "proposal-canceled"))
    }

    pub(crate) fn proposal_line(
        &self,
        lang: Language,
        index: usize,
        name: &str,
        proposal: &TimeProposal,
    ) -> String {
        let line = Localized::new(if proposal.note.is_some() {
            "proposal-line-note"
        } else {
            "proposal-line"
        })
        .arg("index", index)
        .arg("name", name)
        .arg("mode", self.mode_label(lang, proposal.category))
        .arg("start", self.local_time(&proposal.start_time))
        .arg("end", self.local_time(&proposal.end_time));

        let line = match &proposal.note {
            Some(note) => line.arg("note", note),
            None => line,
        };
        self.render(lang, line)
    }
}

fn draft_fields(
    draft: &ProposalDraft,
) -> ServiceResult<(&ProviderRef, CategoryMode, DateTime<Utc>, DateTime<Utc>)> {
    match (&draft.provider, draft.category, draft.start_time, draft.end_time) {
        (Some(provider), Some(category), Some(start), Some(end)) => {
            Ok((provider, category, start, end))
        }
        _ => Err(ServiceError::Internal {
            message: "proposal draft is incomplete".to_string(),
        }),
    }
}

/// `Some(true)` to confirm, `Some(false)` to abort
fn parse_confirmation(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "y" | "yes" | "ok" | "confirm" | "確認" | "是" | "好" => Some(true),
        "2" | "n" | "no" | "abort" | "放棄" | "否" => Some(false),
        _ => None,
    }
}

/// Parse `YYYY-MM-DD HH:MM[~HH:MM]` as local wall-clock time.
///
/// Without an end time the slot lasts `default_duration`.
pub(crate) fn parse_slot(
    text: &str,
    offset: FixedOffset,
    default_duration: Duration,
) -> ServiceResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || ServiceError::invalid_input("proposal-time-invalid");

    let normalized = text.trim().replace('：', ":");
    let caps = SLOT_RE.captures(&normalized).ok_or_else(invalid)?;
    let num = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };

    let date = NaiveDate::from_ymd_opt(
        caps[1].parse().map_err(|_| invalid())?,
        num(2).ok_or_else(invalid)?,
        num(3).ok_or_else(invalid)?,
    )
    .ok_or_else(invalid)?;
    let start_time =
        NaiveTime::from_hms_opt(num(4).ok_or_else(invalid)?, num(5).ok_or_else(invalid)?, 0)
            .ok_or_else(invalid)?;

    let to_utc = |time: NaiveTime| -> ServiceResult<DateTime<Utc>> {
        offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(invalid)
    };

    let start = to_utc(start_time)?;
    let end = match (num(6), num(7)) {
        (Some(hour), Some(minute)) => {
            let end_time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)?;
            to_utc(end_time)?
        }
        _ => start + default_duration,
    };

    if end <= start {
        return Err(ServiceError::invalid_input("proposal-time-order"));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taipei() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn error_key(err: ServiceError) -> &'static str {
        match err {
            ServiceError::InvalidInput(msg) => msg.key,
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_slot_converts_local_time_to_utc() {
        let (start, end) = parse_slot("2026-03-02 11:00", taipei(), Duration::minutes(60)).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_slot_with_explicit_end() {
        let (start, end) =
            parse_slot("2026/3/2 11:00~11:30", taipei(), Duration::minutes(60)).unwrap();
        assert_eq!((end - start).num_minutes(), 30);

        let (_, end) = parse_slot("2026-03-02 11：00-12：30", taipei(), Duration::minutes(60)).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 2, 4, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_slot_rejections() {
        for text in ["tomorrow 3pm", "2026-02-30 11:00", "2026-03-02 25:00", "2026-03-02"] {
            let err = parse_slot(text, taipei(), Duration::minutes(60)).unwrap_err();
            assert_eq!(error_key(err), "proposal-time-invalid", "{text}");
        }

        let err = parse_slot("2026-03-02 11:00~10:00", taipei(), Duration::minutes(60)).unwrap_err();
        assert_eq!(error_key(err), "proposal-time-order");
    }

    #[test]
    fn test_parse_confirmation() {
        assert_eq!(parse_confirmation(" YES "), Some(true));
        assert_eq!(parse_confirmation("2"), Some(false));
        assert_eq!(parse_confirmation("maybe"), None);
    }
}
