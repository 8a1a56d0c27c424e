//! Supervisor view switching, provider impersonation and provider approval.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use tracing::info;

use super::roles::{Actor, ProviderRef};
use super::wizard::{Flow, FlowState, StepOutcome, has_index, pick};
use super::SlotbookService;
use crate::db::{ProfileField, Role};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::Localized;

/// Supervisor's current view, kept for as long as the supervisor exists
pub(crate) struct ModeFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ModeStep {
    /// Resting state; only carries the view
    View,
    /// Waiting for the index of a provider to act for
    PickProvider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModePayload {
    pub as_role: Role,
    #[serde(default)]
    pub as_provider: Option<ProviderRef>,
    /// Provider list shown by the last "pick provider"
    #[serde(default)]
    pub candidates: Vec<ProviderRef>,
}

impl Default for ModePayload {
    fn default() -> Self {
        Self {
            as_role: Role::Requester,
            as_provider: None,
            candidates: Vec::new(),
        }
    }
}

impl Flow for ModeFlow {
    const NAME: &'static str = "mode";
    type Step = ModeStep;
    type Payload = ModePayload;

    fn awaits_input(step: ModeStep) -> bool {
        step == ModeStep::PickProvider
    }
}

/// Supervisor picking a pending provider to approve
pub(crate) struct ApprovalFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum ApprovalStep {
    PickApplicant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ApprovalPayload {}

impl Flow for ApprovalFlow {
    const NAME: &'static str = "provider_approval";
    type Step = ApprovalStep;
    type Payload = ApprovalPayload;
}

impl SlotbookService {
    fn current_mode(&self, actor: &Actor) -> ServiceResult<ModePayload> {
        Ok(self
            .load_flow::<ModeFlow>(actor.external_id())?
            .map(|state| state.payload)
            .unwrap_or_default())
    }

    pub(crate) fn switch_to_requester_view(&self, actor: &Actor) -> ServiceResult<String> {
        let mode = ModePayload {
            as_role: Role::Requester,
            candidates: Vec::new(),
            ..self.current_mode(actor)?
        };
        self.save_flow::<ModeFlow>(actor.external_id(), ModeStep::View, &mode)?;

        info!(identity = %actor.external_id(), "Supervisor switched to requester view");
        Ok(self.text(actor.lang(), "view-requester"))
    }

    pub(crate) fn switch_to_provider_view(&self, actor: &Actor) -> ServiceResult<String> {
        let mode = ModePayload {
            as_role: Role::Provider,
            candidates: Vec::new(),
            ..self.current_mode(actor)?
        };
        self.save_flow::<ModeFlow>(actor.external_id(), ModeStep::View, &mode)?;

        info!(
            identity = %actor.external_id(),
            target = ?mode.as_provider.as_ref().map(|p| &p.id),
            "Supervisor switched to provider view"
        );
        Ok(match &mode.as_provider {
            Some(target) => self.render(
                actor.lang(),
                Localized::new("view-provider-with-target").arg("name", &target.name),
            ),
            None => self.text(actor.lang(), "view-provider"),
        })
    }

    /// List providers and wait for the index of the one to act for
    pub(crate) fn start_pick_provider(&self, actor: &Actor) -> ServiceResult<String> {
        let providers = self.db.list_profiles_by_role(Role::Provider)?;
        if providers.is_empty() {
            return Err(ServiceError::not_found("no-providers"));
        }

        let mode = ModePayload {
            candidates: providers.iter().map(ProviderRef::from).collect(),
            ..self.current_mode(actor)?
        };

        let mut reply = self.text(actor.lang(), "pick-provider-prompt");
        for (i, candidate) in mode.candidates.iter().enumerate() {
            reply.push_str(&format!("\n{}) {}", i + 1, candidate.name));
        }

        self.save_flow::<ModeFlow>(actor.external_id(), ModeStep::PickProvider, &mode)?;
        Ok(reply)
    }

    pub(crate) fn mode_step(
        &self,
        actor: &Actor,
        state: FlowState<ModeFlow>,
        text: &str,
    ) -> ServiceResult<StepOutcome<ModeFlow>> {
        let FlowState { step, payload } = state;
        match step {
            ModeStep::PickProvider => {
                let candidate = pick(&payload.candidates, text, "1")?.clone();

                // The snapshot may be stale by now
                let still_provider = self
                    .db
                    .get_profile(&candidate.id)?
                    .is_some_and(|p| p.role == Role::Provider);
                if !still_provider {
                    return Err(ServiceError::not_found("pick-provider-stale"));
                }

                info!(
                    identity = %actor.external_id(),
                    provider_id = %candidate.id,
                    "Supervisor now acting for provider"
                );
                let reply = self.render(
                    actor.lang(),
                    Localized::new("pick-provider-done").arg("name", &candidate.name),
                );
                Ok(StepOutcome::Next {
                    step: ModeStep::View,
                    payload: ModePayload {
                        as_role: Role::Provider,
                        as_provider: Some(candidate),
                        candidates: Vec::new(),
                    },
                    reply,
                })
            }
            ModeStep::View => Err(ServiceError::Internal {
                message: "mode view step does not take input".to_string(),
            }),
        }
    }

    /// Leave the provider pick without touching the chosen view
    pub(crate) fn reset_mode_pick(&self, external_id: &str) -> ServiceResult<()> {
        match self.load_flow::<ModeFlow>(external_id)? {
            Some(state) if state.step == ModeStep::PickProvider => {
                let mode = ModePayload {
                    candidates: Vec::new(),
                    ..state.payload
                };
                self.save_flow::<ModeFlow>(external_id, ModeStep::View, &mode)
            }
            _ => Ok(()),
        }
    }

    /// Requester applies to become a provider
    pub(crate) fn register_provider(&self, actor: &Actor) -> ServiceResult<String> {
        self.db
            .update_profile_field(&actor.profile.id, ProfileField::Role(Role::ProviderPending))?;

        info!(identity = %actor.external_id(), "Provider application submitted");
        Ok(self.text(actor.lang(), "provider-registered"))
    }

    pub(crate) fn list_pending_providers(&self, actor: &Actor) -> ServiceResult<String> {
        let applicants = self.db.list_profiles_by_role(Role::ProviderPending)?;
        if applicants.is_empty() {
            self.finish_flow::<ApprovalFlow>(actor.external_id())?;
            return Ok(self.text(actor.lang(), "approval-none"));
        }

        let mut reply = self.text(actor.lang(), "approval-list-header");
        for (i, applicant) in applicants.iter().enumerate() {
            reply.push_str(&format!("\n{}) {}", i + 1, applicant.name));
        }
        reply.push('\n');
        reply.push_str(&self.text(actor.lang(), "approval-instructions"));

        self.save_flow::<ApprovalFlow>(
            actor.external_id(),
            ApprovalStep::PickApplicant,
            &ApprovalPayload::default(),
        )?;
        Ok(reply)
    }

    pub(crate) fn approve_provider(&self, actor: &Actor, arg: &str) -> ServiceResult<String> {
        if !has_index(arg) {
            return self.list_pending_providers(actor);
        }

        let reply = self.approve_applicant(actor, arg)?;
        self.finish_flow::<ApprovalFlow>(actor.external_id())?;
        Ok(reply)
    }

    pub(crate) fn approval_step(
        &self,
        actor: &Actor,
        state: FlowState<ApprovalFlow>,
        text: &str,
    ) -> ServiceResult<StepOutcome<ApprovalFlow>> {
        match state.step {
            ApprovalStep::PickApplicant => Ok(StepOutcome::Done {
                reply: self.approve_applicant(actor, text)?,
            }),
        }
    }

    /// Promote the applicant at the index of the current pending list
    fn approve_applicant(&self, actor: &Actor, text: &str) -> ServiceResult<String> {
        let applicants = self.db.list_profiles_by_role(Role::ProviderPending)?;
        if applicants.is_empty() {
            return Err(ServiceError::not_found("approval-none"));
        }
        let applicant = pick(&applicants, text, "1")?;

        if !self
            .db
            .update_profile_field(&applicant.id, ProfileField::Role(Role::Provider))?
        {
            return Err(ServiceError::not_found("approval-none"));
        }

        info!(
            supervisor = %actor.external_id(),
            provider = %applicant.external_id,
            "Provider approved"
        );
        self.push_to(applicant, Localized::new("approval-notice"));

        Ok(self.render(
            actor.lang(),
            Localized::new("approval-done").arg("name", &applicant.name),
        ))
    }
}
