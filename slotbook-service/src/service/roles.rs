//! Role resolution: who is acting, and as whom.

use serde::{Deserialize, Serialize};

use super::SlotbookService;
use super::commands::{Access, CommandKind};
use super::supervisor::ModeFlow;
use crate::db::{Profile, Role};
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::Language;

/// A provider someone acts for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub id: String,
    pub name: String,
}

impl From<&Profile> for ProviderRef {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
        }
    }
}

/// The sender of a message together with the role they act in
#[derive(Debug, Clone)]
pub struct Actor {
    pub profile: Profile,
    pub effective_role: Role,
    /// Provider whose data provider-side commands operate on. For a real
    /// provider this is themselves; for a supervisor the picked target.
    pub provider: Option<ProviderRef>,
}

impl Actor {
    pub fn external_id(&self) -> &str {
        &self.profile.external_id
    }

    pub fn lang(&self) -> Language {
        self.profile.language
    }

    pub fn is_supervisor(&self) -> bool {
        self.profile.role == Role::Supervisor
    }

    /// Supervisor acting for a specific provider
    pub fn is_impersonating(&self) -> bool {
        self.is_supervisor() && self.effective_role == Role::Provider && self.provider.is_some()
    }

    /// Provider to act for; refuses when provider view has no target yet
    pub fn provider(&self) -> ServiceResult<&ProviderRef> {
        self.provider
            .as_ref()
            .ok_or_else(|| ServiceError::not_allowed("error-provider-not-selected"))
    }

    /// Check the capability table for a command
    pub(crate) fn authorize(&self, kind: CommandKind) -> ServiceResult<()> {
        let access = kind.access();
        if access == Access::Anyone {
            return Ok(());
        }
        if self.profile.role == Role::ProviderPending {
            return Err(ServiceError::not_allowed("error-pending-approval"));
        }

        match (access, self.effective_role) {
            (Access::Anyone, _) => Ok(()),
            (Access::Applicant, _) if self.profile.role == Role::Requester => Ok(()),
            (Access::Supervisor, _) if self.is_supervisor() => Ok(()),
            (Access::Supervisor, _) => Err(ServiceError::not_allowed("error-supervisor-only")),
            (Access::Requester | Access::Party, Role::Requester) => Ok(()),
            (Access::Provider | Access::Party, Role::Provider) => self.provider().map(|_| ()),
            _ => Err(ServiceError::not_allowed("error-not-allowed")),
        }
    }
}

impl SlotbookService {
    /// Work out the effective role of a profile.
    ///
    /// Supervisors act as requesters unless their view state says provider,
    /// in which case the picked provider (if any) becomes the target.
    pub(crate) fn resolve_actor(&self, profile: Profile) -> ServiceResult<Actor> {
        let (effective_role, provider) = match profile.role {
            Role::Supervisor => match self.load_flow::<ModeFlow>(&profile.external_id)? {
                Some(state) if state.payload.as_role == Role::Provider => {
                    (Role::Provider, state.payload.as_provider)
                }
                _ => (Role::Requester, None),
            },
            Role::Provider => (Role::Provider, Some(ProviderRef::from(&profile))),
            role => (role, None),
        };

        Ok(Actor {
            profile,
            effective_role,
            provider,
        })
    }
}
