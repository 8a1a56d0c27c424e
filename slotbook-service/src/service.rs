mod bookings;
mod commands;
mod proposals;
mod review;
mod roles;
mod settlement;
mod supervisor;
mod wizard;

pub use commands::{Command, CommandKind};
pub use roles::{Actor, ProviderRef};
pub use settlement::{Settlement, SettlementLine};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

use crate::config::RuntimeConfig;
use crate::db::{CategoryMode, Database, NewProfile, Profile, ProfileField, Role};
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::i18n::{I18n, Language, Localized};
use crate::notify::Notifier;
use proposals::ProposalFlow;
use review::ReviewFlow;
use supervisor::{ApprovalFlow, ModeFlow};

/// Main service coordinator
pub struct SlotbookService {
    pub runtime_config: Arc<RuntimeConfig>,
    pub db: Arc<Database>,
    pub i18n: Arc<I18n>,
    notifier: Arc<dyn Notifier>,
    /// Serializes messages of the same identity; entries live while in use
    identity_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SlotbookService {
    /// Create a new service instance
    pub fn new(
        db: Arc<Database>,
        runtime_config: Arc<RuntimeConfig>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!("Initializing Slotbook service");

        let default_language = runtime_config.dynamic().i18n.default_language;
        let i18n = Arc::new(I18n::with_default(default_language));

        Self {
            runtime_config,
            db,
            i18n,
            notifier,
            identity_locks: DashMap::new(),
        }
    }

    /// Update settings and hot-reload affected components
    pub async fn update_settings(
        &self,
        updates: HashMap<String, serde_json::Value>,
    ) -> ServiceResult<()> {
        // Persist to DB
        self.db.set_settings(updates)?;

        // Reload config from DB
        self.runtime_config.reload_from_db(&self.db)?;

        // Configured price rules land in the lookup table
        self.seed_price_rules()?;

        Ok(())
    }

    /// Replace the price rule table with the configured rules
    pub fn seed_price_rules(&self) -> ServiceResult<usize> {
        let dynamic = self.runtime_config.dynamic();
        self.db.replace_price_rules(&dynamic.pricing.rules)?;
        Ok(dynamic.pricing.rules.len())
    }

    /// Handle one inbound text and produce the direct reply
    pub fn handle_message(&self, external_id: &str, display_name: Option<&str>, text: &str) -> String {
        self.handle_message_at(external_id, display_name, text, Utc::now())
    }

    /// Handle one inbound text as of `now`.
    ///
    /// Business refusals and storage faults both come back as a localized
    /// reply; nothing escapes as an error.
    pub fn handle_message_at(
        &self,
        external_id: &str,
        display_name: Option<&str>,
        text: &str,
        now: DateTime<Utc>,
    ) -> String {
        let lock = self
            .identity_locks
            .entry(external_id.to_string())
            .or_default()
            .clone();

        let reply = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.handle_serialized(external_id, display_name, text, now)
        };

        // Drop the entry once no other message of this identity holds or waits on it
        drop(lock);
        self.identity_locks
            .remove_if(external_id, |_, lock| Arc::strong_count(lock) == 1);

        reply
    }

    fn handle_serialized(
        &self,
        external_id: &str,
        display_name: Option<&str>,
        text: &str,
        now: DateTime<Utc>,
    ) -> String {
        let (profile, created) = match self.ensure_profile(external_id, display_name) {
            Ok(result) => result,
            Err(e) => {
                error!(identity = %external_id, error = %format_error_chain(&e), "Failed to load profile");
                let lang = self.runtime_config.dynamic().i18n.default_language;
                return e.user_message(&self.i18n, lang);
            }
        };

        let lang = profile.language;
        let welcome = (created && profile.role == Role::Requester).then(|| {
            self.render(lang, Localized::new("welcome").arg("name", &profile.name))
        });

        let reply = match self.dispatch(profile, text.trim(), now) {
            Ok(reply) => reply,
            Err(e) if e.is_business() => {
                debug!(identity = %external_id, error = %e, "Request refused");
                e.user_message(&self.i18n, lang)
            }
            Err(e) => {
                error!(identity = %external_id, error = %format_error_chain(&e), "Message handling failed");
                e.user_message(&self.i18n, lang)
            }
        };

        match welcome {
            Some(welcome) => format!("{}\n\n{}", welcome, reply),
            None => reply,
        }
    }

    fn ensure_profile(
        &self,
        external_id: &str,
        display_name: Option<&str>,
    ) -> ServiceResult<(Profile, bool)> {
        let dynamic = self.runtime_config.dynamic();
        let role = if dynamic.access.supervisor_ids.iter().any(|id| id == external_id) {
            Role::Supervisor
        } else {
            Role::Requester
        };
        let name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(external_id);

        let (mut profile, created) = self.db.get_or_create_profile(&NewProfile {
            external_id: external_id.to_string(),
            name: name.to_string(),
            role,
            language: dynamic.i18n.default_language,
        })?;

        if created {
            info!(identity = %external_id, role = %profile.role, "Profile created");
        } else if role == Role::Supervisor && profile.role != Role::Supervisor {
            // Listed in config after first contact
            self.db
                .update_profile_field(&profile.id, ProfileField::Role(Role::Supervisor))?;
            info!(identity = %external_id, previous = %profile.role, "Profile promoted to supervisor");
            profile.role = Role::Supervisor;
        }
        Ok((profile, created))
    }

    /// Route a message: universal cancel, then an active flow, then the command table
    fn dispatch(&self, profile: Profile, text: &str, now: DateTime<Utc>) -> ServiceResult<String> {
        let command = Command::parse(text);

        if command == Some(Command::CancelFlow) {
            return self.cancel_all_flows(&profile);
        }

        let actor = self.resolve_actor(profile)?;

        if let Some(reply) = self.continue_flow(&actor, text, command.as_ref(), now)? {
            return Ok(reply);
        }

        match command {
            Some(command) => self.execute(&actor, command, now),
            None => Err(ServiceError::invalid_input("error-unknown-command")),
        }
    }

    /// Feed the text to the flow that is waiting for it, if any
    fn continue_flow(
        &self,
        actor: &Actor,
        text: &str,
        command: Option<&Command>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<String>> {
        if command.is_some_and(|c| c.kind().interrupts_flow()) {
            return Ok(None);
        }

        let external_id = actor.external_id();

        if actor.is_supervisor() {
            if let Some(reply) = self.drive_flow::<ModeFlow>(external_id, command, |state| {
                self.mode_step(actor, state, text)
            })? {
                return Ok(Some(reply));
            }
            if let Some(reply) = self.drive_flow::<ApprovalFlow>(external_id, command, |state| {
                self.approval_step(actor, state, text)
            })? {
                return Ok(Some(reply));
            }
        }

        match actor.effective_role {
            Role::Requester => self.drive_flow::<ProposalFlow>(external_id, command, |state| {
                self.proposal_step(actor, state, text, now)
            }),
            Role::Provider if actor.provider.is_some() => {
                self.drive_flow::<ReviewFlow>(external_id, command, |state| {
                    self.review_step(actor, state, text, now)
                })
            }
            _ => Ok(None),
        }
    }

    /// Run a command after the capability check
    fn execute(&self, actor: &Actor, command: Command, now: DateTime<Utc>) -> ServiceResult<String> {
        actor.authorize(command.kind())?;

        debug!(
            identity = %actor.external_id(),
            command = ?command.kind(),
            role = %actor.effective_role,
            "Executing command"
        );

        match command {
            Command::CancelFlow => self.cancel_all_flows(&actor.profile),
            Command::Help => Ok(self.help(actor)),
            Command::SwitchLanguage => self.switch_language(actor),
            Command::RegisterProvider => self.register_provider(actor),
            Command::RequesterView => self.switch_to_requester_view(actor),
            Command::ProviderView => self.switch_to_provider_view(actor),
            Command::PickProvider => self.start_pick_provider(actor),
            Command::PendingProviders => self.list_pending_providers(actor),
            Command::ApproveProvider(arg) => self.approve_provider(actor, &arg),
            Command::CreateProposal => self.start_proposal(actor),
            Command::ListPending => match actor.effective_role {
                Role::Provider => self.list_incoming(actor),
                _ => self.list_my_proposals(actor),
            },
            Command::CancelProposal(arg) => self.cancel_proposal(actor, &arg, now),
            Command::MyBookings => self.list_bookings(actor),
            Command::CancelBooking(arg) => self.cancel_booking(actor, &arg, now),
            Command::Accept(arg) => self.accept_by_index(actor, &arg, now),
            Command::Reject(arg) => self.reject_by_index(actor, &arg, now),
            Command::Settlement => self.settlement_reply(actor),
        }
    }

    /// Clear every flow of the identity; the supervisor view survives
    fn cancel_all_flows(&self, profile: &Profile) -> ServiceResult<String> {
        let external_id = &profile.external_id;

        self.finish_flow::<ProposalFlow>(external_id)?;
        self.finish_flow::<ReviewFlow>(external_id)?;
        self.finish_flow::<ApprovalFlow>(external_id)?;
        self.reset_mode_pick(external_id)?;

        info!(identity = %external_id, "All flows canceled");
        Ok(self.text(profile.language, "flow-canceled"))
    }

    fn help(&self, actor: &Actor) -> String {
        let lang = actor.lang();
        let by_view = match actor.effective_role {
            Role::Provider => "help-provider",
            _ => "help-requester",
        };

        match actor.profile.role {
            Role::ProviderPending => self.text(lang, "help-pending"),
            Role::Supervisor => format!(
                "{}\n{}",
                self.text(lang, "help-supervisor"),
                self.text(lang, by_view)
            ),
            Role::Requester | Role::Provider => self.text(lang, by_view),
        }
    }

    fn switch_language(&self, actor: &Actor) -> ServiceResult<String> {
        let language = actor.lang().toggled();
        self.db
            .update_profile_field(&actor.profile.id, ProfileField::Language(language))?;

        info!(identity = %actor.external_id(), language = %language, "Language switched");
        Ok(self.text(language, "language-switched"))
    }

    // ==================== Rendering helpers ====================

    pub(crate) fn text(&self, lang: Language, key: &str) -> String {
        self.i18n.get(lang, key, None)
    }

    pub(crate) fn render(&self, lang: Language, message: Localized) -> String {
        message.render(&self.i18n, lang)
    }

    pub(crate) fn mode_label(&self, lang: Language, mode: CategoryMode) -> String {
        self.text(lang, mode.label_key())
    }

    /// Format an instant on the configured local wall clock
    pub(crate) fn local_time(&self, instant: &DateTime<Utc>) -> String {
        let offset = self.runtime_config.dynamic().scheduling.offset();
        instant
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    pub(crate) fn display_name(&self, profile_id: &str) -> ServiceResult<String> {
        Ok(self
            .db
            .get_profile(profile_id)?
            .map(|p| p.name)
            .unwrap_or_else(|| "?".to_string()))
    }

    /// Push a message to another party, rendered in their language
    pub(crate) fn push_to(&self, recipient: &Profile, message: Localized) {
        debug!(to = %recipient.external_id, message = %message, "Pushing notification");
        let text = self.render(recipient.language, message);
        self.notifier.push(&recipient.external_id, &text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynamicConfig, StaticConfig};
    use crate::db::{
        AcceptOutcome, BookingStatus, NewProposal, Party, PaymentStatus, PriceRule,
        ProposalStatus, TimeProposal,
    };
    use crate::notify::testing::RecordingNotifier;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    /// 09:00 in Taipei
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap()
    }

    struct Harness {
        service: SlotbookService,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let static_config: StaticConfig = serde_json::from_value(json!({})).unwrap();
            let mut dynamic: DynamicConfig = serde_json::from_value(json!({})).unwrap();
            dynamic.i18n.default_language = Language::En;
            dynamic.access.supervisor_ids = vec!["S1".to_string()];
            dynamic.pricing.rules = vec![
                PriceRule {
                    bucket: crate::db::DurationBucket::Short,
                    category: CategoryMode::Online,
                    amount: 500,
                },
                PriceRule {
                    bucket: crate::db::DurationBucket::Long,
                    category: CategoryMode::Online,
                    amount: 900,
                },
            ];
            let runtime_config = Arc::new(RuntimeConfig::new(static_config, dynamic));

            let notifier = Arc::new(RecordingNotifier::default());
            let service = SlotbookService::new(db, runtime_config, notifier.clone());
            service.seed_price_rules().unwrap();

            Self { service, notifier }
        }

        fn db(&self) -> &Database {
            &self.service.db
        }

        fn say(&self, who: &str, text: &str) -> String {
            self.say_at(who, text, now())
        }

        fn say_at(&self, who: &str, text: &str, at: DateTime<Utc>) -> String {
            self.service.handle_message_at(who, Some(who), text, at)
        }

        /// First contact, so later replies carry no welcome
        fn requester(&self, who: &str) -> Profile {
            self.say(who, "help");
            self.profile(who)
        }

        fn provider(&self, who: &str) -> Profile {
            self.db()
                .create_profile(&NewProfile {
                    external_id: who.to_string(),
                    name: who.to_string(),
                    role: Role::Provider,
                    language: Language::En,
                })
                .unwrap()
        }

        fn profile(&self, who: &str) -> Profile {
            self.db().get_profile_by_external_id(who).unwrap().unwrap()
        }

        fn en(&self, message: Localized) -> String {
            message.render(&self.service.i18n, Language::En)
        }

        fn propose(
            &self,
            requester: &Profile,
            provider: &Profile,
            start: DateTime<Utc>,
            minutes: i64,
        ) -> TimeProposal {
            self.db()
                .insert_proposal(&NewProposal {
                    proposer_id: requester.id.clone(),
                    provider_id: provider.id.clone(),
                    start_time: start,
                    end_time: start + Duration::minutes(minutes),
                    category: CategoryMode::Online,
                    note: None,
                })
                .unwrap()
        }

        fn book(
            &self,
            requester: &Profile,
            provider: &Profile,
            start: DateTime<Utc>,
            minutes: i64,
        ) -> crate::db::Booking {
            let proposal = self.propose(requester, provider, start, minutes);
            match self
                .db()
                .accept_proposal(&proposal.id, &provider.id, "TWD", now())
                .unwrap()
            {
                AcceptOutcome::Accepted(booking) => booking,
                other => panic!("expected booking, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_first_contact_creates_requester_with_welcome() {
        let h = Harness::new();
        let reply = h.say("R1", "help");

        let profile = h.profile("R1");
        assert_eq!(profile.role, Role::Requester);
        assert_eq!(profile.language, Language::En);
        assert!(reply.starts_with(&h.en(Localized::new("welcome").arg("name", "R1"))));
        assert!(reply.ends_with(&h.service.text(Language::En, "help-requester")));

        // Only the first reply is prefixed
        assert_eq!(
            h.say("R1", "help"),
            h.service.text(Language::En, "help-requester")
        );
    }

    #[test]
    fn test_happy_path_proposal_to_booking() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");

        let reply = h.say("R1", "create proposal");
        assert!(reply.contains("1) P1"));
        assert_eq!(
            h.say("R1", "1"),
            format!(
                "{}\n1) online\n2) in person",
                h.service.text(Language::En, "proposal-pick-category")
            )
        );
        assert_eq!(
            h.say("R1", "A"),
            h.service.text(Language::En, "proposal-input-time")
        );
        // Two hours from now, local time
        assert_eq!(
            h.say("R1", "2026-03-02 11:00"),
            h.service.text(Language::En, "proposal-input-note")
        );
        let confirm = h.say("R1", "bring slides");
        assert!(confirm.contains("2026-03-02 11:00"));
        assert!(confirm.contains("bring slides"));

        assert_eq!(
            h.say("R1", "1"),
            h.en(Localized::new("proposal-created").arg("provider", "P1"))
        );
        assert!(h.db().get_state("R1", "proposal_create").unwrap().is_none());

        let pending = h
            .db()
            .list_pending_proposals(Party::Requester, &requester.id)
            .unwrap();
        assert_eq!(pending.len(), 1);
        let proposal = &pending[0];
        assert_eq!(proposal.provider_id, provider.id);
        assert_eq!(proposal.category, CategoryMode::Online);
        assert_eq!(proposal.start_time, Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
        assert_eq!(proposal.end_time, Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap());
        assert_eq!(proposal.note.as_deref(), Some("bring slides"));
        assert_eq!(h.notifier.sent_to("P1").len(), 1);

        let reply = h.say("P1", "accept 1");
        assert_eq!(
            reply,
            h.en(Localized::new("accept-done")
                .arg("name", "R1")
                .arg("start", "2026-03-02 11:00")
                .arg("end", "2026-03-02 12:00"))
        );

        let accepted = h.db().get_proposal(&proposal.id).unwrap().unwrap();
        assert_eq!(accepted.status, ProposalStatus::Accepted);
        let bookings = h
            .db()
            .list_confirmed_bookings(Party::Provider, &provider.id)
            .unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].proposal_id, proposal.id);
        assert_eq!(bookings[0].payment_status, PaymentStatus::Unpaid);

        let notices = h.notifier.sent_to("R1");
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("P1 accepted your proposal"));
    }

    #[test]
    fn test_too_soon_start_stays_on_time_step() {
        let h = Harness::new();
        h.provider("P1");
        let requester = h.requester("R1");

        h.say("R1", "create proposal");
        h.say("R1", "1");
        h.say("R1", "online");
        let reply = h.say("R1", "2026-03-02 09:10");
        assert!(reply.contains("at least 60 minutes"));
        assert!(reply.contains("2026-03-02 10:00"));

        let state = h.db().get_state("R1", "proposal_create").unwrap().unwrap();
        assert_eq!(state.step, "input_time");

        // A corrected resend re-attempts the same step
        assert_eq!(
            h.say("R1", "2026-03-02 10:00~10:30"),
            h.service.text(Language::En, "proposal-input-note")
        );
        assert!(h
            .db()
            .list_pending_proposals(Party::Requester, &requester.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_step_input_keeps_state() {
        let h = Harness::new();
        h.provider("P1");
        h.requester("R1");

        h.say("R1", "create proposal");
        assert_eq!(
            h.say("R1", "first one"),
            h.en(Localized::new("index-missing").arg("example", "1"))
        );
        assert_eq!(
            h.say("R1", "7"),
            h.en(Localized::new("index-out-of-range").arg("max", 1))
        );
        let state = h.db().get_state("R1", "proposal_create").unwrap().unwrap();
        assert_eq!(state.step, "pick_provider");

        h.say("R1", "1");
        assert_eq!(
            h.say("R1", "hybrid"),
            h.service.text(Language::En, "proposal-category-invalid")
        );
    }

    #[test]
    fn test_abort_discards_draft() {
        let h = Harness::new();
        h.provider("P1");
        let requester = h.requester("R1");

        for text in ["create proposal", "1", "2", "2026-03-02 15:00", "-"] {
            h.say("R1", text);
        }
        assert_eq!(
            h.say("R1", "2"),
            h.service.text(Language::En, "proposal-aborted")
        );
        assert!(h.db().get_state("R1", "proposal_create").unwrap().is_none());
        assert!(h
            .db()
            .list_pending_proposals(Party::Requester, &requester.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cancel_flow_clears_every_flow() {
        let h = Harness::new();
        h.provider("P1");
        h.requester("R1");
        h.db()
            .upsert_state("R1", "provider_action", "pick_item", &json!({}))
            .unwrap();

        h.say("R1", "create proposal");
        h.say("R1", "1");
        assert_eq!(
            h.say("R1", "取消流程"),
            h.service.text(Language::En, "flow-canceled")
        );
        assert_eq!(h.db().count_states("R1").unwrap(), 0);
    }

    #[test]
    fn test_starting_proposal_flow_leaves_other_flows_alone() {
        let h = Harness::new();
        h.provider("P1");
        h.requester("R1");
        let other = json!({ "selected": "abc" });
        h.db()
            .upsert_state("R1", "provider_action", "choose_action", &other)
            .unwrap();

        h.say("R1", "create proposal");
        h.say("R1", "1");

        let untouched = h.db().get_state("R1", "provider_action").unwrap().unwrap();
        assert_eq!(untouched.step, "choose_action");
        assert_eq!(untouched.payload, other);
        assert_eq!(h.db().count_states("R1").unwrap(), 2);
    }

    #[test]
    fn test_commands_work_mid_flow_without_losing_it() {
        let h = Harness::new();
        h.provider("P1");
        h.requester("R1");

        for text in ["create proposal", "1", "1"] {
            h.say("R1", text);
        }
        assert_eq!(
            h.say("R1", "my bookings"),
            h.service.text(Language::En, "bookings-none")
        );
        let state = h.db().get_state("R1", "proposal_create").unwrap().unwrap();
        assert_eq!(state.step, "input_time");

        // The note step keeps command-like text as the note
        h.say("R1", "2026-03-02 15:00");
        let confirm = h.say("R1", "my bookings");
        assert!(confirm.contains("Note: my bookings"));
    }

    #[test]
    fn test_unreadable_flow_state_is_discarded() {
        let h = Harness::new();
        h.requester("R1");
        h.db()
            .upsert_state("R1", "proposal_create", "no_such_step", &json!({}))
            .unwrap();

        assert_eq!(
            h.say("R1", "hello"),
            h.service.text(Language::En, "error-unknown-command")
        );
        assert!(h.db().get_state("R1", "proposal_create").unwrap().is_none());
    }

    #[test]
    fn test_cancel_proposal_revalidates_index() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let start = now() + Duration::hours(5);
        let first = h.propose(&requester, &provider, start, 60);
        h.propose(&requester, &provider, start + Duration::hours(2), 60);

        let listing = h.say("R1", "list pending");
        assert!(listing.contains("1) P1"));
        assert!(listing.contains("2) P1"));

        // The provider rejects one between display and action
        assert_eq!(h.say("P1", "reject 1 busy"), h.service.text(Language::En, "reject-done"));
        let rejected = h.db().get_proposal(&first.id).unwrap().unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(rejected.response_note.as_deref(), Some("busy"));

        assert_eq!(
            h.say("R1", "cancel proposal 2"),
            h.en(Localized::new("index-out-of-range").arg("max", 1))
        );
        assert_eq!(
            h.say("R1", "cancel 1"),
            h.service.text(Language::En, "proposal-canceled")
        );
        assert!(h
            .db()
            .list_pending_proposals(Party::Requester, &requester.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reject_notice_uses_requester_language() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        h.say("R1", "switch language");
        assert_eq!(h.profile("R1").language, Language::Zh);
        h.propose(&requester, &provider, now() + Duration::hours(5), 60);

        // Provider replies in their own language
        assert_eq!(h.say("P1", "reject 1"), h.service.text(Language::En, "reject-done"));

        let notices = h.notifier.sent_to("R1");
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("拒絕了你"));
        assert!(notices[0].contains(&h.service.text(Language::Zh, "reject-default-reason")));
    }

    #[test]
    fn test_overlapping_accept_is_refused_without_writes() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let r1 = h.requester("R1");
        let r2 = h.requester("R2");
        let start = now() + Duration::hours(3);
        h.propose(&r1, &provider, start, 60);
        let second = h.propose(&r2, &provider, start + Duration::minutes(30), 60);

        h.say("P1", "accept 1");
        let reply = h.say("P1", "accept 1");
        assert_eq!(
            reply,
            h.en(Localized::new("accept-conflict-provider")
                .arg("start", "2026-03-02 12:00")
                .arg("end", "2026-03-02 13:00"))
        );

        let bookings = h
            .db()
            .list_confirmed_bookings(Party::Provider, &provider.id)
            .unwrap();
        assert_eq!(bookings.len(), 1);
        let still_pending = h.db().get_proposal(&second.id).unwrap().unwrap();
        assert_eq!(still_pending.status, ProposalStatus::Pending);
    }

    #[test]
    fn test_requester_cancellation_window() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let soon = h.book(&requester, &provider, now() + Duration::minutes(20), 60);
        let edge = h.book(&requester, &provider, now() + Duration::minutes(90), 30);

        // Inside the window at 20 minutes
        assert_eq!(
            h.say("R1", "cancel booking 1"),
            h.en(Localized::new("booking-cancel-too-late").arg("minutes", 30))
        );
        assert_eq!(
            h.db().get_booking(&soon.id).unwrap().unwrap().status,
            BookingStatus::Confirmed
        );

        // Exactly 30 minutes before the start is still allowed
        let at_edge = edge.start_time - Duration::minutes(30);
        assert_eq!(
            h.say_at("R1", "cancel booking 2", at_edge),
            h.service.text(Language::En, "booking-canceled")
        );
        let canceled = h.db().get_booking(&edge.id).unwrap().unwrap();
        assert_eq!(canceled.status, BookingStatus::Canceled);
        assert_eq!(canceled.canceled_by.as_deref(), Some(requester.id.as_str()));

        let notices = h.notifier.sent_to("P1");
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("R1 canceled the booking"));
    }

    #[test]
    fn test_provider_cancellation_bypasses_window() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let booking = h.book(&requester, &provider, now() + Duration::minutes(10), 60);

        assert_eq!(
            h.say("P1", "cancel booking 1 sick"),
            h.service.text(Language::En, "booking-canceled")
        );
        let canceled = h.db().get_booking(&booking.id).unwrap().unwrap();
        assert_eq!(canceled.status, BookingStatus::Canceled);
        assert_eq!(canceled.cancel_reason.as_deref(), Some("sick"));
        assert_eq!(h.notifier.sent_to("R1").len(), 1);
    }

    #[test]
    fn test_settlement_prices_and_writes_back() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let short = h.book(&requester, &provider, now() + Duration::hours(3), 30);
        let long = h.book(&requester, &provider, now() + Duration::hours(5), 60);

        let settlement = h.service.settle(&provider.id).unwrap();
        assert_eq!(settlement.count, 2);
        assert_eq!(settlement.total, 500 + 900);
        assert_eq!(settlement.currency, "TWD");
        assert_eq!(h.db().get_booking(&short.id).unwrap().unwrap().price, Some(500));
        assert_eq!(h.db().get_booking(&long.id).unwrap().unwrap().price, Some(900));

        // Running again re-prices instead of accumulating
        assert_eq!(h.service.settle(&provider.id).unwrap().total, 1400);

        let reply = h.say("P1", "settlement");
        assert!(reply.starts_with(&h.en(Localized::new("settlement-header").arg("count", 2))));
        assert!(reply.ends_with(&h.en(
            Localized::new("settlement-total")
                .arg("total", 1400)
                .arg("currency", "TWD")
        )));
    }

    #[test]
    fn test_settlement_falls_back_to_default_amount() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let proposal = h
            .db()
            .insert_proposal(&NewProposal {
                proposer_id: requester.id.clone(),
                provider_id: provider.id.clone(),
                start_time: now() + Duration::hours(3),
                end_time: now() + Duration::hours(4),
                category: CategoryMode::InPerson,
                note: None,
            })
            .unwrap();
        h.db()
            .accept_proposal(&proposal.id, &provider.id, "TWD", now())
            .unwrap();

        let settlement = h.service.settle(&provider.id).unwrap();
        assert_eq!(settlement.total, 800);
    }

    #[test]
    fn test_supervisor_impersonates_provider() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        h.propose(&requester, &provider, now() + Duration::hours(4), 60);

        h.say("S1", "help");
        assert_eq!(h.profile("S1").role, Role::Supervisor);

        // Requester view by default
        assert_eq!(
            h.say("S1", "accept 1"),
            h.service.text(Language::En, "error-not-allowed")
        );

        assert_eq!(
            h.say("S1", "provider view"),
            h.service.text(Language::En, "view-provider")
        );
        assert_eq!(
            h.say("S1", "list pending"),
            h.service.text(Language::En, "error-provider-not-selected")
        );

        assert!(h.say("S1", "pick provider").contains("1) P1"));
        assert_eq!(
            h.say("S1", "5"),
            h.en(Localized::new("index-out-of-range").arg("max", 1))
        );
        assert_eq!(
            h.say("S1", "1"),
            h.en(Localized::new("pick-provider-done").arg("name", "P1"))
        );

        let listing = h.say("S1", "list pending");
        assert!(listing.contains("1) R1"));
        assert!(h.say("S1", "1").starts_with("Selected: R1"));
        assert!(h.say("S1", "1").starts_with("Accepted."));

        assert!(h.db().get_state("S1", "provider_action").unwrap().is_none());
        assert_eq!(
            h.db()
                .list_confirmed_bookings(Party::Provider, &provider.id)
                .unwrap()
                .len(),
            1
        );
        // The requester hears it from the provider, not the supervisor
        assert!(h.notifier.sent_to("R1")[0].starts_with("P1 accepted"));

        // The view survives a flow cancel and a switch back keeps the target
        h.say("S1", "cancel flow");
        h.say("S1", "requester view");
        assert_eq!(
            h.say("S1", "provider view"),
            h.en(Localized::new("view-provider-with-target").arg("name", "P1"))
        );
    }

    #[test]
    fn test_review_flow_reject_with_reason_step() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        let proposal = h.propose(&requester, &provider, now() + Duration::hours(4), 60);

        h.say("P1", "list pending");
        h.say("P1", "1");
        assert_eq!(
            h.say("P1", "2"),
            h.service.text(Language::En, "review-input-reason")
        );
        // Free-text step keeps command-like words
        assert_eq!(h.say("P1", "help wanted elsewhere"), h.service.text(Language::En, "reject-done"));

        let closed = h.db().get_proposal(&proposal.id).unwrap().unwrap();
        assert_eq!(closed.status, ProposalStatus::Rejected);
        assert_eq!(closed.response_note.as_deref(), Some("help wanted elsewhere"));
        assert!(h.db().get_state("P1", "provider_action").unwrap().is_none());
    }

    #[test]
    fn test_review_flow_accepts_command_words() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let r1 = h.requester("R1");
        let r2 = h.requester("R2");
        let first = h.propose(&r1, &provider, now() + Duration::hours(4), 60);
        let second = h.propose(&r2, &provider, now() + Duration::hours(6), 60);

        h.say("P1", "review");
        h.say("P1", "2");
        assert_eq!(h.say("P1", "reject schedule full"), h.service.text(Language::En, "reject-done"));
        let rejected = h.db().get_proposal(&second.id).unwrap().unwrap();
        assert_eq!(rejected.response_note.as_deref(), Some("schedule full"));

        h.say("P1", "review");
        h.say("P1", "1");
        assert!(h.say("P1", "accept").starts_with("Accepted."));
        let accepted = h.db().get_proposal(&first.id).unwrap().unwrap();
        assert_eq!(accepted.status, ProposalStatus::Accepted);

        // The flow is closed, so a bare accept falls back to the index form
        h.propose(&r2, &provider, now() + Duration::hours(8), 60);
        assert_eq!(
            h.say("P1", "accept"),
            h.en(Localized::new("index-missing").arg("example", "accept 1"))
        );
    }

    #[test]
    fn test_review_of_withdrawn_proposal_is_refused() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        h.propose(&requester, &provider, now() + Duration::hours(4), 60);

        h.say("P1", "list pending");
        h.say("P1", "1");
        h.say("R1", "cancel proposal 1");

        assert_eq!(
            h.say("P1", "1"),
            h.service.text(Language::En, "proposal-no-longer-pending")
        );
        assert!(h
            .db()
            .list_confirmed_bookings(Party::Provider, &provider.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pending_provider_blocked_until_approved() {
        let h = Harness::new();
        h.requester("R1");

        assert_eq!(
            h.say("R1", "register provider"),
            h.service.text(Language::En, "provider-registered")
        );
        assert_eq!(h.profile("R1").role, Role::ProviderPending);
        assert_eq!(
            h.say("R1", "create proposal"),
            h.service.text(Language::En, "error-pending-approval")
        );
        assert_eq!(
            h.say("R1", "help"),
            h.service.text(Language::En, "help-pending")
        );
        assert_eq!(
            h.say("R1", "cancel flow"),
            h.service.text(Language::En, "flow-canceled")
        );

        h.say("S1", "help");
        assert!(h.say("S1", "pending providers").contains("1) R1"));
        assert_eq!(
            h.say("S1", "1"),
            h.en(Localized::new("approval-done").arg("name", "R1"))
        );
        assert_eq!(h.profile("R1").role, Role::Provider);
        assert_eq!(
            h.notifier.sent_to("R1"),
            vec![h.service.text(Language::En, "approval-notice")]
        );
        assert_eq!(
            h.say("R1", "help"),
            h.service.text(Language::En, "help-provider")
        );
    }

    #[test]
    fn test_non_supervisor_cannot_impersonate() {
        let h = Harness::new();
        h.provider("P1");
        h.requester("R1");

        assert_eq!(
            h.say("R1", "pick provider"),
            h.service.text(Language::En, "error-supervisor-only")
        );
        assert_eq!(
            h.say("P1", "provider view"),
            h.service.text(Language::En, "error-supervisor-only")
        );
    }

    #[test]
    fn test_configured_supervisor_is_promoted_on_next_message() {
        let h = Harness::new();
        h.requester("R9");

        let mut dynamic = (**h.service.runtime_config.dynamic()).clone();
        dynamic.access.supervisor_ids.push("R9".to_string());
        h.service.runtime_config.update_dynamic(dynamic);

        assert_eq!(
            h.say("R9", "pending providers"),
            h.service.text(Language::En, "approval-none")
        );
        assert_eq!(h.profile("R9").role, Role::Supervisor);
    }

    #[test]
    fn test_switch_language_replies_in_new_language() {
        let h = Harness::new();
        h.requester("R1");

        assert_eq!(h.say("R1", "切換語言"), "已切換為中文。");
        assert_eq!(
            h.say("R1", "說明"),
            h.service.text(Language::Zh, "help-requester")
        );
        assert_eq!(h.say("R1", "switch language"), "Language switched to English.");
    }

    #[test]
    fn test_update_settings_hot_reloads() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        h.book(&requester, &provider, now() + Duration::minutes(40), 60);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime
            .block_on(h.service.update_settings(HashMap::from([(
                "scheduling.cancel_window_minutes".to_string(),
                json!(60),
            )])))
            .unwrap();

        assert_eq!(
            h.say("R1", "cancel booking 1"),
            h.en(Localized::new("booking-cancel-too-late").arg("minutes", 60))
        );
    }

    #[test]
    fn test_identity_locks_do_not_accumulate() {
        let h = Harness::new();
        for i in 0..50 {
            h.say(&format!("U{}", i), "help");
        }
        assert!(h.service.identity_locks.is_empty());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| h.say("R1", "help"));
            }
        });
        assert!(h.service.identity_locks.is_empty());
        assert_eq!(h.db().list_profiles_by_role(Role::Requester).unwrap().len(), 51);
    }

    #[test]
    fn test_emptied_price_rules_fall_back_to_default_amount() {
        let h = Harness::new();
        let provider = h.provider("P1");
        let requester = h.requester("R1");
        h.book(&requester, &provider, now() + Duration::hours(3), 30);
        assert_eq!(h.service.settle(&provider.id).unwrap().total, 500);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime
            .block_on(h.service.update_settings(HashMap::from([(
                "pricing.rules".to_string(),
                json!([]),
            )])))
            .unwrap();

        assert_eq!(
            h.db()
                .find_price(crate::db::DurationBucket::Short, CategoryMode::Online)
                .unwrap(),
            None
        );
        assert_eq!(h.service.settle(&provider.id).unwrap().total, 800);
    }
}
