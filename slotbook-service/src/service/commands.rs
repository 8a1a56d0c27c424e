//! Text command table.

use strum::EnumDiscriminants;

/// A recognized command with its raw argument text
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(CommandKind), derive(Hash))]
pub enum Command {
    /// Universal escape from every flow
    CancelFlow,
    Help,
    SwitchLanguage,
    /// Requester applies to become a provider
    RegisterProvider,
    RequesterView,
    ProviderView,
    PickProvider,
    PendingProviders,
    ApproveProvider(String),
    CreateProposal,
    /// Own pending proposals (requester) or incoming ones (provider)
    ListPending,
    CancelProposal(String),
    MyBookings,
    CancelBooking(String),
    Accept(String),
    Reject(String),
    Settlement,
}

/// Who may run a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Everyone, including pending providers
    Anyone,
    /// Plain requesters only (not supervisors browsing as one)
    Applicant,
    Supervisor,
    /// Effective role requester
    Requester,
    /// Effective role provider with a concrete provider to act for
    Provider,
    /// Either side of a booking
    Party,
}

impl CommandKind {
    pub(crate) fn access(self) -> Access {
        match self {
            CommandKind::CancelFlow | CommandKind::Help | CommandKind::SwitchLanguage => {
                Access::Anyone
            }
            CommandKind::RegisterProvider => Access::Applicant,
            CommandKind::RequesterView
            | CommandKind::ProviderView
            | CommandKind::PickProvider
            | CommandKind::PendingProviders
            | CommandKind::ApproveProvider => Access::Supervisor,
            CommandKind::CreateProposal | CommandKind::CancelProposal => Access::Requester,
            CommandKind::Accept | CommandKind::Reject | CommandKind::Settlement => Access::Provider,
            CommandKind::ListPending | CommandKind::MyBookings | CommandKind::CancelBooking => {
                Access::Party
            }
        }
    }

    /// Commands that (re)start a flow even while another step is waiting
    pub(crate) fn interrupts_flow(self) -> bool {
        matches!(
            self,
            CommandKind::CreateProposal
                | CommandKind::ListPending
                | CommandKind::RequesterView
                | CommandKind::ProviderView
                | CommandKind::PickProvider
                | CommandKind::PendingProviders
        )
    }

    fn takes_argument(self) -> bool {
        matches!(
            self,
            CommandKind::ApproveProvider
                | CommandKind::CancelProposal
                | CommandKind::CancelBooking
                | CommandKind::Accept
                | CommandKind::Reject
        )
    }
}

/// Aliases in match order; longer phrases precede their prefixes.
const ALIASES: &[(&str, CommandKind)] = &[
    ("cancel flow", CommandKind::CancelFlow),
    ("取消流程", CommandKind::CancelFlow),
    ("重新開始", CommandKind::CancelFlow),
    ("cancel", CommandKind::CancelFlow),
    ("取消", CommandKind::CancelFlow),
    ("cancel proposal", CommandKind::CancelProposal),
    ("取消提案", CommandKind::CancelProposal),
    ("cancel booking", CommandKind::CancelBooking),
    ("取消課程", CommandKind::CancelBooking),
    // "cancel 1" withdraws a pending proposal
    ("cancel", CommandKind::CancelProposal),
    ("取消", CommandKind::CancelProposal),
    ("help", CommandKind::Help),
    ("說明", CommandKind::Help),
    ("switch language", CommandKind::SwitchLanguage),
    ("切換語言", CommandKind::SwitchLanguage),
    ("register provider", CommandKind::RegisterProvider),
    ("申請老師", CommandKind::RegisterProvider),
    ("requester view", CommandKind::RequesterView),
    ("切換學生", CommandKind::RequesterView),
    ("學生模式", CommandKind::RequesterView),
    ("provider view", CommandKind::ProviderView),
    ("切換老師", CommandKind::ProviderView),
    ("老師模式", CommandKind::ProviderView),
    ("pick provider", CommandKind::PickProvider),
    ("選老師", CommandKind::PickProvider),
    ("pending providers", CommandKind::PendingProviders),
    ("審核老師", CommandKind::PendingProviders),
    ("approve", CommandKind::ApproveProvider),
    ("通過", CommandKind::ApproveProvider),
    ("create proposal", CommandKind::CreateProposal),
    ("預約課程", CommandKind::CreateProposal),
    ("提案", CommandKind::CreateProposal),
    ("list pending", CommandKind::ListPending),
    ("review", CommandKind::ListPending),
    ("待審核", CommandKind::ListPending),
    ("待確認", CommandKind::ListPending),
    ("my bookings", CommandKind::MyBookings),
    ("我的課表", CommandKind::MyBookings),
    ("accept", CommandKind::Accept),
    ("接受", CommandKind::Accept),
    ("reject", CommandKind::Reject),
    ("拒絕", CommandKind::Reject),
    ("settlement", CommandKind::Settlement),
    ("salary", CommandKind::Settlement),
    ("薪資", CommandKind::Settlement),
];

impl Command {
    /// Recognize a command. Matching ignores ASCII case and repeated spaces;
    /// argument text keeps its original case.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        ALIASES.iter().find_map(|&(alias, kind)| {
            let rest = strip_prefix_ignore_ascii_case(&text, alias)?;
            let accepted = if kind.takes_argument() {
                // "accepted" must not read as "accept" + "ed"
                !rest.starts_with(|c: char| c.is_ascii_alphabetic())
            } else {
                rest.trim().is_empty()
            };
            accepted.then(|| Self::build(kind, rest.trim()))
        })
    }

    pub fn kind(&self) -> CommandKind {
        CommandKind::from(self)
    }

    fn build(kind: CommandKind, arg: &str) -> Self {
        let arg = arg.to_string();
        match kind {
            CommandKind::CancelFlow => Command::CancelFlow,
            CommandKind::Help => Command::Help,
            CommandKind::SwitchLanguage => Command::SwitchLanguage,
            CommandKind::RegisterProvider => Command::RegisterProvider,
            CommandKind::RequesterView => Command::RequesterView,
            CommandKind::ProviderView => Command::ProviderView,
            CommandKind::PickProvider => Command::PickProvider,
            CommandKind::PendingProviders => Command::PendingProviders,
            CommandKind::ApproveProvider => Command::ApproveProvider(arg),
            CommandKind::CreateProposal => Command::CreateProposal,
            CommandKind::ListPending => Command::ListPending,
            CommandKind::CancelProposal => Command::CancelProposal(arg),
            CommandKind::MyBookings => Command::MyBookings,
            CommandKind::CancelBooking => Command::CancelBooking(arg),
            CommandKind::Accept => Command::Accept(arg),
            CommandKind::Reject => Command::Reject(arg),
            CommandKind::Settlement => Command::Settlement,
        }
    }
}

fn strip_prefix_ignore_ascii_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_english_and_chinese_aliases() {
        assert_eq!(Command::parse("Cancel  Flow"), Some(Command::CancelFlow));
        assert_eq!(Command::parse("取消流程"), Some(Command::CancelFlow));
        assert_eq!(Command::parse("my bookings"), Some(Command::MyBookings));
        assert_eq!(Command::parse("我的課表"), Some(Command::MyBookings));
        assert_eq!(Command::parse("提案"), Some(Command::CreateProposal));
        assert_eq!(Command::parse("薪資"), Some(Command::Settlement));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            Command::parse("取消提案1"),
            Some(Command::CancelProposal("1".to_string()))
        );
        assert_eq!(
            Command::parse("cancel booking 2"),
            Some(Command::CancelBooking("2".to_string()))
        );
        assert_eq!(
            Command::parse("Reject 1 Schedule Full"),
            Some(Command::Reject("1 Schedule Full".to_string()))
        );
        assert_eq!(Command::parse("accept"), Some(Command::Accept(String::new())));
    }

    #[test]
    fn test_bare_cancel_is_flow_cancel_and_indexed_cancel_is_proposal() {
        assert_eq!(Command::parse("cancel"), Some(Command::CancelFlow));
        assert_eq!(Command::parse("取消"), Some(Command::CancelFlow));
        assert_eq!(
            Command::parse("cancel 3"),
            Some(Command::CancelProposal("3".to_string()))
        );
    }

    #[test]
    fn test_unrecognized_text() {
        assert_eq!(Command::parse("accepted"), None);
        assert_eq!(Command::parse("help me"), None);
        assert_eq!(Command::parse("2026-03-02 11:00"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_access_table() {
        assert_eq!(CommandKind::Help.access(), Access::Anyone);
        assert_eq!(CommandKind::Accept.access(), Access::Provider);
        assert_eq!(CommandKind::CreateProposal.access(), Access::Requester);
        assert_eq!(CommandKind::ApproveProvider.access(), Access::Supervisor);
        assert!(CommandKind::CreateProposal.interrupts_flow());
        assert!(!CommandKind::Accept.interrupts_flow());
    }
}
