use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};
use unic_langid::LanguageIdentifier;

/// Languages a party can select for their replies
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    /// Fluent locale backing this language
    pub fn locale(&self) -> &'static str {
        match self {
            Language::Zh => "zh-TW",
            Language::En => "en",
        }
    }

    /// The other supported language (used by the language toggle)
    pub fn toggled(&self) -> Self {
        match self {
            Language::Zh => Language::En,
            Language::En => Language::Zh,
        }
    }
}

/// A message key plus its arguments, rendered later in the reader's language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localized {
    pub key: &'static str,
    pub args: Vec<(&'static str, String)>,
}

impl Localized {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: &'static str, value: impl ToString) -> Self {
        self.args.push((name, value.to_string()));
        self
    }

    pub fn render(&self, i18n: &I18n, lang: Language) -> String {
        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        i18n.format(lang, self.key, &args)
    }
}

impl fmt::Display for Localized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for (k, v) in &self.args {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

/// Internationalization service using Fluent (thread-safe)
pub struct I18n {
    bundles: RwLock<HashMap<String, FluentBundle<FluentResource>>>,
    default_locale: String,
}

impl I18n {
    /// Create a new i18n service with the embedded translations loaded
    pub fn new() -> Self {
        Self::with_default(Language::Zh)
    }

    /// Create a new i18n service falling back to the given language
    pub fn with_default(default: Language) -> Self {
        let i18n = Self {
            bundles: RwLock::new(HashMap::new()),
            default_locale: default.locale().to_string(),
        };

        i18n.load_embedded();

        i18n
    }

    /// Add a locale with translations
    pub fn add_locale(&self, locale: &str, content: &str) -> Result<(), String> {
        let lang_id: LanguageIdentifier = locale
            .parse()
            .map_err(|e| format!("Invalid locale '{}': {}", locale, e))?;

        let resource = FluentResource::try_new(content.to_string())
            .map_err(|(_, errors)| format!("Failed to parse Fluent resource: {:?}", errors))?;

        let mut bundle = FluentBundle::new_concurrent(vec![lang_id]);
        // Chat clients render the bidi isolation marks literally
        bundle.set_use_isolating(false);
        bundle
            .add_resource(resource)
            .map_err(|errors| format!("Failed to add resource to bundle: {:?}", errors))?;

        let mut bundles = self
            .bundles
            .write()
            .map_err(|_| "translation bundles lock poisoned".to_string())?;
        bundles.insert(locale.to_string(), bundle);

        debug!(locale = %locale, "Loaded translations");

        Ok(())
    }

    /// Get a translated message
    pub fn get(&self, lang: Language, key: &str, args: Option<&FluentArgs>) -> String {
        // Try requested locale, fall back to default, fall back to key
        self.try_get(lang.locale(), key, args)
            .or_else(|| self.try_get(&self.default_locale, key, args))
            .unwrap_or_else(|| key.to_string())
    }

    /// Try to get a translation from a specific locale
    fn try_get(&self, locale: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundles = self.bundles.read().ok()?;
        let bundle = bundles.get(locale)?;
        let message = bundle.get_message(key)?;
        let pattern = message.value()?;

        let mut errors = vec![];
        let result = bundle.format_pattern(pattern, args, &mut errors);

        if !errors.is_empty() {
            warn!(key = %key, errors = ?errors, "Fluent formatting errors");
        }

        Some(result.to_string())
    }

    /// Get a translated message with arguments
    pub fn format(&self, lang: Language, key: &str, args: &[(&str, &str)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (k, v) in args {
            fluent_args.set(*k, *v);
        }
        self.get(lang, key, Some(&fluent_args))
    }

    fn load_embedded(&self) {
        for (locale, content) in [("en", EN_TRANSLATIONS), ("zh-TW", ZH_TRANSLATIONS)] {
            if let Err(e) = self.add_locale(locale, content) {
                warn!(locale, error = %e, "Failed to load embedded translations");
            }
        }
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::new()
    }
}

const EN_TRANSLATIONS: &str = r#"
# Slotbook - English Translations

# Errors
error-internal = Something went wrong on our side. Please try again later.
error-not-allowed = This command is not available in your current role.
error-pending-approval = Your provider account is awaiting approval. Business commands are unavailable until a supervisor approves it.
error-supervisor-only = Only supervisors can use this command.
error-provider-not-selected = You are in provider view but have not picked a provider yet. Send "pick provider" first.
error-unknown-command = Unknown command. Send "help" to see what you can do.
error-missing-identity = The message carries no sender identity.
error-unknown-setting = Unknown setting key: { $key }

# Shared
welcome = Welcome, { $name }! You have been registered as a requester.
flow-canceled = Canceled. You can start again at any time.
index-missing = Please reply with a number, for example: { $example }
index-out-of-range = Invalid number. Please enter 1 ~ { $max }.
language-switched = Language switched to English.
help-requester = Requester commands: create proposal / list pending / cancel proposal 1 / my bookings / cancel booking 1 / register provider / switch language / cancel flow
help-provider = Provider commands: list pending / accept 1 / reject 1 reason / my bookings / cancel booking 1 / settlement / switch language / cancel flow
help-supervisor = Supervisor commands: requester view / provider view / pick provider / pending providers / approve 1
help-pending = Your provider account is awaiting approval. Available: switch language / cancel flow

# Supervisor view
view-requester = Switched to requester view.
view-provider = Switched to provider view. Send "pick provider" to choose who to act for.
view-provider-with-target = Switched to provider view, acting for { $name }.
pick-provider-prompt = Reply with the number of the provider to act for:
pick-provider-done = Now acting for provider { $name }. Send "list pending" to review proposals.
pick-provider-stale = That provider is no longer available. Send "pick provider" again.
no-providers = There are no providers yet.

# Provider approval
approval-list-header = Providers awaiting approval:
approval-instructions = Reply with a number to approve, or send "cancel flow".
approval-none = No providers are awaiting approval.
approval-done = { $name } is now a provider.
approval-notice = Your provider account has been approved. Send "help" to see your commands.
provider-registered = Your provider application has been submitted. A supervisor will review it.

# Proposal wizard
proposal-pick-provider = Step 1/5: reply with the number of the provider:
proposal-pick-category = Step 2/5: choose a class mode:
proposal-category-invalid = Unrecognized class mode. Reply 1 (online) or 2 (in person).
proposal-input-time = Step 3/5: enter the start time (local), e.g. 2026-12-24 11:00 or 2026-12-24 11:00~12:30
proposal-time-invalid = Could not read that time. Use the format 2026-12-24 11:00 or 2026-12-24 11:00~12:30
proposal-time-order = The end time must be after the start time.
proposal-too-soon = The start time must be at least { $minutes } minutes from now (after { $earliest }). Please enter another time.
proposal-input-note = Step 4/5: enter a note for the provider (send "-" for none).
proposal-confirm = Step 5/5: please confirm. Provider: { $provider } | Mode: { $mode } | Time: { $start } ~ { $end } | Note: { $note }. Reply 1 to confirm or 2 to abort.
proposal-confirm-invalid = Reply 1 to confirm or 2 to abort.
proposal-created = Proposal sent to { $provider }. You will be notified when they respond.
proposal-aborted = Proposal discarded.
proposal-new-notice = New proposal from { $requester }: { $start } ~ { $end } ({ $mode }). Send "list pending" to review.

# Proposal lists
proposals-none = You have no pending proposals.
proposals-header = Your pending proposals:
proposal-line = { $index }) { $name } | { $mode } | { $start } ~ { $end }
proposal-line-note = { $index }) { $name } | { $mode } | { $start } ~ { $end } | { $note }
proposals-cancel-hint = To cancel, send: cancel proposal 1
proposal-canceled = Proposal canceled.
incoming-none = There are no proposals awaiting your response.
incoming-header = Proposals awaiting your response:
incoming-hint = Reply with a number to open one, or send: accept 1 / reject 1 reason

# Provider review
review-selected = Selected: { $name } | { $mode } | { $start } ~ { $end }. Reply 1 to accept or 2 to reject (you may add a reason, e.g. "2 schedule full").
review-action-invalid = Reply 1 to accept or 2 to reject.
review-input-reason = Enter a reason for the rejection (send "-" to skip).
proposal-no-longer-pending = That proposal is no longer pending. Send "list pending" to refresh.

# Accept / reject
accept-done = Accepted. Booking confirmed: { $name } | { $start } ~ { $end }.
accept-notice = { $provider } accepted your proposal: { $start } ~ { $end }.
accept-conflict-provider = Cannot accept: the provider already has a booking at { $start } ~ { $end }.
accept-conflict-requester = Cannot accept: the requester already has a booking at { $start } ~ { $end }.
reject-done = Rejected.
reject-notice = { $provider } declined your proposal for { $start }. Reason: { $reason }
reject-default-reason = No reason given

# Bookings
bookings-none = You have no confirmed bookings.
bookings-header = Your confirmed bookings:
booking-line = { $index }) { $name } | { $mode } | { $start } ~ { $end }
bookings-cancel-hint = To cancel, send: cancel booking 1
booking-cancel-too-late = Bookings cannot be canceled within { $minutes } minutes of the start time.
booking-canceled = Booking canceled.
booking-no-longer-confirmed = That booking is no longer active. Send "my bookings" to refresh.
booking-cancel-notice = { $actor } canceled the booking on { $start } ~ { $end }.

# Settlement
settlement-none = No unpaid bookings.
settlement-header = Unpaid bookings: { $count }
settlement-line = { $index }) { $start } | { $minutes } min | { $mode } | { $amount } { $currency }
settlement-total = Total payable: { $total } { $currency }

# Categories
category-online = online
category-in_person = in person
"#;

const ZH_TRANSLATIONS: &str = r#"
# Slotbook - 繁體中文

# Errors
error-internal = 系統忙碌中，請稍後再試。
error-not-allowed = 目前身分無法使用此指令。
error-pending-approval = 你的老師身分正在等待審核，通過前無法使用此功能。
error-supervisor-only = 只有管理員可以使用此指令。
error-provider-not-selected = 你目前是老師模式，但尚未代入老師。請先輸入「選老師」。
error-unknown-command = 指令未支援，輸入「說明」查看可用指令。
error-missing-identity = 訊息缺少傳送者身分。
error-unknown-setting = 不支援的設定項目：{ $key }

# Shared
welcome = 👋 歡迎{ $name }！已自動將你的身分註冊為「學生」。
flow-canceled = ✅ 已取消，隨時可以重新開始。
index-missing = 請輸入序號（例如 { $example }）。
index-out-of-range = 序號錯誤，請輸入 1 ~ { $max }
language-switched = 已切換為中文。
help-requester = 學生可用：提案 / 待確認 / 取消提案1 / 我的課表 / 取消課程1 / 申請老師 / 切換語言 / 取消流程
help-provider = 老師可用：待審核 / 接受1 / 拒絕1 原因 / 我的課表 / 取消課程1 / 薪資 / 切換語言 / 取消流程
help-supervisor = 管理員可用：切換學生 / 切換老師 / 選老師 / 審核老師 / 通過1
help-pending = 你的老師身分正在等待審核。可用：切換語言 / 取消流程

# Supervisor view
view-requester = ✅ 已切換為【學生模式】
view-provider = ✅ 已切換為【老師模式】，請輸入「選老師」選擇要代入的老師。
view-provider-with-target = ✅ 已切換為【老師模式】，目前代入：{ $name }
pick-provider-prompt = 請輸入要代入的老師序號：
pick-provider-done = ✅ 已代入老師：{ $name }，你可以輸入「待審核」查看提案。
pick-provider-stale = 這位老師已無法代入，請重新輸入「選老師」。
no-providers = 目前沒有老師可選。

# Provider approval
approval-list-header = 待審核老師：
approval-instructions = 輸入序號即可通過審核，或輸入「取消流程」。
approval-none = 目前沒有待審核的老師。
approval-done = ✅ { $name } 已成為老師。
approval-notice = 🎉 你的老師身分已通過審核，輸入「說明」查看可用指令。
provider-registered = ✅ 已送出老師申請，請等待管理員審核。

# Proposal wizard
proposal-pick-provider = 步驟 1/5：請輸入老師序號：
proposal-pick-category = 步驟 2/5：請選擇課程模式：
proposal-category-invalid = 無法辨識課程模式，請輸入 1（線上）或 2（實體）。
proposal-input-time = 步驟 3/5：請輸入開始時間（台灣時間），例如 2026-12-24 11:00 或 2026-12-24 11:00~12:30
proposal-time-invalid = 時間格式錯誤，請使用 2026-12-24 11:00 或 2026-12-24 11:00~12:30
proposal-time-order = 結束時間必須晚於開始時間。
proposal-too-soon = 開始時間必須在 { $minutes } 分鐘之後（{ $earliest } 以後），請重新輸入。
proposal-input-note = 步驟 4/5：請輸入給老師的備註（沒有請輸入「-」）。
proposal-confirm = 步驟 5/5：請確認。老師：{ $provider }｜模式：{ $mode }｜時間：{ $start } ~ { $end }｜備註：{ $note }。輸入 1 確認，輸入 2 放棄。
proposal-confirm-invalid = 請輸入 1 確認，或輸入 2 放棄。
proposal-created = ✅ 已送出提案給 { $provider }，老師回覆後會通知你。
proposal-aborted = 已放棄此提案。
proposal-new-notice = 📩 { $requester } 提出新的上課時間：{ $start } ~ { $end }（{ $mode }），輸入「待審核」查看。

# Proposal lists
proposals-none = 你目前沒有待確認的提案。
proposals-header = 📌 你的待確認提案：
proposal-line = { $index }) { $name }｜{ $mode }｜{ $start } ~ { $end }
proposal-line-note = { $index }) { $name }｜{ $mode }｜{ $start } ~ { $end }｜{ $note }
proposals-cancel-hint = 取消請輸入：取消提案 1
proposal-canceled = ✅ 已取消提案。
incoming-none = 目前沒有待審核的提案。
incoming-header = 📌 待審核提案：
incoming-hint = 輸入序號查看，或輸入：接受1 / 拒絕1 原因

# Provider review
review-selected = 已選擇：{ $name }｜{ $mode }｜{ $start } ~ { $end }。輸入 1 接受，輸入 2 拒絕（可附上原因，例如「2 時間已滿」）。
review-action-invalid = 請輸入 1 接受，或輸入 2 拒絕。
review-input-reason = 請輸入拒絕原因（略過請輸入「-」）。
proposal-no-longer-pending = 這筆提案已不是待審核狀態，請重新輸入「待審核」。

# Accept / reject
accept-done = ✅ 已接受，課程成立：{ $name }｜{ $start } ~ { $end }
accept-notice = ✅ { $provider } 已接受你的提案：{ $start } ~ { $end }
accept-conflict-provider = ❌ 無法接受：老師在 { $start } ~ { $end } 已有課程。
accept-conflict-requester = ❌ 無法接受：學生在 { $start } ~ { $end } 已有課程。
reject-done = 已拒絕。
reject-notice = ❌ { $provider } 拒絕了你 { $start } 的提案。原因：{ $reason }
reject-default-reason = 未提供原因

# Bookings
bookings-none = 你目前沒有已成立的課程。
bookings-header = 📌 你的已成立課程：
booking-line = { $index }) { $name }｜{ $mode }｜{ $start } ~ { $end }
bookings-cancel-hint = 取消請輸入：取消課程 1
booking-cancel-too-late = ❌ 距離上課時間 { $minutes } 分鐘內不可取消。
booking-canceled = ✅ 已成功取消課程。
booking-no-longer-confirmed = 這堂課程已不在課表中，請重新輸入「我的課表」。
booking-cancel-notice = ⚠️ { $actor } 取消了 { $start } ~ { $end } 的課程。

# Settlement
settlement-none = 目前沒有未結算的課程。
settlement-header = 未結算課程：{ $count } 堂
settlement-line = { $index }) { $start }｜{ $minutes } 分鐘｜{ $mode }｜{ $amount } { $currency }
settlement-total = 應付總額：{ $total } { $currency }

# Categories
category-online = 線上
category-in_person = 實體
"#;
