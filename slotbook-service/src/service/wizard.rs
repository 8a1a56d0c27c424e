//! Generic multi-turn flow engine.
//!
//! Each flow is a marker type implementing [`Flow`]: a name under which its
//! state is stored, a closed step enum and a serde payload. Entry operations
//! save the first step; step handlers return a [`StepOutcome`] that is either
//! persisted as the next step or clears the state. A handler error leaves the
//! stored state untouched so the user can simply resend.

use regex::Regex;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{Command, SlotbookService};
use crate::error::{DatabaseError, ServiceError, ServiceResult};
use crate::i18n::Localized;

static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("index pattern is valid"));

/// A named, independent multi-step conversation
pub(crate) trait Flow {
    /// Storage key of the flow
    const NAME: &'static str;

    type Step: Copy + PartialEq + Debug + AsRef<str> + FromStr;
    type Payload: Serialize + DeserializeOwned;

    /// Whether the step consumes the next inbound text at all
    fn awaits_input(_step: Self::Step) -> bool {
        true
    }

    /// Free-text steps keep text that happens to look like a command
    fn takes_free_text(_step: Self::Step) -> bool {
        false
    }
}

/// Loaded step and payload of one flow
pub(crate) struct FlowState<F: Flow> {
    pub step: F::Step,
    pub payload: F::Payload,
}

/// What a step handler decided
pub(crate) enum StepOutcome<F: Flow> {
    /// Persist the next step and reply
    Next {
        step: F::Step,
        payload: F::Payload,
        reply: String,
    },
    /// Clear the flow and reply
    Done { reply: String },
}

impl SlotbookService {
    /// Load a flow's state. Rows that no longer decode are dropped.
    pub(crate) fn load_flow<F: Flow>(&self, external_id: &str) -> ServiceResult<Option<FlowState<F>>> {
        let Some(state) = self.db.get_state(external_id, F::NAME)? else {
            return Ok(None);
        };

        let step = state.step.parse::<F::Step>();
        let payload = serde_json::from_value::<F::Payload>(state.payload);

        match (step, payload) {
            (Ok(step), Ok(payload)) => Ok(Some(FlowState { step, payload })),
            (step, payload) => {
                warn!(
                    identity = %external_id,
                    flow = F::NAME,
                    step = %state.step,
                    step_ok = step.is_ok(),
                    payload_error = ?payload.err().map(|e| e.to_string()),
                    "Discarding unreadable flow state"
                );
                self.db.clear_state(external_id, F::NAME)?;
                Ok(None)
            }
        }
    }

    pub(crate) fn save_flow<F: Flow>(
        &self,
        external_id: &str,
        step: F::Step,
        payload: &F::Payload,
    ) -> ServiceResult<()> {
        let value = serde_json::to_value(payload).map_err(DatabaseError::Serialization)?;
        self.db.upsert_state(external_id, F::NAME, step.as_ref(), &value)?;

        debug!(identity = %external_id, flow = F::NAME, step = ?step, "Flow advanced");
        Ok(())
    }

    pub(crate) fn finish_flow<F: Flow>(&self, external_id: &str) -> ServiceResult<()> {
        if self.db.clear_state(external_id, F::NAME)? {
            debug!(identity = %external_id, flow = F::NAME, "Flow cleared");
        }
        Ok(())
    }

    /// Feed text to a flow if it is waiting for it.
    ///
    /// Returns `None` when the flow is not active, or when the text is a
    /// recognized command and the current step does not take free text.
    pub(crate) fn drive_flow<F: Flow>(
        &self,
        external_id: &str,
        command: Option<&Command>,
        handler: impl FnOnce(FlowState<F>) -> ServiceResult<StepOutcome<F>>,
    ) -> ServiceResult<Option<String>> {
        let Some(state) = self.load_flow::<F>(external_id)? else {
            return Ok(None);
        };

        if !F::awaits_input(state.step) || (command.is_some() && !F::takes_free_text(state.step)) {
            return Ok(None);
        }

        match handler(state)? {
            StepOutcome::Next {
                step,
                payload,
                reply,
            } => {
                self.save_flow::<F>(external_id, step, &payload)?;
                Ok(Some(reply))
            }
            StepOutcome::Done { reply } => {
                self.finish_flow::<F>(external_id)?;
                Ok(Some(reply))
            }
        }
    }
}

/// Whether the text contains an index at all
pub(crate) fn has_index(text: &str) -> bool {
    INDEX_RE.is_match(text)
}

/// Resolve the first integer in `text` as a 1-based index into a list of
/// `len` items. Returns the 0-based position.
pub(crate) fn parse_index(text: &str, len: usize, example: &str) -> ServiceResult<usize> {
    let Some(digits) = INDEX_RE.find(text) else {
        return Err(ServiceError::InvalidInput(
            Localized::new("index-missing").arg("example", example),
        ));
    };

    match digits.as_str().parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Ok(n - 1),
        _ => Err(ServiceError::NotFound(
            Localized::new("index-out-of-range").arg("max", len),
        )),
    }
}

/// Pick an item by the index in `text`
pub(crate) fn pick<'a, T>(items: &'a [T], text: &str, example: &str) -> ServiceResult<&'a T> {
    parse_index(text, items.len(), example).map(|i| &items[i])
}

/// Trimmed text after the first integer, if any remains
pub(crate) fn text_after_index(text: &str) -> Option<&str> {
    let digits = INDEX_RE.find(text)?;
    Some(text[digits.end()..].trim()).filter(|rest| !rest.is_empty())
}

/// Free-text answer where "-" or nothing means "none"
pub(crate) fn optional_text(text: &str) -> Option<String> {
    let text = text.trim();
    match text {
        "" | "-" | "－" => None,
        _ => Some(text.to_string()),
    }
}
