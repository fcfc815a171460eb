//! Typed codecs for facts stored in resource labels.
//!
//! Providers have no structured fields for several things an [`Endpoint`]
//! models directly, so they travel in labels. Each fact has one codec that
//! owns its label keys and knows how to write and read them; converters never
//! touch those keys directly.
//!
//! Decoding precedence for the trigger kind on a managed function is:
//! scheduled, task queue, callable, blocking, then the structured event
//! trigger, then HTTPS. A trigger label always wins over a structured event
//! trigger.
//!
//! [`Endpoint`]: crate::endpoint::Endpoint

use crate::endpoint::{
    BlockingTrigger, CallableTrigger, Labels, ScheduleTrigger, TaskQueueTrigger, Trigger,
    BEFORE_CREATE_EVENT, BEFORE_SEND_EMAIL_EVENT, BEFORE_SEND_SMS_EVENT, BEFORE_SIGN_IN_EVENT,
    DEFAULT_CODEBASE,
};
use crate::error::{Error, Result};

/// Marks a function fronted by a scheduler job.
pub const SCHEDULED_LABEL: &str = "deployment-scheduled";
/// Marks a function fronted by a task queue.
pub const TASK_QUEUE_LABEL: &str = "deployment-taskqueue";
/// Marks a callable function.
pub const CALLABLE_LABEL: &str = "deployment-callable";
/// Short key of the auth event a blocking function handles.
pub const BLOCKING_LABEL: &str = "deployment-blocking";
/// Codebase of a non-default-codebase endpoint.
pub const CODEBASE_LABEL: &str = "firebase-functions-codebase";
/// Content fingerprint.
pub const HASH_LABEL: &str = "firebase-functions-hash";
/// Product that manages a container service.
pub const MANAGED_BY_LABEL: &str = "goog-managed-by";
/// Runtime of a container service running a function.
pub const RUNTIME_LABEL: &str = "goog-cloudfunctions-runtime";
/// Legacy label that is never written back.
pub const DEPLOYMENT_TOOL_LABEL: &str = "deployment-tool";

/// [`MANAGED_BY_LABEL`] value written by this tool.
pub const MANAGED_BY_TOOL: &str = "firebase-functions";
/// [`MANAGED_BY_LABEL`] value of services owned by the managed-functions product.
pub const MANAGED_BY_FUNCTIONS: &str = "cloud-functions";

const TRUE: &str = "true";

/// Blocking event types and their label short keys.
const BLOCKING_EVENTS: [(&str, &str); 4] = [
    (BEFORE_CREATE_EVENT, "before-create"),
    (BEFORE_SIGN_IN_EVENT, "before-sign-in"),
    (BEFORE_SEND_EMAIL_EVENT, "before-send-email"),
    (BEFORE_SEND_SMS_EVENT, "before-send-sms"),
];

/// Encode and decode one fact carried in labels.
pub trait LabelCodec {
    /// The decoded fact.
    type Value;

    /// Label keys owned by this codec.
    const KEYS: &'static [&'static str];

    /// Write `value` into `labels`, removing keys that no longer apply.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEndpoint`] when the value has no label encoding.
    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()>;

    /// Read the fact back from `labels`.
    ///
    /// # Errors
    /// Returns [`Error::MalformedProviderData`] for unrecognized label values.
    fn decode(labels: &Labels) -> Result<Self::Value>;
}

/// Remove every label owned by a codec, plus legacy labels.
///
/// Applied to user labels before encoding and to provider labels after
/// decoding, so codec-owned keys never leak between the two.
pub fn strip_owned_labels(labels: &mut Labels) {
    let owned = TriggerKindLabel::KEYS
        .iter()
        .chain(CodebaseLabel::KEYS)
        .chain(HashLabel::KEYS)
        .chain(OwnershipLabel::KEYS)
        .chain(RuntimeLabel::KEYS)
        .chain(&[DEPLOYMENT_TOOL_LABEL]);
    for key in owned {
        labels.remove(*key);
    }
}

// ============================================================================
// Trigger kind
// ============================================================================

/// Trigger kinds a managed function can only express through labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabeledKind {
    Scheduled,
    TaskQueue,
    Callable,
    Blocking { event_type: String },
}

impl LabeledKind {
    /// The label-encoded kind of `trigger`, if it has one.
    #[must_use]
    pub fn of(trigger: &Trigger) -> Option<Self> {
        match trigger {
            Trigger::Schedule(_) => Some(Self::Scheduled),
            Trigger::TaskQueue(_) => Some(Self::TaskQueue),
            Trigger::Callable(_) => Some(Self::Callable),
            Trigger::Blocking(b) => Some(Self::Blocking {
                event_type: b.event_type.clone(),
            }),
            Trigger::Https(_) | Trigger::Event(_) => None,
        }
    }

    /// Trigger with an empty payload; payloads live on other resources.
    #[must_use]
    pub fn into_trigger(self) -> Trigger {
        match self {
            Self::Scheduled => Trigger::Schedule(ScheduleTrigger::default()),
            Self::TaskQueue => Trigger::TaskQueue(TaskQueueTrigger::default()),
            Self::Callable => Trigger::Callable(CallableTrigger {}),
            Self::Blocking { event_type } => Trigger::Blocking(BlockingTrigger {
                event_type,
                ..BlockingTrigger::default()
            }),
        }
    }
}

/// Trigger kinds without a structured field on the managed function.
pub struct TriggerKindLabel;

impl LabelCodec for TriggerKindLabel {
    type Value = Option<LabeledKind>;

    const KEYS: &'static [&'static str] =
        &[SCHEDULED_LABEL, TASK_QUEUE_LABEL, CALLABLE_LABEL, BLOCKING_LABEL];

    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()> {
        for key in Self::KEYS {
            labels.remove(*key);
        }
        let (key, label) = match value {
            None => return Ok(()),
            Some(LabeledKind::Scheduled) => (SCHEDULED_LABEL, TRUE),
            Some(LabeledKind::TaskQueue) => (TASK_QUEUE_LABEL, TRUE),
            Some(LabeledKind::Callable) => (CALLABLE_LABEL, TRUE),
            Some(LabeledKind::Blocking { event_type }) => {
                let short = BLOCKING_EVENTS
                    .iter()
                    .find(|(event, _)| *event == event_type.as_str())
                    .map(|(_, short)| *short)
                    .ok_or_else(|| {
                        Error::InvalidEndpoint(format!(
                            "unsupported blocking event type {event_type:?}"
                        ))
                    })?;
                (BLOCKING_LABEL, short)
            }
        };
        labels.insert(key.to_string(), label.to_string());
        Ok(())
    }

    fn decode(labels: &Labels) -> Result<Self::Value> {
        let is_set = |key: &str| labels.get(key).is_some_and(|v| v == TRUE);

        if is_set(SCHEDULED_LABEL) {
            return Ok(Some(LabeledKind::Scheduled));
        }
        if is_set(TASK_QUEUE_LABEL) {
            return Ok(Some(LabeledKind::TaskQueue));
        }
        if is_set(CALLABLE_LABEL) {
            return Ok(Some(LabeledKind::Callable));
        }
        let Some(short) = labels.get(BLOCKING_LABEL) else {
            return Ok(None);
        };
        BLOCKING_EVENTS
            .iter()
            .find(|(_, s)| *s == short.as_str())
            .map(|(event, _)| {
                Some(LabeledKind::Blocking {
                    event_type: (*event).to_string(),
                })
            })
            .ok_or_else(|| {
                Error::MalformedProviderData(format!(
                    "unknown {BLOCKING_LABEL} label value {short:?}"
                ))
            })
    }
}

// ============================================================================
// Codebase, hash
// ============================================================================

/// Codebase; only non-default codebases are labeled.
pub struct CodebaseLabel;

impl LabelCodec for CodebaseLabel {
    type Value = String;

    const KEYS: &'static [&'static str] = &[CODEBASE_LABEL];

    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()> {
        // A stale label would move the endpoint back into its old codebase.
        labels.remove(CODEBASE_LABEL);
        if value != DEFAULT_CODEBASE {
            labels.insert(CODEBASE_LABEL.to_string(), value.clone());
        }
        Ok(())
    }

    fn decode(labels: &Labels) -> Result<Self::Value> {
        Ok(labels
            .get(CODEBASE_LABEL)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CODEBASE.to_string()))
    }
}

/// Content fingerprint, labeled whenever present.
pub struct HashLabel;

impl LabelCodec for HashLabel {
    type Value = Option<String>;

    const KEYS: &'static [&'static str] = &[HASH_LABEL];

    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()> {
        labels.remove(HASH_LABEL);
        if let Some(hash) = value {
            labels.insert(HASH_LABEL.to_string(), hash.clone());
        }
        Ok(())
    }

    fn decode(labels: &Labels) -> Result<Self::Value> {
        Ok(labels.get(HASH_LABEL).cloned())
    }
}

// ============================================================================
// Ownership, runtime (container services)
// ============================================================================

/// Product that manages a container service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Deployed by this tool directly.
    Tool,
    /// Backing service of a second generation managed function.
    ManagedFunctions,
    /// Some other product.
    Other(String),
}

/// Ownership of a container service.
pub struct OwnershipLabel;

impl LabelCodec for OwnershipLabel {
    type Value = Option<Owner>;

    const KEYS: &'static [&'static str] = &[MANAGED_BY_LABEL];

    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()> {
        labels.remove(MANAGED_BY_LABEL);
        let label = match value {
            None => return Ok(()),
            Some(Owner::Tool) => MANAGED_BY_TOOL,
            Some(Owner::ManagedFunctions) => MANAGED_BY_FUNCTIONS,
            Some(Owner::Other(other)) => other.as_str(),
        };
        labels.insert(MANAGED_BY_LABEL.to_string(), label.to_string());
        Ok(())
    }

    fn decode(labels: &Labels) -> Result<Self::Value> {
        Ok(labels.get(MANAGED_BY_LABEL).map(|v| match v.as_str() {
            MANAGED_BY_TOOL => Owner::Tool,
            MANAGED_BY_FUNCTIONS => Owner::ManagedFunctions,
            other => Owner::Other(other.to_string()),
        }))
    }
}

/// Runtime of a container service running a function.
pub struct RuntimeLabel;

impl LabelCodec for RuntimeLabel {
    type Value = Option<String>;

    const KEYS: &'static [&'static str] = &[RUNTIME_LABEL];

    fn encode(value: &Self::Value, labels: &mut Labels) -> Result<()> {
        labels.remove(RUNTIME_LABEL);
        if let Some(runtime) = value {
            labels.insert(RUNTIME_LABEL.to_string(), runtime.clone());
        }
        Ok(())
    }

    fn decode(labels: &Labels) -> Result<Self::Value> {
        Ok(labels.get(RUNTIME_LABEL).cloned())
    }
}
