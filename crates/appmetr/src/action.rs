//! Tracked actions and their wire representation.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Property bag attached to every action.
pub type Properties = BTreeMap<String, Value>;

const MAP_OVERHEAD: usize = 40;
const ENTRY_OVERHEAD: usize = 40;
const OBJECT_HEADER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "END")]
    End,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::On => "ON",
            ExperimentStatus::End => "END",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub order_id: String,
    pub transaction_id: String,
    pub processor: String,
    pub ps_user_spent_currency_code: String,
    pub ps_user_spent_currency_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_currency_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_currency_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps_user_store_country_code: Option<String>,
    #[serde(
        rename = "isSandbox",
        alias = "sandbox",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sandbox: Option<bool>,
}

impl Payment {
    pub fn new(
        order_id: impl Into<String>,
        transaction_id: impl Into<String>,
        processor: impl Into<String>,
        ps_user_spent_currency_code: impl Into<String>,
        ps_user_spent_currency_amount: impl Into<String>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            transaction_id: transaction_id.into(),
            processor: processor.into(),
            ps_user_spent_currency_code: ps_user_spent_currency_code.into(),
            ps_user_spent_currency_amount: ps_user_spent_currency_amount.into(),
            ..Default::default()
        }
    }

    pub fn with_app_currency(
        mut self,
        code: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        self.app_currency_code = Some(code.into());
        self.app_currency_amount = Some(amount.into());
        self
    }

    pub fn with_store_country(mut self, country_code: impl Into<String>) -> Self {
        self.ps_user_store_country_code = Some(country_code.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    fn approximate_size(&self) -> usize {
        str_cost(Some(&self.order_id))
            + str_cost(Some(&self.transaction_id))
            + str_cost(Some(&self.processor))
            + str_cost(Some(&self.ps_user_spent_currency_code))
            + str_cost(Some(&self.ps_user_spent_currency_amount))
            + str_cost(self.app_currency_code.as_deref())
            + str_cost(self.app_currency_amount.as_deref())
            + str_cost(self.ps_user_store_country_code.as_deref())
    }
}

/// Kind-specific part of an action. The `action` field on the wire names the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum ActionKind {
    #[serde(rename = "trackEvent")]
    Event { event: String },
    #[serde(rename = "trackRawEvent")]
    RawEvent { event: String },
    #[serde(rename = "trackPayment")]
    Payment(Payment),
    #[serde(rename = "trackLevel")]
    Level { level: i32 },
    #[serde(rename = "attachProperties")]
    AttachProperties,
    #[serde(rename = "attachEntityAttributes")]
    AttachEntityAttributes {
        entity_name: String,
        entity_value: String,
    },
    #[serde(rename = "trackExperiment")]
    Experiment {
        status: ExperimentStatus,
        experiment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    #[serde(rename = "trackRefundInfo")]
    Refund {
        transaction_id: String,
        cancellation_date_ms: i64,
    },
}

impl ActionKind {
    /// Wire discriminator, e.g. `trackEvent`.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Event { .. } => "trackEvent",
            ActionKind::RawEvent { .. } => "trackRawEvent",
            ActionKind::Payment(_) => "trackPayment",
            ActionKind::Level { .. } => "trackLevel",
            ActionKind::AttachProperties => "attachProperties",
            ActionKind::AttachEntityAttributes { .. } => "attachEntityAttributes",
            ActionKind::Experiment { .. } => "trackExperiment",
            ActionKind::Refund { .. } => "trackRefundInfo",
        }
    }

    /// Class name used by the typed legacy envelope.
    pub(crate) fn legacy_class_name(&self) -> &'static str {
        match self {
            ActionKind::Event { .. } => "Event",
            ActionKind::RawEvent { .. } => "RawEvent",
            ActionKind::Payment(_) => "Payment",
            ActionKind::Level { .. } => "Level",
            ActionKind::AttachProperties => "AttachProperties",
            ActionKind::AttachEntityAttributes { .. } => "AttachEntityAttributes",
            ActionKind::Experiment {
                status: ExperimentStatus::On,
                ..
            } => "ExperimentStart",
            ActionKind::Experiment {
                status: ExperimentStatus::End,
                ..
            } => "ExperimentEnd",
            ActionKind::Refund { .. } => "Refund",
        }
    }

    fn approximate_size(&self) -> usize {
        match self {
            ActionKind::Event { event } | ActionKind::RawEvent { event } => str_cost(Some(event)),
            ActionKind::Payment(payment) => payment.approximate_size(),
            ActionKind::Level { .. } => 4,
            ActionKind::AttachProperties | ActionKind::AttachEntityAttributes { .. } => 0,
            ActionKind::Experiment {
                status,
                experiment,
                group,
            } => {
                str_cost(Some(status.as_str()))
                    + str_cost(Some(experiment))
                    + str_cost(group.as_deref())
            }
            ActionKind::Refund { transaction_id, .. } => str_cost(Some(transaction_id)) + 8,
        }
    }
}

/// One tracked event record.
///
/// `timestamp` is the creation time in epoch millis. `user_time` is an optional
/// caller-supplied override and wins over the creation time when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(flatten)]
    kind: ActionKind,
    timestamp: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_user_time"
    )]
    user_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default)]
    properties: Properties,
}

fn deserialize_user_time<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.filter(|millis| *millis != 0))
}

fn str_cost(s: Option<&str>) -> usize {
    // UTF-16 payload plus string object and backing array overhead
    s.map_or(0, |s| s.len() * 2 + 24 + 16)
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            timestamp: chrono::Utc::now().timestamp_millis(),
            user_time: None,
            user_id: None,
            properties: Properties::new(),
        }
    }

    pub fn event(event: impl Into<String>) -> Self {
        Self::new(ActionKind::Event {
            event: event.into(),
        })
    }

    /// An event the ingestion side stores verbatim; property names may start with `$`.
    pub fn raw_event(event: impl Into<String>) -> Self {
        Self::new(ActionKind::RawEvent {
            event: event.into(),
        })
    }

    pub fn payment(payment: Payment) -> Self {
        Self::new(ActionKind::Payment(payment))
    }

    pub fn level(level: i32) -> Self {
        Self::new(ActionKind::Level { level })
    }

    pub fn attach_properties() -> Self {
        Self::new(ActionKind::AttachProperties)
    }

    pub fn attach_entity_attributes(
        entity_name: impl Into<String>,
        entity_value: impl Into<String>,
    ) -> Self {
        Self::new(ActionKind::AttachEntityAttributes {
            entity_name: entity_name.into(),
            entity_value: entity_value.into(),
        })
    }

    pub fn experiment_start(experiment: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(ActionKind::Experiment {
            status: ExperimentStatus::On,
            experiment: experiment.into(),
            group: Some(group.into()),
        })
    }

    pub fn experiment_end(experiment: impl Into<String>) -> Self {
        Self::new(ActionKind::Experiment {
            status: ExperimentStatus::End,
            experiment: experiment.into(),
            group: None,
        })
    }

    pub fn refund(transaction_id: impl Into<String>, cancellation_date_ms: i64) -> Self {
        Self::new(ActionKind::Refund {
            transaction_id: transaction_id.into(),
            cancellation_date_ms,
        })
    }

    pub fn server_install(user_id: impl Into<String>) -> Self {
        Self::event("server/server_install").with_user_id(user_id)
    }

    pub fn track_level(user_id: impl Into<String>, level: i32) -> Self {
        Self::attach_properties()
            .with_user_id(user_id)
            .with_property("$level", level)
    }

    pub fn track_ab_group(user_id: impl Into<String>, groups: Vec<String>) -> Self {
        Self::attach_properties()
            .with_user_id(user_id)
            .with_property("$abGroup", groups)
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the creation timestamp. Zero clears the override.
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.user_time = (millis != 0).then_some(millis);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Effective timestamp: the override if present, otherwise the creation time.
    pub fn timestamp(&self) -> i64 {
        self.user_time.unwrap_or(self.timestamp)
    }

    pub fn created_at(&self) -> i64 {
        self.timestamp
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Rough in-memory footprint used for flush thresholds, not an exact byte count.
    pub fn approximate_size(&self) -> usize {
        let mut size = MAP_OVERHEAD + ENTRY_OVERHEAD * self.properties.len();
        size += str_cost(Some(self.kind.name()));
        size += str_cost(Some(&self.timestamp.to_string()));
        size += str_cost(self.user_id.as_deref());
        for (key, value) in &self.properties {
            size += str_cost(Some(key));
            size += match value {
                Value::Null => 0,
                Value::String(s) => str_cost(Some(s)),
                other => str_cost(Some(&other.to_string())),
            };
        }
        size += self.kind.approximate_size();
        OBJECT_HEADER + size + OBJECT_HEADER
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.timestamp() == other.timestamp()
            && self.user_id == other.user_id
            && self.properties == other.properties
    }
}
