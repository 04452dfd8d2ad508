use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operational role an actor holds. Gates which workflows the actor may enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Registrant,
    Driver,
    Warehouse,
    Operator,
    Supervisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Registrant => "registrant",
            Role::Driver => "driver",
            Role::Warehouse => "warehouse",
            Role::Operator => "operator",
            Role::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named finite state machine governing one role's multi-step task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Registration,
    DriverRoute,
    WarehouseReceive,
    RemainsAdjustment,
    TaskReport,
}

impl Workflow {
    pub const ALL: [Workflow; 5] = [
        Workflow::Registration,
        Workflow::DriverRoute,
        Workflow::WarehouseReceive,
        Workflow::RemainsAdjustment,
        Workflow::TaskReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Registration => "registration",
            Workflow::DriverRoute => "driver_route",
            Workflow::WarehouseReceive => "warehouse_receive",
            Workflow::RemainsAdjustment => "remains_adjustment",
            Workflow::TaskReport => "task_report",
        }
    }

    /// The role an actor must hold to enter this workflow.
    pub fn role(&self) -> Role {
        match self {
            Workflow::Registration => Role::Registrant,
            Workflow::DriverRoute => Role::Driver,
            Workflow::WarehouseReceive => Role::Warehouse,
            Workflow::RemainsAdjustment | Workflow::TaskReport => Role::Operator,
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Workflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Workflow::ALL
            .iter()
            .copied()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| format!("unknown workflow: {s}"))
    }
}

/// Every state any workflow can be in. Which states belong to which workflow
/// is declared by the registry, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,

    AwaitingPhone,
    AwaitingApproval,
    Approved,
    Rejected,

    AwaitingMileage,
    RouteActive,
    AwaitingArrivalLocation,
    AwaitingStopCompletion,
    RouteComplete,

    AwaitingItemIdentifier,
    AwaitingQuantity,
    AwaitingConfirmationPhoto,
    ReceiveComplete,

    AwaitingRemainsForBunker,
    RemainsAdjusted,

    AwaitingProblemDescription,
    AwaitingProblemPhoto,
    ProblemReported,

    AwaitingRetryConfirmation,
    Cancelled,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::AwaitingPhone => "awaiting_phone",
            Step::AwaitingApproval => "awaiting_approval",
            Step::Approved => "approved",
            Step::Rejected => "rejected",
            Step::AwaitingMileage => "awaiting_mileage",
            Step::RouteActive => "route_active",
            Step::AwaitingArrivalLocation => "awaiting_arrival_location",
            Step::AwaitingStopCompletion => "awaiting_stop_completion",
            Step::RouteComplete => "route_complete",
            Step::AwaitingItemIdentifier => "awaiting_item_identifier",
            Step::AwaitingQuantity => "awaiting_quantity",
            Step::AwaitingConfirmationPhoto => "awaiting_confirmation_photo",
            Step::ReceiveComplete => "receive_complete",
            Step::AwaitingRemainsForBunker => "awaiting_remains_for_bunker",
            Step::RemainsAdjusted => "remains_adjusted",
            Step::AwaitingProblemDescription => "awaiting_problem_description",
            Step::AwaitingProblemPhoto => "awaiting_problem_photo",
            Step::ProblemReported => "problem_reported",
            Step::AwaitingRetryConfirmation => "awaiting_retry_confirmation",
            Step::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown state: {s}"))
    }
}

/// Expected shape of an actor's next raw input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputClass {
    Numeric,
    FreeText,
    PhotoAttachment,
    GeoCoordinate,
    MenuSelection,
    Cancellation,
}

impl fmt::Display for InputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputClass::Numeric => "a number",
            InputClass::FreeText => "a text message",
            InputClass::PhotoAttachment => "a photo",
            InputClass::GeoCoordinate => "a location",
            InputClass::MenuSelection => "one of the offered options",
            InputClass::Cancellation => "cancel",
        };
        f.write_str(name)
    }
}

/// Outcome a supervisor picks for a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    /// The subject cancelled before anyone decided.
    Withdrawn,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decision::Approve => "approved",
            Decision::Reject => "rejected",
            Decision::Withdrawn => "withdrawn",
        };
        f.write_str(name)
    }
}

/// Edge label in a workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Numeric,
    FreeText,
    Photo,
    Geo,
    /// Menu selection carrying the chosen option key.
    Menu(&'static str),
    Cancel,
    /// Resolved from outside the actor's own conversation.
    Decision(Decision),
}

impl Trigger {
    pub fn class(&self) -> InputClass {
        match self {
            Trigger::Numeric => InputClass::Numeric,
            Trigger::FreeText => InputClass::FreeText,
            Trigger::Photo => InputClass::PhotoAttachment,
            Trigger::Geo => InputClass::GeoCoordinate,
            Trigger::Menu(_) => InputClass::MenuSelection,
            Trigger::Cancel => InputClass::Cancellation,
            Trigger::Decision(_) => InputClass::MenuSelection,
        }
    }
}
