use crate::session::{ActorId, ActorSession, IdempotencyKey};
use crate::workflows::{
    BunkerReading, ClearPolicy, EffectKind, PhotoRef, SessionData, StopVisit, TerminalSpec,
    Workflow,
};

/// External commit implied by a completed workflow, built only from
/// collected session data.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    ActivateRegistrant {
        phone: String,
    },
    RejectRegistrant,
    CompleteRoute {
        route_id: Option<String>,
        start_mileage: f64,
        stops: Vec<StopVisit>,
    },
    ReceiveStock {
        item_code: String,
        quantity: f64,
        confirmation_photo: PhotoRef,
    },
    AdjustRemains {
        machine_id: String,
        bunkers: Vec<BunkerReading>,
    },
    CreateTask {
        machine_id: Option<String>,
        description: String,
        photo: PhotoRef,
    },
}

impl SideEffect {
    pub fn kind(&self) -> EffectKind {
        match self {
            SideEffect::ActivateRegistrant { .. } => EffectKind::ActivateRegistrant,
            SideEffect::RejectRegistrant => EffectKind::RejectRegistrant,
            SideEffect::CompleteRoute { .. } => EffectKind::CompleteRoute,
            SideEffect::ReceiveStock { .. } => EffectKind::ReceiveStock,
            SideEffect::AdjustRemains { .. } => EffectKind::AdjustRemains,
            SideEffect::CreateTask { .. } => EffectKind::CreateTask,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SideEffect::ActivateRegistrant { .. } => "activate_registrant",
            SideEffect::RejectRegistrant => "reject_registrant",
            SideEffect::CompleteRoute { .. } => "complete_route",
            SideEffect::ReceiveStock { .. } => "receive_stock",
            SideEffect::AdjustRemains { .. } => "adjust_remains",
            SideEffect::CreateTask { .. } => "create_task",
        }
    }
}

/// A side effect bound to the run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRequest {
    pub key: IdempotencyKey,
    pub actor: ActorId,
    pub workflow: Workflow,
    pub policy: ClearPolicy,
    pub effect: SideEffect,
}

impl EffectRequest {
    pub fn for_session(session: &ActorSession, policy: ClearPolicy, effect: SideEffect) -> Self {
        Self {
            key: session.idempotency_key(),
            actor: session.actor_id.clone(),
            workflow: session.workflow,
            policy,
            effect,
        }
    }
}

/// Build the side effect a terminal state commits. `Err` lists checklist
/// fields that are still missing; `Ok(None)` means the terminal commits
/// nothing.
pub fn build_effect(
    data: &SessionData,
    terminal: &TerminalSpec,
) -> Result<Option<SideEffect>, Vec<&'static str>> {
    let missing = data.missing_fields(terminal.checklist);
    if !missing.is_empty() {
        return Err(missing);
    }

    let effect = match (terminal.effect, data) {
        (EffectKind::None, _) => None,
        (EffectKind::ActivateRegistrant, SessionData::Registration(d)) => {
            d.phone.clone().map(|phone| SideEffect::ActivateRegistrant { phone })
        }
        (EffectKind::RejectRegistrant, SessionData::Registration(_)) => {
            Some(SideEffect::RejectRegistrant)
        }
        (EffectKind::CompleteRoute, SessionData::DriverRoute(d)) => {
            d.start_mileage.map(|start_mileage| SideEffect::CompleteRoute {
                route_id: d.route_id.clone(),
                start_mileage,
                stops: d.stops.clone(),
            })
        }
        (EffectKind::ReceiveStock, SessionData::WarehouseReceive(d)) => {
            match (&d.item_code, d.quantity, &d.confirmation_photo) {
                (Some(code), Some(quantity), Some(photo)) => Some(SideEffect::ReceiveStock {
                    item_code: code.clone(),
                    quantity,
                    confirmation_photo: photo.clone(),
                }),
                _ => None,
            }
        }
        (EffectKind::AdjustRemains, SessionData::RemainsAdjustment(d)) => {
            Some(SideEffect::AdjustRemains {
                machine_id: d.machine_id.clone(),
                bunkers: d.bunkers.clone(),
            })
        }
        (EffectKind::CreateTask, SessionData::TaskReport(d)) => {
            match (&d.description, &d.photo) {
                (Some(description), Some(photo)) => Some(SideEffect::CreateTask {
                    machine_id: d.machine_id.clone(),
                    description: description.clone(),
                    photo: photo.clone(),
                }),
                _ => None,
            }
        }
        _ => return Err(vec!["workflow data"]),
    };

    if effect.is_none() && terminal.effect != EffectKind::None {
        return Err(terminal.checklist.iter().map(|f| f.name).collect());
    }
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::{ReceiveData, RemainsData, Step, WorkflowRegistry};

    #[test]
    fn test_receive_stock_carries_exactly_collected_fields() {
        let registry = WorkflowRegistry::standard();
        let terminal = registry
            .terminal(Workflow::WarehouseReceive, Step::ReceiveComplete)
            .unwrap();
        let photo = PhotoRef {
            attachment_id: "att-1".to_string(),
            url: "https://media.local/att-1".to_string(),
        };
        let data = SessionData::WarehouseReceive(ReceiveData {
            item_code: Some("SKU-7".to_string()),
            quantity: Some(12.0),
            confirmation_photo: Some(photo.clone()),
        });

        assert_eq!(
            build_effect(&data, terminal),
            Ok(Some(SideEffect::ReceiveStock {
                item_code: "SKU-7".to_string(),
                quantity: 12.0,
                confirmation_photo: photo,
            }))
        );
    }

    #[test]
    fn test_incomplete_checklist_is_reported() {
        let registry = WorkflowRegistry::standard();
        let terminal = registry
            .terminal(Workflow::WarehouseReceive, Step::ReceiveComplete)
            .unwrap();
        let data = SessionData::WarehouseReceive(ReceiveData {
            item_code: Some("SKU-7".to_string()),
            ..Default::default()
        });

        assert_eq!(
            build_effect(&data, terminal),
            Err(vec!["quantity", "confirmation_photo"])
        );
    }

    #[test]
    fn test_remains_requires_every_bunker() {
        let registry = WorkflowRegistry::standard();
        let terminal = registry
            .terminal(Workflow::RemainsAdjustment, Step::RemainsAdjusted)
            .unwrap();
        let data = SessionData::RemainsAdjustment(RemainsData {
            machine_id: "M-1".to_string(),
            bunkers: vec![
                BunkerReading {
                    bunker_id: "B-1".to_string(),
                    old_quantity: 4.0,
                    new_quantity: Some(5.0),
                },
                BunkerReading {
                    bunker_id: "B-2".to_string(),
                    old_quantity: 9.0,
                    new_quantity: None,
                },
            ],
        });

        assert_eq!(build_effect(&data, terminal), Err(vec!["new_quantity"]));
    }

    #[test]
    fn test_cancelled_commits_nothing() {
        let registry = WorkflowRegistry::standard();
        let terminal = registry.terminal(Workflow::DriverRoute, Step::Cancelled).unwrap();
        assert_eq!(
            build_effect(&SessionData::empty_for(Workflow::DriverRoute), terminal),
            Ok(None)
        );
    }
}
