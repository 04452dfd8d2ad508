use async_trait::async_trait;

use super::{advance, media_retry, wrong_class, StepContext, StepHandler, StepInput, StepOutcome};
use crate::session::ActorSession;
use crate::workflows::registry::{FINISH_ROUTE, NEXT_STOP, START_MILEAGE, STOP_DONE};
use crate::workflows::{
    fill_once, RouteData, SessionData, Step, StopVisit, TransitionContext, Trigger, Workflow,
};

/// Driver route: odometer reading, then any number of stops, each with an
/// arrival location and optional photos.
pub struct DriverRouteHandler;

impl DriverRouteHandler {
    fn route(session: &ActorSession) -> RouteData {
        match &session.data {
            SessionData::DriverRoute(d) => d.clone(),
            _ => RouteData::default(),
        }
    }

    /// Move the open stop, if any, into the completed list.
    fn close_stop(route: &mut RouteData) {
        if let Some(stop) = route.current_stop.take() {
            route.stops.push(stop);
        }
    }
}

#[async_trait]
impl StepHandler for DriverRouteHandler {
    fn workflow(&self) -> Workflow {
        Workflow::DriverRoute
    }

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome {
        let mut route = Self::route(session);
        let none = TransitionContext::default();

        match (session.state, input) {
            (Step::AwaitingMileage, StepInput::Text(text)) => {
                let mileage = match START_MILEAGE.parse_number(text) {
                    Ok(mileage) => mileage,
                    Err(reason) => return StepOutcome::Retry(reason),
                };
                fill_once(&mut route.start_mileage, mileage);
                advance(
                    ctx,
                    session,
                    Trigger::Numeric,
                    none,
                    SessionData::DriverRoute(route),
                    None,
                )
            }
            (Step::RouteActive, input) if input.selects(NEXT_STOP) => advance(
                ctx,
                session,
                Trigger::Menu(NEXT_STOP),
                none,
                SessionData::DriverRoute(route),
                None,
            ),
            (Step::RouteActive | Step::AwaitingStopCompletion, input)
                if input.selects(FINISH_ROUTE) =>
            {
                Self::close_stop(&mut route);
                advance(
                    ctx,
                    session,
                    Trigger::Menu(FINISH_ROUTE),
                    none,
                    SessionData::DriverRoute(route),
                    None,
                )
            }
            (
                Step::AwaitingArrivalLocation,
                StepInput::Location {
                    latitude,
                    longitude,
                },
            ) => {
                let location = match ctx.media.resolve_location(*latitude, *longitude).await {
                    Ok(location) => location,
                    Err(e) => return media_retry(e),
                };
                fill_once(
                    &mut route.current_stop,
                    StopVisit {
                        location,
                        arrived_at: ctx.now,
                        photos: Vec::new(),
                    },
                );
                advance(
                    ctx,
                    session,
                    Trigger::Geo,
                    none,
                    SessionData::DriverRoute(route),
                    None,
                )
            }
            (Step::AwaitingStopCompletion, StepInput::Photo(attachment_id)) => {
                let photo = match ctx.media.resolve_photo(attachment_id).await {
                    Ok(photo) => photo,
                    Err(e) => return media_retry(e),
                };
                let count = match route.current_stop.as_mut() {
                    Some(stop) => {
                        if !stop.photos.iter().any(|p| p.attachment_id == photo.attachment_id) {
                            stop.photos.push(photo);
                        }
                        stop.photos.len()
                    }
                    None => return wrong_class(ctx, session),
                };
                advance(
                    ctx,
                    session,
                    Trigger::Photo,
                    none,
                    SessionData::DriverRoute(route),
                    Some(format!("Photo {count} saved.")),
                )
            }
            (Step::AwaitingStopCompletion, input) if input.selects(STOP_DONE) => {
                Self::close_stop(&mut route);
                advance(
                    ctx,
                    session,
                    Trigger::Menu(STOP_DONE),
                    none,
                    SessionData::DriverRoute(route),
                    None,
                )
            }
            _ => wrong_class(ctx, session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::dispatch::SideEffect;
    use crate::session::RawInput;
    use crate::workflows::RetryReason;

    #[tokio::test]
    async fn test_full_route_with_two_stops() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::DriverRoute,
            Step::AwaitingMileage,
            SessionData::empty_for(Workflow::DriverRoute),
        );

        harness.step(&mut session, RawInput::text("15230")).await;
        assert_eq!(session.state, Step::RouteActive);

        harness.step(&mut session, RawInput::choice(NEXT_STOP)).await;
        harness.step(&mut session, RawInput::location(55.75, 37.61)).await;
        assert_eq!(session.state, Step::AwaitingStopCompletion);
        harness.step(&mut session, RawInput::photo("p-1")).await;
        harness.step(&mut session, RawInput::photo("p-2")).await;
        assert_eq!(session.state, Step::AwaitingStopCompletion);

        harness.step(&mut session, RawInput::choice(STOP_DONE)).await;
        assert_eq!(session.state, Step::AwaitingArrivalLocation);
        harness.step(&mut session, RawInput::location(55.80, 37.70)).await;

        let outcome = harness.step(&mut session, RawInput::choice(FINISH_ROUTE)).await;
        let accepted = accepted(&outcome);
        assert_eq!(accepted.next_state, Step::RouteComplete);
        match &accepted.side_effect {
            Some(SideEffect::CompleteRoute {
                start_mileage,
                stops,
                ..
            }) => {
                assert_eq!(*start_mileage, 15230.0);
                assert_eq!(stops.len(), 2);
                assert_eq!(stops[0].photos.len(), 2);
                assert!(stops[1].photos.is_empty());
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finishing_without_stops_reports_missing() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::DriverRoute,
            Step::AwaitingMileage,
            SessionData::empty_for(Workflow::DriverRoute),
        );
        harness.step(&mut session, RawInput::text("100")).await;

        assert!(matches!(
            harness.handle(&session, RawInput::choice(FINISH_ROUTE)).await,
            StepOutcome::Retry(RetryReason::MissingFields { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_mileage_is_rejected() {
        let harness = Harness::new();
        let session = harness.session(
            Workflow::DriverRoute,
            Step::AwaitingMileage,
            SessionData::empty_for(Workflow::DriverRoute),
        );
        assert!(matches!(
            harness.handle(&session, RawInput::text("0")).await,
            StepOutcome::Retry(RetryReason::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_photo_is_stored_once() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::DriverRoute,
            Step::AwaitingMileage,
            SessionData::empty_for(Workflow::DriverRoute),
        );
        harness.step(&mut session, RawInput::text("100")).await;
        harness.step(&mut session, RawInput::choice(NEXT_STOP)).await;
        harness.step(&mut session, RawInput::location(1.0, 2.0)).await;
        harness.step(&mut session, RawInput::photo("p-1")).await;
        harness.step(&mut session, RawInput::photo("p-1")).await;

        match &session.data {
            SessionData::DriverRoute(route) => {
                assert_eq!(route.current_stop.as_ref().unwrap().photos.len(), 1)
            }
            other => panic!("unexpected data {other:?}"),
        }
    }
}
