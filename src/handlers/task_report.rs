use async_trait::async_trait;

use super::{advance, media_retry, wrong_class, StepContext, StepHandler, StepInput, StepOutcome};
use crate::session::ActorSession;
use crate::workflows::registry::DESCRIPTION;
use crate::workflows::{
    fill_once, SessionData, Step, TaskReportData, TransitionContext, Trigger, Workflow,
};

/// Operator problem report: description and photo, committed as a task.
pub struct TaskReportHandler;

impl TaskReportHandler {
    pub fn seed(machine_id: Option<&str>) -> SessionData {
        SessionData::TaskReport(TaskReportData {
            machine_id: machine_id.map(str::to_string),
            ..Default::default()
        })
    }
}

#[async_trait]
impl StepHandler for TaskReportHandler {
    fn workflow(&self) -> Workflow {
        Workflow::TaskReport
    }

    async fn handle(
        &self,
        ctx: &StepContext<'_>,
        session: &ActorSession,
        input: &StepInput,
    ) -> StepOutcome {
        let mut report = match &session.data {
            SessionData::TaskReport(d) => d.clone(),
            _ => TaskReportData::default(),
        };

        let trigger = match (session.state, input) {
            (Step::AwaitingProblemDescription, StepInput::Text(text)) => {
                match DESCRIPTION.check_text(text) {
                    Ok(description) => fill_once(&mut report.description, description),
                    Err(reason) => return StepOutcome::Retry(reason),
                };
                Trigger::FreeText
            }
            (Step::AwaitingProblemPhoto, StepInput::Photo(attachment_id)) => {
                match ctx.media.resolve_photo(attachment_id).await {
                    Ok(photo) => fill_once(&mut report.photo, photo),
                    Err(e) => return media_retry(e),
                };
                Trigger::Photo
            }
            _ => return wrong_class(ctx, session),
        };

        advance(
            ctx,
            session,
            trigger,
            TransitionContext::default(),
            SessionData::TaskReport(report),
            None,
        )
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
    async fn test_report_builds_task() {
        let harness = Harness::new();
        let mut session = harness.session(
            Workflow::TaskReport,
            Step::AwaitingProblemDescription,
            TaskReportHandler::seed(Some("M-4")),
        );

        harness
            .step(&mut session, RawInput::text("Coin slot jammed"))
            .await;
        let outcome = harness.step(&mut session, RawInput::photo("att-3")).await;

        match &accepted(&outcome).side_effect {
            Some(SideEffect::CreateTask {
                machine_id,
                description,
                photo,
            }) => {
                assert_eq!(machine_id.as_deref(), Some("M-4"));
                assert_eq!(description, "Coin slot jammed");
                assert_eq!(photo.attachment_id, "att-3");
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_description_is_refused() {
        let harness = Harness::new();
        let session = harness.session(
            Workflow::TaskReport,
            Step::AwaitingProblemDescription,
            TaskReportHandler::seed(None),
        );
        assert!(matches!(
            harness.handle(&session, RawInput::text("   ")).await,
            StepOutcome::Retry(RetryReason::EmptyText { .. })
        ));
    }
}
