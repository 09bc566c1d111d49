use std::sync::Arc;

use super::support::{Harness, gates};
use crate::core::workflow::orchestrator::MAX_WRITE_ATTEMPTS;
use crate::core::workflow::types::{Phase, RemoteStatus};
use crate::core::workflow::{
    DecisionOutcome, DecisionRequest, Dispatched, WorkflowError, WorkflowEvent, handle_decision,
};

fn decision(workflow_id: &str, action: &str, phase: &str, user: &str) -> DecisionRequest {
    DecisionRequest {
        workflow_id: workflow_id.to_string(),
        action: action.to_string(),
        phase: phase.to_string(),
        user_id: user.to_string(),
    }
}

#[tokio::test]
async fn accepting_a_plan_launches_the_implementer_once() {
    let h = Harness::new();
    h.park_in_plan_review("wf-b", "do X").await;
    assert_eq!(h.remote.launch_count(), 1);

    let outcome = handle_decision(&h.orchestrator, &decision("wf-b", "accept", "plan_review", "U1"))
        .await
        .unwrap();
    assert_eq!(outcome.status(), "applied");
    assert_eq!(outcome.record().phase, Phase::Implementing);
    assert_eq!(h.remote.launch_count(), 2);
    assert!(h.remote.last_prompt().contains("do X"));

    let stored = h.record("wf-b").await;
    assert_eq!(stored.phase, Phase::Implementing);
    assert_eq!(stored.active_job_id.as_deref(), Some("job-2"));
    assert_eq!(stored.decided_by.as_deref(), Some("U1"));
    stored.check_invariants().unwrap();

    // Second click on the same button.
    let again = handle_decision(&h.orchestrator, &decision("wf-b", "accept", "plan_review", "U2"))
        .await
        .unwrap();
    assert!(matches!(again, DecisionOutcome::AlreadyResolved(_)));
    assert_eq!(h.remote.launch_count(), 2);
    assert_eq!(h.record("wf-b").await.decided_by.as_deref(), Some("U1"));
}

#[tokio::test]
async fn rejecting_a_plan_is_terminal_and_polling_launches_nothing() {
    let h = Harness::new();
    h.park_in_plan_review("wf-c", "do Y").await;

    let outcome = handle_decision(&h.orchestrator, &decision("wf-c", "reject", "plan_review", "U1"))
        .await
        .unwrap();
    assert_eq!(outcome.record().phase, Phase::PlanRejected);

    let poller = h.poller();
    for _ in 0..3 {
        let report = poller.tick().await;
        assert_eq!(report.polled, 0);
    }
    assert_eq!(h.remote.launch_count(), 1);
    assert_eq!(h.record("wf-c").await.phase, Phase::PlanRejected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_apply_exactly_once() {
    let h = Harness::new();
    h.park_in_plan_review("wf-d", "do Z").await;

    let mut handles = Vec::new();
    for i in 0..6 {
        let orchestrator = Arc::clone(&h.orchestrator);
        handles.push(tokio::spawn(async move {
            handle_decision(
                &orchestrator,
                &decision("wf-d", "accept", "plan_review", &format!("U{}", i)),
            )
            .await
        }));
    }

    let mut applied = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            DecisionOutcome::Applied(_) => applied += 1,
            DecisionOutcome::AlreadyResolved(_) => already += 1,
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(already, 5);
    // One planner plus exactly one implementer.
    assert_eq!(h.remote.launch_count(), 2);

    let stored = h.record("wf-d").await;
    assert_eq!(stored.phase, Phase::Implementing);
    stored.check_invariants().unwrap();
}

#[tokio::test]
async fn context_review_gate_holds_until_accepted() {
    let h = Harness::new();
    let record = h.launch("wf-ctx", gates(true, false)).await;
    assert_eq!(record.phase, Phase::ContextReview);
    assert!(record.pending_review_payload.unwrap().contains("Add a health endpoint"));
    assert_eq!(h.remote.launch_count(), 0);
    assert_eq!(h.sink.phases_for("wf-ctx"), vec!["context_review"]);

    let outcome = handle_decision(
        &h.orchestrator,
        &decision("wf-ctx", "accept", "context_review", "U1"),
    )
    .await
    .unwrap();
    assert_eq!(outcome.record().phase, Phase::PlanRunning);
    assert_eq!(h.remote.launch_count(), 1);
    assert!(h.remote.last_prompt().contains("PLANNING TASK"));
}

#[tokio::test]
async fn decision_errors_are_classified() {
    let h = Harness::new();
    h.launch("wf-run", gates(false, true)).await;

    let missing = handle_decision(&h.orchestrator, &decision("nope", "accept", "plan_review", "U"))
        .await
        .unwrap_err();
    assert!(matches!(missing, WorkflowError::NotFound(_)));

    let malformed = handle_decision(&h.orchestrator, &decision("wf-run", "maybe", "plan_review", "U"))
        .await
        .unwrap_err();
    assert!(matches!(malformed, WorkflowError::Validation(_)));

    // Still planning: the plan gate has not been reached yet.
    let early = handle_decision(&h.orchestrator, &decision("wf-run", "accept", "plan_review", "U"))
        .await
        .unwrap_err();
    assert!(matches!(early, WorkflowError::Validation(_)));
    assert_eq!(h.record("wf-run").await.phase, Phase::LaunchedPlanning);
}

#[tokio::test]
async fn retries_absorb_transient_conflicts() {
    let h = Harness::new();
    h.park_in_plan_review("wf-retry", "plan").await;

    h.store.force_conflicts(MAX_WRITE_ATTEMPTS - 1);
    let outcome = handle_decision(
        &h.orchestrator,
        &decision("wf-retry", "accept", "plan_review", "U1"),
    )
    .await
    .unwrap();
    assert_eq!(outcome.status(), "applied");
    assert_eq!(h.remote.launch_count(), 2);
}

#[tokio::test]
async fn exhausted_retries_report_conflict_and_change_nothing() {
    let h = Harness::new();
    let before = h.park_in_plan_review("wf-hot", "plan").await;

    h.store.force_conflicts(MAX_WRITE_ATTEMPTS);
    let err = handle_decision(&h.orchestrator, &decision("wf-hot", "accept", "plan_review", "U1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Conflict {
            attempts: MAX_WRITE_ATTEMPTS,
            ..
        }
    ));

    let after = h.record("wf-hot").await;
    assert_eq!(after.phase, Phase::PlanReview);
    assert_eq!(after.decision_lock_token, before.decision_lock_token);
    assert_eq!(h.remote.launch_count(), 1);
}

#[tokio::test]
async fn store_failure_surfaces_as_store_error() {
    let h = Harness::new();
    h.park_in_plan_review("wf-disk", "plan").await;
    h.store.fail_workflow("wf-disk");

    let err = handle_decision(&h.orchestrator, &decision("wf-disk", "accept", "plan_review", "U1"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Store(_)));
    assert_eq!(h.remote.launch_count(), 1);
}

#[tokio::test]
async fn persisted_transition_reads_back_identically() {
    let h = Harness::new();
    let parked = h.park_in_plan_review("wf-rt", "plan").await;

    let dispatched = h
        .orchestrator
        .dispatch(
            "wf-rt",
            WorkflowEvent::RevisionRequested {
                user_id: "U1".to_string(),
                feedback: "split step 2".to_string(),
            },
        )
        .await
        .unwrap();
    let Dispatched::Applied(written) = dispatched else {
        panic!("revision should apply");
    };

    let read = h.record("wf-rt").await;
    assert_eq!(read.phase, written.phase);
    assert_eq!(read.active_job_id, written.active_job_id);
    assert_eq!(read.iteration_count, written.iteration_count);
    assert_eq!(read.iteration_count, parked.iteration_count + 1);
    assert_eq!(read, written);
}

#[tokio::test]
async fn duplicate_launch_returns_existing_workflow() {
    let h = Harness::new();
    let first = h
        .orchestrator
        .launch(super::support::launch_request("wf-dup", gates(false, true)))
        .await
        .unwrap();
    assert!(first.created);

    let second = h
        .orchestrator
        .launch(super::support::launch_request("wf-dup", gates(true, true)))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.record.phase, first.record.phase);
    assert!(!second.record.review_gates.context_review);
    assert_eq!(h.remote.launch_count(), 1);
}

#[tokio::test]
async fn stop_cancels_remote_job_and_is_idempotent() {
    let h = Harness::new();
    let record = h.launch("wf-stop", gates(false, true)).await;
    let job_id = record.active_job_id.clone().unwrap();

    let stop = WorkflowEvent::StopRequested {
        user_id: "U-boss".to_string(),
    };
    let first = h.orchestrator.dispatch("wf-stop", stop.clone()).await.unwrap();
    assert!(first.is_applied());
    assert_eq!(first.record().phase, Phase::Stopped);
    assert_eq!(*h.remote.stopped.lock().unwrap(), vec![job_id.clone()]);

    let second = h.orchestrator.dispatch("wf-stop", stop).await.unwrap();
    assert!(!second.is_applied());
    assert_eq!(h.remote.stopped.lock().unwrap().len(), 1);

    let agent = h
        .orchestrator
        .records()
        .get_agent(&job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.status, RemoteStatus::Stopped);
}

#[tokio::test]
async fn accepting_after_stop_is_already_resolved() {
    let h = Harness::new();
    h.park_in_plan_review("wf-late", "do L").await;

    let stop = WorkflowEvent::StopRequested {
        user_id: "U-boss".to_string(),
    };
    assert!(h.orchestrator.dispatch("wf-late", stop).await.unwrap().is_applied());

    let outcome = handle_decision(&h.orchestrator, &decision("wf-late", "accept", "plan_review", "U1"))
        .await
        .unwrap();
    assert!(matches!(outcome, DecisionOutcome::AlreadyResolved(_)));
    assert_eq!(outcome.record().phase, Phase::Stopped);
    assert_eq!(h.remote.launch_count(), 1);
    record_has_no_job(&h, "wf-late").await;
}

#[tokio::test]
async fn stop_landing_mid_launch_stops_the_new_job() {
    let h = Harness::new();
    h.park_in_plan_review("wf-mid", "do M").await;

    let orchestrator = h.orchestrator.clone();
    h.remote.on_next_create(move || async move {
        let stop = WorkflowEvent::StopRequested {
            user_id: "U-boss".to_string(),
        };
        assert!(orchestrator.dispatch("wf-mid", stop).await.unwrap().is_applied());
    });

    let outcome = handle_decision(&h.orchestrator, &decision("wf-mid", "accept", "plan_review", "U1"))
        .await
        .unwrap();
    assert_eq!(outcome.status(), "applied");
    assert_eq!(outcome.record().phase, Phase::Stopped);

    assert_eq!(h.remote.launch_count(), 2);
    assert_eq!(*h.remote.stopped.lock().unwrap(), vec!["job-2".to_string()]);
    let record = h.record("wf-mid").await;
    assert_eq!(record.phase, Phase::Stopped);
    assert!(record.active_job_id.is_none());
    record_has_no_job(&h, "wf-mid").await;

    // Nothing is left for the poller to relaunch.
    let report = h.poller().tick().await;
    assert_eq!(report.polled, 0);
    assert_eq!(h.remote.launch_count(), 2);
}

#[tokio::test]
async fn failed_launch_marks_workflow_failed() {
    let h = Harness::new();
    h.remote.fail_creates(true);
    let record = h.launch("wf-nolaunch", gates(false, true)).await;
    assert_eq!(record.phase, Phase::Failed);
    assert!(record.failure_reason.unwrap().contains("remote refused the job"));
    record_has_no_job(&h, "wf-nolaunch").await;
}

async fn record_has_no_job(h: &Harness, workflow_id: &str) {
    let record = h.record(workflow_id).await;
    assert!(!record.has_active_job());
    record.check_invariants().unwrap();
}
