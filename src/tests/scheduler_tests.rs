//! End-to-end scheduler scenarios over mock adapters

use pretty_assertions::assert_eq;

use super::{agent_with_adapter, assert_invariants, fixture, tick_until, MockBehavior};
use crate::events::EventType;
use crate::model::{AgentStatus, TaskStatus};

#[tokio::test]
async fn test_happy_path_dispatch_and_completion() {
    let orch = fixture();
    let (agent, adapter) = agent_with_adapter(
        &orch,
        "a1",
        &["code-generation"],
        MockBehavior::Succeed("ok".to_string()),
    );

    let task = orch
        .queue_task("hello", vec!["code-generation".to_string()], 5, vec![], 0, None)
        .unwrap();

    // first tick binds the task
    orch.scheduler.tick().await;
    let bound = orch.get_task(&task.id).unwrap();
    assert_eq!(bound.status, TaskStatus::Running);
    assert_eq!(bound.assigned_agent_id, Some(agent.id.clone()));
    assert_eq!(
        orch.get_agent(&agent.id).unwrap().status,
        AgentStatus::Busy
    );
    assert!(bound.started_at.is_some());
    assert_invariants(&orch);

    // dispatch worker reports back, next tick completes the task
    tick_until(&orch, |o| {
        o.get_task(&task.id).unwrap().status == TaskStatus::Completed
    })
    .await;

    let done = orch.get_task(&task.id).unwrap();
    assert_eq!(done.result, Some("ok".to_string()));
    assert!(done.completed_at.is_some());
    assert_eq!(orch.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);
    assert_eq!(adapter.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_invariants(&orch);

    // event stream saw queued before completed
    let (events, _rx) = orch.bus.subscribe();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    let queued_at = types.iter().position(|t| *t == "task:queued").unwrap();
    let completed_at = types.iter().position(|t| *t == "task:completed").unwrap();
    assert!(queued_at < completed_at);
    assert!(!types.contains(&"task:failed"));
}

#[tokio::test]
async fn test_capability_mismatch_keeps_task_pending() {
    let orch = fixture();
    let (agent, adapter) = agent_with_adapter(
        &orch,
        "debugger",
        &["debugging"],
        MockBehavior::Succeed("unused".to_string()),
    );

    let task = orch
        .queue_task("generate", vec!["code-generation".to_string()], 5, vec![], 0, None)
        .unwrap();

    for _ in 0..5 {
        orch.scheduler.tick().await;
    }

    assert_eq!(orch.get_task(&task.id).unwrap().status, TaskStatus::Pending);
    assert_eq!(orch.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);
    assert_eq!(adapter.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // no transition events beyond the original queue/create
    let (events, _rx) = orch.bus.subscribe();
    assert!(!events
        .iter()
        .any(|e| matches!(e.event_type, EventType::TaskCompleted | EventType::TaskFailed)));
    assert_invariants(&orch);
}

#[tokio::test]
async fn test_dependency_gating_orders_dispatch() {
    let orch = fixture();
    let (_agent, _adapter) = agent_with_adapter(
        &orch,
        "solo",
        &["code-generation"],
        MockBehavior::Succeed("done".to_string()),
    );

    let t1 = orch
        .queue_task("first", vec!["code-generation".to_string()], 1, vec![], 0, None)
        .unwrap();
    let t2 = orch
        .queue_task(
            "second",
            vec!["code-generation".to_string()],
            9,
            vec![t1.id.clone()],
            0,
            None,
        )
        .unwrap();

    // despite higher priority, t2 is gated behind t1
    orch.scheduler.tick().await;
    assert_eq!(orch.get_task(&t1.id).unwrap().status, TaskStatus::Running);
    assert_eq!(orch.get_task(&t2.id).unwrap().status, TaskStatus::Pending);

    tick_until(&orch, |o| {
        o.get_task(&t2.id).unwrap().status == TaskStatus::Completed
    })
    .await;

    let t1_done = orch.get_task(&t1.id).unwrap();
    let t2_done = orch.get_task(&t2.id).unwrap();
    assert_eq!(t1_done.status, TaskStatus::Completed);
    assert!(t2_done.started_at.unwrap() >= t1_done.completed_at.unwrap() - chrono::Duration::seconds(1));
    assert_invariants(&orch);
}

#[tokio::test]
async fn test_retry_until_exhaustion() {
    let orch = fixture();
    let (_agent, adapter) =
        agent_with_adapter(&orch, "flaky", &["testing"], MockBehavior::Timeout);

    let task = orch
        .queue_task(
            "never finishes",
            vec!["testing".to_string()],
            0,
            vec![],
            2,
            Some(100),
        )
        .unwrap();

    tick_until(&orch, |o| {
        o.get_task(&task.id).unwrap().status == TaskStatus::Failed
    })
    .await;

    let failed = orch.get_task(&task.id).unwrap();
    assert_eq!(failed.retry_count, 2);
    assert!(failed.error_message.as_ref().unwrap().contains("timeout"));
    // initial attempt plus two retries
    assert_eq!(adapter.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_invariants(&orch);

    let (events, _rx) = orch.bus.subscribe();
    let failures = events
        .iter()
        .filter(|e| e.event_type == EventType::TaskFailed)
        .count();
    assert_eq!(failures, 1, "only the terminal failure is published");
}

#[tokio::test]
async fn test_cancel_running_task_releases_agent() {
    let orch = fixture();
    let (agent, _adapter) =
        agent_with_adapter(&orch, "stuck", &["testing"], MockBehavior::Hang);

    let task = orch
        .queue_task("long", vec!["testing".to_string()], 0, vec![], 0, None)
        .unwrap();

    orch.scheduler.tick().await;
    assert_eq!(orch.get_task(&task.id).unwrap().status, TaskStatus::Running);

    let cancelled = orch.cancel_task(&task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(orch.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);
    assert_invariants(&orch);

    // cancelling a terminal task is rejected
    assert!(orch.cancel_task(&task.id).await.is_err());
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let orch = fixture();
    let task = orch
        .queue_task("no agents yet", vec![], 0, vec![], 0, None)
        .unwrap();

    let cancelled = orch.cancel_task(&task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    orch.scheduler.tick().await;
    assert_eq!(
        orch.get_task(&task.id).unwrap().status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn test_load_balancing_prefers_least_dispatched() {
    let orch = fixture();
    let (a1, _) = agent_with_adapter(
        &orch,
        "aa",
        &["testing"],
        MockBehavior::Succeed("1".to_string()),
    );
    let (a2, _) = agent_with_adapter(
        &orch,
        "bb",
        &["testing"],
        MockBehavior::Succeed("2".to_string()),
    );

    let first = orch
        .queue_task("one", vec!["testing".to_string()], 0, vec![], 0, None)
        .unwrap();
    orch.scheduler.tick().await;

    // lexicographic tie-break on the first dispatch
    let first_agent = orch.get_task(&first.id).unwrap().assigned_agent_id.unwrap();
    let expected_first = std::cmp::min(a1.id.clone(), a2.id.clone());
    assert_eq!(first_agent, expected_first);

    tick_until(&orch, |o| {
        o.get_task(&first.id).unwrap().status == TaskStatus::Completed
    })
    .await;

    // next task goes to the other agent, which has fewer dispatches
    let second = orch
        .queue_task("two", vec!["testing".to_string()], 0, vec![], 0, None)
        .unwrap();
    orch.scheduler.tick().await;
    let second_agent = orch
        .get_task(&second.id)
        .unwrap()
        .assigned_agent_id
        .unwrap();
    assert_ne!(second_agent, first_agent);
    assert_invariants(&orch);
}

#[tokio::test]
async fn test_priority_order_with_multiple_pending() {
    let orch = fixture();
    let (_agent, _adapter) = agent_with_adapter(
        &orch,
        "solo",
        &["testing"],
        MockBehavior::Succeed("r".to_string()),
    );

    let low = orch
        .queue_task("low", vec!["testing".to_string()], 1, vec![], 0, None)
        .unwrap();
    let high = orch
        .queue_task("high", vec!["testing".to_string()], 9, vec![], 0, None)
        .unwrap();

    orch.scheduler.tick().await;
    assert_eq!(orch.get_task(&high.id).unwrap().status, TaskStatus::Running);
    assert_eq!(orch.get_task(&low.id).unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_recovery_resets_orphaned_running_tasks() {
    let orch = fixture();
    let (agent, _adapter) = agent_with_adapter(
        &orch,
        "crashy",
        &["testing"],
        MockBehavior::Succeed("r".to_string()),
    );

    // simulate a crash leaving a running task and a busy agent behind
    let mut task = orch
        .queue_task("interrupted", vec!["testing".to_string()], 0, vec![], 0, None)
        .unwrap();
    task.status = TaskStatus::Running;
    task.assigned_agent_id = Some(agent.id.clone());
    task.started_at = Some(chrono::Utc::now());
    orch.store.update_task(&task).unwrap();
    let mut busy_agent = orch.get_agent(&agent.id).unwrap();
    busy_agent.status = AgentStatus::Busy;
    orch.store.update_agent(&busy_agent).unwrap();

    // fresh boot: rebuild cache, then recover
    orch.cache.rebuild_from_store(&orch.store).unwrap();
    orch.scheduler.recover().await;

    let recovered = orch.get_task(&task.id).unwrap();
    assert_eq!(recovered.status, TaskStatus::Pending);
    assert!(recovered.assigned_agent_id.is_none());
    assert_eq!(orch.get_agent(&agent.id).unwrap().status, AgentStatus::Idle);
    assert_invariants(&orch);
}
