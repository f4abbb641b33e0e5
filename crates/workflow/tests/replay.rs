//! Integration tests for the replay-driven workflow primitives (§8 properties P4
//! "frame round-trip" doesn't apply here, but P1 "at-most-one-writer"/determinism and
//! FIFO message ordering do). Style grounded on `engine/packages/actor-kv/tests/*.rs`:
//! a fresh in-memory backend per test, direct assertions, no shared fixtures.

use std::sync::Arc;

use kv::MemoryKvDriver;
use serde_json::json;
use workflow::{BranchFn, BranchFuture, BranchStatus, EntryStatus, Loop, WorkflowCtx, WorkflowError};

fn kv() -> Arc<kv::MemoryKvDriver> {
	Arc::new(MemoryKvDriver::new(1_500))
}

#[tokio::test]
async fn step_is_not_rerun_after_completion() {
	let store = kv();
	let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

	for _ in 0..3 {
		let calls = calls.clone();
		let mut ctx = WorkflowCtx::load("wf-1".into(), store.clone(), 1_000).await.unwrap();
		let out: u64 = ctx
			.step("double", || {
				let calls = calls.clone();
				async move {
					calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
					Ok(2_u64)
				}
			})
			.await
			.unwrap();
		assert_eq!(out, 2);
	}

	assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1, "step effect must run exactly once across replays");
}

#[tokio::test]
async fn failed_step_suspends_until_max_attempts() {
	let store = kv();

	for attempt in 0..3 {
		let mut ctx = WorkflowCtx::load("wf-2".into(), store.clone(), 1_000 + attempt).await.unwrap();
		let result: workflow::WorkflowResult<u64> =
			ctx.step("always-fails", || async { Err(anyhow::anyhow!("boom")) }).await;
		assert!(result.is_err());
	}

	// Fourth attempt should surface StepExhausted instead of suspending again.
	let mut ctx = WorkflowCtx::load("wf-2".into(), store.clone(), 2_000).await.unwrap();
	let result: workflow::WorkflowResult<u64> =
		ctx.step("always-fails", || async { Err(anyhow::anyhow!("boom")) }).await;
	assert!(matches!(result, Err(workflow::WorkflowError::StepExhausted { .. })));
}

#[tokio::test]
async fn sleep_shorter_than_poll_interval_completes_in_memory() {
	let store = kv();
	let mut ctx = WorkflowCtx::load("wf-3".into(), store.clone(), 1_000).await.unwrap();
	ctx.sleep("nap", 1).await.unwrap();
}

#[tokio::test]
async fn sleep_longer_than_poll_interval_suspends_with_alarm() {
	let store = kv();
	let mut ctx = WorkflowCtx::load("wf-4".into(), store.clone(), 1_000).await.unwrap();
	let err = ctx.sleep("long-nap", 60_000).await.unwrap_err();
	match err {
		workflow::WorkflowError::Suspend(s) => {
			assert!(matches!(s.wake, workflow::WakeSource::Alarm { .. }));
		}
		other => panic!("expected suspend, got {other:?}"),
	}
}

#[tokio::test]
async fn listen_suspends_until_message_then_consumes_fifo() {
	let store = kv();

	{
		let mut ctx = WorkflowCtx::load("wf-5".into(), store.clone(), 1_000).await.unwrap();
		let err = ctx.listen("wait-for-it", "ping").await.unwrap_err();
		assert!(matches!(err, workflow::WorkflowError::Suspend(_)));
	}

	{
		let mut ctx = WorkflowCtx::load("wf-5".into(), store.clone(), 1_100).await.unwrap();
		ctx.send_message("ping", json!({"seq": 1})).await.unwrap();
		ctx.send_message("ping", json!({"seq": 2})).await.unwrap();
	}

	let mut ctx = WorkflowCtx::load("wf-5".into(), store.clone(), 1_200).await.unwrap();
	let first = ctx.listen("wait-for-it", "ping").await.unwrap();
	assert_eq!(first, json!({"seq": 1}));
}

#[tokio::test]
async fn loop_accumulates_state_across_replays_then_breaks() {
	let store = kv();

	for replay in 0..5u32 {
		let mut ctx = WorkflowCtx::load("wf-6".into(), store.clone(), 1_000 + replay as i64).await.unwrap();
		let result = ctx
			.loope("count-to-3", 0u32, |_ctx, state| {
				let state_val = *state;
				async move {
					if state_val >= 3 {
						Ok(Loop::Break(state_val))
					} else {
						Ok(Loop::Continue)
					}
				}
			})
			.await;

		if let Ok(total) = result {
			assert_eq!(total, 3);
			return;
		}
	}
	panic!("loop never completed within replay budget");
}

#[tokio::test]
async fn rollback_checkpoint_is_idempotent_across_replays() {
	let store = kv();
	for _ in 0..3 {
		let mut ctx = WorkflowCtx::load("wf-7".into(), store.clone(), 1_000).await.unwrap();
		ctx.rollback_checkpoint("before-charge").await.unwrap();
	}
}

fn sleeping_branch(sleep_name: &'static str, duration_ms: i64) -> BranchFn {
	Box::new(move |mut ctx: WorkflowCtx| {
		Box::pin(async move {
			let result = ctx.sleep(sleep_name, duration_ms).await;
			(ctx, result)
		}) as BranchFuture
	})
}

#[tokio::test]
async fn join_runs_branches_concurrently_and_waits_for_all() {
	let store = kv();
	let mut ctx = WorkflowCtx::load("wf-9".into(), store.clone(), 1_000).await.unwrap();

	let start = std::time::Instant::now();
	let statuses = ctx
		.join(
			"fan-out",
			vec![
				("a".to_string(), sleeping_branch("a-wait", 120)),
				("b".to_string(), sleeping_branch("b-wait", 150)),
			],
		)
		.await
		.unwrap();
	let elapsed = start.elapsed();

	assert_eq!(statuses.len(), 2);
	assert!(statuses.values().all(|s| matches!(s, BranchStatus::Completed)));
	// Branches run concurrently: total wait is ~max(120, 150)ms, not their sum.
	assert!(elapsed.as_millis() < 280, "join did not run its branches concurrently: {elapsed:?}");
}

#[tokio::test]
async fn race_completes_with_first_branch_and_cancels_the_other() {
	// Scaled-down version of the spec's work(3000ms)/timeout(5000ms) scenario.
	let store = kv();
	let mut ctx = WorkflowCtx::load("wf-10".into(), store.clone(), 1_000).await.unwrap();

	let start = std::time::Instant::now();
	let winner = ctx
		.race(
			"work-or-timeout",
			vec![
				("work".to_string(), sleeping_branch("work-wait", 120)),
				("timeout".to_string(), sleeping_branch("timeout-wait", 400)),
			],
		)
		.await
		.unwrap();
	let elapsed = start.elapsed();

	assert_eq!(winner, "work");
	assert!(elapsed.as_millis() < 280, "race waited for the loser instead of cancelling it: {elapsed:?}");
}

#[tokio::test]
async fn rollback_invokes_compensators_in_reverse_order_on_step_exhaustion() {
	let store = kv();
	let log: Arc<tokio::sync::Mutex<Vec<&'static str>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));

	for attempt in 0..3 {
		let mut ctx = WorkflowCtx::load("wf-11".into(), store.clone(), 1_000 + attempt).await.unwrap();
		ctx.rollback_checkpoint("checkpoint").await.unwrap();

		let log_a = log.clone();
		ctx.step_with_rollback("charge-a", || async { Ok(1_u32) }, move |_out| {
			let log_a = log_a.clone();
			async move {
				log_a.lock().await.push("undo-a");
				Ok(())
			}
		})
		.await
		.unwrap();

		let log_b = log.clone();
		ctx.step_with_rollback("charge-b", || async { Ok(2_u32) }, move |_out| {
			let log_b = log_b.clone();
			async move {
				log_b.lock().await.push("undo-b");
				Ok(())
			}
		})
		.await
		.unwrap();

		let result: workflow::WorkflowResult<u32> =
			ctx.step("always-fails", || async { Err(anyhow::anyhow!("boom")) }).await;

		if matches!(result, Err(WorkflowError::StepExhausted { .. })) {
			break;
		}
	}

	let recorded = log.lock().await.clone();
	assert_eq!(recorded, vec!["undo-b", "undo-a"], "compensators must run in reverse order back to the checkpoint");
}

#[tokio::test]
async fn entry_status_never_moves_backward() {
	let store = kv();
	let mut ctx = WorkflowCtx::load("wf-8".into(), store.clone(), 1_000).await.unwrap();
	let _: u64 = ctx.step("once", || async { Ok(1_u64) }).await.unwrap();

	let entries = workflow::WorkflowStore::new(store.clone()).load_entries().await.unwrap();
	let (_, meta) = entries.values().next().unwrap();
	assert_eq!(meta.status, EntryStatus::Completed);
}
