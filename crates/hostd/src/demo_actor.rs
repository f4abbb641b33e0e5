//! Minimal actor definition used only to exercise the wiring end-to-end (HTTP
//! routing, WebSocket upgrade, queue-send, broadcast). Application-level actor code
//! is out of this core's scope (§1); this fixture mirrors the `Counter`/`Echo`
//! fixtures `actor` and `gateway` already use in their own test modules, just hosted
//! for real instead of spawned inline in a `#[tokio::test]`.

use actor::{ActorCtx, ActorDefinition, ActorResult};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct DemoActor;

#[async_trait]
impl ActorDefinition for DemoActor {
	fn create_state(&self, input: Value) -> Value {
		if input.is_null() {
			json!({"count": 0})
		} else {
			input
		}
	}

	async fn action(&self, ctx: &mut ActorCtx<'_>, name: &str, args: Value) -> ActorResult<Value> {
		match name {
			"increment" => {
				let by = args.get("by").and_then(Value::as_i64).unwrap_or(1);
				let new_count = ctx
					.mutate_state(|s| {
						let count = s["count"].as_i64().unwrap_or(0) + by;
						s["count"] = json!(count);
						count
					})
					.await?;
				ctx.broadcast("changed", json!({"count": new_count}));
				Ok(json!({"count": new_count}))
			}
			"echo" => Ok(args),
			other => Err(runtime_error::ActionNotFound { name: other.to_string() }.into()),
		}
	}
}
