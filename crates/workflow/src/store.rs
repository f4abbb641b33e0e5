//! Persistence layer binding the history data model (§3.4) to a `KvDriver` namespace
//! via the key layout (§4.3). Grounded on `gasoline`'s `DatabaseHandle` responsibilities
//! (`pull_workflows`, `commit_workflow_*_event`, `update_workflow_state`) collapsed onto
//! a single KV namespace per instance, per this system's simpler single-process model.

use std::collections::BTreeMap;
use std::sync::Arc;

use kv::{key, KvDriver, NameRegistry, Path};

use crate::entry::{Entry, Message, WorkflowMeta};

pub struct WorkflowStore {
	pub kv: Arc<dyn KvDriver>,
}

impl WorkflowStore {
	pub fn new(kv: Arc<dyn KvDriver>) -> Self {
		Self { kv }
	}

	pub async fn load_name_registry(&self) -> Result<NameRegistry, kv::KvError> {
		kv::registry::load(self.kv.as_ref()).await
	}

	pub async fn persist_new_name(&self, index: u32, name: &str) -> Result<(), kv::KvError> {
		kv::registry::persist_new(self.kv.as_ref(), index, name).await
	}

	pub async fn load_entries(&self) -> Result<BTreeMap<Path, (Entry, crate::entry::EntryMetadata)>, kv::KvError> {
		let history = self.kv.list(key::history_prefix().as_bytes()).await?;
		let mut out = BTreeMap::new();
		for e in history {
			let entry: Entry = serde_json::from_slice(&e.value)
				.map_err(|err| kv::KvError::Unavailable(err.to_string()))?;
			let meta_key = key::entry_metadata_key(&entry.location);
			let meta_bytes = self.kv.get(meta_key.as_bytes()).await?;
			let meta: crate::entry::EntryMetadata = match meta_bytes {
				Some(bytes) => serde_json::from_slice(&bytes)
					.map_err(|err| kv::KvError::Unavailable(err.to_string()))?,
				None => crate::entry::EntryMetadata::new(0),
			};
			out.insert(entry.location.clone(), (entry, meta));
		}
		Ok(out)
	}

	pub async fn persist_entry(
		&self,
		entry: &Entry,
		meta: &crate::entry::EntryMetadata,
	) -> Result<(), kv::KvError> {
		let entry_bytes = serde_json::to_vec(entry).expect("entry always serializes");
		let meta_bytes = serde_json::to_vec(meta).expect("metadata always serializes");
		self.kv
			.batch(vec![
				kv::Write { key: key::history_key(&entry.location).into_bytes(), value: entry_bytes },
				kv::Write { key: key::entry_metadata_key(&entry.location).into_bytes(), value: meta_bytes },
			])
			.await
	}

	/// Returns `(seq, Message)` pairs in FIFO order so callers can delete by `seq`
	/// after recording consumption (§4.10.5's at-least-once contract).
	pub async fn load_messages(&self, queue_name_index: u64) -> Result<Vec<(u64, Message)>, kv::KvError> {
		let entries = self.kv.list(key::message_prefix(queue_name_index).as_bytes()).await?;
		entries
			.into_iter()
			.map(|e| {
				let seq = key::decode_message_seq(&e.key)
					.map_err(|err| kv::KvError::Unavailable(err.to_string()))?;
				let message: Message = serde_json::from_slice(&e.value)
					.map_err(|err| kv::KvError::Unavailable(err.to_string()))?;
				Ok((seq, message))
			})
			.collect()
	}

	pub async fn append_message(
		&self,
		queue_name_index: u64,
		seq: u64,
		message: &Message,
	) -> Result<(), kv::KvError> {
		let bytes = serde_json::to_vec(message).expect("message always serializes");
		self.kv.set(key::message_key(queue_name_index, seq).as_bytes(), &bytes).await
	}

	pub async fn delete_message(&self, queue_name_index: u64, seq: u64) -> Result<(), kv::KvError> {
		self.kv.delete(key::message_key(queue_name_index, seq).as_bytes()).await
	}

	pub async fn load_meta(&self) -> Result<WorkflowMeta, kv::KvError> {
		let mut meta = WorkflowMeta::default();
		if let Some(b) = self.kv.get(key::workflow_meta_key(key::WorkflowMetaField::State).as_bytes()).await? {
			meta.state = serde_json::from_slice(&b).ok();
		}
		if let Some(b) = self.kv.get(key::workflow_meta_key(key::WorkflowMetaField::Output).as_bytes()).await? {
			meta.output = serde_json::from_slice(&b).ok();
		}
		if let Some(b) = self.kv.get(key::workflow_meta_key(key::WorkflowMetaField::Error).as_bytes()).await? {
			meta.error = serde_json::from_slice(&b).ok();
		}
		if let Some(b) = self.kv.get(key::workflow_meta_key(key::WorkflowMetaField::Input).as_bytes()).await? {
			meta.input = serde_json::from_slice(&b).ok();
		}
		Ok(meta)
	}

	pub async fn persist_meta(&self, meta: &WorkflowMeta) -> Result<(), kv::KvError> {
		let mut writes = Vec::new();
		if let Some(state) = &meta.state {
			writes.push(kv::Write {
				key: key::workflow_meta_key(key::WorkflowMetaField::State).into_bytes(),
				value: serde_json::to_vec(state).expect("state always serializes"),
			});
		}
		if let Some(output) = &meta.output {
			writes.push(kv::Write {
				key: key::workflow_meta_key(key::WorkflowMetaField::Output).into_bytes(),
				value: serde_json::to_vec(output).expect("output always serializes"),
			});
		}
		if let Some(error) = &meta.error {
			writes.push(kv::Write {
				key: key::workflow_meta_key(key::WorkflowMetaField::Error).into_bytes(),
				value: serde_json::to_vec(error).expect("error always serializes"),
			});
		}
		self.kv.batch(writes).await
	}
}
