//! Generic name-intern registry over the `names` key family (§4.3 prefix 1), shared by
//! anything addressing entries by interned name: the workflow engine's history Paths and
//! an actor's queue names. Each caller supplies its own `KvDriver` instance (workflow and
//! actor namespaces never share one), so the shared key prefix never collides.

use std::collections::HashMap;

use crate::driver::{KvDriver, KvError};
use crate::key;

/// Append-only, order-preserving registry mapping a user-chosen name to a stable index
/// (§4.10.1's "intern(s) returns the existing index or appends and returns a new one;
/// indices are never reused").
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
	names: Vec<String>,
	index_of: HashMap<String, u32>,
}

impl NameRegistry {
	pub fn from_names(names: Vec<String>) -> Self {
		let index_of = names
			.iter()
			.enumerate()
			.map(|(i, n)| (n.clone(), i as u32))
			.collect();
		Self { names, index_of }
	}

	pub fn names(&self) -> &[String] {
		&self.names
	}

	/// Returns the existing index for `name`, or appends it and returns the new index
	/// plus the `(index, name)` pair that must be persisted by the caller.
	pub fn intern(&mut self, name: &str) -> (u32, Option<(u32, String)>) {
		if let Some(&idx) = self.index_of.get(name) {
			return (idx, None);
		}
		let idx = self.names.len() as u32;
		self.names.push(name.to_string());
		self.index_of.insert(name.to_string(), idx);
		(idx, Some((idx, name.to_string())))
	}

	pub fn name_at(&self, index: u32) -> Option<&str> {
		self.names.get(index as usize).map(|s| s.as_str())
	}
}

/// Loads the full registry from `kv`, sorted by index.
pub async fn load(kv: &dyn KvDriver) -> Result<NameRegistry, KvError> {
	let entries = kv.list(key::names_prefix().as_bytes()).await?;
	let mut names: Vec<(u64, String)> = Vec::with_capacity(entries.len());
	for entry in entries {
		let index =
			key::decode_name_index(&entry.key).map_err(|e| KvError::Unavailable(e.to_string()))?;
		let name: String = serde_json::from_slice(&entry.value)
			.map_err(|e| KvError::Unavailable(e.to_string()))?;
		names.push((index, name));
	}
	names.sort_by_key(|(i, _)| *i);
	Ok(NameRegistry::from_names(names.into_iter().map(|(_, n)| n).collect()))
}

/// Durably records a newly interned `(index, name)` pair.
pub async fn persist_new(kv: &dyn KvDriver, index: u32, name: &str) -> Result<(), KvError> {
	let value = serde_json::to_vec(name).expect("string always serializes");
	kv.set(key::name_key(index as u64).as_bytes(), &value).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryKvDriver;

	#[tokio::test]
	async fn interned_names_survive_a_reload() {
		let driver = MemoryKvDriver::default();
		let mut registry = load(&driver).await.unwrap();

		let (idx, new) = registry.intern("ping");
		let (new_idx, new_name) = new.expect("first intern of a name is always new");
		persist_new(&driver, new_idx, &new_name).await.unwrap();
		assert_eq!(idx, 0);

		let reloaded = load(&driver).await.unwrap();
		assert_eq!(reloaded.names(), &["ping".to_string()]);
	}
}
