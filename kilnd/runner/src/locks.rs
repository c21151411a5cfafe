use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed mutexes serializing work on an image repository.
#[derive(Debug, Default)]
pub struct ImageLocks {
	locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ImageLocks {
	pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
			locks.entry(key.to_string()).or_default().clone()
		};
		lock.lock_owned().await
	}
}
