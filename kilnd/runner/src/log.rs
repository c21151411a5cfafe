use std::path::{Path, PathBuf};

use tokio::{fs::File, io::AsyncWriteExt};
use tracing::warn;

pub const LOG_FILE: &str = "logs.txt";

/// Append-only log of a build, kept in its output directory.
///
/// Write errors are reported to the tracing log only.
#[derive(Debug)]
pub struct BuildLog {
	path: PathBuf,
	file: File,
}

impl BuildLog {
	/// Creates a fresh log in `dir`, replacing any previous one.
	pub async fn create(dir: &Path) -> std::io::Result<Self> {
		let path = dir.join(LOG_FILE);
		let file = File::create(&path).await?;
		Ok(Self { path, file })
	}

	/// Starts a labelled step.
	pub async fn step(&mut self, label: &str) {
		self.write(format!("\n==> {label}\n").as_bytes()).await;
	}

	pub async fn line(&mut self, text: &str) {
		self.write(format!("{text}\n").as_bytes()).await;
	}

	pub async fn write(&mut self, data: &[u8]) {
		if let Err(error) = self.file.write_all(data).await {
			warn!(path = %self.path.display(), %error, "failed to write build log");
		}
	}

	pub async fn flush(&mut self) {
		if let Err(error) = self.file.flush().await {
			warn!(path = %self.path.display(), %error, "failed to flush build log");
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn test_log_is_recreated() {
		let dir = tempfile::tempdir().unwrap();
		let mut log = BuildLog::create(dir.path()).await.unwrap();
		log.step("Updating").await;
		log.write(b"output").await;
		log.flush().await;
		drop(log);
		assert_eq!(
			std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap(),
			"\n==> Updating\noutput"
		);

		let mut log = BuildLog::create(dir.path()).await.unwrap();
		log.line("again").await;
		log.flush().await;
		assert_eq!(
			std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap(),
			"again\n"
		);
	}
}
