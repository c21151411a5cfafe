//! Side effects of terminal transitions.

use std::{fmt::Debug, path::PathBuf, process::ExitStatus, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use kiln_backend_model::build::Build;
use thiserror::Error;
use tokio::{process::Command, sync::mpsc};
use tracing::{Instrument, error, info, info_span, warn};

use crate::project::ProjectService;

/// Publishes the artifact of a successful build.
pub trait Deployer
where
	Self: Send + Sync + Debug,
{
	fn deploy(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>>;
}

/// Reports a failed build to the project's recipient.
pub trait Notifier
where
	Self: Send + Sync + Debug,
{
	fn notify_failure(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>>;
}

/// Runs the project's deploy script from its source tree.
///
/// The script receives the output directory, the target and the revision
/// of the build as arguments.
#[derive(Debug)]
pub struct ScriptDeployer {
	projects: Arc<ProjectService>,
	output: PathBuf,
}

impl ScriptDeployer {
	pub fn new(projects: Arc<ProjectService>, output: PathBuf) -> Self {
		Self { projects, output }
	}
}

impl Deployer for ScriptDeployer {
	fn deploy(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>> {
		async move {
			let Some(script) = &build.project.config.deploy_script else {
				info!("no deploy script configured");
				return Ok(());
			};
			let dir = self.projects.source_dir(&build.project.name);
			let output = build.output_dir(&self.output);
			let status = Command::new(dir.join(script))
				.arg(std::path::absolute(&output).unwrap_or(output))
				.arg(build.target.as_str())
				.arg(&build.revision)
				.current_dir(&dir)
				.status()
				.await?;
			if !status.success() {
				return Err(HookError::ScriptFailed {
					script: script.clone(),
					status,
				});
			}
			info!(%script, "deployed");
			Ok(())
		}
		.boxed()
	}
}

/// Writes failure reports to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
	fn notify_failure(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>> {
		async move {
			match &build.project.config.notify {
				Some(recipient) => {
					warn!(to = %recipient.address, report = %failure_message(&build), "build failed")
				}
				None => warn!(report = %failure_message(&build), "build failed, no recipient"),
			}
			Ok(())
		}
		.boxed()
	}
}

/// Renders the failure report of a build.
pub fn failure_message(build: &Build) -> String {
	let greeting = match &build.project.config.notify {
		Some(recipient) => format!("Hello {},", recipient.name),
		None => "Hello,".to_string(),
	};
	format!(
		"{greeting}\n\nthe build {} of {} for {} at {} failed.\nLogs: /builds/{}",
		build.id, build.project.name, build.target, build.revision, build.id
	)
}

#[derive(Debug)]
pub enum Effect {
	Deploy(Build),
	NotifyFailure(Build),
}

/// Fire-and-forget queue running [`Effect`]s in the background.
///
/// Failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct EffectQueue {
	sender: mpsc::UnboundedSender<Effect>,
}

impl EffectQueue {
	/// Spawns the consumer task.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(deployer: Arc<dyn Deployer>, notifier: Arc<dyn Notifier>) -> Self {
		let (sender, receiver) = mpsc::unbounded_channel();
		tokio::spawn(run_effects(receiver, deployer, notifier));
		Self { sender }
	}

	pub fn enqueue(&self, effect: Effect) {
		if let Err(error) = self.sender.send(effect) {
			error!(effect = ?error.0, "effect queue closed");
		}
	}
}

#[tracing::instrument(name = "effects", skip_all)]
async fn run_effects(
	mut receiver: mpsc::UnboundedReceiver<Effect>,
	deployer: Arc<dyn Deployer>,
	notifier: Arc<dyn Notifier>,
) {
	while let Some(effect) = receiver.recv().await {
		let (result, span) = match effect {
			Effect::Deploy(build) => {
				let span = info_span!("deploy", build = %build.id);
				(deployer.deploy(build).instrument(span.clone()).await, span)
			}
			Effect::NotifyFailure(build) => {
				let span = info_span!("notify", build = %build.id);
				(
					notifier.notify_failure(build).instrument(span.clone()).await,
					span,
				)
			}
		};
		if let Err(error) = result {
			span.in_scope(|| error!(%error, "side effect failed"));
		}
	}
}

#[derive(Debug, Error)]
pub enum HookError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("script {script} failed: {status}")]
	ScriptFailed { script: String, status: ExitStatus },
}
