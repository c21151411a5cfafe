use std::{collections::HashMap, fmt::Debug, sync::Arc};

use futures::future::BoxFuture;
use kiln_backend_model::build::{Build, BuildId};
use kiln_common_model::build::BuildState;
use kstring::KString;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, error, info, info_span};

use crate::RunnerError;

/// Executes one build to completion, returning its terminal state.
pub trait BuildExecutor
where
	Self: Send,
{
	fn run(self: Box<Self>) -> BoxFuture<'static, BuildState>;
}

pub type BoxedExecutor = Box<dyn BuildExecutor + 'static>;

/// Creates executors of a build type.
pub trait ExecutorFactory
where
	Self: Send + Sync + Debug,
{
	fn construct(&self, build: Build) -> BoxedExecutor;
}

struct Job {
	build: BuildId,
	project: KString,
	target: KString,
	executor: BoxedExecutor,
}

/// Routes builds to executors and runs them on a bounded worker pool.
///
/// Jobs are started in submission order.
pub struct Dispatcher {
	factories: HashMap<KString, Arc<dyn ExecutorFactory>>,
	capacity: usize,
	sender: mpsc::UnboundedSender<Job>,
	receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
}

impl Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("factories", &self.factories)
			.field("capacity", &self.capacity)
			.finish()
	}
}

impl Dispatcher {
	pub fn new(capacity: usize) -> Self {
		let (sender, receiver) = mpsc::unbounded_channel();
		Self {
			factories: HashMap::new(),
			capacity: capacity.max(1),
			sender,
			receiver: Arc::new(Mutex::new(receiver)),
		}
	}

	/// Registers the factory of a build type, replacing any previous one.
	pub fn register(&mut self, build_type: impl Into<KString>, factory: Arc<dyn ExecutorFactory>) {
		self.factories.insert(build_type.into(), factory);
	}

	/// Spawns the pool workers.
	pub fn start(&self) {
		for index in 0..self.capacity {
			tokio::spawn(run_worker(self.receiver.clone(), index));
		}
		info!(capacity = self.capacity, "dispatcher started");
	}

	/// Submits a build for execution without waiting for it.
	///
	/// A build of an unknown type is failed in place and never reaches a
	/// runtime.
	pub fn dispatch(&self, build: &mut Build) -> Result<(), RunnerError> {
		let Some(factory) = self.factories.get(&build.project.config.build_type) else {
			build.state = BuildState::Fail;
			return Err(RunnerError::UnknownBuildType(
				build.project.config.build_type.clone(),
			));
		};
		let job = Job {
			build: build.id,
			project: build.project.name.clone(),
			target: build.target.clone(),
			executor: factory.construct(build.clone()),
		};
		self.sender
			.send(job)
			.map_err(|_| RunnerError::DispatcherClosed)?;
		info!(build = %build.id, "build queued");
		Ok(())
	}
}

#[tracing::instrument(level = "info", name = "dispatcher", skip(receiver))]
async fn run_worker(receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, index: usize) {
	loop {
		let job = receiver.lock().await.recv().await;
		let Some(job) = job else {
			break;
		};
		let span = info_span!(
			"build",
			build = %job.build,
			project = %job.project,
			target = %job.target,
		);
		let state = job.executor.run().instrument(span).await;
		if state.is_terminal() {
			info!(build = %job.build, %state, "build completed");
		} else {
			error!(build = %job.build, %state, "executor returned a non-terminal state");
		}
	}
	info!("dispatcher worker stopped");
}
