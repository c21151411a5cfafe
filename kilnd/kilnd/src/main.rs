use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use clap::Parser;
use config::KilndConfig;
use kiln_backend_service::BackendServices;
use kiln_runner::{
	dispatcher::Dispatcher, docker::DockerRuntime, manager::BuildManager,
	worker::DockerWorkerFactory,
};
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

mod config;
mod routes;

#[derive(clap::Parser)]
struct Args {
	#[arg(short, long, default_value = "kilnd.toml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	tracing::subscriber::set_global_default(
		tracing_subscriber::FmtSubscriber::builder()
			.with_max_level(tracing::Level::INFO)
			.finish(),
	)?;

	let config_path = &args.config;
	let config = toml::from_str::<KilndConfig>(&fs::read_to_string(config_path)?)?;
	info!("loaded configuration from file: {:?}", config_path);

	info!("initializing backend services ...");
	let backend = BackendServices::new(config.clone().try_into()?).await?;

	info!("connecting to container runtime ...");
	let runtime = Arc::new(DockerRuntime::connect(config.runner.docker_socket.as_deref())?);
	let mut dispatcher = Dispatcher::new(config.runner.max_concurrent_builds);
	dispatcher.register(
		DockerWorkerFactory::BUILD_TYPE,
		Arc::new(DockerWorkerFactory::new(
			backend.clone(),
			runtime,
			Arc::new(config.runner.clone()),
		)),
	);
	dispatcher.start();

	let manager = BuildManager::new(backend.clone(), Arc::new(dispatcher));
	manager.reconcile().await?;

	let services = KilndServices {
		config: Arc::new(config),
		backend,
		manager,
	};

	let listen_addr = services.config.http.listen.clone();
	let router = routes::make_router(services)?;
	if let Some(path) = listen_addr.strip_prefix("unix://") {
		let path = PathBuf::from(path);
		_ = fs::remove_file(&path);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		let listener = UnixListener::bind(&path)?;
		info!("listening on UDS: {:?}", path);
		axum::serve(listener, router).await?;
	} else if let Some(addr) = listen_addr.strip_prefix("tcp://") {
		let listener = TcpListener::bind(addr).await?;
		info!("listening on TCP {}", listener.local_addr()?);
		axum::serve(listener, router).await?;
	} else {
		bail!("unsupported http.listen schema")
	}

	Ok(())
}

#[derive(Debug, Clone)]
pub struct KilndServices {
	pub config: Arc<KilndConfig>,
	pub backend: BackendServices,
	pub manager: BuildManager,
}
