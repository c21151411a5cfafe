use std::io::ErrorKind;

use axum::{
	Json,
	extract::{Path, State},
	http::StatusCode,
};
use kiln_api_model::build::{ApiBuildInfo, ApiBuildRequest};
use kiln_backend_model::build::{Build, BuildId, now};
use kiln_runner::log::LOG_FILE;

use super::error::{ApiError, ApiResult, OptionExt};
use crate::KilndServices;

pub(crate) fn build_info(build: &Build) -> ApiBuildInfo {
	ApiBuildInfo {
		id: build.id,
		project: build.project.name.to_string(),
		target: build.target.to_string(),
		revision: build.revision.clone(),
		state: build.state,
		created_at: build.created_at.unix_timestamp(),
		started_at: build.started_at.map(|t| t.unix_timestamp()),
		updated_at: build.updated_at.unix_timestamp(),
		elapsed: build.elapsed(now()).whole_seconds(),
		update_duration: build.update_duration.whole_seconds(),
		short_commit: build.short_commit.clone(),
		deploy: build.deploy,
		downloadable: build.is_downloadable(),
		deployable: build.is_deployable(),
		retryable: build.is_retryable(),
	}
}

pub(super) async fn request_builds(
	State(services): State<KilndServices>,
	Json(request): Json<ApiBuildRequest>,
) -> ApiResult<(StatusCode, Json<Vec<ApiBuildInfo>>)> {
	if request.revision.is_empty() {
		return Err(ApiError::CustomRef(
			StatusCode::BAD_REQUEST,
			"revision must not be empty",
		));
	}
	let builds = services
		.manager
		.request(
			&request.project,
			&request.target,
			&request.revision,
			request.deploy,
		)
		.await?;
	Ok((
		StatusCode::ACCEPTED,
		Json(builds.iter().map(build_info).collect()),
	))
}

pub(super) async fn get_build(
	State(services): State<KilndServices>,
	Path(id): Path<BuildId>,
) -> ApiResult<Json<ApiBuildInfo>> {
	let build = services.manager.get(id).await?;
	Ok(Json(build_info(&build)))
}

pub(super) async fn retry_build(
	State(services): State<KilndServices>,
	Path(id): Path<BuildId>,
) -> ApiResult<(StatusCode, Json<ApiBuildInfo>)> {
	let build = services.manager.retry(id).await?;
	Ok((StatusCode::ACCEPTED, Json(build_info(&build))))
}

pub(super) async fn get_build_log(
	State(services): State<KilndServices>,
	Path(id): Path<BuildId>,
) -> ApiResult<String> {
	let build = services.manager.get(id).await?;
	let path = build
		.output_dir(&services.backend.config.paths.output)
		.join(LOG_FILE);
	let log = match tokio::fs::read_to_string(&path).await {
		Ok(log) => Some(log),
		Err(error) if error.kind() == ErrorKind::NotFound => None,
		Err(error) => {
			return Err(ApiError::CustomString(
				StatusCode::INTERNAL_SERVER_ERROR,
				error.to_string(),
			));
		}
	};
	log.or_api_error(StatusCode::NOT_FOUND, "build log not found")
}
