use axum::{
	Json,
	extract::{Path, State},
};
use kiln_api_model::{build::ApiBuildInfo, project::ApiProjectInfo};
use kiln_backend_model::project::Project;

use super::{build::build_info, error::ApiResult};
use crate::KilndServices;

pub(crate) fn project_info(project: &Project) -> ApiProjectInfo {
	ApiProjectInfo {
		name: project.name.to_string(),
		build_type: project.config.build_type.to_string(),
		targets: project.config.targets().map(|t| t.to_string()).collect(),
		primary_branch: project.config.primary_branch.to_string(),
		deploy_script: project.config.deploy_script.clone(),
	}
}

pub(super) async fn list_projects(
	State(services): State<KilndServices>,
) -> ApiResult<Json<Vec<ApiProjectInfo>>> {
	let projects = services.backend.projects.list().await?;
	Ok(Json(projects.iter().map(project_info).collect()))
}

pub(super) async fn get_project(
	State(services): State<KilndServices>,
	Path(project): Path<String>,
) -> ApiResult<Json<ApiProjectInfo>> {
	let project = services.backend.projects.get(&project).await?;
	Ok(Json(project_info(&project)))
}

pub(super) async fn list_builds(
	State(services): State<KilndServices>,
	Path(project): Path<String>,
) -> ApiResult<Json<Vec<ApiBuildInfo>>> {
	services.backend.projects.get(&project).await?;
	let builds = services.manager.list(&project).await?;
	Ok(Json(builds.iter().map(build_info).collect()))
}
