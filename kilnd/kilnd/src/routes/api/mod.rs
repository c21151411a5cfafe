use axum::{
	Router,
	routing::{get, post},
};

use crate::KilndServices;

mod build;
pub mod error;
mod project;

pub fn api_router() -> Router<KilndServices> {
	Router::new()
		.route("/projects", get(project::list_projects))
		.route("/projects/{project}", get(project::get_project))
		.route("/projects/{project}/builds", get(project::list_builds))
		.route("/builds", post(build::request_builds))
		.route("/builds/{id}", get(build::get_build))
		.route("/builds/{id}/retry", post(build::retry_build))
		.route("/builds/{id}/log", get(build::get_build_log))
}
