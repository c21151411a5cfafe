use anyhow::Result;
use axum::{Router, routing::get};

use crate::KilndServices;

pub mod api;

pub fn make_router(services: KilndServices) -> Result<Router> {
	let router = Router::new()
		.route("/", get(handler))
		.merge(api::api_router())
		.with_state(services);

	Ok(router)
}

async fn handler() -> &'static str {
	concat!("Kiln ", env!("CARGO_PKG_VERSION"))
}
