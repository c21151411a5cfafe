use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
};
use kiln_backend_service::{BackendError, project::ProjectError};
use kiln_runner::RunnerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	RunnerError(RunnerError),

	#[error("api error: {1}")]
	CustomRef(StatusCode, &'static str),
	#[error("api error: {1}")]
	CustomString(StatusCode, String),
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match self {
			ApiError::CustomRef(status, _) | ApiError::CustomString(status, _) => *status,
			ApiError::RunnerError(error) => match error {
				RunnerError::NotFound(_)
				| RunnerError::Project(ProjectError::NotFound(_))
				| RunnerError::Backend(BackendError::ProjectError(ProjectError::NotFound(_))) => {
					StatusCode::NOT_FOUND
				}
				RunnerError::NotRetryable(_) => StatusCode::CONFLICT,
				RunnerError::UnknownTarget { .. } | RunnerError::UnknownBuildType(_) => {
					StatusCode::BAD_REQUEST
				}
				_ => StatusCode::INTERNAL_SERVER_ERROR,
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		match self {
			ApiError::CustomRef(status, message) => (status, message).into_response(),
			ApiError::CustomString(status, message) => (status, message).into_response(),
			ApiError::RunnerError(_) => (self.status(), self.to_string()).into_response(),
		}
	}
}

impl<T: Into<RunnerError>> From<T> for ApiError {
	fn from(value: T) -> Self {
		Self::RunnerError(value.into())
	}
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) trait IntoCustomApiError {
	fn into_custom_api_error(self, status: StatusCode) -> ApiError;
}

impl IntoCustomApiError for &'static str {
	fn into_custom_api_error(self, status: StatusCode) -> ApiError {
		ApiError::CustomRef(status, self)
	}
}
impl IntoCustomApiError for String {
	fn into_custom_api_error(self, status: StatusCode) -> ApiError {
		ApiError::CustomString(status, self)
	}
}

pub(crate) trait OptionExt<T> {
	fn or_api_error<M: IntoCustomApiError>(
		self,
		status: StatusCode,
		message: M,
	) -> Result<T, ApiError>;
}

impl<T> OptionExt<T> for Option<T> {
	fn or_api_error<M: IntoCustomApiError>(
		self,
		status: StatusCode,
		message: M,
	) -> Result<T, ApiError> {
		match self {
			Some(val) => Ok(val),
			None => Err(message.into_custom_api_error(status)),
		}
	}
}
