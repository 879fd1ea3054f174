use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use log::error;

/// A failed request: the report goes to the log, the client only sees `R`.
#[derive(Debug)]
pub struct ServerError<R: IntoResponse>(pub eyre::Report, pub R);

pub type ServerResult<S, F = StatusCode> = Result<S, ServerError<F>>;

impl<R: IntoResponse> IntoResponse for ServerError<R> {
    fn into_response(self) -> Response {
        error!("request failed: {:?}", self.0);
        self.1.into_response()
    }
}

impl<E> From<E> for ServerError<StatusCode>
where
    E: Into<eyre::Report>,
{
    fn from(err: E) -> Self {
        Self(err.into(), StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub trait WithRedirect<T> {
    fn with_redirect(self, redirect: Redirect) -> ServerResult<T, Redirect>;
}

impl<T> WithRedirect<T> for eyre::Result<T> {
    fn with_redirect(self, redirect: Redirect) -> ServerResult<T, Redirect> {
        self.map_err(|err| ServerError(err, redirect))
    }
}
