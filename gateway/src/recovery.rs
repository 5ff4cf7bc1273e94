use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tracing::error;

static PANIC_HOOK: Once = Once::new();

/// Routes every panic through `tracing` with a full backtrace, before the
/// unwind reaches [`catch_panics`]. Installed once per process, when the
/// first handler is built.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        panic::set_hook(Box::new(|info| {
            let backtrace = Backtrace::force_capture();
            error!("panic: {info}\n{backtrace}");
        }));
    });
}

/// Boundary around request dispatch: a panicking handler answers a bare
/// 500 instead of taking the process down, and sibling requests keep
/// running. Best effort only: a handler that already started writing its
/// response cannot be retracted.
pub async fn catch_panics(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            error!(
                "{method} {path} panicked: {}",
                panic_message(payload.as_ref())
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt; // for `oneshot`

    use super::*;

    #[allow(dependency_on_unit_never_type_fallback)]
    fn app() -> Router {
        Router::new()
            .route("/boom", get(|| async { panic!("kaboom") }))
            .route("/ok", get(|| async { "fine" }))
            .layer(axum::middleware::from_fn(catch_panics))
    }

    #[tokio::test]
    async fn a_panicking_handler_answers_500() {
        let response = app()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn a_panic_does_not_poison_later_requests() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn panic_payload_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(boxed.as_ref()), "opaque panic payload");
    }
}
