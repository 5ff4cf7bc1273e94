use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::recovery;

/// Path prefix reserved for the metadata directory service.
pub const MDS_PREFIX: &str = "/mds";
/// Path prefix reserved for the write-ahead logger.
pub const WRITELOGGER_PREFIX: &str = "/writelogger";
/// Path prefix reserved for the snapshot manager.
pub const SNAPSHOTTER_PREFIX: &str = "/snapshotter";
/// Path prefix reserved for the query engine.
pub const QUERYER_PREFIX: &str = "/queryer";
/// Path prefix reserved for the generic computer handler.
pub const COMPUTER_PREFIX: &str = "/computer";

/// The optional sub-service slots, resolved once when the handler is built.
#[derive(Default)]
pub(crate) struct Services {
    pub mds: Option<Router>,
    pub writelogger: Option<Router>,
    pub snapshotter: Option<Router>,
    pub queryer: Option<Router>,
    pub computer: Option<Router>,
}

impl Services {
    /// The routing table as an explicit list: one `(prefix, handler)` pair
    /// per present slot, absent slots skipped.
    fn mounts(self) -> Vec<(&'static str, Router)> {
        [
            (MDS_PREFIX, self.mds),
            (WRITELOGGER_PREFIX, self.writelogger),
            (SNAPSHOTTER_PREFIX, self.snapshotter),
            (QUERYER_PREFIX, self.queryer),
            (COMPUTER_PREFIX, self.computer),
        ]
        .into_iter()
        .filter_map(|(prefix, service)| service.map(|service| (prefix, service)))
        .collect()
    }
}

/// Builds the routing table that stays frozen for the handler's lifetime:
/// the health route plus one nested mount per configured service. Requests
/// matching no route get a plain 404.
pub(crate) fn router(services: Services) -> Router {
    let mut router = Router::new().route("/health", get(health));

    for (prefix, service) in services.mounts() {
        // nest() strips the prefix before the inner router sees the path
        router = router.nest(prefix, service);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(recovery::catch_panics))
}

// GET /health
async fn health() {}
