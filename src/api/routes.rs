use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, SharedState};

/// Largest accepted upload (instance, solution or asset)
pub const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

pub fn create_router() -> Router<SharedState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::list_problems))
        .route("/rebuild", post(handlers::rebuild_index))
        // Problem metadata
        .route("/:problem/problem_info", get(handlers::problem_info))
        .route("/:problem/instance_schema", get(handlers::instance_schema))
        .route("/:problem/solution_schema", get(handlers::solution_schema))
        // Instances
        .route("/:problem/instance_info", get(handlers::query_instances))
        .route("/:problem/instance_info/*uid", get(handlers::instance_info))
        .route("/:problem/instances", post(handlers::create_instance))
        .route(
            "/:problem/instances/*uid",
            get(handlers::get_instance).delete(handlers::delete_instance),
        )
        // Solutions
        .route("/:problem/solutions", post(handlers::create_solution))
        .route(
            "/:problem/solutions/*uid",
            get(handlers::get_solution).delete(handlers::delete_solution),
        )
        .route(
            "/:problem/solution_info/*instance_uid",
            get(handlers::solution_info),
        )
        // Assets
        .route("/:problem/asset_info/*uid", get(handlers::asset_info))
        .route(
            "/:problem/assets/:asset_class/*uid",
            get(handlers::get_asset)
                .post(handlers::put_asset)
                .delete(handlers::delete_asset),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
