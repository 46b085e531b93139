use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, health, images, products, profiles, subdivisions};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (event_bus, change_log_rx) = events::init_event_bus();
    let thumbnail_rx = event_bus.subscribe();
    tokio::spawn(events::start_change_log_listener(change_log_rx, pool.clone()));
    tokio::spawn(events::start_thumbnail_worker(thumbnail_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let subdivision_routes = Router::new()
        .route("/", get(subdivisions::list_subdivisions))
        .route("/", post(subdivisions::create_subdivision))
        .route("/:code", get(subdivisions::get_subdivision))
        .route("/:code", put(subdivisions::update_subdivision))
        .route("/:code", delete(subdivisions::delete_subdivision))
        .route("/:code/members", get(subdivisions::list_members))
        .route("/:code/permissions", get(subdivisions::my_permissions));

    // Products are scoped to a subdivision: /subdivisions/:code/products
    let product_routes = Router::new()
        .route("/", get(products::list_products))
        .route("/", post(products::create_product))
        .route("/check-code", get(products::check_product_code))
        .route("/:id", get(products::get_product))
        .route("/:id", put(products::update_product))
        .route("/:id", delete(products::delete_product))
        .route("/:id/changes", get(products::list_changes));

    let image_routes = Router::new()
        .route("/", get(images::list_images))
        .route("/", post(images::upload_image))
        .route("/:image_id/main", post(images::set_main_image))
        .route("/:image_id", delete(images::delete_image));

    let user_routes = Router::new()
        .route("/:user_id/profile", get(profiles::get_profile))
        .route("/:user_id/profile", put(profiles::bind_profile))
        .route("/:user_id/roles", post(profiles::grant_role))
        .route("/:user_id/roles/:role", delete(profiles::revoke_role));

    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/subdivisions", subdivision_routes)
        .nest("/subdivisions/:code/products", product_routes)
        .nest("/subdivisions/:code/products/:id/images", image_routes)
        .route("/products/search", get(products::search_products))
        .nest("/users", user_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
