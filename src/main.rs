use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use surplus_catalog::{app, authz, db, models, routes};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::subdivisions::list_subdivisions,
        routes::subdivisions::create_subdivision,
        routes::subdivisions::get_subdivision,
        routes::subdivisions::update_subdivision,
        routes::subdivisions::delete_subdivision,
        routes::subdivisions::list_members,
        routes::subdivisions::my_permissions,
        routes::products::list_products,
        routes::products::create_product,
        routes::products::check_product_code,
        routes::products::get_product,
        routes::products::update_product,
        routes::products::delete_product,
        routes::products::list_changes,
        routes::products::search_products,
        routes::images::list_images,
        routes::images::upload_image,
        routes::images::set_main_image,
        routes::images::delete_image,
        routes::profiles::get_profile,
        routes::profiles::bind_profile,
        routes::profiles::grant_role,
        routes::profiles::revoke_role
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::auth::MeResponse,
            routes::auth::MessageResponse,
            models::subdivision::SubdivisionSummary,
            models::subdivision::SubdivisionListResponse,
            models::subdivision::StatusStat,
            routes::subdivisions::DeleteResponse,
            routes::subdivisions::MemberInfo,
            routes::products::ProductDetail,
            routes::profiles::ProfileResponse,
            models::product::CodeCheckResponse,
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::subdivision::Subdivision,
            models::subdivision::SubdivisionCreateRequest,
            models::subdivision::SubdivisionUpdateRequest,
            models::product::Product,
            models::product::ProductCreateRequest,
            models::product::ProductUpdateRequest,
            models::product::ProductStatus,
            models::product::ProductCondition,
            models::image::ProductImage,
            models::image::ImageUploadRequest,
            models::changelog::ChangeLogEntry,
            models::changelog::ChangeAction,
            models::profile::Profile,
            models::profile::ProfileBindRequest,
            models::profile::RoleGrantRequest,
            authz::PermissionSet,
            authz::Role
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Subdivisions", description = "Subdivision registry"),
        (name = "Products", description = "Surplus stock catalog"),
        (name = "Images", description = "Product images"),
        (name = "Users", description = "Membership and role administration")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let app = app::create_app(pool).await?;

    let app = app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
