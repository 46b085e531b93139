pub mod auth;
pub mod health;
pub mod images;
pub mod products;
pub mod profiles;
pub mod subdivisions;

use sqlx::SqlitePool;

use crate::authz::Principal;
use crate::errors::AppResult;
use crate::jwt::MaybeAuthUser;

/// Load the caller's principal, or `None` for anonymous requests.
pub(crate) async fn load_principal(
    pool: &SqlitePool,
    maybe: &MaybeAuthUser,
) -> AppResult<Option<Principal>> {
    match &maybe.0 {
        Some(auth) => Ok(Some(Principal::load(pool, auth.user_id).await?)),
        None => Ok(None),
    }
}
