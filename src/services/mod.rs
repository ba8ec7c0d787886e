use sea_orm::EntityTrait;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::user::Entity as UserEntity;
use crate::errors::ServiceError;

pub mod orders;
pub mod payments;
pub mod paystack;

/// Rejects the call unless the actor exists and carries the admin flag.
pub(crate) async fn ensure_admin(
    db: &DbPool,
    actor_id: Uuid,
    action: &str,
) -> Result<(), ServiceError> {
    let actor = UserEntity::find_by_id(actor_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized(format!("Unknown actor {actor_id}")))?;

    if !actor.is_admin {
        return Err(ServiceError::Unauthorized(format!(
            "You are not allowed to {action}"
        )));
    }

    Ok(())
}
