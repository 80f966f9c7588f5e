use mongodb::{Database, IndexModel};
use tracing::info;

use crate::models::{Conversation, Invite, Message, Team, User};

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    // Users
    create_indexes(
        db,
        User::COLLECTION,
        vec![
            index(bson::doc! { "handle": 1 }),
            index(bson::doc! { "team_id": 1 }),
        ],
    )
    .await?;

    // Conversations
    create_indexes(
        db,
        Conversation::COLLECTION,
        vec![
            index(bson::doc! { "participants": 1, "last_message_at": -1 }),
        ],
    )
    .await?;

    // Messages
    create_indexes(
        db,
        Message::COLLECTION,
        vec![
            index(bson::doc! { "chat_id": 1, "timestamp": 1 }),
            index(bson::doc! { "sender_id": 1, "timestamp": -1 }),
        ],
    )
    .await?;

    // Teams
    create_indexes(
        db,
        Team::COLLECTION,
        vec![
            index(bson::doc! { "members": 1 }),
            index(bson::doc! { "admin_id": 1 }),
        ],
    )
    .await?;

    // Invites
    create_indexes(
        db,
        Invite::COLLECTION,
        vec![
            index(bson::doc! { "receiver_id": 1, "status": 1 }),
            index(bson::doc! { "sender_id": 1, "receiver_id": 1, "status": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    db.collection::<bson::Document>(collection)
        .create_indexes(indexes)
        .await?;
    info!(collection, "Indexes created");
    Ok(())
}
