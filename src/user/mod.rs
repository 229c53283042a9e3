mod sqlite_user_store;
mod user_models;
mod user_store;

pub use sqlite_user_store::SqliteUserRecordStore;
pub use user_models::{InteractionOutcome, Play, Share, UserListing, UserRecord};
pub use user_store::UserRecordStore;
