use super::user_models::{InteractionOutcome, Play, Share, UserListing, UserRecord};
use anyhow::Result;

pub trait UserRecordStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Inserts or fully replaces the record, keeping the original creation
    /// date of an existing user. Returns the stored record.
    fn upsert(&self, record: &UserRecord) -> Result<UserRecord>;

    fn list_newest(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>>;

    fn list_hottest(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>>;

    fn search_by_name(&self, fragment: &str) -> Result<Vec<UserRecord>>;

    fn list(&self, listing: &UserListing) -> Result<Vec<UserRecord>> {
        match listing {
            UserListing::Newest { offset, limit } => self.list_newest(*offset, *limit),
            UserListing::Hottest { offset, limit } => self.list_hottest(*offset, *limit),
            UserListing::NameContains(fragment) => self.search_by_name(fragment),
        }
    }

    fn record_play(&self, play: &Play) -> Result<InteractionOutcome>;

    fn record_share(&self, share: &Share) -> Result<InteractionOutcome>;

    fn count(&self) -> Result<usize>;
}
