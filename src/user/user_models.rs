use crate::personality::PersonalityVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's current personality evaluation and the track assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub user_name: String,
    /// Name of the delivered track, without extension. Also the token the
    /// image and video of this user are keyed by.
    #[serde(rename = "filename")]
    pub track_file: String,
    pub openness: f64,
    pub conscientiousness: f64,
    pub extraversion: f64,
    pub agreeableness: f64,
    pub neuroticism: f64,
    pub plays: u32,
    pub shares: u32,
    #[serde(rename = "dateOfCreation")]
    pub created: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        track_file: impl Into<String>,
        personality: PersonalityVector,
    ) -> Self {
        let mut record = Self {
            user_id: user_id.into(),
            user_name: String::new(),
            track_file: String::new(),
            openness: 0.0,
            conscientiousness: 0.0,
            extraversion: 0.0,
            agreeableness: 0.0,
            neuroticism: 0.0,
            plays: 0,
            shares: 0,
            created: Utc::now(),
        };
        record.reevaluate(user_name, track_file, personality);
        record
    }

    /// Replaces name, track and every trait score, and resets the counters.
    /// Only the identity and the creation date survive a re-evaluation.
    pub fn reevaluate(
        &mut self,
        user_name: impl Into<String>,
        track_file: impl Into<String>,
        personality: PersonalityVector,
    ) {
        self.user_name = user_name.into();
        self.track_file = track_file.into();
        self.openness = personality.openness;
        self.conscientiousness = personality.conscientiousness;
        self.extraversion = personality.extraversion;
        self.agreeableness = personality.agreeableness;
        self.neuroticism = personality.neuroticism;
        self.plays = 0;
        self.shares = 0;
    }

    pub fn personality(&self) -> PersonalityVector {
        PersonalityVector {
            openness: self.openness,
            conscientiousness: self.conscientiousness,
            extraversion: self.extraversion,
            agreeableness: self.agreeableness,
            neuroticism: self.neuroticism,
        }
    }
}

/// `player` listened to the track of `played`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    pub player: String,
    pub played: String,
}

/// `sharer` shared the track of `shared`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    #[serde(alias = "share")]
    pub sharer: String,
    pub shared: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// First interaction of this actor with this target, counter bumped.
    Recorded,
    AlreadyRecorded,
    UnknownTarget,
}

/// How `list-users-by` orders and slices its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserListing {
    Newest { offset: usize, limit: usize },
    Hottest { offset: usize, limit: usize },
    NameContains(String),
}

impl UserListing {
    /// `newest` and `hottest` are paginated with `offset = min` and
    /// `limit = max - min`; anything else is a name search and ignores the
    /// range. `None` when `max < min`.
    pub fn parse(query: &str, min: usize, max: usize) -> Option<Self> {
        let limit = max.checked_sub(min)?;
        Some(match query {
            "newest" => UserListing::Newest { offset: min, limit },
            "hottest" => UserListing::Hottest { offset: min, limit },
            other => UserListing::NameContains(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(v: f64) -> PersonalityVector {
        PersonalityVector {
            openness: v,
            conscientiousness: v + 1.0,
            extraversion: v + 2.0,
            agreeableness: v + 3.0,
            neuroticism: v + 4.0,
        }
    }

    #[test]
    fn reevaluation_overwrites_everything_but_identity() {
        let mut record = UserRecord::new("u1", "alice", "123_alice", vector(1.0));
        record.plays = 7;
        record.shares = 3;
        let created = record.created;

        record.reevaluate("alicia", "123_alicia", vector(10.0));

        assert_eq!(record.user_id, "u1");
        assert_eq!(record.user_name, "alicia");
        assert_eq!(record.track_file, "123_alicia");
        assert_eq!(record.personality(), vector(10.0));
        assert_eq!(record.plays, 0);
        assert_eq!(record.shares, 0);
        assert_eq!(record.created, created);
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = UserRecord::new("u1", "alice", "123_alice", vector(1.0));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["userId"], "u1");
        assert_eq!(json["userName"], "alice");
        assert_eq!(json["filename"], "123_alice");
        assert_eq!(json["neuroticism"], 5.0);
        assert!(json.get("dateOfCreation").is_some());
    }

    #[test]
    fn share_accepts_legacy_field_name() {
        let share: Share = serde_json::from_str(r#"{"share":"a","shared":"b"}"#).unwrap();
        assert_eq!(share.sharer, "a");
    }

    #[test]
    fn listing_parse() {
        assert_eq!(
            UserListing::parse("newest", 10, 30),
            Some(UserListing::Newest {
                offset: 10,
                limit: 20
            })
        );
        assert_eq!(
            UserListing::parse("hottest", 0, 5),
            Some(UserListing::Hottest {
                offset: 0,
                limit: 5
            })
        );
        assert_eq!(
            UserListing::parse("ali", 0, 0),
            Some(UserListing::NameContains("ali".to_string()))
        );
        assert_eq!(UserListing::parse("newest", 5, 4), None);
    }
}
