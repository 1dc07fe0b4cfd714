//! Stored documents and the id-list bookkeeping shared by every collection.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = Uuid;
pub type IdList = Vec<Id>;

/// Set-like operations over the relationship arrays kept on documents.
pub trait IdListExt {
    fn has(&self, id: &Id) -> bool;
    /// Appends `id` unless already present. Returns true when inserted.
    fn push_unique(&mut self, id: Id) -> bool;
    /// Removes every occurrence of `id`. Returns true when something was removed.
    fn pull(&mut self, id: &Id) -> bool;
}

impl IdListExt for IdList {
    fn has(&self, id: &Id) -> bool {
        self.contains(id)
    }

    fn push_unique(&mut self, id: Id) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.push(id);
        true
    }

    fn pull(&mut self, id: &Id) -> bool {
        let before = self.len();
        self.retain(|x| x != id);
        before != self.len()
    }
}

/// Who may tag or mention a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Everyone,
    Follow,
    None,
}

impl FromStr for Audience {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "everyone" => Ok(Self::Everyone),
            "follow" => Ok(Self::Follow),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

/// Relationship label shown to a viewer next to another user or post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "Self")]
    Myself,
    Creator,
    Following,
    Requested,
    Follow,
    Approve,
    Unblock,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Myself => "Self",
            Relation::Creator => "Creator",
            Relation::Following => "Following",
            Relation::Requested => "Requested",
            Relation::Follow => "Follow",
            Relation::Approve => "Approve",
            Relation::Unblock => "Unblock",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameChange {
    pub username: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub username: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub private: bool,
    pub previous_username: Option<UsernameChange>,
    pub last_username_changed: Option<DateTime<Utc>>,
    pub manually_approve_tag: bool,
    pub tag_policy: Audience,
    pub mention_policy: Audience,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub posts: IdList,
    #[serde(default)]
    pub liked: IdList,
    #[serde(default)]
    pub saved: IdList,
    #[serde(default)]
    pub followers: IdList,
    #[serde(default)]
    pub following: IdList,
    #[serde(default)]
    pub blocked: IdList,
    #[serde(default)]
    pub blocked_by: IdList,
    #[serde(default)]
    pub close_friends: IdList,
    #[serde(default)]
    pub pending_followers: IdList,
    #[serde(default)]
    pub pending_following: IdList,
    #[serde(default)]
    pub archived_posts: IdList,
    #[serde(default)]
    pub tagged_posts: IdList,
    #[serde(default)]
    pub pending_tagged_posts: IdList,
}

impl User {
    pub fn new(name: String, email: String, username: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            username,
            avatar: None,
            website: None,
            bio: None,
            private: false,
            previous_username: None,
            last_username_changed: None,
            manually_approve_tag: false,
            tag_policy: Audience::Everyone,
            mention_policy: Audience::Everyone,
            created_at: Utc::now(),
            posts: Vec::new(),
            liked: Vec::new(),
            saved: Vec::new(),
            followers: Vec::new(),
            following: Vec::new(),
            blocked: Vec::new(),
            blocked_by: Vec::new(),
            close_friends: Vec::new(),
            pending_followers: Vec::new(),
            pending_following: Vec::new(),
            archived_posts: Vec::new(),
            tagged_posts: Vec::new(),
            pending_tagged_posts: Vec::new(),
        }
    }

    /// True when either side has blocked the other.
    pub fn is_blocked_with(&self, other: &Id) -> bool {
        self.blocked.has(other) || self.blocked_by.has(other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Id,
    pub media: String,
    pub caption: Option<String>,
    pub allow_comment: bool,
    pub creator: Id,
    pub styles: serde_json::Value,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tagged: IdList,
    #[serde(default)]
    pub likes: IdList,
    #[serde(default)]
    pub comments: IdList,
    #[serde(default)]
    pub hashtags: IdList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Id,
    pub creator: Id,
    pub post: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: IdList,
    #[serde(default)]
    pub replies: IdList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentReply {
    pub id: Id,
    pub creator: Id,
    pub parent_comment: Id,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: IdList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashtag {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub posts: IdList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedToken {
    pub token: String,
    pub revoked_at: DateTime<Utc>,
    /// Once past, the token fails verification anyway and the entry can go.
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_unique_and_pull() {
        let mut list: IdList = Vec::new();
        let a = Uuid::new_v4();
        assert!(list.push_unique(a));
        assert!(!list.push_unique(a));
        assert_eq!(list.len(), 1);
        assert!(list.pull(&a));
        assert!(!list.pull(&a));
        assert!(list.is_empty());
    }

    #[test]
    fn test_audience_parse() {
        assert_eq!("follow".parse::<Audience>(), Ok(Audience::Follow));
        assert!("friends".parse::<Audience>().is_err());
    }

    #[test]
    fn test_relation_serializes_as_label() {
        let json = serde_json::to_value(Relation::Myself).unwrap();
        assert_eq!(json, serde_json::json!("Self"));
        assert_eq!(Relation::Requested.to_string(), "Requested");
    }

    #[test]
    fn test_blocked_either_way() {
        let mut user = User::new("Ann".into(), "a@x.io".into(), "ann".into(), "h".into());
        let other = Uuid::new_v4();
        assert!(!user.is_blocked_with(&other));
        user.blocked_by.push(other);
        assert!(user.is_blocked_with(&other));
    }
}
