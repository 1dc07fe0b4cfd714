//! In-memory document store with optional JSON snapshot persistence.
//!
//! Every service call runs a single closure under [`Store::write`], so all
//! the id-list bookkeeping an operation performs lands atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::model::{Comment, CommentReply, Hashtag, Id, Post, RevokedToken, User};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    users: HashMap<Id, User>,
    #[serde(default)]
    pub posts: HashMap<Id, Post>,
    #[serde(default)]
    pub comments: HashMap<Id, Comment>,
    #[serde(default)]
    pub replies: HashMap<Id, CommentReply>,
    #[serde(default)]
    hashtags: HashMap<Id, Hashtag>,
    #[serde(default)]
    pub revoked_tokens: HashMap<String, RevokedToken>,

    #[serde(skip)]
    usernames: HashMap<String, Id>,
    #[serde(skip)]
    emails: HashMap<String, Id>,
    #[serde(skip)]
    tag_names: HashMap<String, Id>,
}

impl Database {
    fn reindex(&mut self) {
        self.usernames = self
            .users
            .values()
            .map(|u| (u.username.clone(), u.id))
            .collect();
        self.emails = self.users.values().map(|u| (u.email.clone(), u.id)).collect();
        self.tag_names = self
            .hashtags
            .values()
            .map(|h| (h.name.clone(), h.id))
            .collect();
    }

    // Users

    pub fn insert_user(&mut self, user: User) -> Result<()> {
        if self.emails.contains_key(&user.email) {
            return Err(CoreError::Conflict("Email exists already".into()));
        }
        if self.usernames.contains_key(&user.username) {
            return Err(CoreError::Conflict("Username exists already".into()));
        }
        self.usernames.insert(user.username.clone(), user.id);
        self.emails.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
        Ok(())
    }

    pub fn user(&self, id: &Id) -> Result<&User> {
        self.users
            .get(id)
            .ok_or_else(|| CoreError::not_found("User Not Found"))
    }

    pub fn user_mut(&mut self, id: &Id) -> Result<&mut User> {
        self.users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("User Not Found"))
    }

    pub fn find_user(&self, id: &Id) -> Option<&User> {
        self.users.get(id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn users_mut(&mut self) -> impl Iterator<Item = &mut User> {
        self.users.values_mut()
    }

    pub fn user_id_by_username(&self, username: &str) -> Option<Id> {
        self.usernames.get(&username.to_lowercase()).copied()
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.user_id_by_username(username)
            .and_then(|id| self.users.get(&id))
    }

    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.emails
            .get(&email.to_lowercase())
            .and_then(|id| self.users.get(id))
    }

    pub fn username_taken(&self, username: &str) -> bool {
        self.usernames.contains_key(&username.to_lowercase())
    }

    pub fn email_taken(&self, email: &str) -> bool {
        self.emails.contains_key(&email.to_lowercase())
    }

    /// Changes a username while keeping the unique index in step.
    pub fn set_username(&mut self, id: &Id, username: String) -> Result<()> {
        if let Some(owner) = self.usernames.get(&username) {
            if owner != id {
                return Err(CoreError::Conflict(format!(
                    "{username} is already taken for username"
                )));
            }
        }
        let user = self
            .users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("User Not Found"))?;
        self.usernames.remove(&user.username);
        user.username = username.clone();
        self.usernames.insert(username, *id);
        Ok(())
    }

    /// Changes an email while keeping the unique index in step.
    pub fn set_email(&mut self, id: &Id, email: String) -> Result<()> {
        if let Some(owner) = self.emails.get(&email) {
            if owner != id {
                return Err(CoreError::Conflict(format!(
                    "{email} is already taken for email"
                )));
            }
        }
        let user = self
            .users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("User Not Found"))?;
        self.emails.remove(&user.email);
        user.email = email.clone();
        self.emails.insert(email, *id);
        Ok(())
    }

    // Posts

    pub fn post(&self, id: &Id) -> Result<&Post> {
        self.posts
            .get(id)
            .ok_or_else(|| CoreError::not_found("Post not found"))
    }

    pub fn post_mut(&mut self, id: &Id) -> Result<&mut Post> {
        self.posts
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("Post not found"))
    }

    // Comments

    pub fn comment(&self, id: &Id) -> Result<&Comment> {
        self.comments
            .get(id)
            .ok_or_else(|| CoreError::not_found("Comment not found"))
    }

    pub fn comment_mut(&mut self, id: &Id) -> Result<&mut Comment> {
        self.comments
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("Comment not found"))
    }

    pub fn reply(&self, id: &Id) -> Result<&CommentReply> {
        self.replies
            .get(id)
            .ok_or_else(|| CoreError::not_found("Reply not found"))
    }

    pub fn reply_mut(&mut self, id: &Id) -> Result<&mut CommentReply> {
        self.replies
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("Reply not found"))
    }

    /// Number of comments on a post plus every reply under them.
    pub fn comment_count(&self, post: &Post) -> usize {
        post.comments
            .iter()
            .filter_map(|c| self.comments.get(c))
            .map(|c| 1 + c.replies.len())
            .sum()
    }

    // Hashtags

    pub fn hashtag_by_name(&self, name: &str) -> Option<&Hashtag> {
        self.tag_names.get(name).and_then(|id| self.hashtags.get(id))
    }

    /// Returns the id of the named hashtag, creating it when absent.
    pub fn upsert_hashtag(&mut self, name: &str) -> Id {
        if let Some(id) = self.tag_names.get(name) {
            return *id;
        }
        let tag = Hashtag {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            posts: Vec::new(),
        };
        let id = tag.id;
        self.tag_names.insert(tag.name.clone(), id);
        self.hashtags.insert(id, tag);
        id
    }

    pub fn hashtag_mut(&mut self, id: &Id) -> Option<&mut Hashtag> {
        self.hashtags.get_mut(id)
    }

    pub fn hashtags_mut(&mut self) -> impl Iterator<Item = &mut Hashtag> {
        self.hashtags.values_mut()
    }
}

struct StoreInner {
    db: RwLock<Database>,
    snapshot: Option<PathBuf>,
    dirty: AtomicBool,
}

/// Shared handle to the document store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("snapshot", &self.inner.snapshot)
            .finish()
    }
}

impl Store {
    pub fn in_memory() -> Self {
        Self::with_database(Database::default(), None)
    }

    /// Opens a store backed by a snapshot file. A missing file yields an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut db: Database = serde_json::from_slice(&bytes)?;
                db.reindex();
                info!(path = %path.display(), users = db.users.len(), posts = db.posts.len(), "Loaded snapshot");
                db
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                Database::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::with_database(db, Some(path)))
    }

    fn with_database(db: Database, snapshot: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                db: RwLock::new(db),
                snapshot,
                dirty: AtomicBool::new(false),
            }),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self.inner.db.read();
        f(&db)
    }

    /// Runs `f` under the exclusive lock. Callers check preconditions before
    /// mutating so an `Err` leaves the documents untouched.
    pub fn write<R>(&self, f: impl FnOnce(&mut Database) -> Result<R>) -> Result<R> {
        let mut db = self.inner.db.write();
        let out = f(&mut db)?;
        self.inner.dirty.store(true, Ordering::Release);
        Ok(out)
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.snapshot.is_some()
    }

    /// Writes the snapshot if anything changed since the last flush.
    /// Returns true when a file was written.
    pub async fn flush(&self) -> Result<bool> {
        let Some(path) = self.inner.snapshot.as_ref() else {
            return Ok(false);
        };
        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let bytes = {
            let db = self.inner.db.read();
            serde_json::to_vec(&*db)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            self.inner.dirty.store(true, Ordering::Release);
            return Err(CoreError::Storage(format!(
                "failed to write snapshot {}: {e}",
                path.display()
            )));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Snapshot flushed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    fn user(username: &str, email: &str) -> User {
        User::new("Test".into(), email.into(), username.into(), "hash".into())
    }

    #[test]
    fn test_unique_indexes() {
        let store = Store::in_memory();
        store
            .write(|db| db.insert_user(user("alice", "alice@example.com")))
            .unwrap();
        let dup = store.write(|db| db.insert_user(user("alice", "other@example.com")));
        assert!(matches!(dup, Err(CoreError::Conflict(m)) if m == "Username exists already"));
        let dup = store.write(|db| db.insert_user(user("bob", "alice@example.com")));
        assert!(matches!(dup, Err(CoreError::Conflict(m)) if m == "Email exists already"));
        assert!(store.read(|db| db.username_taken("ALICE")));
    }

    #[test]
    fn test_set_username_moves_index() {
        let store = Store::in_memory();
        let u = user("alice", "alice@example.com");
        let id = u.id;
        store.write(|db| db.insert_user(u)).unwrap();
        store
            .write(|db| db.set_username(&id, "alicia".into()))
            .unwrap();
        store.read(|db| {
            assert!(db.user_by_username("alice").is_none());
            assert_eq!(db.user_by_username("alicia").map(|u| u.id), Some(id));
        });
    }

    #[test]
    fn test_upsert_hashtag_is_idempotent() {
        let store = Store::in_memory();
        let (a, b) = store
            .write(|db| Ok((db.upsert_hashtag("rust"), db.upsert_hashtag("rust"))))
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("social.json");

        let store = Store::open(&path).await.unwrap();
        assert!(!store.flush().await.unwrap());
        store
            .write(|db| db.insert_user(user("carol", "carol@example.com")))
            .unwrap();
        assert!(store.flush().await.unwrap());

        let reopened = Store::open(&path).await.unwrap();
        assert!(reopened.read(|db| db.user_by_email("carol@example.com").is_some()));
        assert!(reopened.read(|db| db.username_taken("carol")));
    }

    #[test]
    fn test_failed_write_is_not_dirty() {
        let store = Store::in_memory();
        let res: Result<()> = store.write(|_| Err(CoreError::not_found("nope")));
        assert!(res.is_err());
        assert!(!store.inner.dirty.load(Ordering::Acquire));
    }
}
