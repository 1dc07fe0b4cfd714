use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::media::{MediaStore, Upload};
use crate::model::{Audience, Id, IdListExt, Relation, User, UsernameChange};
use crate::security::{hash_password, verify_password};
use crate::store::{Database, Store};
use crate::validation::{is_reserved_username, is_strong_password, normalize_email, ProfileField};
use crate::views::{
    paginate, posts_newest_first, ListPage, MyProfile, Page, PostTile, UserCard, PAGE_SIZE,
};

/// Minimum days between two username changes.
pub const USERNAME_COOLDOWN_DAYS: i64 = 25;
/// Days during which a username change can be undone.
pub const REVERT_WINDOW_DAYS: i64 = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileChange {
    pub change: String,
    pub value: String,
}

/// `[change, value]` pair as posted by clients.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityChange(pub String, pub serde_json::Value);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub pass: String,
    pub new_pass: String,
    pub confirm_new_pass: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted,
    /// The old username now belongs to someone else.
    Taken(String),
    /// The revert window has passed.
    Expired,
    NothingToRevert,
}

/// Lists a user can page through on their own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailList {
    Like,
    Saved,
    Follower,
    Following,
    Blocked,
    PendingFollower,
    ArchivePost,
    TaggedPost,
    PendingTaggedPost,
    Post,
}

impl FromStr for DetailList {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "like" => Self::Like,
            "saved" => Self::Saved,
            "follower" => Self::Follower,
            "following" => Self::Following,
            "blocked" => Self::Blocked,
            "pendingFollower" => Self::PendingFollower,
            "archivePost" => Self::ArchivePost,
            "taggedPost" => Self::TaggedPost,
            "pendingTaggedPost" => Self::PendingTaggedPost,
            "post" => Self::Post,
            _ => return Err(CoreError::validation("Invalid parameter")),
        })
    }
}

fn username_change_allowed(user: &User, now: DateTime<Utc>) -> bool {
    match user.last_username_changed {
        None => true,
        Some(at) => now - at > Duration::days(USERNAME_COOLDOWN_DAYS),
    }
}

fn revertable_username(user: &User, now: DateTime<Utc>) -> Option<&UsernameChange> {
    user.previous_username
        .as_ref()
        .filter(|prev| now - prev.changed_at < Duration::days(REVERT_WINDOW_DAYS))
}

/// Moves every pending follow request into the follower list.
fn approve_pending_followers(db: &mut Database, user_id: &Id) -> Result<usize> {
    let pending = std::mem::take(&mut db.user_mut(user_id)?.pending_followers);
    for requester in &pending {
        if let Ok(other) = db.user_mut(requester) {
            other.pending_following.pull(user_id);
            other.following.push_unique(*user_id);
        }
        db.user_mut(user_id)?.followers.push_unique(*requester);
    }
    Ok(pending.len())
}

/// Own profile: field edits, privacy settings, password, avatar and own lists.
#[derive(Clone)]
pub struct ProfileService {
    store: Store,
    media: Arc<dyn MediaStore>,
}

impl ProfileService {
    pub fn new(store: Store, media: Arc<dyn MediaStore>) -> Self {
        Self { store, media }
    }

    pub fn update_profile(&self, user_id: Id, updates: Vec<ProfileChange>) -> Result<()> {
        let now = Utc::now();
        self.store.write(|db| {
            let user = db.user(&user_id)?;
            let mut accepted = Vec::with_capacity(updates.len());

            for update in updates {
                let field = ProfileField::parse(&update.change).ok_or_else(|| {
                    CoreError::validation(format!("Invalid Parameter {}", update.change))
                })?;
                let value = match field {
                    ProfileField::Email => normalize_email(&update.value),
                    ProfileField::Username => update.value.trim().to_lowercase(),
                    _ => update.value.trim().to_string(),
                };
                if !field.accepts(&value) {
                    return Err(CoreError::validation(format!(
                        "Invalid Value for the {}",
                        field.as_str()
                    )));
                }

                if field.is_unique() {
                    let (current, taken) = match field {
                        ProfileField::Username => (&user.username, db.username_taken(&value)),
                        _ => (&user.email, db.email_taken(&value)),
                    };
                    if *current != value {
                        if field == ProfileField::Username && is_reserved_username(&value) {
                            return Err(CoreError::validation("This username is not allowed"));
                        }
                        if taken {
                            return Err(CoreError::Conflict(format!(
                                "{} is already taken for {}",
                                value,
                                field.as_str()
                            )));
                        }
                    }
                }
                accepted.push((field, value));
            }

            let renames = accepted
                .iter()
                .any(|(f, v)| *f == ProfileField::Username && *v != user.username);
            if renames && !username_change_allowed(user, now) {
                return Err(CoreError::validation(
                    "Could not change username as you can change it once within 25 days.",
                ));
            }
            let old_username = user.username.clone();

            for (field, value) in accepted {
                match field {
                    ProfileField::Username => {
                        if value != db.user(&user_id)?.username {
                            db.set_username(&user_id, value)?;
                        }
                    }
                    ProfileField::Email => db.set_email(&user_id, value)?,
                    ProfileField::Name => db.user_mut(&user_id)?.name = value,
                    ProfileField::Website => {
                        db.user_mut(&user_id)?.website = Some(value).filter(|v| !v.is_empty())
                    }
                    ProfileField::Bio => {
                        db.user_mut(&user_id)?.bio = Some(value).filter(|v| !v.is_empty())
                    }
                }
            }

            if renames {
                let user = db.user_mut(&user_id)?;
                user.previous_username = Some(UsernameChange {
                    username: old_username,
                    changed_at: now,
                });
                user.last_username_changed = Some(now);
                info!(user_id = %user_id, username = %user.username, "Username changed");
            }
            Ok(())
        })
    }

    pub fn update_security(&self, user_id: Id, SecurityChange(change, value): SecurityChange) -> Result<()> {
        enum Setting {
            Private(bool),
            ManualTagApproval(bool),
            Tag(Audience),
            Mention(Audience),
        }

        let audience = |v: &serde_json::Value| {
            v.as_str()
                .and_then(|s| Audience::from_str(s).ok())
                .ok_or_else(|| CoreError::validation(format!("Invalid Value for the {change}")))
        };
        let flag = |v: &serde_json::Value| {
            v.as_bool()
                .ok_or_else(|| CoreError::validation(format!("Invalid Value for the {change}")))
        };
        let setting = match change.as_str() {
            "private" => Setting::Private(flag(&value)?),
            "manuallyApproveTag" => Setting::ManualTagApproval(flag(&value)?),
            "tag" => Setting::Tag(audience(&value)?),
            "mention" => Setting::Mention(audience(&value)?),
            other => return Err(CoreError::validation(format!("Invalid Parameter {other}"))),
        };

        self.store.write(|db| {
            match setting {
                Setting::Private(private) => {
                    db.user_mut(&user_id)?.private = private;
                    if !private {
                        let approved = approve_pending_followers(db, &user_id)?;
                        if approved > 0 {
                            info!(user_id = %user_id, approved, "Approved pending followers on going public");
                        }
                    }
                }
                Setting::ManualTagApproval(manual) => {
                    let user = db.user_mut(&user_id)?;
                    user.manually_approve_tag = manual;
                    if !manual {
                        let pending = std::mem::take(&mut user.pending_tagged_posts);
                        for post in pending {
                            user.tagged_posts.push_unique(post);
                        }
                    }
                }
                Setting::Tag(a) => db.user_mut(&user_id)?.tag_policy = a,
                Setting::Mention(a) => db.user_mut(&user_id)?.mention_policy = a,
            }
            Ok(())
        })
    }

    pub fn update_password(&self, user_id: Id, req: PasswordChange) -> Result<()> {
        if ![&req.pass, &req.new_pass, &req.confirm_new_pass]
            .iter()
            .all(|p| is_strong_password(p))
        {
            return Err(CoreError::invalid_input());
        }
        if req.new_pass != req.confirm_new_pass {
            return Err(CoreError::validation("Passwords do not match"));
        }

        let current = self
            .store
            .read(|db| db.user(&user_id).map(|u| u.password_hash.clone()))?;
        if !verify_password(&req.pass, &current)? {
            return Err(CoreError::Forbidden("Password Incorrect".into()));
        }

        let hash = hash_password(&req.new_pass)?;
        self.store.write(|db| {
            db.user_mut(&user_id)?.password_hash = hash;
            Ok(())
        })?;
        info!(user_id = %user_id, "Password updated");
        Ok(())
    }

    pub async fn upload_avatar(&self, user_id: Id, upload: Upload) -> Result<String> {
        self.store.read(|db| db.user(&user_id).map(|_| ()))?;
        let url = self.media.store(upload).await?;

        let previous = self.store.write(|db| {
            let user = db.user_mut(&user_id)?;
            Ok(user.avatar.replace(url.clone()))
        });
        let previous = match previous {
            Ok(p) => p,
            Err(e) => {
                // user vanished between the check and the write
                if let Err(cleanup) = self.media.remove(&url).await {
                    warn!(url = %url, error = %cleanup, "Could not remove orphaned avatar");
                }
                return Err(e);
            }
        };
        if let Some(old) = previous {
            if let Err(e) = self.media.remove(&old).await {
                warn!(user_id = %user_id, error = %e, "Could not remove previous avatar");
            }
        }
        Ok(url)
    }

    pub async fn delete_avatar(&self, user_id: Id) -> Result<()> {
        let old = self.store.write(|db| {
            db.user_mut(&user_id)?
                .avatar
                .take()
                .ok_or_else(|| CoreError::validation("Avatar Already Deleted"))
        })?;
        self.media.remove(&old).await
    }

    pub fn revert_username(&self, user_id: Id) -> Result<RevertOutcome> {
        let now = Utc::now();
        self.store.write(|db| {
            let user = db.user(&user_id)?;
            let Some(prev) = user.previous_username.clone() else {
                return Ok(RevertOutcome::NothingToRevert);
            };
            if revertable_username(user, now).is_none() {
                return Ok(RevertOutcome::Expired);
            }
            if db
                .user_id_by_username(&prev.username)
                .is_some_and(|owner| owner != user_id)
            {
                return Ok(RevertOutcome::Taken(format!(
                    "Could not update username as somebody is already using your previous username({})",
                    prev.username
                )));
            }
            db.set_username(&user_id, prev.username.clone())?;
            let user = db.user_mut(&user_id)?;
            user.previous_username = None;
            user.last_username_changed = None;
            info!(user_id = %user_id, username = %prev.username, "Username reverted");
            Ok(RevertOutcome::Reverted)
        })
    }

    pub fn me(&self, user_id: Id) -> Result<MyProfile> {
        let now = Utc::now();
        self.store.read(|db| {
            let user = db.user(&user_id)?;
            let allowed = username_change_allowed(user, now);
            let last_username = if allowed {
                None
            } else {
                revertable_username(user, now).map(|p| p.username.clone())
            };
            Ok(MyProfile {
                name: user.name.clone(),
                email: user.email.clone(),
                username: user.username.clone(),
                avatar: user.avatar.clone(),
                website: user.website.clone(),
                bio: user.bio.clone(),
                private: user.private,
                manually_approve_tag: user.manually_approve_tag,
                tag: user.tag_policy,
                mention: user.mention_policy,
                follower: user.followers.len(),
                following: user.following.len(),
                is_username_change_allowed: allowed,
                last_username,
                like_count: user.liked.len(),
                saved_count: user.saved.len(),
                blocked_count: user.blocked.len(),
                pending_follower_count: user.pending_followers.len(),
                archive_post_count: user.archived_posts.len(),
                tagged_post_count: user.tagged_posts.len(),
                pending_tagged_post_count: user.pending_tagged_posts.len(),
                post_count: user.posts.len(),
            })
        })
    }

    pub fn details(&self, user_id: Id, list: DetailList, skip: usize) -> Result<ListPage> {
        self.store.read(|db| {
            let user = db.user(&user_id)?;
            let posts = |ids: &[Id], archived: bool| {
                let posts = posts_newest_first(db, ids, archived);
                let total = posts.len();
                let detail = paginate(posts, skip, PAGE_SIZE)
                    .into_iter()
                    .map(|p| PostTile::build(db, p))
                    .collect();
                ListPage::Posts(Page { detail, total })
            };
            let people = |ids: &[Id], relation: &dyn Fn(&Id) -> Relation| {
                let detail = paginate(ids.to_vec(), skip, PAGE_SIZE)
                    .into_iter()
                    .filter_map(|id| db.find_user(&id).map(|u| UserCard::new(u, Some(relation(&id)))))
                    .collect();
                ListPage::People(Page {
                    detail,
                    total: ids.len(),
                })
            };

            Ok(match list {
                DetailList::Like => posts(&user.liked, false),
                DetailList::Saved => posts(&user.saved, false),
                DetailList::Post => posts(&user.posts, false),
                DetailList::TaggedPost => posts(&user.tagged_posts, false),
                DetailList::PendingTaggedPost => posts(&user.pending_tagged_posts, false),
                DetailList::ArchivePost => posts(&user.archived_posts, true),
                DetailList::Following => people(&user.following, &|_: &Id| Relation::Following),
                DetailList::Blocked => people(&user.blocked, &|_: &Id| Relation::Unblock),
                DetailList::PendingFollower => people(&user.pending_followers, &|_: &Id| Relation::Approve),
                DetailList::Follower => people(&user.followers, &|id: &Id| {
                    if user.following.has(id) {
                        Relation::Following
                    } else if user.pending_following.has(id) {
                        Relation::Requested
                    } else {
                        Relation::Follow
                    }
                }),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::LocalMediaStore;
    use crate::services::testing::signup;
    use bytes::Bytes;

    fn service(store: &Store, dir: &std::path::Path) -> ProfileService {
        let media = LocalMediaStore::new(&MediaConfig {
            upload_dir: dir.to_path_buf(),
            ..MediaConfig::default()
        });
        ProfileService::new(store.clone(), Arc::new(media))
    }

    fn change(change: &str, value: &str) -> ProfileChange {
        ProfileChange {
            change: change.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_update_profile_fields() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");

        svc.update_profile(
            id,
            vec![
                change("name", "Alice Liddell"),
                change("bio", ""),
                change("website", "https://alice.dev"),
                change("username", "Alice_W"),
            ],
        )
        .unwrap();

        store.read(|db| {
            let u = db.user(&id).unwrap();
            assert_eq!(u.name, "Alice Liddell");
            assert_eq!(u.username, "alice_w");
            assert_eq!(u.website.as_deref(), Some("https://alice.dev"));
            assert!(u.bio.is_none());
            assert_eq!(u.previous_username.as_ref().unwrap().username, "alice");
            assert!(u.last_username_changed.is_some());
        });
    }

    #[test]
    fn test_update_profile_rejections() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");
        signup(&store, "bob");

        let err = svc.update_profile(id, vec![change("avatar", "x")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Parameter avatar");
        let err = svc.update_profile(id, vec![change("username", "bob")]).unwrap_err();
        assert_eq!(err.to_string(), "bob is already taken for username");
        let err = svc.update_profile(id, vec![change("website", "nope nope")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Value for the website");
        let err = svc.update_profile(id, vec![change("username", "post")]).unwrap_err();
        assert_eq!(err.to_string(), "This username is not allowed");

        // a rejected batch applies nothing
        let _ = svc.update_profile(id, vec![change("name", "Changed Name"), change("email", "bad")]);
        assert_eq!(store.read(|db| db.user(&id).unwrap().name.clone()), "Test User");
    }

    #[test]
    fn test_username_cooldown_and_revert() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");

        assert_eq!(svc.revert_username(id).unwrap(), RevertOutcome::NothingToRevert);
        svc.update_profile(id, vec![change("username", "alice2")]).unwrap();
        let me = svc.me(id).unwrap();
        assert!(!me.is_username_change_allowed);
        assert_eq!(me.last_username.as_deref(), Some("alice"));

        let err = svc.update_profile(id, vec![change("username", "alice3")]).unwrap_err();
        assert!(err.to_string().contains("25 days"));
        // resubmitting the current username is not a change
        svc.update_profile(id, vec![change("username", "alice2")]).unwrap();

        assert_eq!(svc.revert_username(id).unwrap(), RevertOutcome::Reverted);
        assert!(store.read(|db| db.username_taken("alice")));
        assert!(svc.me(id).unwrap().is_username_change_allowed);
    }

    #[test]
    fn test_revert_blocked_by_new_owner() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");
        svc.update_profile(id, vec![change("username", "alice2")]).unwrap();
        signup(&store, "alice");
        assert!(matches!(svc.revert_username(id).unwrap(), RevertOutcome::Taken(_)));
    }

    #[test]
    fn test_going_public_approves_requests() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let owner = signup(&store, "owner");
        let fan = signup(&store, "fan");

        svc.update_security(owner, SecurityChange("private".into(), serde_json::json!(true)))
            .unwrap();
        store
            .write(|db| {
                db.user_mut(&owner)?.pending_followers.push(fan);
                db.user_mut(&fan)?.pending_following.push(owner);
                Ok(())
            })
            .unwrap();
        svc.update_security(owner, SecurityChange("private".into(), serde_json::json!(false)))
            .unwrap();

        store.read(|db| {
            let o = db.user(&owner).unwrap();
            let f = db.user(&fan).unwrap();
            assert!(!o.private);
            assert!(o.followers.contains(&fan) && o.pending_followers.is_empty());
            assert!(f.following.contains(&owner) && f.pending_following.is_empty());
        });
    }

    #[test]
    fn test_disabling_manual_tag_approval_accepts_pending_tags() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");
        let (pending, already) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());

        svc.update_security(id, SecurityChange("manuallyApproveTag".into(), serde_json::json!(true)))
            .unwrap();
        store
            .write(|db| {
                let user = db.user_mut(&id)?;
                user.tagged_posts.push(already);
                user.pending_tagged_posts.push(pending);
                user.pending_tagged_posts.push(already);
                Ok(())
            })
            .unwrap();
        svc.update_security(id, SecurityChange("manuallyApproveTag".into(), serde_json::json!(false)))
            .unwrap();

        store.read(|db| {
            let user = db.user(&id).unwrap();
            assert!(!user.manually_approve_tag);
            assert!(user.pending_tagged_posts.is_empty());
            assert_eq!(user.tagged_posts, vec![already, pending]);
        });
    }

    #[test]
    fn test_security_rejects_bad_values() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");
        assert!(svc
            .update_security(id, SecurityChange("tag".into(), serde_json::json!("friends")))
            .is_err());
        assert!(svc
            .update_security(id, SecurityChange("private".into(), serde_json::json!("yes")))
            .is_err());
        svc.update_security(id, SecurityChange("mention".into(), serde_json::json!("none")))
            .unwrap();
        assert_eq!(svc.me(id).unwrap().mention, Audience::None);
    }

    #[test]
    fn test_update_password() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");
        let req = |pass: &str, new: &str, confirm: &str| PasswordChange {
            pass: pass.into(),
            new_pass: new.into(),
            confirm_new_pass: confirm.into(),
        };

        assert!(matches!(
            svc.update_password(id, req("Secret123", "Newpass1", "Newpass2")),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            svc.update_password(id, req("Wrong1234", "Newpass1", "Newpass1")),
            Err(CoreError::Forbidden(_))
        ));
        svc.update_password(id, req("Secret123", "Newpass1", "Newpass1")).unwrap();
        let hash = store.read(|db| db.user(&id).unwrap().password_hash.clone());
        assert!(verify_password("Newpass1", &hash).unwrap());
    }

    #[tokio::test]
    async fn test_avatar_lifecycle() {
        let store = Store::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&store, dir.path());
        let id = signup(&store, "alice");

        let upload = Upload {
            file_name: "me.png".into(),
            content_type: "image/png".into(),
            data: Bytes::from_static(b"png-bytes"),
        };
        let url = svc.upload_avatar(id, upload).await.unwrap();
        assert!(url.starts_with("/uploads/images/"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        svc.delete_avatar(id).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        let err = svc.delete_avatar(id).await.unwrap_err();
        assert_eq!(err.to_string(), "Avatar Already Deleted");
    }

    #[test]
    fn test_detail_list_parsing() {
        assert_eq!("pendingFollower".parse::<DetailList>().unwrap(), DetailList::PendingFollower);
        assert!("friends".parse::<DetailList>().is_err());
    }
}
