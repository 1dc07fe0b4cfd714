use std::str::FromStr;

use tracing::debug;

use crate::error::{CoreError, Result};
use crate::model::{Id, IdListExt, Relation};
use crate::services::relation_between;
use crate::store::{Database, Store};
use crate::views::{
    paginate, posts_newest_first, ListPage, Outcome, Page, PostTile, ProfileCard, SearchHit,
    UserCard, UserDetail, PAGE_SIZE, REDIRECT_404, REDIRECT_PROFILE,
};

pub const SEARCH_LIMIT: usize = 20;
pub const MAX_SUGGESTIONS: usize = 50;

/// Public lists of another user's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserList {
    Follower,
    Following,
    TaggedPost,
    Post,
}

impl FromStr for UserList {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "follower" => Ok(Self::Follower),
            "following" => Ok(Self::Following),
            "taggedPost" => Ok(Self::TaggedPost),
            "post" => Ok(Self::Post),
            _ => Err(CoreError::validation("Invalid Parameter")),
        }
    }
}

fn target_by_username(db: &Database, username: &str) -> Result<Id> {
    db.user_id_by_username(username)
        .ok_or_else(|| CoreError::not_found("No user found with the particular username"))
}

/// Follow requests, blocking, tag approval and looking at other people.
#[derive(Clone)]
pub struct RelationService {
    store: Store,
}

impl RelationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Toggles following `username`, returning the viewer's new relation.
    pub fn follow(&self, me: Id, username: &str) -> Result<Relation> {
        self.store.write(|db| {
            let target = target_by_username(db, username)?;
            if target == me {
                return Err(CoreError::validation(
                    "You can not perform this action on yourself",
                ));
            }
            let user = db.user(&me)?;
            let other = db.user(&target)?;
            if user.is_blocked_with(&target) {
                return Err(CoreError::blocked());
            }

            let relation = if other.followers.has(&me) {
                db.user_mut(&target)?.followers.pull(&me);
                db.user_mut(&me)?.following.pull(&target);
                Relation::Follow
            } else if other.pending_followers.has(&me) {
                db.user_mut(&target)?.pending_followers.pull(&me);
                db.user_mut(&me)?.pending_following.pull(&target);
                Relation::Follow
            } else if other.pending_following.has(&me) {
                // they asked to follow me: accept
                let t = db.user_mut(&target)?;
                t.pending_following.pull(&me);
                t.following.push_unique(me);
                let u = db.user_mut(&me)?;
                u.pending_followers.pull(&target);
                u.followers.push_unique(target);
                if u.following.has(&target) {
                    Relation::Following
                } else if u.pending_following.has(&target) {
                    Relation::Requested
                } else {
                    Relation::Follow
                }
            } else if other.private {
                db.user_mut(&target)?.pending_followers.push_unique(me);
                db.user_mut(&me)?.pending_following.push_unique(target);
                Relation::Requested
            } else {
                db.user_mut(&target)?.followers.push_unique(me);
                db.user_mut(&me)?.following.push_unique(target);
                Relation::Following
            };
            debug!(user_id = %me, target = %target, relation = %relation, "Follow toggled");
            Ok(relation)
        })
    }

    /// Toggles blocking `username`. Blocking severs every follow link both ways.
    pub fn toggle_block(&self, me: Id, username: &str) -> Result<Relation> {
        self.store.write(|db| {
            let target = db
                .user_id_by_username(username)
                .ok_or_else(|| CoreError::not_found("No user found with the provided username"))?;
            if target == me {
                return Err(CoreError::validation(
                    "You cannot perform this action on yourself",
                ));
            }

            if db.user(&me)?.blocked.has(&target) {
                db.user_mut(&me)?.blocked.pull(&target);
                db.user_mut(&target)?.blocked_by.pull(&me);
                return Ok(Relation::Follow);
            }

            // make sure the target exists before touching anything
            db.user(&target)?;
            for (a, b) in [(me, target), (target, me)] {
                let user = db.user_mut(&a)?;
                user.followers.pull(&b);
                user.following.pull(&b);
                user.pending_followers.pull(&b);
                user.pending_following.pull(&b);
            }
            db.user_mut(&me)?.blocked.push_unique(target);
            db.user_mut(&target)?.blocked_by.push_unique(me);
            debug!(user_id = %me, target = %target, "User blocked");
            Ok(Relation::Unblock)
        })
    }

    pub fn approve_tag(&self, me: Id, post_id: Id) -> Result<()> {
        self.store.write(|db| {
            let user = db.user_mut(&me)?;
            if !user.pending_tagged_posts.pull(&post_id) {
                return Err(CoreError::validation("Already approved particular post"));
            }
            user.tagged_posts.push_unique(post_id);
            Ok(())
        })
    }

    /// People the user has no link with yet, in signup order.
    pub fn suggestions(&self, me: Id, limit: usize) -> Result<Vec<UserCard>> {
        let limit = limit.min(MAX_SUGGESTIONS);
        self.store.read(|db| {
            let user = db.user(&me)?;
            let mut candidates: Vec<_> = db
                .users()
                .filter(|u| {
                    u.id != me
                        && !user.following.has(&u.id)
                        && !user.blocked.has(&u.id)
                        && !user.blocked_by.has(&u.id)
                        && !user.pending_following.has(&u.id)
                        && !user.pending_followers.has(&u.id)
                })
                .collect();
            candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(candidates
                .into_iter()
                .take(limit)
                .map(|u| UserCard::new(u, None))
                .collect())
        })
    }

    /// Case-insensitive substring search over usernames.
    pub fn search(&self, viewer: Option<Id>, term: &str) -> Result<Vec<SearchHit>> {
        let needle = term.trim().to_lowercase();
        self.store.read(|db| {
            let viewer = viewer.map(|id| db.user(&id)).transpose()?;
            let mut matches: Vec<_> = db
                .users()
                .filter(|u| u.username.contains(&needle))
                .filter(|u| viewer.map_or(true, |v| !v.is_blocked_with(&u.id)))
                .collect();
            matches.sort_by(|a, b| a.username.cmp(&b.username));

            Ok(matches
                .into_iter()
                .take(SEARCH_LIMIT)
                .map(|u| match viewer {
                    Some(v) => SearchHit {
                        name: u.name.clone(),
                        username: u.username.clone(),
                        avatar: u.avatar.clone(),
                        tag: Some(u.tag_policy),
                        mention: Some(u.mention_policy),
                        relation: Some(v.id == u.id || v.followers.has(&u.id)),
                    },
                    None => SearchHit {
                        name: u.name.clone(),
                        username: u.username.clone(),
                        avatar: u.avatar.clone(),
                        tag: None,
                        mention: None,
                        relation: None,
                    },
                })
                .collect())
        })
    }

    /// Profile card of `username` as seen by `viewer`.
    pub fn user_detail(&self, viewer: Option<Id>, username: &str) -> Result<Outcome<UserDetail>> {
        self.store.read(|db| {
            let target = db
                .user_by_username(username)
                .ok_or_else(|| CoreError::not_found("No user found"))?;
            let card = ProfileCard::from(target);

            let Some(viewer) = viewer else {
                return Ok(Outcome::Ok(UserDetail {
                    user: card,
                    mutuals: None,
                    relation: None,
                }));
            };
            if viewer == target.id {
                return Ok(Outcome::fail(REDIRECT_PROFILE));
            }
            let me = db.user(&viewer)?;
            if me.is_blocked_with(&target.id) {
                return Ok(Outcome::fail(REDIRECT_404));
            }

            let mutuals = me
                .following
                .iter()
                .filter(|id| target.followers.has(id))
                .filter_map(|id| db.find_user(id))
                .map(|u| UserCard::new(u, None))
                .collect();

            let mine = if me.following.has(&target.id) {
                Some(Relation::Following)
            } else if me.pending_following.has(&target.id) {
                Some(Relation::Requested)
            } else {
                None
            };
            let theirs = if me.followers.has(&target.id) {
                Some(Relation::Follow)
            } else if me.pending_followers.has(&target.id) {
                Some(Relation::Approve)
            } else {
                None
            };

            Ok(Outcome::Ok(UserDetail {
                user: card,
                mutuals: Some(mutuals),
                relation: mine.or(theirs),
            }))
        })
    }

    /// One page of another user's followers, following or posts.
    pub fn user_data(
        &self,
        viewer: Option<Id>,
        username: &str,
        list: UserList,
        skip: usize,
    ) -> Result<ListPage> {
        self.store.read(|db| {
            let owner = db
                .user_by_username(username)
                .ok_or_else(|| CoreError::not_found("No user found"))?;
            let viewer = viewer.map(|id| db.user(&id)).transpose()?;

            if owner.private {
                let allowed = viewer
                    .is_some_and(|v| v.id == owner.id || v.following.has(&owner.id));
                if !allowed {
                    return Ok(match list {
                        UserList::Post | UserList::TaggedPost => ListPage::Posts(Page::empty()),
                        _ => ListPage::People(Page::empty()),
                    });
                }
            }

            Ok(match list {
                UserList::Post | UserList::TaggedPost => {
                    let ids = if list == UserList::Post {
                        &owner.posts
                    } else {
                        &owner.tagged_posts
                    };
                    let posts = posts_newest_first(db, ids, false);
                    let total = posts.len();
                    let detail = paginate(posts, skip, PAGE_SIZE)
                        .into_iter()
                        .map(|p| PostTile::build(db, p))
                        .collect();
                    ListPage::Posts(Page { detail, total })
                }
                UserList::Follower | UserList::Following => {
                    let ids = if list == UserList::Follower {
                        &owner.followers
                    } else {
                        &owner.following
                    };
                    let detail = paginate(ids.clone(), skip, PAGE_SIZE)
                        .into_iter()
                        .filter_map(|id| {
                            let person = db.find_user(&id)?;
                            let relation = match viewer {
                                Some(v) => relation_between(v, &id)?,
                                None => Relation::Follow,
                            };
                            Some(UserCard::new(person, Some(relation)))
                        })
                        .collect();
                    ListPage::People(Page {
                        detail,
                        total: ids.len(),
                    })
                }
            })
        })
    }
}
