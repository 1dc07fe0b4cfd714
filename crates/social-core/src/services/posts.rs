use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::media::{MediaStore, Upload};
use crate::model::{Audience, Id, IdListExt, Post, Relation};
use crate::store::{Database, Store};
use crate::views::{
    paginate, CommentPreview, CommentView, Feed, FeedPost, Outcome, Page, PostCta, PostDetailView,
    PostDetails, PostTile, PAGE_SIZE, REDIRECT_404,
};

/// Fields of a new post besides its media.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub caption: Option<String>,
    pub allow_comment: bool,
    pub styles: serde_json::Value,
    /// Usernames to tag.
    pub tags: Vec<String>,
    pub hashtags: Vec<String>,
}

/// Trims, drops a leading `#`, lowercases and de-duplicates hashtag names.
pub fn normalize_hashtags(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|t| t.trim().trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn ensure_interactable(db: &Database, me: &Id, post: &Post) -> Result<()> {
    if post.is_archived {
        return Err(CoreError::validation("Post is archived"));
    }
    if db.user(me)?.is_blocked_with(&post.creator) {
        return Err(CoreError::blocked());
    }
    Ok(())
}

fn ensure_creator(post: &Post, me: &Id) -> Result<()> {
    if post.creator != *me {
        return Err(CoreError::unauthorized("Not authorized"));
    }
    Ok(())
}

/// Applies the tagged user's tag policy. Returns whether the tag was placed.
fn apply_tag(db: &mut Database, creator: Id, tagged: Id, post_id: Id) -> Result<bool> {
    let user = db.user(&tagged)?;
    if tagged == creator {
        db.user_mut(&tagged)?.tagged_posts.push_unique(post_id);
        return Ok(true);
    }
    let allowed = !user.is_blocked_with(&creator)
        && match user.tag_policy {
            Audience::Everyone => true,
            Audience::Follow => user.following.has(&creator),
            Audience::None => false,
        };
    if !allowed {
        return Ok(false);
    }
    let user = db.user_mut(&tagged)?;
    if user.manually_approve_tag {
        user.pending_tagged_posts.push_unique(post_id);
    } else {
        user.tagged_posts.push_unique(post_id);
    }
    Ok(true)
}

#[derive(Clone)]
pub struct PostService {
    store: Store,
    media: Arc<dyn MediaStore>,
}

impl PostService {
    pub fn new(store: Store, media: Arc<dyn MediaStore>) -> Self {
        Self { store, media }
    }

    pub async fn create(&self, creator: Id, upload: Upload, new: NewPost) -> Result<Id> {
        self.store.read(|db| db.user(&creator).map(|_| ()))?;
        let media = self.media.store(upload).await?;
        let hashtags = normalize_hashtags(&new.hashtags);

        let created = self.store.write(|db| {
            db.user(&creator)?;
            let id = Uuid::new_v4();
            let mut post = Post {
                id,
                media: media.clone(),
                caption: new.caption.filter(|c| !c.trim().is_empty()),
                allow_comment: new.allow_comment,
                creator,
                styles: new.styles,
                is_archived: false,
                created_at: Utc::now(),
                tagged: Vec::new(),
                likes: Vec::new(),
                comments: Vec::new(),
                hashtags: Vec::new(),
            };

            for name in &hashtags {
                let tag_id = db.upsert_hashtag(name);
                if let Some(tag) = db.hashtag_mut(&tag_id) {
                    tag.posts.push_unique(id);
                }
                post.hashtags.push_unique(tag_id);
            }

            for username in &new.tags {
                let Some(tagged) = db.user_id_by_username(username.trim()) else {
                    continue;
                };
                if apply_tag(db, creator, tagged, id)? {
                    post.tagged.push_unique(tagged);
                }
            }

            db.user_mut(&creator)?.posts.push_unique(id);
            db.posts.insert(id, post);
            Ok(id)
        });

        match created {
            Ok(id) => {
                info!(user_id = %creator, post_id = %id, "Post created");
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self.media.remove(&media).await {
                    warn!(url = %media, error = %cleanup, "Could not remove media of failed post");
                }
                Err(e)
            }
        }
    }

    /// Returns true when the post is now liked.
    pub fn toggle_like(&self, me: Id, post_id: Id) -> Result<bool> {
        self.store.write(|db| {
            let post = db.post(&post_id)?;
            ensure_interactable(db, &me, post)?;
            let liked = if post.likes.has(&me) {
                db.post_mut(&post_id)?.likes.pull(&me);
                db.user_mut(&me)?.liked.pull(&post_id);
                false
            } else {
                db.post_mut(&post_id)?.likes.push_unique(me);
                db.user_mut(&me)?.liked.push_unique(post_id);
                true
            };
            Ok(liked)
        })
    }

    /// Returns true when the post is now saved.
    pub fn toggle_saved(&self, me: Id, post_id: Id) -> Result<bool> {
        self.store.write(|db| {
            let post = db.post(&post_id)?;
            if post.is_archived {
                return Err(CoreError::validation("Post is archived"));
            }
            if db.user(&me)?.saved.has(&post_id) {
                db.user_mut(&me)?.saved.pull(&post_id);
                return Ok(false);
            }
            ensure_interactable(db, &me, post)?;
            db.user_mut(&me)?.saved.push_unique(post_id);
            Ok(true)
        })
    }

    /// Returns true when the post is now archived.
    pub fn toggle_archive(&self, me: Id, post_id: Id) -> Result<bool> {
        self.store.write(|db| {
            ensure_creator(db.post(&post_id)?, &me)?;
            let post = db.post_mut(&post_id)?;
            post.is_archived = !post.is_archived;
            let archived = post.is_archived;
            let user = db.user_mut(&me)?;
            if archived {
                user.archived_posts.push_unique(post_id);
            } else {
                user.archived_posts.pull(&post_id);
            }
            Ok(archived)
        })
    }

    /// Removes `username`'s tag from the post (the caller's own tag by default).
    pub fn remove_tag(&self, me: Id, post_id: Id, username: Option<&str>) -> Result<()> {
        self.store.write(|db| {
            let target = match username {
                Some(name) => db
                    .user_id_by_username(name)
                    .ok_or_else(|| CoreError::not_found("No user found"))?,
                None => me,
            };
            let post = db.post(&post_id)?;
            if post.creator != me && target != me {
                return Err(CoreError::unauthorized("Not authorized to remove tag"));
            }
            if !post.tagged.has(&target) {
                return Err(CoreError::validation("User is not tagged"));
            }
            let user = db.user(&target)?;
            if !user.tagged_posts.has(&post_id) && !user.pending_tagged_posts.has(&post_id) {
                return Err(CoreError::validation("User is not tagged"));
            }

            let user = db.user_mut(&target)?;
            if !user.tagged_posts.pull(&post_id) {
                user.pending_tagged_posts.pull(&post_id);
            }
            db.post_mut(&post_id)?.tagged.pull(&target);
            Ok(())
        })
    }

    /// Returns the new comment setting.
    pub fn toggle_allow_comment(&self, me: Id, post_id: Id) -> Result<bool> {
        self.store.write(|db| {
            ensure_creator(db.post(&post_id)?, &me)?;
            let post = db.post_mut(&post_id)?;
            post.allow_comment = !post.allow_comment;
            Ok(post.allow_comment)
        })
    }

    /// Posts by the user and everyone they follow, newest first.
    pub fn feed(&self, me: Id, skip: usize) -> Result<Feed> {
        self.store.read(|db| {
            let user = db.user(&me)?;
            let mut posts: Vec<&Post> = std::iter::once(user)
                .chain(user.following.iter().filter_map(|id| db.find_user(id)))
                .flat_map(|u| u.posts.iter())
                .filter_map(|id| db.posts.get(id))
                .filter(|p| !p.is_archived)
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = posts.len();

            let posts = paginate(posts, skip, PAGE_SIZE)
                .into_iter()
                .filter_map(|post| {
                    let creator = db.find_user(&post.creator)?;
                    let start = post.comments.len().saturating_sub(2);
                    let comment = post.comments[start..]
                        .iter()
                        .filter_map(|id| db.comments.get(id))
                        .filter_map(|c| {
                            let author = db.find_user(&c.creator)?;
                            Some(CommentPreview {
                                id: c.id,
                                username: author.username.clone(),
                                avatar: author.avatar.clone(),
                                text: c.text.clone(),
                                is_liked: c.likes.has(&me),
                            })
                        })
                        .collect();
                    Some(FeedPost {
                        id: post.id,
                        media: post.media.clone(),
                        caption: post.caption.clone(),
                        allow_comment: post.allow_comment,
                        styles: post.styles.clone(),
                        date: post.created_at,
                        like_count: post.likes.len(),
                        creator_username: creator.username.clone(),
                        avatar: creator.avatar.clone(),
                        comment_count: db.comment_count(post),
                        comment,
                        is_saved: user.saved.has(&post.id),
                        is_liked: user.liked.has(&post.id),
                    })
                })
                .collect();
            Ok(Feed { posts, total })
        })
    }

    /// Public posts from people with no block between them and the viewer.
    pub fn explore(&self, me: Id, skip: usize) -> Result<Page<PostTile>> {
        self.store.read(|db| {
            let user = db.user(&me)?;
            let mut posts: Vec<&Post> = db
                .posts
                .values()
                .filter(|p| !p.is_archived)
                .filter(|p| {
                    db.find_user(&p.creator)
                        .is_some_and(|c| !c.private && !user.is_blocked_with(&c.id))
                })
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = posts.len();
            let detail = paginate(posts, skip, PAGE_SIZE)
                .into_iter()
                .map(|p| PostTile::build(db, p))
                .collect();
            Ok(Page { detail, total })
        })
    }

    pub fn detail(&self, viewer: Option<Id>, post_id: Id) -> Result<Outcome<PostDetailView>> {
        self.store.read(|db| {
            let post = db
                .posts
                .get(&post_id)
                .ok_or_else(|| CoreError::not_found("Post Not Found"))?;
            let creator = db.user(&post.creator)?;
            let viewer = viewer.map(|id| db.user(&id)).transpose()?;

            let cta = viewer.map(|v| {
                let pending = v.pending_tagged_posts.has(&post.id);
                PostCta {
                    is_saved: v.saved.has(&post.id),
                    is_liked: v.liked.has(&post.id),
                    is_in_pending_tagged: pending,
                    is_in_tagged_list: !pending && v.tagged_posts.has(&post.id),
                }
            });
            let viewer_id = viewer.map(|v| &v.id);
            let post_details = PostDetails {
                media: post.media.clone(),
                caption: post.caption.clone(),
                allow_comment: post.allow_comment,
                styles: post.styles.clone(),
                is_archived: post.is_archived,
                date: post.created_at,
                tag: post
                    .tagged
                    .iter()
                    .filter_map(|id| db.find_user(id))
                    .map(|u| u.username.clone())
                    .collect(),
                like_count: post.likes.len(),
                creator_username: creator.username.clone(),
                avatar: creator.avatar.clone(),
                comment: post
                    .comments
                    .iter()
                    .take(PAGE_SIZE)
                    .filter_map(|id| db.comments.get(id))
                    .filter_map(|c| CommentView::of_comment(db, c, viewer_id))
                    .collect(),
                total_comments: post.comments.len(),
                cta,
            };

            if viewer.is_some_and(|v| v.id == creator.id) {
                return Ok(Outcome::Ok(PostDetailView {
                    post_details,
                    relation: Relation::Creator,
                    private: None,
                }));
            }
            if post.is_archived {
                return Ok(Outcome::fail(REDIRECT_404));
            }

            let Some(v) = viewer else {
                if creator.private {
                    return Ok(Outcome::fail(REDIRECT_404));
                }
                return Ok(Outcome::Ok(PostDetailView {
                    post_details,
                    relation: Relation::Follow,
                    private: Some(false),
                }));
            };

            if v.is_blocked_with(&creator.id) {
                return Ok(Outcome::fail(REDIRECT_404));
            }
            let following = v.following.has(&creator.id);
            if creator.private && !following {
                return Ok(Outcome::fail(REDIRECT_404));
            }
            let relation = if following {
                Relation::Following
            } else if v.pending_followers.has(&creator.id) {
                Relation::Approve
            } else {
                Relation::Follow
            };
            Ok(Outcome::Ok(PostDetailView {
                post_details,
                relation,
                private: Some(creator.private),
            }))
        })
    }

    /// Deletes the post with its comments and every reference to it.
    pub async fn delete(&self, me: Id, post_id: Id) -> Result<()> {
        let media = self.store.write(|db| {
            ensure_creator(db.post(&post_id)?, &me)?;
            let Some(post) = db.posts.remove(&post_id) else {
                return Err(CoreError::not_found("Post not found"));
            };

            for tag_id in &post.hashtags {
                if let Some(tag) = db.hashtag_mut(tag_id) {
                    tag.posts.pull(&post_id);
                }
            }
            for user in db.users_mut() {
                user.posts.pull(&post_id);
                user.liked.pull(&post_id);
                user.saved.pull(&post_id);
                user.archived_posts.pull(&post_id);
                user.tagged_posts.pull(&post_id);
                user.pending_tagged_posts.pull(&post_id);
            }
            for comment_id in &post.comments {
                if let Some(comment) = db.comments.remove(comment_id) {
                    for reply_id in &comment.replies {
                        db.replies.remove(reply_id);
                    }
                }
            }
            Ok(post.media)
        })?;

        if let Err(e) = self.media.remove(&media).await {
            warn!(post_id = %post_id, error = %e, "Could not remove post media");
        }
        info!(user_id = %me, post_id = %post_id, "Post deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::LocalMediaStore;
    use crate::model::Comment;
    use crate::services::testing::signup;
    use bytes::Bytes;
    use serde_json::json;

    struct Fixture {
        store: Store,
        svc: PostService,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::in_memory();
        let media = LocalMediaStore::new(&MediaConfig {
            upload_dir: dir.path().to_path_buf(),
            ..MediaConfig::default()
        });
        Fixture {
            svc: PostService::new(store.clone(), Arc::new(media)),
            store,
            dir,
        }
    }

    fn image() -> Upload {
        Upload {
            file_name: "photo.jpg".into(),
            content_type: "image/jpeg".into(),
            data: Bytes::from_static(b"jpeg"),
        }
    }

    fn plain() -> NewPost {
        NewPost {
            allow_comment: true,
            styles: json!({}),
            ..NewPost::default()
        }
    }

    fn update(store: &Store, f: impl FnOnce(&mut Database) -> Result<()>) {
        store.write(f).unwrap();
    }

    #[test]
    fn test_normalize_hashtags() {
        let raw = vec!["#Rust".to_string(), "rust".into(), " ".into(), "Axum ".into()];
        assert_eq!(normalize_hashtags(&raw), vec!["rust", "axum"]);
    }

    #[tokio::test]
    async fn test_create_with_tags_and_hashtags() {
        let f = fixture();
        let me = signup(&f.store, "creator");
        let open = signup(&f.store, "open");
        let picky = signup(&f.store, "picky");
        let closed = signup(&f.store, "closed");
        let manual = signup(&f.store, "manual");
        update(&f.store, |db| {
            db.user_mut(&picky)?.tag_policy = Audience::Follow;
            db.user_mut(&closed)?.tag_policy = Audience::None;
            db.user_mut(&manual)?.manually_approve_tag = true;
            Ok(())
        });

        let id = f
            .svc
            .create(
                me,
                image(),
                NewPost {
                    caption: Some("hello".into()),
                    tags: vec![
                        "creator".into(),
                        "open".into(),
                        "picky".into(),
                        "closed".into(),
                        "manual".into(),
                        "ghost".into(),
                    ],
                    hashtags: vec!["#sun".into(), "Sun".into()],
                    ..plain()
                },
            )
            .await
            .unwrap();

        f.store.read(|db| {
            let post = db.post(&id).unwrap();
            assert_eq!(post.tagged, vec![me, open, manual]);
            assert_eq!(post.hashtags.len(), 1);
            assert!(db.user(&me).unwrap().posts.contains(&id));
            assert!(db.user(&me).unwrap().tagged_posts.contains(&id));
            assert!(db.user(&open).unwrap().tagged_posts.contains(&id));
            assert!(db.user(&picky).unwrap().tagged_posts.is_empty());
            assert!(db.user(&manual).unwrap().pending_tagged_posts.contains(&id));
            assert_eq!(db.hashtag_by_name("sun").unwrap().posts, vec![id]);
        });
    }

    #[tokio::test]
    async fn test_like_and_save_rules() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let id = f.svc.create(a, image(), plain()).await.unwrap();

        assert!(f.svc.toggle_like(b, id).unwrap());
        assert!(f.svc.toggle_saved(b, id).unwrap());
        f.store.read(|db| {
            assert!(db.post(&id).unwrap().likes.contains(&b));
            assert!(db.user(&b).unwrap().liked.contains(&id));
        });
        assert!(!f.svc.toggle_like(b, id).unwrap());

        update(&f.store, |db| {
            db.user_mut(&a)?.blocked.push(b);
            db.user_mut(&b)?.blocked_by.push(a);
            Ok(())
        });
        assert!(matches!(f.svc.toggle_like(b, id), Err(CoreError::Blocked(_))));
        // unsaving stays possible
        assert!(!f.svc.toggle_saved(b, id).unwrap());
        assert!(matches!(f.svc.toggle_saved(b, id), Err(CoreError::Blocked(_))));

        assert!(f.svc.toggle_archive(a, id).unwrap());
        assert!(matches!(f.svc.toggle_like(a, id), Err(CoreError::Validation(_))));
        assert!(matches!(f.svc.toggle_archive(b, id), Err(CoreError::Unauthorized(_))));
        assert!(matches!(
            f.svc.toggle_like(a, Uuid::new_v4()),
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_tag() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let c = signup(&f.store, "carol");
        let id = f
            .svc
            .create(a, image(), NewPost { tags: vec!["bob".into(), "carol".into()], ..plain() })
            .await
            .unwrap();

        assert!(matches!(
            f.svc.remove_tag(b, id, Some("carol")),
            Err(CoreError::Unauthorized(_))
        ));
        f.svc.remove_tag(b, id, None).unwrap();
        f.svc.remove_tag(a, id, Some("carol")).unwrap();
        f.store.read(|db| {
            assert!(db.post(&id).unwrap().tagged.is_empty());
            assert!(db.user(&b).unwrap().tagged_posts.is_empty());
            assert!(db.user(&c).unwrap().tagged_posts.is_empty());
        });
        assert!(matches!(f.svc.remove_tag(b, id, None), Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_feed_and_explore() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let c = signup(&f.store, "carol");
        update(&f.store, |db| {
            db.user_mut(&a)?.following.push(b);
            db.user_mut(&b)?.followers.push(a);
            db.user_mut(&c)?.private = true;
            Ok(())
        });
        let pa = f.svc.create(a, image(), plain()).await.unwrap();
        let pb = f.svc.create(b, image(), plain()).await.unwrap();
        f.svc.create(c, image(), plain()).await.unwrap();
        update(&f.store, |db| {
            let cid = Uuid::new_v4();
            db.comments.insert(
                cid,
                Comment {
                    id: cid,
                    creator: a,
                    post: pb,
                    text: "nice".into(),
                    created_at: Utc::now(),
                    likes: vec![a],
                    replies: Vec::new(),
                },
            );
            db.post_mut(&pb)?.comments.push(cid);
            Ok(())
        });

        let feed = f.svc.feed(a, 0).unwrap();
        assert_eq!(feed.total, 2);
        assert_eq!(feed.posts[0].id, pb);
        assert_eq!(feed.posts[1].id, pa);
        assert_eq!(feed.posts[0].comment_count, 1);
        assert!(feed.posts[0].comment[0].is_liked);
        assert_eq!(feed.posts[0].creator_username, "bob");

        let explore = f.svc.explore(a, 0).unwrap();
        assert_eq!(explore.total, 2);
        assert!(f.svc.feed(a, 1).unwrap().posts.is_empty());
    }

    #[tokio::test]
    async fn test_explore_hides_blocks_both_ways() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let d = signup(&f.store, "dave");
        let e = signup(&f.store, "erin");
        update(&f.store, |db| {
            db.user_mut(&a)?.blocked.push(b);
            db.user_mut(&b)?.blocked_by.push(a);
            db.user_mut(&d)?.blocked.push(a);
            db.user_mut(&a)?.blocked_by.push(d);
            Ok(())
        });
        f.svc.create(b, image(), plain()).await.unwrap();
        f.svc.create(d, image(), plain()).await.unwrap();
        let pe = f.svc.create(e, image(), plain()).await.unwrap();

        let explore = f.svc.explore(a, 0).unwrap();
        assert_eq!(explore.total, 1);
        assert_eq!(explore.detail[0].id, pe);
        assert_eq!(f.svc.explore(e, 0).unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_detail_visibility() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let id = f.svc.create(a, image(), plain()).await.unwrap();

        let Outcome::Ok(view) = f.svc.detail(Some(a), id).unwrap() else {
            panic!("creator should see the post");
        };
        assert_eq!(view.relation, Relation::Creator);

        let Outcome::Ok(view) = f.svc.detail(Some(b), id).unwrap() else {
            panic!("public post");
        };
        assert_eq!(view.relation, Relation::Follow);
        assert_eq!(view.private, Some(false));
        assert!(view.post_details.cta.is_some());

        update(&f.store, |db| {
            db.user_mut(&a)?.private = true;
            Ok(())
        });
        assert!(f.svc.detail(Some(b), id).unwrap().is_fail());
        assert!(f.svc.detail(None, id).unwrap().is_fail());
        update(&f.store, |db| {
            db.user_mut(&b)?.following.push(a);
            db.user_mut(&a)?.followers.push(b);
            Ok(())
        });
        assert!(!f.svc.detail(Some(b), id).unwrap().is_fail());

        f.svc.toggle_archive(a, id).unwrap();
        assert!(f.svc.detail(Some(b), id).unwrap().is_fail());
        assert!(!f.svc.detail(Some(a), id).unwrap().is_fail());
        assert!(f.svc.detail(None, Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let f = fixture();
        let a = signup(&f.store, "alice");
        let b = signup(&f.store, "bob");
        let id = f
            .svc
            .create(a, image(), NewPost { tags: vec!["bob".into()], hashtags: vec!["x".into()], ..plain() })
            .await
            .unwrap();
        f.svc.toggle_like(b, id).unwrap();
        f.svc.toggle_saved(b, id).unwrap();

        assert!(matches!(f.svc.delete(b, id).await, Err(CoreError::Unauthorized(_))));
        f.svc.delete(a, id).await.unwrap();

        f.store.read(|db| {
            assert!(db.post(&id).is_err());
            let bob = db.user(&b).unwrap();
            assert!(bob.liked.is_empty() && bob.saved.is_empty() && bob.tagged_posts.is_empty());
            assert!(db.user(&a).unwrap().posts.is_empty());
            assert!(db.hashtag_by_name("x").unwrap().posts.is_empty());
        });
        assert_eq!(std::fs::read_dir(f.dir.path()).unwrap().count(), 0);
    }
}
