use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{Comment, CommentReply, Id, IdListExt};
use crate::store::{Database, Store};
use crate::views::{paginate, CommentView, PAGE_SIZE, REPLY_PAGE_SIZE};

/// What a client needs to render a comment or reply it just posted.
#[derive(Debug, Clone)]
pub struct Posted {
    pub id: Id,
    pub text: String,
    pub date: DateTime<Utc>,
}

fn clean_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CoreError::invalid_input());
    }
    Ok(text.to_string())
}

fn ensure_not_blocked(db: &Database, me: &Id, other: &Id) -> Result<()> {
    if db.user(me)?.is_blocked_with(other) {
        return Err(CoreError::blocked());
    }
    Ok(())
}

fn not_authorized() -> CoreError {
    CoreError::unauthorized("Not authorized to delete comment")
}

/// Comments on posts and the replies under them.
#[derive(Clone)]
pub struct CommentService {
    store: Store,
}

impl CommentService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create(&self, me: Id, post_id: Id, text: &str) -> Result<Posted> {
        let text = clean_text(text)?;
        let posted = self.store.write(|db| {
            let post = db.post(&post_id)?;
            if !post.allow_comment {
                return Err(CoreError::validation("Comments not allowed"));
            }
            ensure_not_blocked(db, &me, &post.creator)?;

            let comment = Comment {
                id: Uuid::new_v4(),
                creator: me,
                post: post_id,
                text,
                created_at: Utc::now(),
                likes: Vec::new(),
                replies: Vec::new(),
            };
            let posted = Posted {
                id: comment.id,
                text: comment.text.clone(),
                date: comment.created_at,
            };
            db.post_mut(&post_id)?.comments.push(comment.id);
            db.comments.insert(comment.id, comment);
            Ok(posted)
        })?;
        info!(user_id = %me, post_id = %post_id, comment_id = %posted.id, "Comment created");
        Ok(posted)
    }

    /// Returns true when the comment is now liked.
    pub fn toggle_like(&self, me: Id, comment_id: Id) -> Result<bool> {
        self.store.write(|db| {
            let comment = db.comment(&comment_id)?;
            if comment.likes.has(&me) {
                db.comment_mut(&comment_id)?.likes.pull(&me);
                return Ok(false);
            }
            ensure_not_blocked(db, &me, &comment.creator)?;
            db.comment_mut(&comment_id)?.likes.push_unique(me);
            Ok(true)
        })
    }

    /// Deletes the comment with all of its replies.
    pub fn delete(&self, me: Id, comment_id: Id) -> Result<()> {
        self.store.write(|db| {
            if db.comment(&comment_id)?.creator != me {
                return Err(not_authorized());
            }
            let Some(comment) = db.comments.remove(&comment_id) else {
                return Err(CoreError::not_found("Comment not found"));
            };
            for reply in &comment.replies {
                db.replies.remove(reply);
            }
            if let Ok(post) = db.post_mut(&comment.post) {
                post.comments.pull(&comment_id);
            }
            Ok(())
        })?;
        info!(user_id = %me, comment_id = %comment_id, "Comment deleted");
        Ok(())
    }

    /// Page `skip` of a post's comments, oldest first.
    pub fn list(&self, viewer: Option<Id>, post_id: Id, skip: usize) -> Result<Vec<CommentView>> {
        self.store.read(|db| {
            let post = db
                .posts
                .get(&post_id)
                .ok_or_else(|| CoreError::not_found("Post Not Found"))?;
            let comments: Vec<&Comment> = post
                .comments
                .iter()
                .filter_map(|id| db.comments.get(id))
                .collect();
            Ok(paginate(comments, skip, PAGE_SIZE)
                .into_iter()
                .filter_map(|c| CommentView::of_comment(db, c, viewer.as_ref()))
                .collect())
        })
    }

    pub fn create_reply(&self, me: Id, comment_id: Id, text: &str) -> Result<Posted> {
        let text = clean_text(text)?;
        let posted = self.store.write(|db| {
            let parent = db
                .comments
                .get(&comment_id)
                .ok_or_else(|| CoreError::not_found("Could not find parent comment"))?;
            ensure_not_blocked(db, &me, &parent.creator)?;

            let reply = CommentReply {
                id: Uuid::new_v4(),
                creator: me,
                parent_comment: comment_id,
                text,
                created_at: Utc::now(),
                likes: Vec::new(),
            };
            let posted = Posted {
                id: reply.id,
                text: reply.text.clone(),
                date: reply.created_at,
            };
            db.comment_mut(&comment_id)?.replies.push(reply.id);
            db.replies.insert(reply.id, reply);
            Ok(posted)
        })?;
        info!(user_id = %me, comment_id = %comment_id, reply_id = %posted.id, "Reply created");
        Ok(posted)
    }

    /// Returns true when the reply is now liked.
    pub fn toggle_reply_like(&self, me: Id, reply_id: Id) -> Result<bool> {
        self.store.write(|db| {
            let reply = db.reply(&reply_id)?;
            if reply.likes.has(&me) {
                db.reply_mut(&reply_id)?.likes.pull(&me);
                return Ok(false);
            }
            ensure_not_blocked(db, &me, &reply.creator)?;
            db.reply_mut(&reply_id)?.likes.push_unique(me);
            Ok(true)
        })
    }

    pub fn delete_reply(&self, me: Id, reply_id: Id) -> Result<()> {
        self.store.write(|db| {
            if db.reply(&reply_id)?.creator != me {
                return Err(not_authorized());
            }
            let Some(reply) = db.replies.remove(&reply_id) else {
                return Err(CoreError::not_found("Reply not found"));
            };
            if let Ok(parent) = db.comment_mut(&reply.parent_comment) {
                parent.replies.pull(&reply_id);
            }
            Ok(())
        })
    }

    /// Page `skip` of a comment's replies. Pages walk back from the newest
    /// reply, each page ordered oldest first.
    pub fn list_replies(
        &self,
        viewer: Option<Id>,
        comment_id: Id,
        skip: usize,
    ) -> Result<Vec<CommentView>> {
        self.store.read(|db| {
            let comment = db
                .comments
                .get(&comment_id)
                .ok_or_else(|| CoreError::not_found("Comment Not Found"))?;
            let mut replies: Vec<&CommentReply> = comment
                .replies
                .iter()
                .filter_map(|id| db.replies.get(id))
                .collect();
            replies.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let mut page: Vec<CommentView> = paginate(replies, skip, REPLY_PAGE_SIZE)
                .into_iter()
                .filter_map(|r| CommentView::of_reply(db, r, viewer.as_ref()))
                .collect();
            page.reverse();
            Ok(page)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Post;
    use crate::services::testing::signup;

    fn setup() -> (Store, CommentService, Id, Id, Id) {
        let store = Store::in_memory();
        let alice = signup(&store, "alice");
        let bob = signup(&store, "bob");
        let post = Uuid::new_v4();
        store
            .write(|db| {
                db.posts.insert(
                    post,
                    Post {
                        id: post,
                        media: "/uploads/images/a.png".into(),
                        caption: None,
                        allow_comment: true,
                        creator: alice,
                        styles: serde_json::json!({}),
                        is_archived: false,
                        created_at: Utc::now(),
                        tagged: Vec::new(),
                        likes: Vec::new(),
                        comments: Vec::new(),
                        hashtags: Vec::new(),
                    },
                );
                db.user_mut(&alice)?.posts.push(post);
                Ok(())
            })
            .unwrap();
        (store.clone(), CommentService::new(store), alice, bob, post)
    }

    fn block(store: &Store, by: Id, target: Id) {
        store
            .write(|db| {
                db.user_mut(&by)?.blocked.push(target);
                db.user_mut(&target)?.blocked_by.push(by);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_create_and_list() {
        let (_, svc, alice, bob, post) = setup();
        let first = svc.create(bob, post, "  first ").unwrap();
        assert_eq!(first.text, "first");
        svc.create(alice, post, "second").unwrap();
        svc.toggle_like(alice, first.id).unwrap();

        let page = svc.list(Some(alice), post, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].username, "bob");
        assert!(page[0].is_liked);
        assert_eq!(page[0].reply_count, Some(0));
        assert!(!svc.list(None, post, 0).unwrap()[0].is_liked);
        assert!(svc.list(None, post, 1).unwrap().is_empty());
        assert!(matches!(
            svc.list(None, Uuid::new_v4(), 0),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_rejections() {
        let (store, svc, alice, bob, post) = setup();
        assert!(matches!(svc.create(bob, post, "   "), Err(CoreError::Validation(_))));
        assert!(matches!(
            svc.create(bob, Uuid::new_v4(), "hi"),
            Err(CoreError::NotFound(_))
        ));

        store
            .write(|db| {
                db.post_mut(&post)?.allow_comment = false;
                Ok(())
            })
            .unwrap();
        assert!(matches!(svc.create(bob, post, "hi"), Err(CoreError::Validation(_))));

        store
            .write(|db| {
                db.post_mut(&post)?.allow_comment = true;
                Ok(())
            })
            .unwrap();
        block(&store, alice, bob);
        assert!(matches!(svc.create(bob, post, "hi"), Err(CoreError::Blocked(_))));
    }

    #[test]
    fn test_like_unlike_after_block() {
        let (store, svc, alice, bob, post) = setup();
        let c = svc.create(alice, post, "mine").unwrap();
        assert!(svc.toggle_like(bob, c.id).unwrap());
        block(&store, alice, bob);
        assert!(!svc.toggle_like(bob, c.id).unwrap());
        assert!(matches!(svc.toggle_like(bob, c.id), Err(CoreError::Blocked(_))));
    }

    #[test]
    fn test_delete_removes_replies() {
        let (store, svc, alice, bob, post) = setup();
        let c = svc.create(bob, post, "hello").unwrap();
        let r = svc.create_reply(alice, c.id, "hi back").unwrap();

        assert!(matches!(svc.delete(alice, c.id), Err(CoreError::Unauthorized(_))));
        svc.delete(bob, c.id).unwrap();
        store.read(|db| {
            assert!(db.post(&post).unwrap().comments.is_empty());
            assert!(db.reply(&r.id).is_err());
        });
        assert!(matches!(svc.delete(bob, c.id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_replies_lifecycle() {
        let (store, svc, alice, bob, post) = setup();
        let c = svc.create(alice, post, "root").unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(svc.create_reply(bob, c.id, &format!("r{i}")).unwrap().id);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let newest: Vec<String> = svc
            .list_replies(None, c.id, 0)
            .unwrap()
            .into_iter()
            .map(|v| v.text)
            .collect();
        assert_eq!(newest, vec!["r2", "r3", "r4"]);
        let older = svc.list_replies(None, c.id, 1).unwrap();
        assert_eq!(older.len(), 2);
        assert_eq!(older[0].text, "r0");
        assert!(older[0].reply_count.is_none());

        assert!(svc.toggle_reply_like(alice, ids[0]).unwrap());
        assert!(svc.list_replies(Some(alice), c.id, 1).unwrap()[0].is_liked);

        assert!(matches!(
            svc.delete_reply(alice, ids[0]),
            Err(CoreError::Unauthorized(_))
        ));
        svc.delete_reply(bob, ids[0]).unwrap();
        store.read(|db| assert_eq!(db.comment(&c.id).unwrap().replies.len(), 4));

        block(&store, alice, bob);
        assert!(matches!(
            svc.create_reply(bob, c.id, "again"),
            Err(CoreError::Blocked(_))
        ));
        assert!(matches!(
            svc.create_reply(bob, Uuid::new_v4(), "x"),
            Err(CoreError::NotFound(_))
        ));
    }
}
