use rand::seq::IndexedRandom;

use crate::error::{CoreError, Result};
use crate::model::{Id, Post};
use crate::store::Store;
use crate::views::{paginate, HashtagPage, PostTile, PAGE_SIZE};

#[derive(Clone)]
pub struct HashtagService {
    store: Store,
}

impl HashtagService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Page `skip` of the live posts carrying `tag`, newest first. `main` is
    /// the media of a random post on the page.
    pub fn posts(&self, viewer: Option<Id>, tag: &str, skip: usize) -> Result<HashtagPage> {
        let name = tag.trim().trim_start_matches('#').to_lowercase();
        self.store.read(|db| {
            let hashtag = db
                .hashtag_by_name(&name)
                .ok_or_else(|| CoreError::not_found("Hashtag not found"))?;
            let viewer = viewer.and_then(|id| db.find_user(&id));

            let mut posts: Vec<&Post> = hashtag
                .posts
                .iter()
                .filter_map(|id| db.posts.get(id))
                .filter(|p| !p.is_archived)
                .filter(|p| viewer.map_or(true, |v| !v.is_blocked_with(&p.creator)))
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = posts.len();

            let posts: Vec<PostTile> = paginate(posts, skip, PAGE_SIZE)
                .into_iter()
                .map(|p| PostTile::build(db, p))
                .collect();
            let main = posts.choose(&mut rand::rng()).map(|p| p.media.clone());
            Ok(HashtagPage { posts, main, total })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdListExt;
    use crate::services::testing::signup;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn add_post(store: &Store, creator: Id, tag: &str, age_mins: i64, archived: bool) -> Id {
        store
            .write(|db| {
                let id = Uuid::new_v4();
                let tag_id = db.upsert_hashtag(tag);
                db.posts.insert(
                    id,
                    Post {
                        id,
                        media: format!("/uploads/images/{id}.png"),
                        caption: None,
                        allow_comment: true,
                        creator,
                        styles: serde_json::json!({}),
                        is_archived: archived,
                        created_at: Utc::now() - Duration::minutes(age_mins),
                        tagged: Vec::new(),
                        likes: Vec::new(),
                        comments: Vec::new(),
                        hashtags: vec![tag_id],
                    },
                );
                if let Some(tag) = db.hashtag_mut(&tag_id) {
                    tag.posts.push_unique(id);
                }
                Ok(id)
            })
            .unwrap()
    }

    #[test]
    fn test_posts_by_tag() {
        let store = Store::in_memory();
        let svc = HashtagService::new(store.clone());
        let alice = signup(&store, "alice");
        let old = add_post(&store, alice, "sunset", 10, false);
        let new = add_post(&store, alice, "sunset", 1, false);
        add_post(&store, alice, "sunset", 5, true);

        let page = svc.posts(None, "#Sunset", 0).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.posts[0].id, new);
        assert_eq!(page.posts[1].id, old);
        let main = page.main.unwrap();
        assert!(page.posts.iter().any(|p| p.media == main));

        let empty = svc.posts(None, "sunset", 1).unwrap();
        assert!(empty.posts.is_empty() && empty.main.is_none());
        assert!(matches!(svc.posts(None, "nothing", 0), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_blocked_creators_hidden() {
        let store = Store::in_memory();
        let svc = HashtagService::new(store.clone());
        let alice = signup(&store, "alice");
        let bob = signup(&store, "bob");
        add_post(&store, alice, "cats", 1, false);
        store
            .write(|db| {
                db.user_mut(&alice)?.blocked.push(bob);
                db.user_mut(&bob)?.blocked_by.push(alice);
                Ok(())
            })
            .unwrap();
        assert_eq!(svc.posts(Some(bob), "cats", 0).unwrap().total, 0);
        assert_eq!(svc.posts(None, "cats", 0).unwrap().total, 1);
    }
}
