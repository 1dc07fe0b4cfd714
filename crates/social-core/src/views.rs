//! Read models returned by the services and serialized as-is by the API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Audience, Comment, CommentReply, Id, Post, Relation, User};
use crate::store::Database;

pub const PAGE_SIZE: usize = 18;
pub const REPLY_PAGE_SIZE: usize = 3;

/// Either the requested view or a soft failure the client should act on.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Ok(T),
    Fail { message: &'static str, error: String },
}

impl<T> Outcome<T> {
    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail {
            message: "fail",
            error: error.into(),
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }
}

pub const REDIRECT_404: &str = "redirect user to /404";
pub const REDIRECT_PROFILE: &str = "redirect user to /profile";

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub detail: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            detail: Vec::new(),
            total: 0,
        }
    }
}

/// A page of either post tiles or people, depending on the list asked for.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ListPage {
    Posts(Page<PostTile>),
    People(Page<UserCard>),
}

/// Slice out page `skip` of `size` items.
pub fn paginate<T>(items: Vec<T>, skip: usize, size: usize) -> Vec<T> {
    items
        .into_iter()
        .skip(skip.saturating_mul(size))
        .take(size)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostTile {
    pub id: Id,
    pub media: String,
    pub styles: serde_json::Value,
    pub like_count: usize,
    pub comment_count: usize,
}

impl PostTile {
    pub fn build(db: &Database, post: &Post) -> Self {
        Self {
            id: post.id,
            media: post.media.clone(),
            styles: post.styles.clone(),
            like_count: post.likes.len(),
            comment_count: db.comment_count(post),
        }
    }
}

/// Collects the given posts, newest first, with an archive filter.
pub fn posts_newest_first<'a>(
    db: &'a Database,
    ids: &[Id],
    archived: bool,
) -> Vec<&'a Post> {
    let mut posts: Vec<&Post> = ids
        .iter()
        .filter_map(|id| db.posts.get(id))
        .filter(|p| p.is_archived == archived)
        .collect();
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    posts
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCard {
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

impl UserCard {
    pub fn new(user: &User, relation: Option<Relation>) -> Self {
        Self {
            name: user.name.clone(),
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            relation,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<Audience>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention: Option<Audience>,
    /// True for the viewer themselves and for users following the viewer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCard {
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub post_count: usize,
    pub follower_count: usize,
    pub following_count: usize,
    pub tagged_post_count: usize,
    pub private: bool,
}

impl From<&User> for ProfileCard {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            website: user.website.clone(),
            bio: user.bio.clone(),
            post_count: user.posts.len(),
            follower_count: user.followers.len(),
            following_count: user.following.len(),
            tagged_post_count: user.tagged_posts.len(),
            private: user.private,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserDetail {
    pub user: ProfileCard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutuals: Option<Vec<UserCard>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyProfile {
    pub name: String,
    pub email: String,
    pub username: String,
    pub avatar: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub private: bool,
    pub manually_approve_tag: bool,
    pub tag: Audience,
    pub mention: Audience,
    pub follower: usize,
    pub following: usize,
    pub is_username_change_allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_username: Option<String>,
    pub like_count: usize,
    pub saved_count: usize,
    pub blocked_count: usize,
    pub pending_follower_count: usize,
    pub archive_post_count: usize,
    pub tagged_post_count: usize,
    pub pending_tagged_post_count: usize,
    pub post_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPreview {
    pub id: Id,
    pub username: String,
    pub avatar: Option<String>,
    pub text: String,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: Id,
    pub username: String,
    pub avatar: Option<String>,
    pub text: String,
    pub like_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<usize>,
    pub is_liked: bool,
    pub date: DateTime<Utc>,
}

impl CommentView {
    /// `None` when the comment author no longer exists.
    pub fn of_comment(db: &Database, comment: &Comment, viewer: Option<&Id>) -> Option<Self> {
        let author = db.find_user(&comment.creator)?;
        Some(Self {
            id: comment.id,
            username: author.username.clone(),
            avatar: author.avatar.clone(),
            text: comment.text.clone(),
            like_count: comment.likes.len(),
            reply_count: Some(comment.replies.len()),
            is_liked: viewer.is_some_and(|v| comment.likes.contains(v)),
            date: comment.created_at,
        })
    }

    pub fn of_reply(db: &Database, reply: &CommentReply, viewer: Option<&Id>) -> Option<Self> {
        let author = db.find_user(&reply.creator)?;
        Some(Self {
            id: reply.id,
            username: author.username.clone(),
            avatar: author.avatar.clone(),
            text: reply.text.clone(),
            like_count: reply.likes.len(),
            reply_count: None,
            is_liked: viewer.is_some_and(|v| reply.likes.contains(v)),
            date: reply.created_at,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: Id,
    pub media: String,
    pub caption: Option<String>,
    pub allow_comment: bool,
    pub styles: serde_json::Value,
    pub date: DateTime<Utc>,
    pub like_count: usize,
    pub creator_username: String,
    pub avatar: Option<String>,
    pub comment_count: usize,
    pub comment: Vec<CommentPreview>,
    pub is_saved: bool,
    pub is_liked: bool,
}

#[derive(Debug, Serialize)]
pub struct Feed {
    pub posts: Vec<FeedPost>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCta {
    pub is_saved: bool,
    pub is_liked: bool,
    pub is_in_pending_tagged: bool,
    pub is_in_tagged_list: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetails {
    pub media: String,
    pub caption: Option<String>,
    pub allow_comment: bool,
    pub styles: serde_json::Value,
    pub is_archived: bool,
    pub date: DateTime<Utc>,
    pub tag: Vec<String>,
    pub like_count: usize,
    pub creator_username: String,
    pub avatar: Option<String>,
    pub comment: Vec<CommentView>,
    pub total_comments: usize,
    #[serde(flatten)]
    pub cta: Option<PostCta>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetailView {
    pub post_details: PostDetails,
    pub relation: Relation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct HashtagPage {
    pub posts: Vec<PostTile>,
    pub main: Option<String>,
    pub total: usize,
}
