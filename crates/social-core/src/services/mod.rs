//! Operations behind every route. Each call performs its checks and all of
//! its document updates inside one store transaction.

pub mod accounts;
pub mod comments;
pub mod hashtags;
pub mod posts;
pub mod profile;
pub mod relations;

pub use accounts::{AccountService, LoginRequest, SignupRequest};
pub use comments::{CommentService, Posted};
pub use hashtags::HashtagService;
pub use posts::{NewPost, PostService};
pub use profile::{
    DetailList, PasswordChange, ProfileChange, ProfileService, RevertOutcome, SecurityChange,
};
pub use relations::{RelationService, UserList};

use crate::model::{Id, IdListExt, Relation, User};

/// How `viewer` relates to `other` in someone's people list. `None` when
/// `other` has blocked the viewer and must stay hidden.
pub(crate) fn relation_between(viewer: &User, other: &Id) -> Option<Relation> {
    let relation = if viewer.id == *other {
        Relation::Myself
    } else if viewer.following.has(other) {
        Relation::Following
    } else if viewer.pending_following.has(other) {
        Relation::Requested
    } else if viewer.followers.has(other) {
        Relation::Follow
    } else if viewer.pending_followers.has(other) {
        Relation::Approve
    } else if viewer.blocked.has(other) {
        Relation::Unblock
    } else if viewer.blocked_by.has(other) {
        return None;
    } else {
        Relation::Follow
    };
    Some(relation)
}
