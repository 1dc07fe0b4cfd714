use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Context;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use social_core::services::{
    AccountService, CommentService, HashtagService, PostService, ProfileService, RelationService,
};
use social_core::{LocalMediaStore, MediaStore, Settings, Store, TokenService};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub accounts: AccountService,
    pub profile: ProfileService,
    pub relations: RelationService,
    pub posts: PostService,
    pub comments: CommentService,
    pub hashtags: HashtagService,
    /// Per-client quota for `/api/auth`, keyed by client IP.
    pub auth_limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
}

impl AppState {
    /// Opens the snapshot named in the settings, or an in-memory store.
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let store = match &settings.database.snapshot_path {
            Some(path) => Store::open(path)
                .await
                .with_context(|| format!("opening snapshot {}", path.display()))?,
            None => {
                info!("No snapshot path configured, data lives in memory only");
                Store::in_memory()
            }
        };
        Self::with_store(settings, store)
    }

    pub fn with_store(settings: Settings, store: Store) -> anyhow::Result<Self> {
        let secret = settings
            .security
            .jwt_secret
            .clone()
            .context("security.jwt_secret must be set")?;
        let tokens = Arc::new(TokenService::new(secret, settings.security.token_ttl_hours));
        let media: Arc<dyn MediaStore> = Arc::new(LocalMediaStore::new(&settings.media));

        let per_minute = NonZeroU32::new(settings.rate_limit.auth_per_minute)
            .context("rate_limit.auth_per_minute must be > 0")?;
        let auth_limiter = Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)));

        Ok(Self {
            accounts: AccountService::new(store.clone(), tokens),
            profile: ProfileService::new(store.clone(), media.clone()),
            relations: RelationService::new(store.clone()),
            posts: PostService::new(store.clone(), media),
            comments: CommentService::new(store.clone()),
            hashtags: HashtagService::new(store.clone()),
            auth_limiter,
            store,
            settings: Arc::new(settings),
        })
    }
}
