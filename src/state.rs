use std::sync::Arc;

use crate::auth::Tenancy;
use crate::error::{Error, Result};
use crate::indexes::IndexesDatabase;
use crate::metadata::{MetadataCache, MetadataDatabase};
use crate::models::Index;
use crate::request_log::RequestLog;

/// Shared application state / 应用共享状态
pub struct AppState {
    pub metadata: Arc<dyn MetadataDatabase>,
    pub metadata_cache: MetadataCache,
    pub indexes: Arc<dyn IndexesDatabase>,
    /// `None` in single-tenant mode / 单租户模式为 None
    pub tenancy: Option<Tenancy>,
    /// `None` unless request recording is enabled / 未启用请求记录时为 None
    pub request_log: Option<Arc<RequestLog>>,
}

impl AppState {
    pub fn new(metadata: Arc<dyn MetadataDatabase>, indexes: Arc<dyn IndexesDatabase>) -> Self {
        Self {
            metadata,
            metadata_cache: MetadataCache::new(),
            indexes,
            tenancy: None,
            request_log: None,
        }
    }

    pub fn with_tenancy(mut self, tenancy: Option<Tenancy>) -> Self {
        self.tenancy = tenancy;
        self
    }

    pub fn with_request_log(mut self, request_log: Option<RequestLog>) -> Self {
        self.request_log = request_log.map(Arc::new);
        self
    }

    /// Live index by public ID through the cache / 通过缓存查找索引
    pub async fn cached_index(&self, public_id: &str) -> Result<Index> {
        self.metadata_cache
            .get_index(self.metadata.as_ref(), public_id)
            .await?
            .ok_or_else(|| Error::UnknownIndex(public_id.to_string()))
    }
}
