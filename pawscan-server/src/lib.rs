pub mod http;
pub mod storage;
pub mod subsystems;

use std::sync::Arc;

use sqlx::PgPool;

use pawscan_core::classifier::ClassifierBackend;
use pawscan_core::identifier::IdentifierBackend;
use pawscan_core::PawscanConfig;

use crate::storage::BlobStore;
use crate::subsystems::queue::JobSender;
use crate::subsystems::status_cache::StatusCache;

/// Shared dependencies of the analysis pipeline and the HTTP surface.
#[derive(Clone)]
pub struct AppContext {
    pub pool: PgPool,
    pub config: PawscanConfig,
    pub store: Arc<dyn BlobStore>,
    pub classifier: Arc<dyn ClassifierBackend>,
    pub identifier: Arc<dyn IdentifierBackend>,
    pub jobs: JobSender,
    pub status_cache: StatusCache,
}
