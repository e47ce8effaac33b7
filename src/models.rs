use chrono::{NaiveDateTime, SubsecRound, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::findex::signature::SIGNATURE_SEED_LENGTH;

/// Length of the public index identifier / 索引公开 ID 长度
pub const PUBLIC_ID_LENGTH: usize = 5;

/// Index metadata row / 索引元数据
///
/// The four keys are the seeds of the callback signatures. They are
/// returned to the owner so the client SDK can build its token.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Index {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub authz_id: String,
    pub project_uuid: String,
    pub name: String,
    pub fetch_entries_key: Vec<u8>,
    pub fetch_chains_key: Vec<u8>,
    pub upsert_entries_key: Vec<u8>,
    pub insert_chains_key: Vec<u8>,
    /// Bytes stored in the encrypted tables, filled on demand / 密文表占用字节数
    #[sqlx(default)]
    pub size: Option<i64>,
    /// UTC, second precision / UTC 时间，精确到秒
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing)]
    pub deleted_at: Option<NaiveDateTime>,
}

/// Insertable index / 待插入的索引
#[derive(Debug, Clone)]
pub struct NewIndex {
    pub public_id: String,
    pub authz_id: String,
    pub project_uuid: String,
    pub name: String,
    pub fetch_entries_key: Vec<u8>,
    pub fetch_chains_key: Vec<u8>,
    pub upsert_entries_key: Vec<u8>,
    pub insert_chains_key: Vec<u8>,
    pub created_at: NaiveDateTime,
}

fn random_seed() -> Vec<u8> {
    let mut seed = vec![0u8; SIGNATURE_SEED_LENGTH];
    OsRng.fill_bytes(&mut seed);
    seed
}

pub fn generate_public_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_ID_LENGTH)
        .map(char::from)
        .collect()
}

impl NewIndex {
    /// Fresh index with random public ID and seeds / 生成随机 ID 与种子
    pub fn generate(authz_id: &str, project_uuid: &str, name: &str) -> Self {
        Self {
            public_id: generate_public_id(),
            authz_id: authz_id.to_string(),
            project_uuid: project_uuid.to_string(),
            name: name.to_string(),
            fetch_entries_key: random_seed(),
            fetch_chains_key: random_seed(),
            upsert_entries_key: random_seed(),
            insert_chains_key: random_seed(),
            created_at: Utc::now().naive_utc().trunc_subsecs(0),
        }
    }

    pub fn regenerate_public_id(&mut self) {
        self.public_id = generate_public_id();
    }
}

/// POST /indexes body
#[derive(Debug, Clone, Deserialize)]
pub struct CreateIndexRequest {
    pub name: String,
    #[serde(default)]
    pub project_uuid: Option<String>,
}

/// GET /indexes query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListIndexesQuery {
    pub project_uuid: Option<String>,
}
