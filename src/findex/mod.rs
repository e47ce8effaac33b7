//! Findex table primitives / Findex 表基础类型
//!
//! The server never decrypts anything. A Findex index is two key/value
//! tables (Entries and Chains) whose keys are 32-byte UIDs and whose
//! values are opaque ciphertexts produced by the client SDK.
//! 服务端只保存密文，不解密任何内容。

pub mod codec;
pub mod signature;

use std::collections::{HashMap, HashSet};
use std::fmt;

pub use codec::CodecError;

/// UID length in bytes / UID 字节长度
pub const UID_LENGTH: usize = 32;

/// Table line identifier / 表行标识
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub [u8; UID_LENGTH]);

impl Uid {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Uid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; UID_LENGTH]> for Uid {
    fn from(bytes: [u8; UID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Uid {
    type Error = CodecError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; UID_LENGTH] = bytes.try_into().map_err(|_| CodecError::InvalidUidLength {
            expected: UID_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

/// Set of UIDs requested by a fetch callback / fetch 回调请求的 UID 集合
pub type UidSet = HashSet<Uid>;

/// UID -> ciphertext / UID 到密文的映射
pub type EncryptedTable = HashMap<Uid, Vec<u8>>;

/// One compare-and-swap line of an Entry table upsert / Entry 表的一条 CAS 写入
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpsertLine {
    /// Value the client last saw, `None` when it believes the line is new
    pub old_value: Option<Vec<u8>>,
    pub new_value: Vec<u8>,
}

impl UpsertLine {
    pub fn new(old_value: Option<Vec<u8>>, new_value: Vec<u8>) -> Self {
        Self { old_value, new_value }
    }
}

/// Entry table upsert request / Entry 表批量写入请求
pub type UpsertData = HashMap<Uid, UpsertLine>;

/// The two Findex tables / Findex 的两张表
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Entries,
    Chains,
}

impl Table {
    /// Storage tag, stable across releases / 存储标签（不可更改）
    pub fn tag(self) -> u8 {
        match self {
            Table::Entries => 0,
            Table::Chains => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Table::Entries => "entries",
            Table::Chains => "chains",
        }
    }
}
