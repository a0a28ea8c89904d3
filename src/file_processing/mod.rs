pub mod hasher;

pub use hasher::FileHasher;

use serde::{Deserialize, Serialize};

/// 文件哈希信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashes {
    /// MD5哈希值
    pub md5: String,
    /// SHA1哈希值
    pub sha1: String,
    /// SHA256哈希值
    pub sha256: String,
}
