use super::FileHashes;
use crate::error::{AppError, AppResult};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::{fs, task};
use tracing::debug;

/// 本地文件哈希计算
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHasher;

impl FileHasher {
    pub fn new() -> Self {
        Self
    }

    /// 读取文件并计算 MD5/SHA1/SHA256
    pub async fn hash_file(&self, path: &Path) -> AppResult<FileHashes> {
        let data = fs::read(path).await?;
        debug!("计算文件哈希: {:?}, {} 字节", path, data.len());
        self.hash_bytes(data).await
    }

    /// 在阻塞线程上计算哈希，避免占用异步运行时
    pub async fn hash_bytes(&self, data: Vec<u8>) -> AppResult<FileHashes> {
        task::spawn_blocking(move || Self::digest(&data))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("哈希计算任务失败: {}", e)))
    }

    fn digest(data: &[u8]) -> FileHashes {
        FileHashes {
            md5: format!("{:x}", md5::compute(data)),
            sha1: hex::encode(Sha1::digest(data)),
            sha256: hex::encode(Sha256::digest(data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_bytes() {
        let hashes = FileHasher::new()
            .hash_bytes(b"Hello, World!".to_vec())
            .await
            .unwrap();

        // 验证已知的哈希值
        assert_eq!(hashes.md5, "65a8e27d8879283831b664bd8b7f0ad4");
        assert_eq!(hashes.sha1, "0a0a9f2a6772942557ab5355d76af442f8f65e01");
        assert_eq!(
            hashes.sha256,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let hashes = FileHasher::new().hash_file(&path).await.unwrap();
        assert_eq!(hashes.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            hashes.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileHasher::new()
            .hash_file(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
