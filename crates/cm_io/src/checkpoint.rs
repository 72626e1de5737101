// crates/cm_io/src/checkpoint.rs

//! 检查点保存/恢复系统
//!
//! 检查点由固定头部、JSON 负载和 CRC32 组成。负载的结构由调用方决定，
//! 本模块只负责封装、校验和目录管理。
//!
//! # 文件格式 (v1)
//!
//! ```text
//! [魔数: 4 bytes] "CMCK"
//! [版本: u32]
//! [时间: f64]
//! [步数: u64]
//! [配置哈希: u64]
//! [创建时间: u64]
//! [负载长度: u64]
//! [负载: JSON]
//! [CRC32: u32]
//! ```
//!
//! 所有整数与浮点数均为小端序。写入时先写临时文件再重命名。

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================
// 错误类型
// ============================================================

/// 检查点错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
    /// 格式错误
    #[error("格式错误: {0}")]
    Format(String),
    /// 版本不兼容
    #[error("版本不兼容: 文件版本 {file}, 当前版本 {current}")]
    Version {
        /// 文件版本
        file: u32,
        /// 当前版本
        current: u32,
    },
    /// 校验和错误
    #[error("校验和错误: 期望 {expected:08x}, 实际 {found:08x}")]
    Checksum {
        /// 文件中的校验和
        expected: u32,
        /// 计算得到的校验和
        found: u32,
    },
    /// 配置不一致
    #[error("配置不一致: 检查点 {found:016x}, 当前 {expected:016x}")]
    ConfigMismatch {
        /// 当前配置哈希
        expected: u64,
        /// 检查点中的配置哈希
        found: u64,
    },
    /// 负载序列化失败
    #[error("负载序列化失败: {0}")]
    Payload(#[from] serde_json::Error),
}

/// 检查点操作结果
pub type CheckpointResult<T> = Result<T, CheckpointError>;

// ============================================================
// 常量
// ============================================================

/// 检查点文件格式版本
pub const CHECKPOINT_VERSION: u32 = 1;

/// 检查点魔数
const CHECKPOINT_MAGIC: &[u8; 4] = b"CMCK";

/// 检查点文件扩展名
pub const CHECKPOINT_EXTENSION: &str = "cmck";

/// 头部长度
const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8;

// ============================================================
// 检查点数据
// ============================================================

/// 检查点头部信息
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointHeader {
    /// 版本号
    pub version: u32,
    /// 模拟时间 [s]
    pub time: f64,
    /// 窗口序号
    pub step: u64,
    /// 配置摘要哈希
    pub config_hash: Option<u64>,
    /// 创建时间戳 [unix s]
    pub created_at: u64,
    /// 负载字节数
    pub payload_len: u64,
}

/// 检查点数据
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// 版本号
    pub version: u32,
    /// 模拟时间 [s]
    pub time: f64,
    /// 窗口序号
    pub step: u64,
    /// 配置摘要哈希（用于验证）
    pub config_hash: Option<u64>,
    /// 创建时间戳
    pub created_at: u64,
    /// JSON 负载
    payload: Vec<u8>,
}

/// 顺序读取字节的游标
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> CheckpointResult<[u8; N]> {
        let end = self.offset + N;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or_else(|| CheckpointError::Format(format!("在偏移 {} 处文件截断", self.offset)))?;
        self.offset = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u32(&mut self) -> CheckpointResult<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> CheckpointResult<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> CheckpointResult<f64> {
        self.take::<8>().map(f64::from_le_bytes)
    }
}

fn parse_header(cursor: &mut Cursor<'_>) -> CheckpointResult<CheckpointHeader> {
    if &cursor.take::<4>()? != CHECKPOINT_MAGIC {
        return Err(CheckpointError::Format("无效的检查点文件格式".into()));
    }
    let version = cursor.u32()?;
    if version > CHECKPOINT_VERSION {
        return Err(CheckpointError::Version {
            file: version,
            current: CHECKPOINT_VERSION,
        });
    }
    let time = cursor.f64()?;
    let step = cursor.u64()?;
    let config_hash = cursor.u64()?;
    let created_at = cursor.u64()?;
    let payload_len = cursor.u64()?;
    Ok(CheckpointHeader {
        version,
        time,
        step,
        config_hash: (config_hash != 0).then_some(config_hash),
        created_at,
        payload_len,
    })
}

impl Checkpoint {
    /// 从负载创建检查点
    pub fn from_payload<T: Serialize>(time: f64, step: u64, payload: &T) -> CheckpointResult<Self> {
        Ok(Self {
            version: CHECKPOINT_VERSION,
            time,
            step,
            config_hash: None,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// 设置配置哈希
    pub fn with_config_hash(mut self, hash: u64) -> Self {
        self.config_hash = Some(hash);
        self
    }

    /// 负载字节数
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// 解码负载
    pub fn payload<T: DeserializeOwned>(&self) -> CheckpointResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// 头部信息
    pub fn header(&self) -> CheckpointHeader {
        CheckpointHeader {
            version: self.version,
            time: self.time,
            step: self.step,
            config_hash: self.config_hash,
            created_at: self.created_at,
            payload_len: self.payload.len() as u64,
        }
    }

    /// 编码为字节
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.payload.len() + 4);

        data.extend_from_slice(CHECKPOINT_MAGIC);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.time.to_le_bytes());
        data.extend_from_slice(&self.step.to_le_bytes());
        data.extend_from_slice(&self.config_hash.unwrap_or(0).to_le_bytes());
        data.extend_from_slice(&self.created_at.to_le_bytes());
        data.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        data.extend_from_slice(&self.payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data
    }

    /// 从字节解码
    pub fn from_bytes(all_data: &[u8]) -> CheckpointResult<Self> {
        if all_data.len() < HEADER_LEN + 4 {
            return Err(CheckpointError::Format("文件太小".into()));
        }

        let crc_offset = all_data.len() - 4;
        let data = &all_data[..crc_offset];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&all_data[crc_offset..]);
        let stored_crc = u32::from_le_bytes(crc_bytes);
        let computed_crc = compute_crc32(data);
        if stored_crc != computed_crc {
            return Err(CheckpointError::Checksum {
                expected: stored_crc,
                found: computed_crc,
            });
        }

        let mut cursor = Cursor::new(data);
        let header = parse_header(&mut cursor)?;
        let payload = &data[cursor.offset..];
        if payload.len() as u64 != header.payload_len {
            return Err(CheckpointError::Format(format!(
                "负载长度不一致: 头部 {}, 实际 {}",
                header.payload_len,
                payload.len()
            )));
        }

        Ok(Self {
            version: header.version,
            time: header.time,
            step: header.step,
            config_hash: header.config_hash,
            created_at: header.created_at,
            payload: payload.to_vec(),
        })
    }

    /// 保存到文件
    pub fn save(&self, path: &Path) -> CheckpointResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // 使用临时文件写入，成功后重命名
        let temp_path = path.with_extension("cmck.tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&self.to_bytes())?;
            writer.flush()?;
        }
        std::fs::rename(&temp_path, path)?;

        debug!(path = %path.display(), step = self.step, time = self.time, "检查点已保存");
        Ok(())
    }

    /// 从文件加载
    pub fn load(path: &Path) -> CheckpointResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut all_data = Vec::new();
        reader.read_to_end(&mut all_data)?;
        Self::from_bytes(&all_data)
    }

    /// 仅读取头部信息（不加载负载）
    pub fn read_header(path: &Path) -> CheckpointResult<CheckpointHeader> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut head = [0u8; HEADER_LEN];
        reader.read_exact(&mut head)?;
        parse_header(&mut Cursor::new(&head))
    }

    /// 验证配置兼容性（无哈希时跳过）
    pub fn verify_config(&self, expected_hash: u64) -> CheckpointResult<()> {
        match self.config_hash {
            Some(found) if found != expected_hash => Err(CheckpointError::ConfigMismatch {
                expected: expected_hash,
                found,
            }),
            _ => Ok(()),
        }
    }
}

/// 计算 CRC32 校验和（IEEE 多项式）
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = CRC32_TABLE[index] ^ (crc >> 8);
    }
    !crc
}

/// 生成 CRC32 查找表（编译期计算）
const fn generate_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = 0xEDB88320 ^ (crc >> 1);
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32 查找表
const CRC32_TABLE: [u32; 256] = generate_crc32_table();

// ============================================================
// 检查点管理器
// ============================================================

/// 检查点管理器
///
/// 在一个目录中按窗口序号保存检查点，只保留最新的若干个。
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    directory: PathBuf,
    keep: usize,
    prefix: String,
}

impl CheckpointManager {
    /// 创建新的管理器
    pub fn new(directory: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            directory: directory.into(),
            keep: keep.max(1),
            prefix: "checkpoint".to_string(),
        }
    }

    /// 设置文件名前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 检查点目录
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 保存检查点
    pub fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<PathBuf> {
        std::fs::create_dir_all(&self.directory)?;
        let filename = format!("{}_{:08}.{}", self.prefix, checkpoint.step, CHECKPOINT_EXTENSION);
        let path = self.directory.join(filename);
        checkpoint.save(&path)?;
        self.cleanup()?;
        Ok(path)
    }

    /// 加载最新的检查点
    pub fn load_latest(&self) -> CheckpointResult<Option<Checkpoint>> {
        let latest = self
            .list_checkpoints()?
            .into_iter()
            .max_by_key(|(_, header)| header.step);
        match latest {
            Some((path, _)) => Ok(Some(Checkpoint::load(&path)?)),
            None => Ok(None),
        }
    }

    /// 列出所有检查点（按窗口序号升序）
    pub fn list_checkpoints(&self) -> CheckpointResult<Vec<(PathBuf, CheckpointHeader)>> {
        let mut results = Vec::new();
        if !self.directory.exists() {
            return Ok(results);
        }

        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == CHECKPOINT_EXTENSION) {
                match Checkpoint::read_header(&path) {
                    Ok(header) => results.push((path, header)),
                    Err(e) => warn!(path = %path.display(), "跳过无法读取的检查点: {}", e),
                }
            }
        }
        results.sort_by_key(|(_, header)| header.step);
        Ok(results)
    }

    /// 清理旧检查点
    fn cleanup(&self) -> CheckpointResult<()> {
        let entries = self.list_checkpoints()?;
        if entries.len() <= self.keep {
            return Ok(());
        }
        let to_remove = entries.len() - self.keep;
        for (path, _) in entries.into_iter().take(to_remove) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), "删除旧检查点失败: {}", e);
            }
        }
        Ok(())
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        elevation: Vec<f64>,
        label: String,
    }

    fn payload() -> Payload {
        Payload {
            elevation: vec![0.5, 1.0, 1.5],
            label: "beach".to_string(),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cm_io_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_checkpoint_save_load() {
        let dir = temp_dir("save_load");
        let path = dir.join("test.cmck");

        let checkpoint = Checkpoint::from_payload(10.5, 100, &payload()).unwrap().with_config_hash(12345);
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert!((loaded.time - 10.5).abs() < 1e-10);
        assert_eq!(loaded.step, 100);
        assert_eq!(loaded.config_hash, Some(12345));
        assert_eq!(loaded.payload::<Payload>().unwrap(), payload());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_read_header() {
        let dir = temp_dir("header");
        let path = dir.join("test.cmck");
        let checkpoint = Checkpoint::from_payload(25.0, 250, &payload()).unwrap();
        checkpoint.save(&path).unwrap();

        let header = Checkpoint::read_header(&path).unwrap();
        assert!((header.time - 25.0).abs() < 1e-10);
        assert_eq!(header.step, 250);
        assert_eq!(header.config_hash, None);
        assert_eq!(header.payload_len as usize, checkpoint.payload_len());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corruption_detected() {
        let checkpoint = Checkpoint::from_payload(1.0, 1, &payload()).unwrap();
        let mut bytes = checkpoint.to_bytes();
        let mid = HEADER_LEN + 3;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(CheckpointError::Checksum { .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let checkpoint = Checkpoint::from_payload(1.0, 1, &payload()).unwrap();
        let mut bytes = checkpoint.to_bytes();
        bytes[0] = b'X';
        let n = bytes.len();
        let crc = compute_crc32(&bytes[..n - 4]);
        bytes[n - 4..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(Checkpoint::from_bytes(&bytes), Err(CheckpointError::Format(_))));
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(
            Checkpoint::from_bytes(&[0u8; 10]),
            Err(CheckpointError::Format(_))
        ));
    }

    #[test]
    fn test_verify_config() {
        let checkpoint = Checkpoint::from_payload(0.0, 0, &payload()).unwrap().with_config_hash(7);
        assert!(checkpoint.verify_config(7).is_ok());
        assert!(matches!(
            checkpoint.verify_config(8),
            Err(CheckpointError::ConfigMismatch { expected: 8, found: 7 })
        ));
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_manager_keeps_newest() {
        let dir = temp_dir("manager");
        let manager = CheckpointManager::new(&dir, 2);
        for step in [0u64, 10, 20, 30] {
            let checkpoint = Checkpoint::from_payload(step as f64, step, &payload()).unwrap();
            manager.save(&checkpoint).unwrap();
        }

        let list = manager.list_checkpoints().unwrap();
        let steps: Vec<u64> = list.iter().map(|(_, h)| h.step).collect();
        assert_eq!(steps, vec![20, 30]);
        assert_eq!(manager.load_latest().unwrap().unwrap().step, 30);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_manager_empty_directory() {
        let dir = temp_dir("empty");
        let manager = CheckpointManager::new(&dir, 3);
        assert!(manager.load_latest().unwrap().is_none());
    }
}
