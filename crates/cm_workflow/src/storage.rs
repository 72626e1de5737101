// crates/cm_workflow/src/storage.rs

//! 检查点存储
//!
//! 编排器只依赖 [`CheckpointStore`] trait：
//!
//! - [`MemoryCheckpointStore`]: 内存中保留最近 N 个检查点（测试与无目录运行）
//! - [`FileCheckpointStore`]: 通过 [`CheckpointManager`] 写入目录

use std::collections::VecDeque;
use std::path::PathBuf;

use cm_io::{Checkpoint, CheckpointManager, CheckpointResult};
use parking_lot::RwLock;

/// 检查点存储trait
pub trait CheckpointStore: Send + Sync {
    /// 保存检查点，返回文件路径（若有）
    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<Option<PathBuf>>;

    /// 最新检查点
    fn latest(&self) -> CheckpointResult<Option<Checkpoint>>;

    /// 存储描述（用于日志）
    fn describe(&self) -> String;
}

/// 内存检查点存储
#[derive(Debug)]
pub struct MemoryCheckpointStore {
    keep: usize,
    checkpoints: RwLock<VecDeque<Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// 创建，保留最近 `keep` 个
    pub fn new(keep: usize) -> Self {
        Self {
            keep: keep.max(1),
            checkpoints: RwLock::new(VecDeque::new()),
        }
    }

    /// 当前保留的数量
    pub fn len(&self) -> usize {
        self.checkpoints.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.checkpoints.read().is_empty()
    }

    /// 保留的窗口序号
    pub fn steps(&self) -> Vec<u64> {
        self.checkpoints.read().iter().map(|c| c.step).collect()
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<Option<PathBuf>> {
        let mut checkpoints = self.checkpoints.write();
        checkpoints.push_back(checkpoint.clone());
        while checkpoints.len() > self.keep {
            checkpoints.pop_front();
        }
        Ok(None)
    }

    fn latest(&self) -> CheckpointResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().back().cloned())
    }

    fn describe(&self) -> String {
        format!("memory(keep={})", self.keep)
    }
}

/// 文件检查点存储
#[derive(Debug)]
pub struct FileCheckpointStore {
    manager: CheckpointManager,
}

impl FileCheckpointStore {
    /// 在目录中创建
    pub fn new(directory: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            manager: CheckpointManager::new(directory, keep),
        }
    }

    /// 内部管理器
    pub fn manager(&self) -> &CheckpointManager {
        &self.manager
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<Option<PathBuf>> {
        self.manager.save(checkpoint).map(Some)
    }

    fn latest(&self) -> CheckpointResult<Option<Checkpoint>> {
        self.manager.load_latest()
    }

    fn describe(&self) -> String {
        format!("file({})", self.manager.directory().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(step: u64) -> Checkpoint {
        Checkpoint::from_payload(step as f64 * 10.0, step, &vec![step]).unwrap()
    }

    #[test]
    fn test_memory_store_keeps_latest() {
        let store = MemoryCheckpointStore::new(2);
        assert!(store.latest().unwrap().is_none());
        for step in 0..4 {
            assert!(store.save(&checkpoint(step)).unwrap().is_none());
        }
        assert_eq!(store.steps(), vec![2, 3]);
        assert_eq!(store.latest().unwrap().unwrap().step, 3);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("cm_workflow_store_{}", std::process::id()));
        let store = FileCheckpointStore::new(&dir, 2);
        let path = store.save(&checkpoint(5)).unwrap();
        assert!(path.is_some());
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.step, 5);
        let payload: Vec<u64> = latest.payload().unwrap();
        assert_eq!(payload, vec![5]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
