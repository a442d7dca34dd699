//! 检测时间轴缓冲 (Detection Buffer)
//!
//! 每个类别一条布尔时间序列, 长度等于可寻址帧数。
//! 唯一写入方是分析线程; 渲染/评估线程随时读取。
//! 每个元素是一个 AtomicBool, 单个布尔的读写无需加锁;
//! RwLock 只在 init 重新分配时以写方式持有。

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct DetectionBuffer {
    cells: RwLock<Vec<AtomicBool>>,
    ignored_writes: AtomicUsize, // 越界写入计数
}

impl DetectionBuffer {
    pub fn new(total_frames: usize) -> Self {
        let buffer = Self::default();
        buffer.init(total_frames);
        buffer
    }

    /// 重新分配为全 false, 替换原有内容
    pub fn init(&self, total_frames: usize) {
        let fresh = (0..total_frames).map(|_| AtomicBool::new(false)).collect();
        *self.cells.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.ignored_writes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.read_cells().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入一帧; 越界写入被忽略并计数
    pub fn mark(&self, index: usize, value: bool) {
        let cells = self.read_cells();
        match cells.get(index) {
            Some(cell) => cell.store(value, Ordering::Relaxed),
            None => {
                self.ignored_writes.fetch_add(1, Ordering::Relaxed);
                debug!("越界写入被忽略: {} (len {})", index, cells.len());
            }
        }
    }

    /// 读取一帧; 越界返回 OutOfRange
    pub fn get(&self, index: usize) -> Result<bool> {
        let cells = self.read_cells();
        cells
            .get(index)
            .map(|c| c.load(Ordering::Relaxed))
            .ok_or(Error::OutOfRange {
                index,
                len: cells.len(),
            })
    }

    /// 区间内 true 的个数 (区间裁剪到缓冲长度)
    pub fn query(&self, range: Range<usize>) -> usize {
        let cells = self.read_cells();
        let end = range.end.min(cells.len());
        let start = range.start.min(end);
        cells[start..end]
            .iter()
            .filter(|c| c.load(Ordering::Relaxed))
            .count()
    }

    /// 闭区间 [start, end] 内是否存在 true
    pub fn any_in(&self, start: usize, end: usize) -> bool {
        self.query(start..end.saturating_add(1)) > 0
    }

    pub fn count_true(&self) -> usize {
        self.query(0..usize::MAX)
    }

    /// 只读快照
    pub fn snapshot(&self) -> Vec<bool> {
        self.read_cells()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn ignored_writes(&self) -> usize {
        self.ignored_writes.load(Ordering::Relaxed)
    }

    fn read_cells(&self) -> std::sync::RwLockReadGuard<'_, Vec<AtomicBool>> {
        self.cells.read().unwrap_or_else(|e| e.into_inner())
    }
}
