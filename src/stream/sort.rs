//! 工作区预算内的稳定外排序
//!
//! 读入缓冲直到估算字节数超出预算；缓冲内 `sort_by` 稳定排序后整体
//! spill 成一个 run（lz4 + CRC 分块，见 [`super::spill`]）；全部读完后
//! 若从未 spill 则直接吐内存缓冲，否则把所有 run 用二叉堆做 k 路归并。
//! 等键时按 run 编号出堆 —— run 按输入先后生成、run 内自身稳定，
//! 因此归并整体稳定，重复排序幂等。

use crate::case::Case;
use crate::common::{EngineConfig, Result};
use crate::dictionary::Dictionary;
use crate::stream::spill::{RunReader, RunWriter};
use crate::stream::CaseReader;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

// ── 排序准则 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// 一条排序键：变量名 + 方向
#[derive(Debug, Clone)]
pub struct SortKey {
    pub name:      String,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(name: &str) -> Self {
        Self { name: name.into(), direction: Direction::Ascending }
    }
    pub fn desc(name: &str) -> Self {
        Self { name: name.into(), direction: Direction::Descending }
    }
}

/// 多级排序准则
#[derive(Debug, Clone)]
pub struct SortCriteria {
    pub keys: Vec<SortKey>,
}

impl SortCriteria {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// 解析成 (变量下标, 方向) 序列；未知变量名是配置错误
    pub fn resolve(&self, dict: &Dictionary) -> Result<Vec<(usize, Direction)>> {
        self.keys
            .iter()
            .map(|k| Ok((dict.index_of(&k.name)?, k.direction)))
            .collect()
    }
}

/// 按已解析准则比较两个 case。数值：系统缺失排最前；
/// 字符串：短侧右补空格逐字节比较。键全等返回 `Equal`（稳定性交给调用方）。
pub fn compare_cases(a: &Case, b: &Case, resolved: &[(usize, Direction)]) -> Ordering {
    for &(idx, dir) in resolved {
        let ord = a.values[idx].compare(&b.values[idx]);
        let ord = match dir {
            Direction::Ascending  => ord,
            Direction::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

// ── 外排序 ────────────────────────────────────────────────────────────────────

/// 对 `reader` 的全部 case 做稳定排序，返回新的排序后 reader。
/// 输入在预算内时全程不触盘。
pub fn sort_cases<R: CaseReader>(
    mut reader: R,
    criteria:   &SortCriteria,
    config:     &EngineConfig,
) -> Result<SortedReader> {
    let dict = reader.dictionary().clone();
    let resolved = Rc::new(criteria.resolve(&dict)?);

    let mut buffer: Vec<Case> = Vec::new();
    let mut buffer_bytes = 0usize;
    let mut runs: Vec<RunReader> = Vec::new();

    while let Some(case) = reader.next_case()? {
        buffer_bytes += case.heap_size();
        buffer.push(case);
        if buffer_bytes > config.workspace_bytes {
            runs.push(spill_run(&mut buffer, &dict, &resolved, config)?);
            buffer_bytes = 0;
        }
    }

    if runs.is_empty() {
        buffer.sort_by(|a, b| compare_cases(a, b, &resolved));
        return Ok(SortedReader { inner: Inner::Memory { dict, cases: buffer.into() } });
    }

    if !buffer.is_empty() {
        runs.push(spill_run(&mut buffer, &dict, &resolved, config)?);
    }

    // 每个 run 先压一个 case 进堆
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (run_idx, run) in runs.iter_mut().enumerate() {
        if let Some(case) = run.next_case()? {
            heap.push(Reverse(HeapEntry { case, run_idx, resolved: resolved.clone() }));
        }
    }
    Ok(SortedReader { inner: Inner::Merge { dict, runs, heap } })
}

fn spill_run(
    buffer:   &mut Vec<Case>,
    dict:     &Arc<Dictionary>,
    resolved: &[(usize, Direction)],
    config:   &EngineConfig,
) -> Result<RunReader> {
    buffer.sort_by(|a, b| compare_cases(a, b, resolved));
    let mut writer = RunWriter::new(dict.clone(), config.spill_compression)?;
    for case in buffer.iter() {
        writer.push(case)?;
    }
    buffer.clear();
    writer.finish()
}

// ── 归并堆 ────────────────────────────────────────────────────────────────────

struct HeapEntry {
    case:     Case,
    run_idx:  usize,
    resolved: Rc<Vec<(usize, Direction)>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_cases(&self.case, &other.case, &self.resolved)
            .then(self.run_idx.cmp(&other.run_idx))
    }
}

// ── 排序结果 reader ───────────────────────────────────────────────────────────

/// `sort_cases` 的输出：内存缓冲或磁盘 run 的 k 路归并
pub struct SortedReader {
    inner: Inner,
}

enum Inner {
    Memory {
        dict:  Arc<Dictionary>,
        cases: VecDeque<Case>,
    },
    Merge {
        dict: Arc<Dictionary>,
        runs: Vec<RunReader>,
        heap: BinaryHeap<Reverse<HeapEntry>>,
    },
}

impl CaseReader for SortedReader {
    fn dictionary(&self) -> &Arc<Dictionary> {
        match &self.inner {
            Inner::Memory { dict, .. } => dict,
            Inner::Merge { dict, .. }  => dict,
        }
    }

    fn next_case(&mut self) -> Result<Option<Case>> {
        match &mut self.inner {
            Inner::Memory { cases, .. } => Ok(cases.pop_front()),
            Inner::Merge { runs, heap, .. } => {
                let Reverse(entry) = match heap.pop() {
                    Some(e) => e,
                    None => return Ok(None),
                };
                if let Some(next) = runs[entry.run_idx].next_case()? {
                    heap.push(Reverse(HeapEntry {
                        case:     next,
                        run_idx:  entry.run_idx,
                        resolved: entry.resolved.clone(),
                    }));
                }
                Ok(Some(entry.case))
            }
        }
    }
}
