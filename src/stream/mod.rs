//! Case 流水线：拉式单消费者 reader 与可组合的变换级
//!
//! ```text
//! MemoryReader ─▶ FilterReader ─▶ ProjectReader ─▶ TransformReader ─▶ ...
//!                                                  （leave 槽位在此）
//! ```
//!
//! 流动期间字典以 `Arc` 冻结；重塑级（投影）持有自己克隆出的新字典。

use crate::case::Case;
use crate::common::Result;
use crate::dictionary::Dictionary;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Arc;

pub mod sort;
pub mod spill;
pub mod window;

// ── CaseReader ────────────────────────────────────────────────────────────────

/// 拉式 case 读取端。单消费者：一个 reader 同一时刻只被一个调用方驱动。
pub trait CaseReader {
    fn dictionary(&self) -> &Arc<Dictionary>;
    /// 取下一个 case；流尽返回 `None`
    fn next_case(&mut self) -> Result<Option<Case>>;
}

impl CaseReader for Box<dyn CaseReader> {
    fn dictionary(&self) -> &Arc<Dictionary> {
        (**self).dictionary()
    }
    fn next_case(&mut self) -> Result<Option<Case>> {
        (**self).next_case()
    }
}

impl<R: CaseReader + ?Sized> CaseReader for &mut R {
    fn dictionary(&self) -> &Arc<Dictionary> {
        (**self).dictionary()
    }
    fn next_case(&mut self) -> Result<Option<Case>> {
        (**self).next_case()
    }
}

/// 把 reader 余下的 case 全部收集进内存（测试与小数据集用）
pub fn collect<R: CaseReader>(mut reader: R) -> Result<Vec<Case>> {
    let mut out = Vec::new();
    while let Some(c) = reader.next_case()? {
        out.push(c);
    }
    Ok(out)
}

// ── 内存生产者 ────────────────────────────────────────────────────────────────

pub struct MemoryReader {
    dict:  Arc<Dictionary>,
    cases: VecDeque<Case>,
}

impl MemoryReader {
    pub fn new(dict: Arc<Dictionary>, cases: Vec<Case>) -> Self {
        Self { dict, cases: cases.into() }
    }
}

impl CaseReader for MemoryReader {
    fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }
    fn next_case(&mut self) -> Result<Option<Case>> {
        Ok(self.cases.pop_front())
    }
}

// ── 过滤级 ────────────────────────────────────────────────────────────────────

/// 谓词为真的 case 通过；不改变字典与相对顺序
pub struct FilterReader<R, F> {
    inner: R,
    pred:  F,
}

impl<R: CaseReader, F: FnMut(&Case, &Dictionary) -> bool> FilterReader<R, F> {
    pub fn new(inner: R, pred: F) -> Self {
        Self { inner, pred }
    }
}

impl<R: CaseReader, F: FnMut(&Case, &Dictionary) -> bool> CaseReader for FilterReader<R, F> {
    fn dictionary(&self) -> &Arc<Dictionary> {
        self.inner.dictionary()
    }
    fn next_case(&mut self) -> Result<Option<Case>> {
        while let Some(c) = self.inner.next_case()? {
            if (self.pred)(&c, self.inner.dictionary()) {
                return Ok(Some(c));
            }
        }
        Ok(None)
    }
}

// ── 投影级 ────────────────────────────────────────────────────────────────────

/// 列投影：输出克隆重塑后的新字典，值按映射重排
pub struct ProjectReader<R> {
    inner:   R,
    dict:    Arc<Dictionary>,
    mapping: Vec<usize>,
}

impl<R: CaseReader> ProjectReader<R> {
    pub fn keep(inner: R, names: &[&str]) -> Result<Self> {
        let (dict, mapping) = inner.dictionary().keep(names)?;
        Ok(Self { inner, dict: Arc::new(dict), mapping })
    }

    pub fn drop(inner: R, names: &[&str]) -> Result<Self> {
        // 经 as_ref 取 &Dictionary，避免方法解析撞上 Arc 的析构器
        let (dict, mapping) = inner.dictionary().as_ref().drop(names)?;
        Ok(Self { inner, dict: Arc::new(dict), mapping })
    }
}

impl<R: CaseReader> CaseReader for ProjectReader<R> {
    fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }
    fn next_case(&mut self) -> Result<Option<Case>> {
        Ok(self.inner.next_case()?.map(|c| {
            Case::new(self.mapping.iter().map(|&i| c.values[i].clone()).collect())
        }))
    }
}

// ── 变换级 ────────────────────────────────────────────────────────────────────

/// 就地重算 case 的变换级，同时持有 leave 变量的跨 case 槽位：
/// 流起点按 [`crate::variable::Variable::initial_value`] 初始化一次，
/// 每个进入的 case 先注入上一个 case 留下的值，闭包跑完后再收回。
pub struct TransformReader<R, F> {
    inner:   R,
    xform:   F,
    /// (变量下标, 当前保留值)
    carried: Vec<(usize, Value)>,
}

impl<R: CaseReader, F: FnMut(&mut Case, &Dictionary) -> Result<()>> TransformReader<R, F> {
    pub fn new(inner: R, xform: F) -> Self {
        let carried = inner
            .dictionary()
            .vars()
            .iter()
            .enumerate()
            .filter(|(_, v)| v.leave)
            .map(|(i, v)| (i, v.initial_value()))
            .collect();
        Self { inner, xform, carried }
    }
}

impl<R: CaseReader, F: FnMut(&mut Case, &Dictionary) -> Result<()>> CaseReader
    for TransformReader<R, F>
{
    fn dictionary(&self) -> &Arc<Dictionary> {
        self.inner.dictionary()
    }

    fn next_case(&mut self) -> Result<Option<Case>> {
        let mut case = match self.inner.next_case()? {
            Some(c) => c,
            None => return Ok(None),
        };
        for (idx, v) in &self.carried {
            case.values[*idx] = v.clone();
        }
        (self.xform)(&mut case, self.inner.dictionary())?;
        for (idx, v) in &mut self.carried {
            *v = case.values[*idx].clone();
        }
        Ok(Some(case))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    fn dict_xy() -> Arc<Dictionary> {
        Arc::new(
            Dictionary::with_vars(vec![Variable::numeric("x"), Variable::numeric("y")]).unwrap(),
        )
    }

    fn cases_n(n: usize) -> Vec<Case> {
        (0..n)
            .map(|i| Case::new(vec![Value::Number(i as f64), Value::sysmis()]))
            .collect()
    }

    #[test]
    fn transform_conserves_count_and_order() {
        let dict = dict_xy();
        let reader = MemoryReader::new(dict, cases_n(100));
        let doubled = TransformReader::new(reader, |c, d| {
            let i = d.index_of("x")?;
            if let Value::Number(v) = c.values[i] {
                c.values[i] = Value::Number(v * 2.0);
            }
            Ok(())
        });
        let out = collect(doubled).unwrap();
        assert_eq!(out.len(), 100);
        for (i, c) in out.iter().enumerate() {
            assert_eq!(c.values[0], Value::Number(i as f64 * 2.0));
        }
    }

    #[test]
    fn filter_preserves_relative_order() {
        let dict = dict_xy();
        let reader = MemoryReader::new(dict, cases_n(10));
        let evens = FilterReader::new(reader, |c, _| {
            matches!(c.values[0], Value::Number(v) if (v as i64) % 2 == 0)
        });
        let out = collect(evens).unwrap();
        let xs: Vec<f64> = out.iter().filter_map(|c| c.values[0].as_number()).collect();
        assert_eq!(xs, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn project_reshapes_dictionary() {
        let dict = dict_xy();
        let reader = MemoryReader::new(dict, cases_n(3));
        let proj = ProjectReader::keep(reader, &["y", "x"]).unwrap();
        assert_eq!(proj.dictionary().var(0).name, "y");
        let out = collect(proj).unwrap();
        assert_eq!(out[2].values[1], Value::Number(2.0));
        assert!(out[2].values[0].is_sysmis());
    }

    #[test]
    fn project_drop_removes_columns() {
        let dict = dict_xy();
        let reader = MemoryReader::new(dict, cases_n(3));
        let proj = ProjectReader::drop(reader, &["y"]).unwrap();
        assert_eq!(proj.dictionary().len(), 1);
        assert_eq!(proj.dictionary().var(0).name, "x");
        let out = collect(proj).unwrap();
        assert_eq!(out[2].values, vec![Value::Number(2.0)]);
    }

    #[test]
    fn leave_slot_carries_across_cases() {
        let dict = Arc::new(
            Dictionary::with_vars(vec![
                Variable::numeric("x"),
                Variable::numeric("total").leave(),
            ])
            .unwrap(),
        );
        let input: Vec<Case> = (1..=4)
            .map(|i| Case::new(vec![Value::Number(i as f64), Value::sysmis()]))
            .collect();
        let reader = MemoryReader::new(dict, input);
        // 累加器：total += x，leave 槽位负责跨 case 传递
        let running = TransformReader::new(reader, |c, _| {
            let x = c.values[0].as_number().unwrap_or(0.0);
            let t = c.values[1].as_number().unwrap_or(0.0);
            c.values[1] = Value::Number(t + x);
            Ok(())
        });
        let out = collect(running).unwrap();
        let totals: Vec<f64> = out.iter().filter_map(|c| c.values[1].as_number()).collect();
        assert_eq!(totals, vec![1.0, 3.0, 6.0, 10.0]);
    }
}
