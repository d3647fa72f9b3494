//! 字典：有序、名称唯一的变量集合，外加权重变量与文档

use crate::common::{EngineError, Result};
use crate::value::Value;
use crate::variable::Variable;
use std::collections::HashMap;

/// 一条 case 流对应的模式。流动期间字典被 `Arc` 冻结，
/// 重塑操作（keep / drop / rename）一律克隆出新字典。
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    vars:       Vec<Variable>,
    by_name:    HashMap<String, usize>,
    weight_idx: Option<usize>,
    /// 文档行（系统文件 type 6 记录，每行 80 字节）
    pub documents: Vec<String>,
    /// 文件标签（系统文件头的 64 字节字段）
    pub file_label: Option<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vars(vars: Vec<Variable>) -> Result<Self> {
        let mut dict = Self::new();
        for v in vars {
            dict.push(v)?;
        }
        Ok(dict)
    }

    /// 追加一个变量；名称重复是配置错误
    pub fn push(&mut self, var: Variable) -> Result<usize> {
        if var.width > 255 {
            return Err(EngineError::BadDictionary(format!(
                "string width {} exceeds 255 for {}", var.width, var.name
            )));
        }
        if self.by_name.contains_key(&var.name) {
            return Err(EngineError::DuplicateVariable(var.name));
        }
        let idx = self.vars.len();
        self.by_name.insert(var.name.clone(), idx);
        self.vars.push(var);
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn var(&self, idx: usize) -> &Variable {
        &self.vars[idx]
    }

    pub fn vars(&self) -> &[Variable] {
        &self.vars
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::VariableNotFound(name.into()))
    }

    pub fn lookup(&self, name: &str) -> Result<&Variable> {
        Ok(&self.vars[self.index_of(name)?])
    }

    // ── 权重 ──────────────────────────────────────────────────────────────────

    /// 设定权重变量；必须是数值变量
    pub fn set_weight(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        if !self.vars[idx].is_numeric() {
            return Err(EngineError::TypeMismatch(
                name.into(),
                "weight variable must be numeric".into(),
            ));
        }
        self.weight_idx = Some(idx);
        Ok(())
    }

    pub fn weight_index(&self) -> Option<usize> {
        self.weight_idx
    }

    // ── 重塑（克隆语义） ──────────────────────────────────────────────────────

    /// 仅保留给定变量（按给定顺序）的新字典
    pub fn keep(&self, names: &[&str]) -> Result<(Dictionary, Vec<usize>)> {
        let mut dict = Dictionary::new();
        let mut mapping = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.index_of(name)?;
            mapping.push(idx);
            dict.push(self.vars[idx].clone())?;
        }
        if let Some(w) = self.weight_idx {
            if let Some(pos) = mapping.iter().position(|&i| i == w) {
                dict.weight_idx = Some(pos);
            }
        }
        dict.documents = self.documents.clone();
        dict.file_label = self.file_label.clone();
        Ok((dict, mapping))
    }

    /// 去掉给定变量的新字典
    pub fn drop(&self, names: &[&str]) -> Result<(Dictionary, Vec<usize>)> {
        for name in names {
            self.index_of(name)?;
        }
        let kept: Vec<&str> = self
            .vars
            .iter()
            .map(|v| v.name.as_str())
            .filter(|n| !names.contains(n))
            .collect();
        self.keep(&kept)
    }

    /// 重命名一个变量的新字典
    pub fn rename(&self, old: &str, new: &str) -> Result<Dictionary> {
        let idx = self.index_of(old)?;
        if old != new && self.by_name.contains_key(new) {
            return Err(EngineError::DuplicateVariable(new.into()));
        }
        let mut dict = self.clone();
        dict.by_name.remove(old);
        dict.vars[idx].name = new.into();
        dict.by_name.insert(new.into(), idx);
        Ok(dict)
    }

    // ── case 相关 ─────────────────────────────────────────────────────────────

    /// 一个 case 按本字典的初始值（leave 语义见 [`Variable::initial_value`]）
    pub fn initial_case(&self) -> Vec<Value> {
        self.vars.iter().map(|v| v.initial_value()).collect()
    }

    /// 每个 case 在磁盘上的固定字节宽度（spill / window 用）
    pub fn case_stride(&self) -> usize {
        self.vars
            .iter()
            .map(|v| if v.width == 0 { 8 } else { v.width })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict3() -> Dictionary {
        Dictionary::with_vars(vec![
            Variable::numeric("a"),
            Variable::string("s", 4),
            Variable::numeric("w"),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut d = dict3();
        assert!(matches!(
            d.push(Variable::numeric("a")),
            Err(EngineError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn weight_must_be_numeric() {
        let mut d = dict3();
        assert!(d.set_weight("w").is_ok());
        assert!(matches!(
            d.set_weight("s"),
            Err(EngineError::TypeMismatch(..))
        ));
    }

    #[test]
    fn keep_reorders_and_remaps_weight() {
        let mut d = dict3();
        d.set_weight("w").unwrap();
        let (kept, mapping) = d.keep(&["w", "a"]).unwrap();
        assert_eq!(mapping, vec![2, 0]);
        assert_eq!(kept.weight_index(), Some(0));
        assert_eq!(kept.var(1).name, "a");
    }

    #[test]
    fn rename_keeps_order() {
        let d = dict3();
        let r = d.rename("s", "txt").unwrap();
        assert_eq!(r.var(1).name, "txt");
        assert!(r.index_of("s").is_err());
        assert!(d.index_of("s").is_ok());
        assert!(matches!(
            d.rename("a", "w"),
            Err(EngineError::DuplicateVariable(_))
        ));
    }
}
