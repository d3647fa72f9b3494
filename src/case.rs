//! Case：符合某个字典的一行数据

use crate::dictionary::Dictionary;
use crate::value::Value;

/// 一行数据。值的顺序与字典变量顺序一一对应。
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub values: Vec<Value>,
}

impl Case {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    /// 本 case 的权重。无权重变量时为 1.0；
    /// 缺失或非正的权重按 1.0 处理并告警。
    pub fn weight(&self, dict: &Dictionary) -> f64 {
        match dict.weight_index() {
            None => 1.0,
            Some(idx) => match &self.values[idx] {
                // SYSMIS 为负值，w > 0.0 一并排除
                Value::Number(w) if !w.is_nan() && *w > 0.0 => *w,
                _ => {
                    log::warn!("missing or nonpositive case weight treated as 1.0");
                    1.0
                }
            },
        }
    }

    /// 估算驻留内存的字节数（工作区预算用）
    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Value>() * self.values.len()
            + self.values.iter().map(Value::heap_size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    #[test]
    fn weight_defaults_and_normalizes() {
        let mut dict = Dictionary::with_vars(vec![
            Variable::numeric("x"),
            Variable::numeric("w"),
        ])
        .unwrap();

        let c = Case::new(vec![Value::Number(1.0), Value::Number(2.5)]);
        assert_eq!(c.weight(&dict), 1.0);

        dict.set_weight("w").unwrap();
        assert_eq!(c.weight(&dict), 2.5);

        let neg = Case::new(vec![Value::Number(1.0), Value::Number(-3.0)]);
        assert_eq!(neg.weight(&dict), 1.0);
        let mis = Case::new(vec![Value::Number(1.0), Value::sysmis()]);
        assert_eq!(mis.weight(&dict), 1.0);
    }
}
