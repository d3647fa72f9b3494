//! 单元格值：数值（含系统缺失哨兵）与定宽字符串

use std::cmp::Ordering;

/// 系统缺失值哨兵。任何比较中都排在一切有效数值之下。
pub const SYSMIS: f64 = -f64::MAX;

/// 运行时单元格值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 数值；`SYSMIS` 表示系统缺失
    Number(f64),
    /// 定宽字节串，长度恒等于变量声明宽度（右侧空格填充）
    Str(Vec<u8>),
}

impl Value {
    /// 系统缺失数值
    pub fn sysmis() -> Self {
        Value::Number(SYSMIS)
    }

    pub fn is_sysmis(&self) -> bool {
        matches!(self, Value::Number(v) if *v == SYSMIS)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self { Value::Number(v) => Some(*v), _ => None }
    }

    pub fn as_str(&self) -> Option<&[u8]> {
        match self { Value::Str(b) => Some(b), _ => None }
    }

    /// 构造宽度为 `width` 的字符串值；超宽截断，不足补空格
    pub fn string(data: &[u8], width: usize) -> Self {
        let mut buf = vec![b' '; width];
        let n = data.len().min(width);
        buf[..n].copy_from_slice(&data[..n]);
        Value::Str(buf)
    }

    /// 估算值驻留内存的字节数（用于工作区预算）
    pub fn heap_size(&self) -> usize {
        match self {
            Value::Number(_) => 8,
            Value::Str(b)    => b.len(),
        }
    }

    /// 排序比较。数值：系统缺失最小，其余按大小；NaN 夹在缺失与有效值之间。
    /// 字符串：较短一侧右补空格后逐字节比较。数值与字符串不混比（契约保证）。
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => cmp_number(*a, *b),
            (Value::Str(a), Value::Str(b))       => cmp_padded(a, b),
            // 字典冻结期间同一列类型不变，仅在契约被破坏时到达
            (Value::Number(_), Value::Str(_))    => Ordering::Less,
            (Value::Str(_), Value::Number(_))    => Ordering::Greater,
        }
    }
}

fn cmp_number(a: f64, b: f64) -> Ordering {
    match (a == SYSMIS, b == SYSMIS) {
        (true, true)   => Ordering::Equal,
        (true, false)  => Ordering::Less,
        (false, true)  => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or_else(|| {
            match (a.is_nan(), b.is_nan()) {
                (true, true)  => Ordering::Equal,
                (true, false) => Ordering::Less,
                _             => Ordering::Greater,
            }
        }),
    }
}

/// 右补空格后的逐字节比较
pub fn cmp_padded(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().max(b.len());
    for i in 0..n {
        let ca = a.get(i).copied().unwrap_or(b' ');
        let cb = b.get(i).copied().unwrap_or(b' ');
        match ca.cmp(&cb) {
            Ordering::Equal => continue,
            ord             => return ord,
        }
    }
    Ordering::Equal
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(v) if *v == SYSMIS => write!(f, "."),
            Value::Number(v)                 => write!(f, "{v}"),
            Value::Str(b) => write!(f, "{}", String::from_utf8_lossy(b).trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysmis_sorts_below_everything() {
        assert_eq!(Value::sysmis().compare(&Value::Number(-1e300)), Ordering::Less);
        assert_eq!(Value::Number(0.0).compare(&Value::sysmis()), Ordering::Greater);
        assert_eq!(Value::sysmis().compare(&Value::sysmis()), Ordering::Equal);
    }

    #[test]
    fn string_compare_pads_shorter_operand() {
        let a = Value::string(b"abc", 3);
        let b = Value::string(b"abc", 8);
        assert_eq!(a.compare(&b), Ordering::Equal);
        let c = Value::string(b"abd", 4);
        assert_eq!(a.compare(&c), Ordering::Less);
    }

    #[test]
    fn string_ctor_truncates_and_pads() {
        assert_eq!(Value::string(b"hello", 3), Value::Str(b"hel".to_vec()));
        assert_eq!(Value::string(b"hi", 4), Value::Str(b"hi  ".to_vec()));
    }
}
