//! 变量：名称、宽度、输出格式、用户缺失值与 leave 角色

use crate::value::{cmp_padded, Value, SYSMIS};
use std::cmp::Ordering;

// ── 输出格式 ──────────────────────────────────────────────────────────────────

/// 输出格式类别（系统文件中按固定编号存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatType {
    /// 标准数值
    F,
    /// 科学计数
    E,
    /// 千分位分组
    Comma,
    /// 字符串
    A,
}

impl FormatType {
    /// 系统文件 print/write 字段里的类别编号
    pub fn sys_code(self) -> u8 {
        match self {
            FormatType::A     => 1,
            FormatType::Comma => 3,
            FormatType::F     => 5,
            FormatType::E     => 17,
        }
    }

    pub fn from_sys_code(code: u8) -> Option<Self> {
        match code {
            1  => Some(FormatType::A),
            3  => Some(FormatType::Comma),
            5  => Some(FormatType::F),
            17 => Some(FormatType::E),
            _  => None,
        }
    }
}

/// 显示格式：类别 + 总宽 + 小数位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    pub type_: FormatType,
    pub w:     u8,
    pub d:     u8,
}

impl Format {
    pub fn new(type_: FormatType, w: u8, d: u8) -> Self {
        Self { type_, w, d }
    }

    /// 数值变量的默认格式 F8.2
    pub fn default_numeric() -> Self {
        Self::new(FormatType::F, 8, 2)
    }

    /// 宽度为 `width` 的字符串默认格式
    pub fn default_string(width: usize) -> Self {
        Self::new(FormatType::A, width.min(255) as u8, 0)
    }
}

// ── 用户缺失值 ────────────────────────────────────────────────────────────────

/// 数值区间端点；`Lo`/`Hi` 表示开放端
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeEnd {
    Lo,
    Value(f64),
    Hi,
}

/// 用户缺失值声明。
/// 数值变量：至多三个离散值，或一个区间加至多一个离散值。
/// 字符串变量：至多三个离散值（与声明宽度等长比较）。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MissingValues {
    pub discrete: Vec<Value>,
    pub range:    Option<(RangeEnd, RangeEnd)>,
}

impl MissingValues {
    pub fn none() -> Self {
        Self::default()
    }

    /// 离散缺失值；超过三个时截断并告警
    pub fn discrete(values: Vec<Value>) -> Self {
        let mut discrete = values;
        if discrete.len() > 3 {
            log::warn!("more than 3 discrete missing values; keeping the first 3");
            discrete.truncate(3);
        }
        Self { discrete, range: None }
    }

    /// 数值区间（可附带一个离散值）；端点颠倒时交换并告警
    pub fn range(mut lo: RangeEnd, mut hi: RangeEnd, extra: Option<f64>) -> Self {
        if let (RangeEnd::Value(a), RangeEnd::Value(b)) = (lo, hi) {
            if a > b {
                log::warn!("reversed missing-value range {a}..{b}; endpoints swapped");
                lo = RangeEnd::Value(b);
                hi = RangeEnd::Value(a);
            }
        }
        let discrete = extra.map(|v| vec![Value::Number(v)]).unwrap_or_default();
        Self { discrete, range: Some((lo, hi)) }
    }

    pub fn is_empty(&self) -> bool {
        self.discrete.is_empty() && self.range.is_none()
    }

    /// 值是否命中本声明（不含系统缺失）
    pub fn contains(&self, value: &Value) -> bool {
        if let Some((lo, hi)) = &self.range {
            if let Value::Number(v) = value {
                if *v != SYSMIS {
                    let above = match lo {
                        RangeEnd::Lo       => true,
                        RangeEnd::Value(a) => *v >= *a,
                        RangeEnd::Hi       => false,
                    };
                    let below = match hi {
                        RangeEnd::Hi       => true,
                        RangeEnd::Value(b) => *v <= *b,
                        RangeEnd::Lo       => false,
                    };
                    if above && below {
                        return true;
                    }
                }
            }
        }
        self.discrete.iter().any(|m| match (m, value) {
            (Value::Str(a), Value::Str(b)) => cmp_padded(a, b) == Ordering::Equal,
            (a, b)                         => a == b,
        })
    }
}

// ── 变量 ──────────────────────────────────────────────────────────────────────

/// 字典中的一个变量
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name:    String,
    /// 0 = 数值；1..=255 = 字符串字节宽度
    pub width:   usize,
    pub label:   Option<String>,
    pub print:   Format,
    pub write:   Format,
    pub missing: MissingValues,
    /// 值标签（值 → 显示文本）
    pub value_labels: Vec<(Value, String)>,
    /// 跨 case 保留：流起点初始化一次，之后每个 case 继承上一个的值
    pub leave:   bool,
}

impl Variable {
    pub fn numeric(name: &str) -> Self {
        Self {
            name:    name.into(),
            width:   0,
            label:   None,
            print:   Format::default_numeric(),
            write:   Format::default_numeric(),
            missing: MissingValues::none(),
            value_labels: Vec::new(),
            leave:   false,
        }
    }

    pub fn string(name: &str, width: usize) -> Self {
        let fmt = Format::default_string(width);
        Self {
            name:    name.into(),
            width,
            label:   None,
            print:   fmt,
            write:   fmt,
            missing: MissingValues::none(),
            value_labels: Vec::new(),
            leave:   false,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_format(mut self, fmt: Format) -> Self {
        self.print = fmt;
        self.write = fmt;
        self
    }

    pub fn with_missing(mut self, missing: MissingValues) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_value_label(mut self, value: Value, label: &str) -> Self {
        self.value_labels.push((value, label.into()));
        self
    }

    pub fn leave(mut self) -> Self {
        self.leave = true;
        self
    }

    pub fn is_numeric(&self) -> bool {
        self.width == 0
    }

    /// 值对本变量是否缺失（系统缺失或用户缺失）
    pub fn is_missing(&self, value: &Value) -> bool {
        value.is_sysmis() || self.missing.contains(value)
    }

    /// 流起点的初始值：数值 leave 变量为 0，其余为系统缺失；字符串为空格
    pub fn initial_value(&self) -> Value {
        if self.width > 0 {
            Value::string(b"", self.width)
        } else if self.leave {
            Value::Number(0.0)
        } else {
            Value::sysmis()
        }
    }

    /// 数据区中占用的 8 字节元素个数
    pub fn element_count(&self) -> usize {
        if self.width == 0 { 1 } else { (self.width + 7) / 8 }
    }
}
