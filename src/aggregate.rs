//! 分组聚合引擎
//!
//! 按 break 变量把（必要时先内部排序的）case 流切成连续等键段，
//! 每段喂一组累加器，段边界一次性收束成输出行。支持逐项 / 整列
//! 两种缺失策略与替换 / 追加两种输出模式。输出写进预算内的
//! [`CaseWindow`]，以游标形式交给下游。

use crate::case::Case;
use crate::common::{EngineConfig, EngineError, Result};
use crate::dictionary::Dictionary;
use crate::order_stats::{accumulate_sorted, OrderStatistic, Percentile, PercentileAlgorithm};
use crate::stream::sort::{compare_cases, sort_cases, Direction, SortCriteria, SortKey};
use crate::stream::window::{CaseWindow, WindowCursor};
use crate::stream::CaseReader;
use crate::value::Value;
use crate::variable::Variable;
use std::cmp::Ordering;
use std::sync::Arc;

// ── 规格 ──────────────────────────────────────────────────────────────────────

/// 聚合函数。阈值参数随源变量类型取数值或字符串。
#[derive(Debug, Clone, PartialEq)]
pub enum AggFunction {
    /// 加权 case 数（可无源变量；有源时只数源非缺失的 case）
    N,
    /// 不加权 case 数（可无源变量）
    Nu,
    /// 加权缺失数
    NMiss,
    /// 不加权缺失数
    NuMiss,
    Sum,
    Mean,
    Sd,
    Min,
    Max,
    First,
    Last,
    /// 大于阈值的权重占比
    Fgt(Value),
    Flt(Value),
    /// 落在闭区间内的权重占比
    Fin(Value, Value),
    Fout(Value, Value),
    /// 占比 × 100
    Pgt(Value),
    Plt(Value),
    Pin(Value, Value),
    Pout(Value, Value),
    /// 满足条件的加权计数
    Cgt(Value),
    Clt(Value),
    Cin(Value, Value),
    Cout(Value, Value),
    Median,
    /// 目标比例 0..=1
    Percentile(f64),
}

impl AggFunction {
    fn requires_source(&self) -> bool {
        !matches!(self, AggFunction::N | AggFunction::Nu)
    }

    fn numeric_only(&self) -> bool {
        matches!(
            self,
            AggFunction::Sum
                | AggFunction::Mean
                | AggFunction::Sd
                | AggFunction::Median
                | AggFunction::Percentile(_)
        )
    }

    /// 输出变量继承源变量类型（其余输出一律数值）
    fn output_follows_source(&self) -> bool {
        matches!(
            self,
            AggFunction::Min | AggFunction::Max | AggFunction::First | AggFunction::Last
        )
    }

    /// 整列缺失策略不波及的四个计数函数
    fn columnwise_exempt(&self) -> bool {
        matches!(
            self,
            AggFunction::N | AggFunction::Nu | AggFunction::NMiss | AggFunction::NuMiss
        )
    }
}

/// 一条聚合输出：函数 + 可选源变量 + 输出变量名
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub name:     String,
    pub label:    Option<String>,
    pub source:   Option<String>,
    pub function: AggFunction,
}

impl AggregateSpec {
    pub fn new(name: &str, function: AggFunction, source: Option<&str>) -> Self {
        Self {
            name:   name.into(),
            label:  None,
            source: source.map(Into::into),
            function,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// 缺失只把该 case 排除出缺了输入的那个函数
    Itemwise,
    /// 任一聚合输入缺失即把该 case 排除出整组（计数四函数除外）
    Columnwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// 每组一行：break 值 + 聚合值
    Replace,
    /// 每个原始 case 一行，追加本组聚合值
    AddVariables,
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub missing:   MissingPolicy,
    pub mode:      OutputMode,
    /// 调用方保证输入已按 break 变量排好序
    pub presorted: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            missing:   MissingPolicy::Itemwise,
            mode:      OutputMode::Replace,
            presorted: false,
        }
    }
}

// ── 校验 ──────────────────────────────────────────────────────────────────────

struct ResolvedSpec {
    spec:    AggregateSpec,
    src_idx: Option<usize>,
}

fn check_threshold(var: &Variable, t: &Value) -> Result<()> {
    let ok = match t {
        Value::Number(_) => var.is_numeric(),
        Value::Str(_)    => !var.is_numeric(),
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::TypeMismatch(
            var.name.clone(),
            "aggregate threshold type does not match source variable".into(),
        ))
    }
}

/// 区间参数端点颠倒时交换并告警，保证输出确定
fn normalize_pair(lo: &mut Value, hi: &mut Value, name: &str) {
    if lo.compare(hi) == Ordering::Greater {
        log::warn!("reversed range arguments for {name}; swapped");
        std::mem::swap(lo, hi);
    }
}

fn resolve_specs(
    dict:  &Dictionary,
    specs: &[AggregateSpec],
) -> Result<Vec<ResolvedSpec>> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut spec = spec.clone();
        let src_idx = match &spec.source {
            Some(name) => {
                let idx = dict.index_of(name)?;
                let var = dict.var(idx);
                if spec.function.numeric_only() && !var.is_numeric() {
                    return Err(EngineError::TypeMismatch(
                        var.name.clone(),
                        "aggregate function requires a numeric source".into(),
                    ));
                }
                match &mut spec.function {
                    AggFunction::Fgt(t)
                    | AggFunction::Flt(t)
                    | AggFunction::Pgt(t)
                    | AggFunction::Plt(t)
                    | AggFunction::Cgt(t)
                    | AggFunction::Clt(t) => check_threshold(var, t)?,
                    AggFunction::Fin(lo, hi)
                    | AggFunction::Fout(lo, hi)
                    | AggFunction::Pin(lo, hi)
                    | AggFunction::Pout(lo, hi)
                    | AggFunction::Cin(lo, hi)
                    | AggFunction::Cout(lo, hi) => {
                        check_threshold(var, lo)?;
                        check_threshold(var, hi)?;
                        normalize_pair(lo, hi, &spec.name);
                    }
                    AggFunction::Percentile(p) => {
                        if !(0.0..=1.0).contains(p) {
                            return Err(EngineError::BadAggregateSpec(format!(
                                "percentile proportion {p} out of range for {}", spec.name
                            )));
                        }
                    }
                    _ => {}
                }
                Some(idx)
            }
            None => {
                if spec.function.requires_source() {
                    return Err(EngineError::BadAggregateSpec(format!(
                        "function for {} requires a source variable", spec.name
                    )));
                }
                None
            }
        };
        out.push(ResolvedSpec { spec, src_idx });
    }
    Ok(out)
}

/// 输出变量：Min/Max/First/Last 继承源类型，其余一律数值
fn output_variable(dict: &Dictionary, rs: &ResolvedSpec) -> Variable {
    let mut var = match rs.src_idx {
        Some(idx) if rs.spec.function.output_follows_source() && dict.var(idx).width > 0 => {
            Variable::string(&rs.spec.name, dict.var(idx).width)
        }
        _ => Variable::numeric(&rs.spec.name),
    };
    if let Some(label) = &rs.spec.label {
        var = var.with_label(label);
    }
    var
}

// ── 累加器 ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct AggState {
    /// 本函数收到贡献的权重 / 不加权计数
    w:       f64,
    u:       f64,
    miss_w:  f64,
    miss_u:  f64,
    /// 组内全部 case（无源 N/NU 用）
    total_w: f64,
    total_u: f64,
    sum:     f64,
    sq_sum:  f64,
    /// SUM 专用：见过至少一个值才输出数字
    seen:    bool,
    hit:     f64,
    held:    Option<Value>,
    pairs:   Vec<(f64, f64)>,
}

fn predicate_hit(function: &AggFunction, value: &Value) -> bool {
    let cmp = |t: &Value| value.compare(t);
    match function {
        AggFunction::Fgt(t) | AggFunction::Pgt(t) | AggFunction::Cgt(t) => {
            cmp(t) == Ordering::Greater
        }
        AggFunction::Flt(t) | AggFunction::Plt(t) | AggFunction::Clt(t) => {
            cmp(t) == Ordering::Less
        }
        AggFunction::Fin(lo, hi) | AggFunction::Pin(lo, hi) | AggFunction::Cin(lo, hi) => {
            cmp(lo) != Ordering::Less && cmp(hi) != Ordering::Greater
        }
        AggFunction::Fout(lo, hi) | AggFunction::Pout(lo, hi) | AggFunction::Cout(lo, hi) => {
            cmp(lo) == Ordering::Less || cmp(hi) == Ordering::Greater
        }
        _ => false,
    }
}

impl AggState {
    fn feed(
        &mut self,
        rs:          &ResolvedSpec,
        case:        &Case,
        weight:      f64,
        missing:     bool,
        poisoned:    bool,
    ) {
        self.total_w += weight;
        self.total_u += 1.0;
        if missing {
            self.miss_w += weight;
            self.miss_u += 1.0;
            return;
        }
        if poisoned && !rs.spec.function.columnwise_exempt() {
            return;
        }
        self.w += weight;
        self.u += 1.0;

        let value = match rs.src_idx {
            Some(idx) => &case.values[idx],
            None => return,
        };
        match &rs.spec.function {
            AggFunction::Sum | AggFunction::Mean | AggFunction::Sd => {
                if let Value::Number(x) = value {
                    self.sum += weight * x;
                    self.sq_sum += weight * x * x;
                    self.seen = true;
                }
            }
            AggFunction::Min => match &self.held {
                Some(m) if value.compare(m) != Ordering::Less => {}
                _ => self.held = Some(value.clone()),
            },
            AggFunction::Max => match &self.held {
                Some(m) if value.compare(m) != Ordering::Greater => {}
                _ => self.held = Some(value.clone()),
            },
            AggFunction::First => {
                if self.held.is_none() {
                    self.held = Some(value.clone());
                }
            }
            AggFunction::Last => self.held = Some(value.clone()),
            AggFunction::Median | AggFunction::Percentile(_) => {
                if let Value::Number(x) = value {
                    self.pairs.push((*x, weight));
                }
            }
            f => {
                if predicate_hit(f, value) {
                    self.hit += weight;
                }
            }
        }
    }

    fn finalize(&mut self, rs: &ResolvedSpec, dict: &Dictionary) -> Value {
        let missing_output = || match rs.src_idx {
            Some(idx) if rs.spec.function.output_follows_source() && dict.var(idx).width > 0 => {
                Value::string(b"", dict.var(idx).width)
            }
            _ => Value::sysmis(),
        };
        match &rs.spec.function {
            AggFunction::N => Value::Number(if rs.src_idx.is_some() { self.w } else { self.total_w }),
            AggFunction::Nu => Value::Number(if rs.src_idx.is_some() { self.u } else { self.total_u }),
            AggFunction::NMiss => Value::Number(self.miss_w),
            AggFunction::NuMiss => Value::Number(self.miss_u),
            AggFunction::Sum => {
                if self.seen { Value::Number(self.sum) } else { Value::sysmis() }
            }
            AggFunction::Mean => {
                if self.w > 0.0 { Value::Number(self.sum / self.w) } else { Value::sysmis() }
            }
            AggFunction::Sd => {
                if self.w > 1.0 {
                    let var = (self.sq_sum - self.sum * self.sum / self.w) / (self.w - 1.0);
                    Value::Number(var.max(0.0).sqrt())
                } else {
                    Value::sysmis()
                }
            }
            AggFunction::Min | AggFunction::Max | AggFunction::First | AggFunction::Last => {
                self.held.clone().unwrap_or_else(missing_output)
            }
            AggFunction::Fgt(_) | AggFunction::Flt(_) | AggFunction::Fin(..) | AggFunction::Fout(..) => {
                if self.w > 0.0 { Value::Number(self.hit / self.w) } else { Value::sysmis() }
            }
            AggFunction::Pgt(_) | AggFunction::Plt(_) | AggFunction::Pin(..) | AggFunction::Pout(..) => {
                if self.w > 0.0 {
                    Value::Number(self.hit / self.w * 100.0)
                } else {
                    Value::sysmis()
                }
            }
            AggFunction::Cgt(_) | AggFunction::Clt(_) | AggFunction::Cin(..) | AggFunction::Cout(..) => {
                Value::Number(self.hit)
            }
            AggFunction::Median | AggFunction::Percentile(_) => {
                if self.w <= 0.0 {
                    return Value::sysmis();
                }
                let p = match rs.spec.function {
                    AggFunction::Percentile(p) => p,
                    _ => 0.5,
                };
                // 组内二次排序只发生在需要次序统计量的函数上
                self.pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
                let mut stat = Percentile::new(p, self.w, PercentileAlgorithm::WeightedAverage);
                accumulate_sorted(self.pairs.drain(..), &mut [&mut stat]);
                Value::Number(stat.finalize())
            }
        }
    }
}

// ── 聚合主流程 ────────────────────────────────────────────────────────────────

/// 对 `reader` 做分组聚合，返回输出流（CaseWindow 游标）。
/// 所有配置错误在读任何 case 之前报出。
pub fn aggregate(
    reader:  &mut dyn CaseReader,
    breaks:  &[&str],
    specs:   &[AggregateSpec],
    options: &AggregateOptions,
    config:  &EngineConfig,
) -> Result<WindowCursor> {
    let in_dict = reader.dictionary().clone();

    // 预检：break 变量、函数规格、输出字典（重名在这里暴露）
    let break_idx: Vec<usize> = breaks
        .iter()
        .map(|n| in_dict.index_of(n))
        .collect::<Result<_>>()?;
    let resolved = resolve_specs(&in_dict, specs)?;

    let out_dict = match options.mode {
        OutputMode::Replace => {
            let mut d = Dictionary::new();
            for &idx in &break_idx {
                d.push(in_dict.var(idx).clone())?;
            }
            for rs in &resolved {
                d.push(output_variable(&in_dict, rs))?;
            }
            d
        }
        OutputMode::AddVariables => {
            let mut d = (*in_dict).clone();
            for rs in &resolved {
                d.push(output_variable(&in_dict, rs))?;
            }
            d
        }
    };
    let out_dict = Arc::new(out_dict);

    let criteria = SortCriteria::new(
        breaks.iter().map(|n| SortKey::asc(n)).collect(),
    );
    let break_keys: Vec<(usize, Direction)> = criteria.resolve(&in_dict)?;

    let mut sorted;
    let input: &mut dyn CaseReader = if options.presorted {
        reader
    } else {
        sorted = sort_cases(reader, &criteria, config)?;
        &mut sorted
    };

    let mut output = CaseWindow::new(out_dict.clone(), config);
    let mut group = GroupState::new(&resolved, &in_dict, options, config);

    while let Some(case) = input.next_case()? {
        if let Some(head) = &group.head {
            if compare_cases(head, &case, &break_keys) != Ordering::Equal {
                group.flush(&break_idx, &mut output)?;
            }
        }
        group.feed(case)?;
    }
    if group.head.is_some() {
        group.flush(&break_idx, &mut output)?;
    }

    Ok(Arc::new(output).cursor())
}

/// 一个 break 组的运行状态
struct GroupState<'a> {
    resolved: &'a [ResolvedSpec],
    dict:     &'a Arc<Dictionary>,
    options:  &'a AggregateOptions,
    config:   &'a EngineConfig,
    states:   Vec<AggState>,
    /// 组首 case（break 键来源）
    head:     Option<Case>,
    /// 追加模式下缓冲的组内原始 case
    buffered: Option<CaseWindow>,
}

impl<'a> GroupState<'a> {
    fn new(
        resolved: &'a [ResolvedSpec],
        dict:     &'a Arc<Dictionary>,
        options:  &'a AggregateOptions,
        config:   &'a EngineConfig,
    ) -> Self {
        Self {
            resolved,
            dict,
            options,
            config,
            states: resolved.iter().map(|_| AggState::default()).collect(),
            head: None,
            buffered: None,
        }
    }

    fn feed(&mut self, case: Case) -> Result<()> {
        let weight = case.weight(self.dict);
        let missing: Vec<bool> = self
            .resolved
            .iter()
            .map(|rs| match rs.src_idx {
                Some(idx) => self.dict.var(idx).is_missing(&case.values[idx]),
                None => false,
            })
            .collect();
        let poisoned = self.options.missing == MissingPolicy::Columnwise
            && missing.iter().any(|&m| m);

        for ((state, rs), &miss) in self.states.iter_mut().zip(self.resolved).zip(&missing) {
            state.feed(rs, &case, weight, miss, poisoned);
        }

        if self.options.mode == OutputMode::AddVariables {
            if self.buffered.is_none() {
                self.buffered = Some(CaseWindow::new(self.dict.clone(), self.config));
            }
            if let Some(buf) = &mut self.buffered {
                buf.push(case.clone())?;
            }
        }
        if self.head.is_none() {
            self.head = Some(case);
        }
        Ok(())
    }

    fn flush(&mut self, break_idx: &[usize], output: &mut CaseWindow) -> Result<()> {
        let head = match self.head.take() {
            Some(h) => h,
            None => return Ok(()),
        };
        let agg_values: Vec<Value> = self
            .states
            .iter_mut()
            .zip(self.resolved)
            .map(|(state, rs)| state.finalize(rs, self.dict))
            .collect();

        match self.options.mode {
            OutputMode::Replace => {
                let mut values: Vec<Value> = break_idx
                    .iter()
                    .map(|&i| head.values[i].clone())
                    .collect();
                values.extend(agg_values);
                output.push(Case::new(values))?;
            }
            OutputMode::AddVariables => {
                if let Some(buf) = self.buffered.take() {
                    let mut cursor = Arc::new(buf).cursor();
                    while let Some(mut case) = cursor.next_case()? {
                        case.values.extend(agg_values.iter().cloned());
                        output.push(case)?;
                    }
                }
            }
        }

        for state in &mut self.states {
            *state = AggState::default();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect, MemoryReader};

    fn dict() -> Arc<Dictionary> {
        Arc::new(
            Dictionary::with_vars(vec![
                Variable::numeric("g"),
                Variable::numeric("x"),
                Variable::numeric("y"),
                Variable::string("s", 4),
            ])
            .unwrap(),
        )
    }

    fn case(g: f64, x: Value, y: Value, s: &str) -> Case {
        Case::new(vec![Value::Number(g), x, y, Value::string(s.as_bytes(), 4)])
    }

    fn num(v: f64) -> Value {
        Value::Number(v)
    }

    fn sample() -> Vec<Case> {
        vec![
            case(2.0, num(4.0), num(1.0), "d"),
            case(1.0, num(1.0), num(10.0), "a"),
            case(1.0, num(3.0), Value::sysmis(), "c"),
            case(2.0, num(6.0), num(2.0), "b"),
            case(1.0, num(2.0), num(30.0), "b"),
        ]
    }

    fn run(
        specs:   &[AggregateSpec],
        options: &AggregateOptions,
    ) -> Vec<Case> {
        let mut reader = MemoryReader::new(dict(), sample());
        let out = aggregate(
            &mut reader,
            &["g"],
            specs,
            options,
            &EngineConfig::default(),
        )
        .unwrap();
        collect(out).unwrap()
    }

    #[test]
    fn group_count_and_basic_stats() {
        let specs = vec![
            AggregateSpec::new("n", AggFunction::N, None),
            AggregateSpec::new("sx", AggFunction::Sum, Some("x")),
            AggregateSpec::new("mx", AggFunction::Mean, Some("x")),
            AggregateSpec::new("mn", AggFunction::Min, Some("x")),
            AggregateSpec::new("mdn", AggFunction::Median, Some("x")),
        ];
        let out = run(&specs, &AggregateOptions::default());
        // 两个不同的 break 键 → 两组，内部排序后 1 在前
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values[0], num(1.0));
        assert_eq!(out[0].values[1], num(3.0));
        assert_eq!(out[0].values[2], num(6.0));
        assert_eq!(out[0].values[3], num(2.0));
        assert_eq!(out[0].values[4], num(1.0));
        assert_eq!(out[0].values[5], num(2.0));
        assert_eq!(out[1].values[0], num(2.0));
        assert_eq!(out[1].values[2], num(10.0));
        assert_eq!(out[1].values[3], num(5.0));
    }

    #[test]
    fn itemwise_ignores_unrelated_missing() {
        // y 在组 1 有一个缺失；x 的均值不受影响
        let specs = vec![
            AggregateSpec::new("mx", AggFunction::Mean, Some("x")),
            AggregateSpec::new("my", AggFunction::Mean, Some("y")),
            AggregateSpec::new("nm", AggFunction::NMiss, Some("y")),
        ];
        let out = run(&specs, &AggregateOptions::default());
        assert_eq!(out[0].values[1], num(2.0));
        assert_eq!(out[0].values[2], num(20.0));
        assert_eq!(out[0].values[3], num(1.0));
    }

    #[test]
    fn columnwise_poisons_whole_case() {
        let specs = vec![
            AggregateSpec::new("mx", AggFunction::Mean, Some("x")),
            AggregateSpec::new("my", AggFunction::Mean, Some("y")),
            AggregateSpec::new("n", AggFunction::N, Some("x")),
        ];
        let opts = AggregateOptions {
            missing: MissingPolicy::Columnwise,
            ..Default::default()
        };
        let out = run(&specs, &opts);
        // 组 1 的缺失 y 把那条 case 整个排除出 mean(x)，但 N 不受整列策略影响
        assert_eq!(out[0].values[1], num(1.5));
        assert_eq!(out[0].values[2], num(20.0));
        assert_eq!(out[0].values[3], num(3.0));
    }

    #[test]
    fn fractions_percents_counts() {
        let specs = vec![
            AggregateSpec::new("f", AggFunction::Fgt(num(1.5)), Some("x")),
            AggregateSpec::new("p", AggFunction::Pin(num(2.0), num(3.0)), Some("x")),
            AggregateSpec::new("c", AggFunction::Cout(num(1.0), num(2.0)), Some("x")),
        ];
        let out = run(&specs, &AggregateOptions::default());
        // 组 1：x = 1,2,3
        assert_eq!(out[0].values[1], num(2.0 / 3.0));
        assert!((out[0].values[2].as_number().unwrap() - 200.0 / 3.0).abs() < 1e-12);
        assert_eq!(out[0].values[3], num(1.0));
    }

    #[test]
    fn reversed_range_arguments_are_swapped() {
        let specs = vec![AggregateSpec::new(
            "p",
            AggFunction::Pin(num(3.0), num(2.0)),
            Some("x"),
        )];
        let out = run(&specs, &AggregateOptions::default());
        // 与正序参数一致
        assert!((out[0].values[1].as_number().unwrap() - 200.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn string_min_max_first_last() {
        let specs = vec![
            AggregateSpec::new("lo", AggFunction::Min, Some("s")),
            AggregateSpec::new("hi", AggFunction::Max, Some("s")),
            AggregateSpec::new("fst", AggFunction::First, Some("s")),
            AggregateSpec::new("lst", AggFunction::Last, Some("s")),
        ];
        let out = run(&specs, &AggregateOptions::default());
        // 组 1 按 g 排序后保持输入相对顺序：a, c, b
        assert_eq!(out[0].values[1], Value::string(b"a", 4));
        assert_eq!(out[0].values[2], Value::string(b"c", 4));
        assert_eq!(out[0].values[3], Value::string(b"a", 4));
        assert_eq!(out[0].values[4], Value::string(b"b", 4));
    }

    #[test]
    fn all_missing_group_yields_sysmis_but_counts_zero() {
        let d = dict();
        let cases = vec![case(1.0, Value::sysmis(), num(1.0), "a")];
        let specs = vec![
            AggregateSpec::new("m", AggFunction::Mean, Some("x")),
            AggregateSpec::new("sum", AggFunction::Sum, Some("x")),
            AggregateSpec::new("n", AggFunction::N, Some("x")),
            AggregateSpec::new("c", AggFunction::Cgt(num(0.0)), Some("x")),
        ];
        let mut reader = MemoryReader::new(d, cases);
        let out = collect(
            aggregate(
                &mut reader,
                &["g"],
                &specs,
                &AggregateOptions::default(),
                &EngineConfig::default(),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(out[0].values[1].is_sysmis());
        assert!(out[0].values[2].is_sysmis());
        assert_eq!(out[0].values[3], num(0.0));
        assert_eq!(out[0].values[4], num(0.0));
    }

    #[test]
    fn add_variables_preserves_rows_and_broadcasts() {
        let specs = vec![AggregateSpec::new("mx", AggFunction::Mean, Some("x"))];
        let opts = AggregateOptions {
            mode: OutputMode::AddVariables,
            ..Default::default()
        };
        let out = run(&specs, &opts);
        assert_eq!(out.len(), 5);
        // 同组每行携带同一聚合值
        for c in &out {
            let g = c.values[0].as_number().unwrap();
            let mx = c.values[4].as_number().unwrap();
            if g == 1.0 {
                assert_eq!(mx, 2.0);
            } else {
                assert_eq!(mx, 5.0);
            }
        }
    }

    #[test]
    fn config_errors_are_preflight() {
        let d = dict();
        // 未知源变量
        let mut r1 = MemoryReader::new(d.clone(), sample());
        assert!(matches!(
            aggregate(
                &mut r1,
                &["g"],
                &[AggregateSpec::new("m", AggFunction::Mean, Some("zzz"))],
                &AggregateOptions::default(),
                &EngineConfig::default()
            ),
            Err(EngineError::VariableNotFound(_))
        ));
        // 输出名与 break 变量重名
        let mut r2 = MemoryReader::new(d.clone(), sample());
        assert!(matches!(
            aggregate(
                &mut r2,
                &["g"],
                &[AggregateSpec::new("g", AggFunction::N, None)],
                &AggregateOptions::default(),
                &EngineConfig::default()
            ),
            Err(EngineError::DuplicateVariable(_))
        ));
        // 字符串源配数值函数
        let mut r3 = MemoryReader::new(d, sample());
        assert!(matches!(
            aggregate(
                &mut r3,
                &["g"],
                &[AggregateSpec::new("m", AggFunction::Mean, Some("s"))],
                &AggregateOptions::default(),
                &EngineConfig::default()
            ),
            Err(EngineError::TypeMismatch(..))
        ));
    }
}
