//! 加权次序统计量：一遍有序数据同时喂多个统计量
//!
//! 每个统计量声明若干“目标累积权重”；驱动器消费升序的
//! `(值, 权重)` 序列，相等值合并成一次访问，同时维护所有目标的
//! 上下夹逼括号。一遍排序数据可以同时算出任意多个统计量。

use crate::value::SYSMIS;

// ── 目标累积权重与括号 ────────────────────────────────────────────────────────

/// 一个目标累积权重 `tc` 及其两侧括号。
/// 下括号：累积权重仍 ≤ tc 的最后一个值；上括号：其后第一个值。
#[derive(Debug, Clone, Copy)]
pub struct TargetWeight {
    pub tc:    f64,
    /// 下括号：值 / 该值聚合权重 / 含该值的累积权重
    pub y:     f64,
    pub c:     f64,
    pub cc:    f64,
    /// 上括号；`c_p1 == 0` 表示尚未见到（或不存在）
    pub y_p1:  f64,
    pub c_p1:  f64,
    pub cc_p1: f64,
}

impl TargetWeight {
    pub fn new(tc: f64) -> Self {
        Self { tc, y: 0.0, c: 0.0, cc: 0.0, y_p1: 0.0, c_p1: 0.0, cc_p1: 0.0 }
    }

    /// 一次访问 `(y, c, cc)` 后推进括号
    fn update(&mut self, y: f64, c: f64, cc: f64) {
        if cc <= self.tc {
            self.y = y;
            self.c = c;
            self.cc = cc;
        } else if self.c_p1 == 0.0 {
            self.y_p1 = y;
            self.c_p1 = c;
            self.cc_p1 = cc;
        }
    }
}

// ── 统计量接口 ────────────────────────────────────────────────────────────────

/// 由驱动器统一喂数据的次序统计量
pub trait OrderStatistic {
    /// 需要括号跟踪的目标；驱动器每次访问后更新
    fn targets(&mut self) -> &mut [TargetWeight];

    /// 每个不同取值一次的回调（相等值已合并），给需要
    /// 逐值累积的统计量使用；默认无事可做
    fn accumulate(&mut self, _y: f64, _c: f64, _cc: f64) {}

    /// 有序流消费完毕后取结果
    fn finalize(&self) -> f64;
}

/// 驱动器：消费升序 `(值, 权重)` 序列，合并相等值，跳过
/// 系统缺失值与非正权重，把每次访问同时喂给所有统计量。
/// 返回实际消费的总权重。
pub fn accumulate_sorted<I>(pairs: I, stats: &mut [&mut dyn OrderStatistic]) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut cc = 0.0;
    let mut pending: Option<(f64, f64)> = None;

    let mut visit = |y: f64, c: f64, cc: &mut f64, stats: &mut [&mut dyn OrderStatistic]| {
        *cc += c;
        for stat in stats.iter_mut() {
            for t in stat.targets() {
                t.update(y, c, *cc);
            }
            stat.accumulate(y, c, *cc);
        }
    };

    for (y, w) in pairs {
        if y == SYSMIS || y.is_nan() || !(w > 0.0) {
            continue;
        }
        match &mut pending {
            Some((py, pc)) if *py == y => *pc += w,
            Some((py, pc)) => {
                let (fy, fc) = (*py, *pc);
                visit(fy, fc, &mut cc, stats);
                *py = y;
                *pc = w;
            }
            None => pending = Some((y, w)),
        }
    }
    if let Some((y, c)) = pending {
        visit(y, c, &mut cc, stats);
    }
    cc
}

// ── 百分位数 ──────────────────────────────────────────────────────────────────

/// 百分位数的四种取值算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentileAlgorithm {
    /// (W+1)p 目标上的线性插值
    WeightedAverage,
    /// (W+1)p 目标四舍五入到较近的括号值
    Rounded,
    /// W·p 目标的经验阶梯函数
    Empirical,
    /// 经验阶梯，恰好落在台阶上时取两侧均值
    AveragedEmpirical,
}

/// 加权百分位数。两个目标：`(W+1)p` 服务插值类算法，
/// `W·p` 服务经验类算法。
pub struct Percentile {
    p:         f64,
    algorithm: PercentileAlgorithm,
    targets:   [TargetWeight; 2],
}

impl Percentile {
    /// `p` 为目标比例（0..=1），`w` 为数据集总权重
    pub fn new(p: f64, w: f64, algorithm: PercentileAlgorithm) -> Self {
        Self {
            p,
            algorithm,
            targets: [TargetWeight::new((w + 1.0) * p), TargetWeight::new(w * p)],
        }
    }

    pub fn proportion(&self) -> f64 {
        self.p
    }
}

impl OrderStatistic for Percentile {
    fn targets(&mut self) -> &mut [TargetWeight] {
        &mut self.targets
    }

    fn finalize(&self) -> f64 {
        let k1 = &self.targets[0];
        let k2 = &self.targets[1];
        match self.algorithm {
            PercentileAlgorithm::WeightedAverage => {
                // 目标落在数据两端之外时取边界值，绝不除零
                if k1.c_p1 == 0.0 {
                    return k1.y;
                }
                if k1.c == 0.0 {
                    return k1.y_p1;
                }
                let g_star = k1.tc - k1.cc;
                if g_star >= 1.0 {
                    k1.y_p1
                } else if k1.c_p1 >= 1.0 {
                    (1.0 - g_star) * k1.y + g_star * k1.y_p1
                } else {
                    let g = g_star / k1.c_p1;
                    (1.0 - g) * k1.y + g * k1.y_p1
                }
            }
            PercentileAlgorithm::Rounded => {
                if k1.c_p1 == 0.0 {
                    return k1.y;
                }
                if k1.c == 0.0 {
                    return k1.y_p1;
                }
                let g_star = k1.tc - k1.cc;
                let g = if k1.c_p1 >= 1.0 { g_star } else { g_star / k1.c_p1 };
                if g < 0.5 { k1.y } else { k1.y_p1 }
            }
            PercentileAlgorithm::Empirical => {
                if k2.c_p1 == 0.0 {
                    return k2.y;
                }
                if k2.c == 0.0 {
                    return k2.y_p1;
                }
                if k2.tc - k2.cc > 0.0 { k2.y_p1 } else { k2.y }
            }
            PercentileAlgorithm::AveragedEmpirical => {
                if k2.c_p1 == 0.0 {
                    return k2.y;
                }
                if k2.c == 0.0 {
                    return k2.y_p1;
                }
                if k2.tc - k2.cc > 0.0 {
                    k2.y_p1
                } else {
                    (k2.y + k2.y_p1) / 2.0
                }
            }
        }
    }
}

/// 中位数 = 50% 百分位数（加权平均插值）
pub fn median(w: f64) -> Percentile {
    Percentile::new(0.5, w, PercentileAlgorithm::WeightedAverage)
}

// ── 截尾均值 ──────────────────────────────────────────────────────────────────

/// 两侧各截掉 `tail` 比例权重后的加权均值。
/// 用逐值累积回调而非括号：每个值落在保留带内的那部分权重计入分子。
pub struct TrimmedMean {
    lo:  f64,
    hi:  f64,
    sum: f64,
}

impl TrimmedMean {
    /// `w` 为总权重，`tail` 为单侧截掉的比例（0 ≤ tail < 0.5）
    pub fn new(w: f64, tail: f64) -> Self {
        Self { lo: w * tail, hi: w * (1.0 - tail), sum: 0.0 }
    }
}

impl OrderStatistic for TrimmedMean {
    fn targets(&mut self) -> &mut [TargetWeight] {
        &mut []
    }

    fn accumulate(&mut self, y: f64, c: f64, cc: f64) {
        let kept = (cc.min(self.hi) - (cc - c).max(self.lo)).max(0.0);
        self.sum += y * kept;
    }

    fn finalize(&self) -> f64 {
        let band = self.hi - self.lo;
        if band > 0.0 { self.sum / band } else { SYSMIS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(stat: &mut dyn OrderStatistic, pairs: &[(f64, f64)]) -> f64 {
        accumulate_sorted(pairs.iter().copied(), &mut [stat]);
        stat.finalize()
    }

    fn unit(values: &[f64]) -> Vec<(f64, f64)> {
        values.iter().map(|&v| (v, 1.0)).collect()
    }

    #[test]
    fn median_of_one_to_six_is_three_point_five() {
        let data = unit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut p = Percentile::new(0.5, 6.0, PercentileAlgorithm::WeightedAverage);
        assert_eq!(run(&mut p, &data), 3.5);
    }

    #[test]
    fn four_algorithms_on_small_sample() {
        let data = unit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // tc1 = 7·0.5 = 3.5 → 插值 3.5，四舍五入 g=0.5 取上括号 4
        let mut r = Percentile::new(0.5, 6.0, PercentileAlgorithm::Rounded);
        assert_eq!(run(&mut r, &data), 4.0);
        // tc2 = 3 恰落台阶：经验取 3，平均经验取 3.5
        let mut e = Percentile::new(0.5, 6.0, PercentileAlgorithm::Empirical);
        assert_eq!(run(&mut e, &data), 3.0);
        let mut a = Percentile::new(0.5, 6.0, PercentileAlgorithm::AveragedEmpirical);
        assert_eq!(run(&mut a, &data), 3.5);
    }

    #[test]
    fn ties_are_merged_into_one_visit() {
        let data = unit(&[1.0, 2.0, 2.0, 2.0, 3.0]);
        let mut p = Percentile::new(0.5, 5.0, PercentileAlgorithm::WeightedAverage);
        // tc1 = 3，值 2 的累积权重恰为 4 > 3，下括号是 (1, cc=1)
        assert_eq!(run(&mut p, &data), 2.0);
    }

    #[test]
    fn empty_bracket_resolves_to_boundary() {
        let data = unit(&[5.0]);
        // p=1：目标超出数据，取最大值而非除零
        let mut hi = Percentile::new(1.0, 1.0, PercentileAlgorithm::WeightedAverage);
        assert_eq!(run(&mut hi, &data), 5.0);
        let mut lo = Percentile::new(0.0, 1.0, PercentileAlgorithm::WeightedAverage);
        assert_eq!(run(&mut lo, &data), 5.0);
    }

    #[test]
    fn missing_and_nonpositive_weights_are_skipped() {
        let data = vec![
            (SYSMIS, 1.0),
            (1.0, 0.0),
            (2.0, 1.0),
            (3.0, -4.0),
            (4.0, 1.0),
        ];
        let mut p = Percentile::new(0.5, 2.0, PercentileAlgorithm::WeightedAverage);
        let w = accumulate_sorted(data.into_iter(), &mut [&mut p]);
        assert_eq!(w, 2.0);
        assert_eq!(p.finalize(), 3.0);
    }

    #[test]
    fn one_pass_feeds_multiple_statistics() {
        let data = unit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut med = median(6.0);
        let mut p25 = Percentile::new(0.25, 6.0, PercentileAlgorithm::WeightedAverage);
        let mut trim = TrimmedMean::new(6.0, 1.0 / 6.0);
        accumulate_sorted(data.into_iter(), &mut [&mut med, &mut p25, &mut trim]);
        assert_eq!(med.finalize(), 3.5);
        // tc1 = 7·0.25 = 1.75 → 1 与 2 之间插值
        assert!((p25.finalize() - 1.75).abs() < 1e-12);
        // 两端各截 1 个单位权重 → (2+3+4+5)/4
        assert!((trim.finalize() - 3.5).abs() < 1e-12);
    }
}
