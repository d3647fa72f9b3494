//! # stat-data-engine 完整使用案例
//!
//! 演示数据引擎的全部核心功能：
//!
//! 1. 定义 Dictionary（变量 / 格式 / 用户缺失值 / 权重）
//! 2. Case 流水线（过滤 + leave 变量累加）
//! 3. 工作区预算内的外排序
//! 4. CaseWindow 物化与随机访问
//! 5. 次序统计量（加权百分位数 / 截尾均值）
//! 6. studentized-range 分布（qtukey / ptukey）
//! 7. 分组聚合（AGGREGATE）
//! 8. 系统文件写出与读回

use stat_data_engine::{
    aggregate::{aggregate, AggFunction, AggregateOptions, AggregateSpec},
    case::Case,
    common::EngineConfig,
    dictionary::Dictionary,
    order_stats::{
        accumulate_sorted, median, OrderStatistic, Percentile, PercentileAlgorithm, TrimmedMean,
    },
    stream::{
        collect,
        sort::{sort_cases, SortCriteria, SortKey},
        window::{CaseWindow, WindowCursor},
        FilterReader, MemoryReader, TransformReader,
    },
    sysfile::{read_sysfile, SysFileWriter, WriteOptions},
    tukey::{ptukey, qtukey},
    value::Value,
    variable::{MissingValues, RangeEnd, Variable},
};

use std::io::Cursor;
use std::sync::Arc;

fn main() -> stat_data_engine::common::Result<()> {
    env_logger::init();

    println!("═══════════════════════════════════════════════════════════");
    println!("   stat-data-engine 演示                                    ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 定义 Dictionary
    // =========================================================================
    println!("【1】定义 Dictionary ...");
    // 表结构：score (F8.2, 99+ 为用户缺失), group, city (A8), w (权重),
    //          running (leave：跨 case 累加槽位)
    let mut dict = Dictionary::with_vars(vec![
        Variable::numeric("score")
            .with_label("考试得分")
            .with_missing(MissingValues::range(RangeEnd::Value(99.0), RangeEnd::Hi, None)),
        Variable::numeric("group"),
        Variable::string("city", 8),
        Variable::numeric("w"),
        Variable::numeric("running").leave(),
    ])?;
    dict.set_weight("w")?;
    dict.file_label = Some("demo scores".into());
    let dict = Arc::new(dict);
    println!("    variables = {}", dict.len());
    println!("    weight    = {:?}\n", dict.weight_index());

    // 构造 400 条模拟数据
    let cities = ["beijing", "shanghai", "chengdu", "xian"];
    let input: Vec<Case> = (0..400)
        .map(|i| {
            let score = if i % 97 == 0 { 99.0 } else { 40.0 + (i * 13 % 55) as f64 };
            Case::new(vec![
                Value::Number(score),
                Value::Number((i % 3) as f64),
                Value::string(cities[i % 4].as_bytes(), 8),
                Value::Number(1.0 + (i % 2) as f64 * 0.5),
                Value::sysmis(),
            ])
        })
        .collect();
    let config = EngineConfig::default();

    // =========================================================================
    // 2. Case 流水线
    // =========================================================================
    println!("【2】流水线：过滤用户缺失 + leave 累加 ...");
    let reader = MemoryReader::new(dict.clone(), input.clone());
    let valid = FilterReader::new(reader, |c, d| {
        let i = d.index_of("score").unwrap();
        !d.var(i).is_missing(&c.values[i])
    });
    let running = TransformReader::new(valid, |c, d| {
        let score = c.values[d.index_of("score")?].as_number().unwrap_or(0.0);
        let total = c.values[d.index_of("running")?].as_number().unwrap_or(0.0);
        c.values[d.index_of("running")?] = Value::Number(total + score);
        Ok(())
    });
    let piped = collect(running)?;
    println!("    通过过滤 = {} / {}", piped.len(), input.len());
    println!(
        "    running 终值 = {}\n",
        piped.last().and_then(|c| c.values[4].as_number()).unwrap_or(0.0)
    );

    // =========================================================================
    // 3. 外排序
    // =========================================================================
    println!("【3】外排序（4 KiB 工作区，强制 spill）...");
    let tiny = EngineConfig::default().with_workspace_bytes(4 * 1024);
    let criteria = SortCriteria::new(vec![SortKey::asc("group"), SortKey::desc("score")]);
    let sorted = sort_cases(MemoryReader::new(dict.clone(), piped.clone()), &criteria, &tiny)?;
    let sorted = collect(sorted)?;
    println!("    排序后首行 group = {:?}", sorted[0].values[1]);
    println!("    排序后首行 score = {:?}\n", sorted[0].values[0]);

    // =========================================================================
    // 4. CaseWindow 物化
    // =========================================================================
    println!("【4】CaseWindow 随机访问 ...");
    let mut window = CaseWindow::new(dict.clone(), &tiny);
    for c in &sorted {
        window.push(c.clone())?;
    }
    println!("    len      = {}", window.len());
    println!("    get(0)   = {:?}", window.get(0)?.values[0]);
    println!("    get(last)= {:?}", window.get(window.len() - 1)?.values[0]);
    let cursor = WindowCursor::new(Arc::new(window));
    println!("    游标重放 = {} 行\n", collect(cursor)?.len());

    // =========================================================================
    // 5. 次序统计量
    // =========================================================================
    println!("【5】加权百分位数与截尾均值 ...");
    let mut pairs: Vec<(f64, f64)> = piped
        .iter()
        .filter_map(|c| Some((c.values[0].as_number()?, c.values[3].as_number()?)))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total_w: f64 = pairs.iter().map(|&(_, w)| w).sum();

    let mut p25 = Percentile::new(0.25, total_w, PercentileAlgorithm::WeightedAverage);
    let mut p50 = median(total_w);
    let mut p75 = Percentile::new(0.75, total_w, PercentileAlgorithm::Empirical);
    let mut trimmed = TrimmedMean::new(total_w, 0.05);
    accumulate_sorted(
        pairs.iter().copied(),
        &mut [&mut p25, &mut p50, &mut p75, &mut trimmed],
    );
    println!("    W    = {total_w}");
    println!("    P25  = {:.2}", p25.finalize());
    println!("    P50  = {:.2}", p50.finalize());
    println!("    P75  = {:.2}", p75.finalize());
    println!("    5% 截尾均值 = {:.2}\n", trimmed.finalize());

    // =========================================================================
    // 6. studentized-range 分布
    // =========================================================================
    println!("【6】qtukey / ptukey ...");
    let q = qtukey(0.95, 1.0, 4.0, 20.0);
    println!("    qtukey(0.95, 1, 4, 20) = {q:.4}");
    println!("    ptukey(q,    1, 4, 20) = {:.4}\n", ptukey(q, 1.0, 4.0, 20.0));

    // =========================================================================
    // 7. 分组聚合
    // =========================================================================
    println!("【7】AGGREGATE：按 group 分组 ...");
    let specs = vec![
        AggregateSpec::new("n", AggFunction::N, None),
        AggregateSpec::new("mean", AggFunction::Mean, Some("score")).with_label("组内均分"),
        AggregateSpec::new("sd", AggFunction::Sd, Some("score")),
        AggregateSpec::new("mdn", AggFunction::Median, Some("score")),
        AggregateSpec::new("fhi", AggFunction::Fgt(Value::Number(70.0)), Some("score")),
        AggregateSpec::new("city1", AggFunction::First, Some("city")),
    ];
    let mut reader = MemoryReader::new(dict.clone(), piped.clone());
    let out = aggregate(&mut reader, &["group"], &specs, &AggregateOptions::default(), &config)?;
    for row in collect(out)? {
        println!(
            "    group={} n={} mean={:.2} sd={:.2} mdn={:.1} f(>70)={:.3} city={}",
            row.values[0],
            row.values[1],
            row.values[2].as_number().unwrap_or(f64::NAN),
            row.values[3].as_number().unwrap_or(f64::NAN),
            row.values[4].as_number().unwrap_or(f64::NAN),
            row.values[5].as_number().unwrap_or(f64::NAN),
            row.values[6],
        );
    }
    println!();

    // =========================================================================
    // 8. 系统文件往返
    // =========================================================================
    println!("【8】系统文件写出与读回 ...");
    let mut writer = SysFileWriter::new(
        Cursor::new(Vec::new()),
        dict.clone(),
        WriteOptions::default(),
        &config,
    )?;
    for c in &piped {
        writer.write_case(c)?;
    }
    let bytes = writer.finish()?.into_inner();
    println!("    文件大小 = {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);

    let (read_dict, cases) = read_sysfile(Cursor::new(bytes))?;
    let read_back = collect(cases)?;
    println!("    读回变量 = {}", read_dict.len());
    println!("    读回行数 = {}", read_back.len());
    println!("    往返一致 = {}", read_back == piped);

    println!("\n═══════════════════════════════════════════════════════════");
    println!("   全部演示完成 ✓");
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
