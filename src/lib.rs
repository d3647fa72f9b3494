//! # stat-data-engine
//!
//! 统计分析包底层的表格数据引擎，包含四块核心功能：
//! - **数据模型**：Value / Variable / Dictionary / Case
//! - **Case 流水线**：惰性组合的变换链 + 工作区预算内的外排序与物化
//! - **统计计算**：分组聚合（AGGREGATE）与次序统计量（百分位数等）
//! - **系统文件**：带版本号与双压缩方案的二进制容器读写
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         数据模型                              │
//! │   Dictionary ──┬── Variable（格式 / 用户缺失值 / leave 标志）  │
//! │                └── Case = [Value]（数值含系统缺失哨兵/字符串） │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       Case 流水线                             │
//! │   CaseReader（拉式，单消费者）                                │
//! │     ├─ FilterReader / ProjectReader / TransformReader        │
//! │     │    （TransformReader 持有 leave 变量的跨 case 槽位）    │
//! │     ├─ sort_cases()  外排序：内存 run → lz4+CRC spill → 归并  │
//! │     └─ CaseWindow    物化：随机访问，超预算整体落盘           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       统计计算                                │
//! │   aggregate()  按 break 变量分组，N/SUM/MEAN/SD/MIN/MAX/...   │
//! │     └─ order_stats  一遍有序数据同时喂多个 OrderStatistic     │
//! │          └─ tukey   studentized-range 分布的分位数反查        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       系统文件                                │
//! │   SysFileWriter / SysFileReader                              │
//! │     头(176B) → 字典记录 → 值标签/文档/扩展 → 999 → 数据块     │
//! │     压缩：无 / 简单 RLE（bias 100 操作码）/ deflate           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! 所有排序 / 物化 / 编解码入口都显式接收 [`common::EngineConfig`]，
//! 不依赖任何全局可变状态。

// ── 数据模型 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod value;
pub mod variable;
pub mod dictionary;
pub mod case;

// ── Case 流水线 ───────────────────────────────────────────────────────────────
pub mod stream;

// ── 统计计算 ──────────────────────────────────────────────────────────────────
pub mod order_stats;
pub mod tukey;
pub mod aggregate;

// ── 系统文件 ──────────────────────────────────────────────────────────────────
pub mod sysfile;
