//! 系统文件：带版本号与压缩的二进制容器
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ 头（176 B）                                                │
//! │   magic "$FL2"/"$FL3"  eye-catcher(60)  layout_code=2      │
//! │   nominal_case_size  compression  weight_index  n_cases    │
//! │   bias=100.0  date(9)  time(8)  file_label(64)  pad(3)     │
//! ├────────────────────────────────────────────────────────────┤
//! │ 字典区                                                     │
//! │   type 2  每个 8 字节元素一条变量记录（宽字符串带续段）    │
//! │   type 3+4  值标签 + 所属元素                              │
//! │   type 6  文档行（每行 80 B）                              │
//! │   type 7.13  长变量名（仅 v3，"SHORT=Long" 制表符分隔）    │
//! │   type 999  终止记录                                       │
//! ├────────────────────────────────────────────────────────────┤
//! │ 数据区                                                     │
//! │   每 case 定宽：数值 8 B double，字符串按宽度补齐到 8 B    │
//! │   压缩：无 / 简单操作码（bias 100）/ 整块 deflate          │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! `layout_code` 恒为 2，读端用它探测文件字节序。
//! v2 在写出时把变量名截到 8 字节（截断冲突是配置错误）；
//! v3 额外写 7.13 记录，完整名字经往返存活。

use crate::common::{Endian, EngineError, Result};
use crate::variable::{Format, FormatType};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub mod reader;
pub mod writer;

pub use reader::{read_sysfile, SysFileCases};
pub use writer::SysFileWriter;

// ── 常量 ──────────────────────────────────────────────────────────────────────

pub const MAGIC_V2: &[u8; 4] = b"$FL2";
pub const MAGIC_V3: &[u8; 4] = b"$FL3";

pub const LAYOUT_CODE: i32 = 2;
pub const COMPRESSION_BIAS: f64 = 100.0;
/// 头里的 case 数未知哨兵（写端收尾时回填真实值）
pub const CASE_COUNT_UNKNOWN: i32 = -1;

pub const REC_VARIABLE: i32 = 2;
pub const REC_VALUE_LABELS: i32 = 3;
pub const REC_VALUE_LABEL_VARS: i32 = 4;
pub const REC_DOCUMENTS: i32 = 6;
pub const REC_EXTENSION: i32 = 7;
pub const REC_TERMINATOR: i32 = 999;

/// 扩展记录：长变量名
pub const EXT_LONG_NAMES: i32 = 13;

/// 简单压缩操作码
pub const OPC_PADDING: u8 = 0;
pub const OPC_EOF: u8 = 252;
pub const OPC_RAW: u8 = 253;
pub const OPC_SPACES: u8 = 254;
pub const OPC_SYSMIS: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysVersion {
    /// 变量名截到 8 字节
    V2,
    /// 8 字节短名 + 7.13 长名记录
    V3,
}

impl SysVersion {
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            SysVersion::V2 => MAGIC_V2,
            SysVersion::V3 => MAGIC_V3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysCompression {
    None,
    Simple,
    Deflate,
}

impl SysCompression {
    pub fn code(self) -> i32 {
        match self {
            SysCompression::None    => 0,
            SysCompression::Simple  => 1,
            SysCompression::Deflate => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(SysCompression::None),
            1 => Ok(SysCompression::Simple),
            2 => Ok(SysCompression::Deflate),
            n => Err(EngineError::Corrupt(format!("bad compression code {n}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub version:     SysVersion,
    pub compression: SysCompression,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { version: SysVersion::V3, compression: SysCompression::Simple }
    }
}

// ── 字节序辅助 ────────────────────────────────────────────────────────────────

pub(crate) fn put_i32(endian: Endian, buf: &mut Vec<u8>, v: i32) {
    let mut b = [0u8; 4];
    match endian {
        Endian::Little => LittleEndian::write_i32(&mut b, v),
        Endian::Big    => BigEndian::write_i32(&mut b, v),
    }
    buf.extend_from_slice(&b);
}

pub(crate) fn put_f64(endian: Endian, buf: &mut Vec<u8>, v: f64) {
    let mut b = [0u8; 8];
    match endian {
        Endian::Little => LittleEndian::write_f64(&mut b, v),
        Endian::Big    => BigEndian::write_f64(&mut b, v),
    }
    buf.extend_from_slice(&b);
}

pub(crate) fn get_i32(endian: Endian, b: &[u8; 4]) -> i32 {
    match endian {
        Endian::Little => LittleEndian::read_i32(b),
        Endian::Big    => BigEndian::read_i32(b),
    }
}

pub(crate) fn get_f64(endian: Endian, b: &[u8; 8]) -> f64 {
    match endian {
        Endian::Little => LittleEndian::read_f64(b),
        Endian::Big    => BigEndian::read_f64(b),
    }
}

// ── 显示格式打包 ──────────────────────────────────────────────────────────────

/// print/write 字段的打包：类别 << 16 | 宽度 << 8 | 小数位
pub(crate) fn pack_format(fmt: Format) -> i32 {
    ((fmt.type_.sys_code() as i32) << 16) | ((fmt.w as i32) << 8) | fmt.d as i32
}

pub(crate) fn unpack_format(v: i32) -> Result<Format> {
    let type_ = FormatType::from_sys_code(((v >> 16) & 0xFF) as u8)
        .ok_or_else(|| EngineError::Corrupt(format!("bad format type in {v:#x}")))?;
    Ok(Format::new(type_, ((v >> 8) & 0xFF) as u8, (v & 0xFF) as u8))
}

/// 一个变量在数据区占用的 8 字节元素数
pub(crate) fn element_width(width: usize) -> usize {
    if width == 0 { 1 } else { (width + 7) / 8 }
}

/// 右补空格 / 截断到定长
pub(crate) fn pad_bytes(s: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![b' '; len];
    let n = s.len().min(len);
    out[..n].copy_from_slice(&s[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Case;
    use crate::common::EngineConfig;
    use crate::dictionary::Dictionary;
    use crate::stream::collect;
    use crate::value::Value;
    use crate::variable::{MissingValues, RangeEnd, Variable};
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample_dict() -> Arc<Dictionary> {
        let mut dict = Dictionary::with_vars(vec![
            Variable::numeric("x")
                .with_label("测试数值")
                .with_missing(MissingValues::range(
                    RangeEnd::Value(90.0),
                    RangeEnd::Hi,
                    None,
                ))
                .with_value_label(Value::Number(1.0), "one")
                .with_value_label(Value::Number(2.0), "two"),
            Variable::string("tag", 4),
            Variable::string("memo", 12),
            Variable::numeric("w"),
        ])
        .unwrap();
        dict.set_weight("w").unwrap();
        dict.documents = vec!["first line".into(), "second line".into()];
        dict.file_label = Some("sample file".into());
        Arc::new(dict)
    }

    fn sample_cases() -> Vec<Case> {
        vec![
            Case::new(vec![
                Value::Number(1.0),
                Value::string(b"ab", 4),
                Value::string(b"hello world!", 12),
                Value::Number(1.0),
            ]),
            Case::new(vec![
                Value::sysmis(),
                Value::string(b"", 4),
                Value::string(b"", 12),
                Value::Number(2.0),
            ]),
            Case::new(vec![
                Value::Number(2.5),
                Value::string(b"cdef", 4),
                Value::string(b"mid", 12),
                Value::Number(1.0),
            ]),
            Case::new(vec![
                Value::Number(1.0e9),
                Value::string(b"z", 4),
                Value::string(b"tail", 12),
                Value::Number(0.5),
            ]),
        ]
    }

    fn round_trip(
        dict:    Arc<Dictionary>,
        cases:   &[Case],
        options: WriteOptions,
        config:  &EngineConfig,
    ) -> (Arc<Dictionary>, Vec<Case>) {
        let mut w =
            SysFileWriter::new(Cursor::new(Vec::new()), dict, options, config).unwrap();
        for c in cases {
            w.write_case(c).unwrap();
        }
        let bytes = w.finish().unwrap().into_inner();
        let (d, r) = read_sysfile(Cursor::new(bytes)).unwrap();
        let got = collect(r).unwrap();
        (d, got)
    }

    #[test]
    fn round_trip_all_compression_modes() {
        for compression in [
            SysCompression::None,
            SysCompression::Simple,
            SysCompression::Deflate,
        ] {
            let options = WriteOptions { version: SysVersion::V3, compression };
            let (dict, got) =
                round_trip(sample_dict(), &sample_cases(), options, &EngineConfig::default());

            assert_eq!(got, sample_cases(), "{compression:?}");
            let orig = sample_dict();
            assert_eq!(dict.len(), orig.len());
            for (a, b) in dict.vars().iter().zip(orig.vars()) {
                assert_eq!(a.name, b.name);
                assert_eq!(a.width, b.width);
                assert_eq!(a.label, b.label);
                assert_eq!(a.missing, b.missing);
                assert_eq!(a.print, b.print);
                assert_eq!(a.write, b.write);
            }
            assert_eq!(dict.weight_index(), orig.weight_index());
            assert_eq!(dict.documents, orig.documents);
            assert_eq!(dict.file_label, orig.file_label);
            assert_eq!(dict.var(0).value_labels, orig.var(0).value_labels);
        }
    }

    #[test]
    fn big_endian_round_trip() {
        let config = EngineConfig::default().with_endian(crate::common::Endian::Big);
        let options = WriteOptions { version: SysVersion::V3, compression: SysCompression::Simple };
        let (_, got) = round_trip(sample_dict(), &sample_cases(), options, &config);
        assert_eq!(got, sample_cases());
    }

    #[test]
    fn v2_truncates_names_v3_preserves_them() {
        let dict = Arc::new(
            Dictionary::with_vars(vec![Variable::numeric("verylongvariablename")]).unwrap(),
        );
        let cases = vec![Case::new(vec![Value::Number(7.0)])];
        let cfg = EngineConfig::default();

        let v2 = WriteOptions { version: SysVersion::V2, compression: SysCompression::None };
        let (d2, _) = round_trip(dict.clone(), &cases, v2, &cfg);
        assert_eq!(d2.var(0).name, "verylong");

        let v3 = WriteOptions { version: SysVersion::V3, compression: SysCompression::None };
        let (d3, _) = round_trip(dict, &cases, v3, &cfg);
        assert_eq!(d3.var(0).name, "verylongvariablename");
    }

    #[test]
    fn v2_truncation_collision_is_config_error() {
        let dict = Arc::new(
            Dictionary::with_vars(vec![
                Variable::numeric("duplicate_one"),
                Variable::numeric("duplicate_two"),
            ])
            .unwrap(),
        );
        let options = WriteOptions { version: SysVersion::V2, compression: SysCompression::None };
        let err = SysFileWriter::new(
            Cursor::new(Vec::new()),
            dict.clone(),
            options,
            &EngineConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::DuplicateVariable(_)));

        // v3 合成唯一短名，完整名字经 7.13 记录存活
        let options = WriteOptions { version: SysVersion::V3, compression: SysCompression::None };
        let (d, _) = round_trip(
            dict,
            &[Case::new(vec![Value::Number(1.0), Value::Number(2.0)])],
            options,
            &EngineConfig::default(),
        );
        assert_eq!(d.var(0).name, "duplicate_one");
        assert_eq!(d.var(1).name, "duplicate_two");
    }

    #[test]
    fn corrupt_files_are_rejected() {
        // 坏 magic
        let err = read_sysfile(Cursor::new(b"NOPE".repeat(64))).err().unwrap();
        assert!(matches!(err, EngineError::Corrupt(_)));

        // 声明 case 数但数据区提前结束
        let dict = Arc::new(Dictionary::with_vars(vec![Variable::numeric("x")]).unwrap());
        let options = WriteOptions { version: SysVersion::V3, compression: SysCompression::None };
        let mut w = SysFileWriter::new(
            Cursor::new(Vec::new()),
            dict,
            options,
            &EngineConfig::default(),
        )
        .unwrap();
        w.write_case(&Case::new(vec![Value::Number(1.0)])).unwrap();
        w.write_case(&Case::new(vec![Value::Number(2.0)])).unwrap();
        let mut bytes = w.finish().unwrap().into_inner();
        bytes.truncate(bytes.len() - 12);
        let (_, r) = read_sysfile(Cursor::new(bytes)).unwrap();
        assert!(matches!(collect(r), Err(EngineError::Corrupt(_))));
    }

    #[test]
    fn distinct_print_and_write_formats_survive() {
        let mut x = Variable::numeric("x");
        x.write = Format::new(FormatType::E, 10, 4);
        let dict = Arc::new(Dictionary::with_vars(vec![x]).unwrap());
        let cases = vec![Case::new(vec![Value::Number(1.0)])];
        let (d, _) =
            round_trip(dict, &cases, WriteOptions::default(), &EngineConfig::default());
        assert_eq!(d.var(0).print, Format::new(FormatType::F, 8, 2));
        assert_eq!(d.var(0).write, Format::new(FormatType::E, 10, 4));
    }

    #[test]
    fn oversized_extension_record_is_rejected() {
        let dict = Arc::new(Dictionary::with_vars(vec![Variable::numeric("x")]).unwrap());
        let config = EngineConfig::default().with_endian(crate::common::Endian::Little);
        let options = WriteOptions { version: SysVersion::V3, compression: SysCompression::None };
        let mut w = SysFileWriter::new(Cursor::new(Vec::new()), dict, options, &config).unwrap();
        w.write_case(&Case::new(vec![Value::Number(1.0)])).unwrap();
        let mut bytes = w.finish().unwrap().into_inner();

        // 找到 7.13 记录，把 size/count 改成天文数字
        let marker = [7u8, 0, 0, 0, 13, 0, 0, 0];
        let pos = bytes.windows(8).position(|win| win == marker).unwrap();
        bytes[pos + 8..pos + 16]
            .copy_from_slice(&[0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(matches!(
            read_sysfile(Cursor::new(bytes)),
            Err(EngineError::Corrupt(_))
        ));
    }

    #[test]
    fn wide_string_value_labels_are_dropped() {
        let dict = Arc::new(
            Dictionary::with_vars(vec![Variable::string("memo", 12)
                .with_value_label(Value::string(b"hello", 12), "greet")])
            .unwrap(),
        );
        let cases = vec![Case::new(vec![Value::string(b"hi", 12)])];
        let (d, got) =
            round_trip(dict, &cases, WriteOptions::default(), &EngineConfig::default());
        assert!(d.var(0).value_labels.is_empty());
        assert_eq!(got, cases);
    }

    #[test]
    fn format_packing_round_trip() {
        for fmt in [
            Format::new(FormatType::F, 8, 2),
            Format::new(FormatType::A, 12, 0),
            Format::new(FormatType::E, 10, 4),
            Format::new(FormatType::Comma, 9, 1),
        ] {
            assert_eq!(unpack_format(pack_format(fmt)).unwrap(), fmt);
        }
    }

    #[test]
    fn element_widths() {
        assert_eq!(element_width(0), 1);
        assert_eq!(element_width(1), 1);
        assert_eq!(element_width(8), 1);
        assert_eq!(element_width(9), 2);
        assert_eq!(element_width(20), 3);
    }
}
