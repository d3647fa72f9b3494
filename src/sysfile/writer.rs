//! 系统文件写出端
//!
//! `new` 一次性写出头与整个字典区，`write_case` 逐 case 追加数据区，
//! `finish` 补写尾部并把真实 case 数回填进头（写入时先占 -1 哨兵）。
//! 简单压缩按 8 个操作码一组缓冲；deflate 模式把未压缩数据区攒在
//! 内存里，收尾时一次压成单个 zlib 流。

use crate::case::Case;
use crate::common::{Endian, EngineConfig, EngineError, Result};
use crate::dictionary::Dictionary;
use crate::value::{Value, SYSMIS};
use crate::variable::{Format, FormatType, RangeEnd, Variable};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use super::*;

/// 头部里 n_cases 字段的偏移（回填用）
const N_CASES_OFFSET: u64 = 80;

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::SysFileIo(e.to_string())
}

// ── 短名分配 ──────────────────────────────────────────────────────────────────

/// 每个变量的 8 字节短名。v2 截断冲突是配置错误；
/// v3 冲突时合成唯一短名，完整名字走 7.13 记录。
fn assign_short_names(dict: &Dictionary, version: SysVersion) -> Result<Vec<String>> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(dict.len());
    for var in dict.vars() {
        let mut short: String = var.name.chars().take(8).collect();
        if short.len() < var.name.len() {
            log::warn!("variable name {} truncated to {short} in system file", var.name);
        }
        if !used.insert(short.clone()) {
            match version {
                SysVersion::V2 => {
                    return Err(EngineError::DuplicateVariable(format!(
                        "{} truncates to non-unique short name {short}", var.name
                    )));
                }
                SysVersion::V3 => {
                    let mut n = 1u32;
                    loop {
                        short = format!("V{n:07}");
                        if used.insert(short.clone()) {
                            break;
                        }
                        n += 1;
                    }
                }
            }
        }
        out.push(short);
    }
    Ok(out)
}

// ── 简单压缩编码器 ────────────────────────────────────────────────────────────

/// bias 100 的操作码编码：8 个操作码一组，后跟该组需要的原始数据
struct SimpleEncoder {
    opcodes: Vec<u8>,
    data:    Vec<u8>,
}

impl SimpleEncoder {
    fn new() -> Self {
        Self { opcodes: Vec::with_capacity(8), data: Vec::new() }
    }

    fn put<W: Write>(&mut self, sink: &mut W, opcode: u8, raw: Option<&[u8]>) -> Result<()> {
        self.opcodes.push(opcode);
        if let Some(bytes) = raw {
            self.data.extend_from_slice(bytes);
        }
        if self.opcodes.len() == 8 {
            self.flush(sink)?;
        }
        Ok(())
    }

    fn number<W: Write>(&mut self, sink: &mut W, endian: Endian, v: f64) -> Result<()> {
        if v == SYSMIS {
            return self.put(sink, OPC_SYSMIS, None);
        }
        let biased = v + COMPRESSION_BIAS;
        if v.fract() == 0.0 && (1.0..=251.0).contains(&biased) {
            return self.put(sink, biased as u8, None);
        }
        let mut raw = Vec::with_capacity(8);
        put_f64(endian, &mut raw, v);
        self.put(sink, OPC_RAW, Some(&raw))
    }

    fn segment<W: Write>(&mut self, sink: &mut W, seg: &[u8]) -> Result<()> {
        if seg.iter().all(|&b| b == b' ') {
            self.put(sink, OPC_SPACES, None)
        } else {
            self.put(sink, OPC_RAW, Some(seg))
        }
    }

    fn flush<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        if self.opcodes.is_empty() {
            return Ok(());
        }
        while self.opcodes.len() < 8 {
            self.opcodes.push(OPC_PADDING);
        }
        sink.write_all(&self.opcodes).map_err(io_err)?;
        sink.write_all(&self.data).map_err(io_err)?;
        self.opcodes.clear();
        self.data.clear();
        Ok(())
    }

    fn finish<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        self.put(sink, OPC_EOF, None)?;
        self.flush(sink)
    }
}

// ── 写出端 ────────────────────────────────────────────────────────────────────

pub struct SysFileWriter<W: Write + Seek> {
    inner:       W,
    endian:      Endian,
    options:     WriteOptions,
    dict:        Arc<Dictionary>,
    n_cases:     u32,
    simple:      SimpleEncoder,
    deflate_buf: Vec<u8>,
}

impl<W: Write + Seek> SysFileWriter<W> {
    /// 写出头与字典区，返回可追加数据的写出端
    pub fn new(
        mut inner: W,
        dict:      Arc<Dictionary>,
        options:   WriteOptions,
        config:    &EngineConfig,
    ) -> Result<Self> {
        if dict.is_empty() {
            return Err(EngineError::BadDictionary("no variables to write".into()));
        }
        let endian = config.endian;
        let short_names = assign_short_names(&dict, options.version)?;

        let mut buf = Vec::new();
        write_header(&mut buf, endian, &dict, &options);
        for (var, short) in dict.vars().iter().zip(&short_names) {
            write_variable_records(&mut buf, endian, var, short);
        }
        write_value_labels(&mut buf, endian, &dict);
        write_documents(&mut buf, endian, &dict);
        if options.version == SysVersion::V3 {
            write_long_names(&mut buf, endian, &dict, &short_names);
        }
        put_i32(endian, &mut buf, REC_TERMINATOR);
        put_i32(endian, &mut buf, 0);

        inner.write_all(&buf).map_err(io_err)?;
        Ok(Self {
            inner,
            endian,
            options,
            dict,
            n_cases: 0,
            simple: SimpleEncoder::new(),
            deflate_buf: Vec::new(),
        })
    }

    pub fn write_case(&mut self, case: &Case) -> Result<()> {
        if case.values.len() != self.dict.len() {
            return Err(EngineError::TypeMismatch(
                "<case>".into(),
                format!("expected {} values, got {}", self.dict.len(), case.values.len()),
            ));
        }
        // 先借出来，绕开对 self 的双重可变借用
        let mut simple = std::mem::replace(&mut self.simple, SimpleEncoder::new());
        let result = self.write_case_inner(case, &mut simple);
        self.simple = simple;
        result?;
        self.n_cases += 1;
        Ok(())
    }

    fn write_case_inner(&mut self, case: &Case, simple: &mut SimpleEncoder) -> Result<()> {
        for (var, value) in self.dict.vars().iter().zip(&case.values) {
            match (var.width, value) {
                (0, Value::Number(v)) => match self.options.compression {
                    SysCompression::None => {
                        let mut raw = Vec::with_capacity(8);
                        put_f64(self.endian, &mut raw, *v);
                        self.inner.write_all(&raw).map_err(io_err)?;
                    }
                    SysCompression::Simple => simple.number(&mut self.inner, self.endian, *v)?,
                    SysCompression::Deflate => put_f64(self.endian, &mut self.deflate_buf, *v),
                },
                (w, Value::Str(b)) if w > 0 => {
                    if b.len() > w {
                        log::warn!("over-wide value for {} truncated to {w} bytes", var.name);
                    }
                    let padded = pad_bytes(b, element_width(w) * 8);
                    match self.options.compression {
                        SysCompression::None => self.inner.write_all(&padded).map_err(io_err)?,
                        SysCompression::Simple => {
                            for seg in padded.chunks(8) {
                                simple.segment(&mut self.inner, seg)?;
                            }
                        }
                        SysCompression::Deflate => self.deflate_buf.extend_from_slice(&padded),
                    }
                }
                _ => {
                    return Err(EngineError::TypeMismatch(
                        var.name.clone(),
                        "case value does not match variable type".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 收尾：写出残留数据、回填 case 数，交还底层写句柄
    pub fn finish(mut self) -> Result<W> {
        match self.options.compression {
            SysCompression::None => {}
            SysCompression::Simple => {
                let mut simple = std::mem::replace(&mut self.simple, SimpleEncoder::new());
                simple.finish(&mut self.inner)?;
            }
            SysCompression::Deflate => {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(&self.deflate_buf).map_err(io_err)?;
                let compressed = enc.finish().map_err(io_err)?;
                self.inner.write_all(&compressed).map_err(io_err)?;
            }
        }

        self.inner.seek(SeekFrom::Start(N_CASES_OFFSET)).map_err(io_err)?;
        let mut buf = Vec::with_capacity(4);
        put_i32(self.endian, &mut buf, self.n_cases as i32);
        self.inner.write_all(&buf).map_err(io_err)?;
        self.inner.seek(SeekFrom::End(0)).map_err(io_err)?;
        self.inner.flush().map_err(io_err)?;
        Ok(self.inner)
    }
}

// ── 头与字典区 ────────────────────────────────────────────────────────────────

fn write_header(buf: &mut Vec<u8>, endian: Endian, dict: &Dictionary, options: &WriteOptions) {
    buf.extend_from_slice(options.version.magic());
    buf.extend_from_slice(&pad_bytes(b"@(#) stat-data-engine system file", 60));
    put_i32(endian, buf, LAYOUT_CODE);

    let nominal: usize = dict.vars().iter().map(|v| element_width(v.width)).sum();
    put_i32(endian, buf, nominal as i32);
    put_i32(endian, buf, options.compression.code());

    // 权重：1 起算的元素下标
    let weight_element = dict.weight_index().map_or(0, |idx| {
        1 + dict.vars()[..idx]
            .iter()
            .map(|v| element_width(v.width))
            .sum::<usize>()
    });
    put_i32(endian, buf, weight_element as i32);
    put_i32(endian, buf, CASE_COUNT_UNKNOWN);
    put_f64(endian, buf, COMPRESSION_BIAS);

    let now = chrono::Local::now();
    buf.extend_from_slice(&pad_bytes(now.format("%d %b %y").to_string().as_bytes(), 9));
    buf.extend_from_slice(&pad_bytes(now.format("%H:%M:%S").to_string().as_bytes(), 8));

    let label = dict.file_label.as_deref().unwrap_or("");
    buf.extend_from_slice(&pad_bytes(label.as_bytes(), 64));
    buf.extend_from_slice(&[0u8; 3]);
}

fn missing_value_code(var: &Variable) -> i32 {
    match &var.missing.range {
        Some(_) => -(2 + var.missing.discrete.len() as i32),
        None    => var.missing.discrete.len() as i32,
    }
}

fn range_end_value(end: &RangeEnd) -> f64 {
    match end {
        RangeEnd::Value(v) => *v,
        RangeEnd::Lo       => f64::MIN,
        RangeEnd::Hi       => f64::MAX,
    }
}

fn write_variable_records(buf: &mut Vec<u8>, endian: Endian, var: &Variable, short: &str) {
    put_i32(endian, buf, REC_VARIABLE);
    put_i32(endian, buf, var.width as i32);
    put_i32(endian, buf, var.label.is_some() as i32);
    put_i32(endian, buf, missing_value_code(var));

    let fmt = if var.width == 0 {
        (pack_format(var.print), pack_format(var.write))
    } else {
        let a = pack_format(Format::new(FormatType::A, var.width.min(255) as u8, 0));
        (a, a)
    };
    put_i32(endian, buf, fmt.0);
    put_i32(endian, buf, fmt.1);
    buf.extend_from_slice(&pad_bytes(short.as_bytes(), 8));

    if let Some(label) = &var.label {
        let bytes = label.as_bytes();
        put_i32(endian, buf, bytes.len() as i32);
        let padded_len = (bytes.len() + 3) / 4 * 4;
        buf.extend_from_slice(&pad_bytes(bytes, padded_len));
    }

    if let Some((lo, hi)) = &var.missing.range {
        put_f64(endian, buf, range_end_value(lo));
        put_f64(endian, buf, range_end_value(hi));
    }
    for v in &var.missing.discrete {
        match v {
            Value::Number(n) => put_f64(endian, buf, *n),
            Value::Str(s)    => buf.extend_from_slice(&pad_bytes(s, 8)),
        }
    }

    // 宽字符串的续段元素
    for _ in 1..element_width(var.width) {
        put_i32(endian, buf, REC_VARIABLE);
        put_i32(endian, buf, -1);
        put_i32(endian, buf, 0);
        put_i32(endian, buf, 0);
        put_i32(endian, buf, 0);
        put_i32(endian, buf, 0);
        buf.extend_from_slice(&pad_bytes(b"", 8));
    }
}

fn write_value_labels(buf: &mut Vec<u8>, endian: Endian, dict: &Dictionary) {
    let mut element = 1i32;
    for var in dict.vars() {
        // 3/4 记录只能携带 8 字节以内的值
        if !var.value_labels.is_empty() && var.width > 8 {
            log::warn!(
                "value labels for {} dropped: string width {} exceeds 8 bytes",
                var.name, var.width
            );
        }
        if !var.value_labels.is_empty() && var.width <= 8 {
            put_i32(endian, buf, REC_VALUE_LABELS);
            put_i32(endian, buf, var.value_labels.len() as i32);
            for (value, label) in &var.value_labels {
                match value {
                    Value::Number(n) => put_f64(endian, buf, *n),
                    Value::Str(s)    => buf.extend_from_slice(&pad_bytes(s, 8)),
                }
                let bytes = label.as_bytes();
                let len = bytes.len().min(255);
                buf.push(len as u8);
                let padded_len = (1 + len + 7) / 8 * 8 - 1;
                buf.extend_from_slice(&pad_bytes(&bytes[..len], padded_len));
            }
            put_i32(endian, buf, REC_VALUE_LABEL_VARS);
            put_i32(endian, buf, 1);
            put_i32(endian, buf, element);
        }
        element += element_width(var.width) as i32;
    }
}

fn write_documents(buf: &mut Vec<u8>, endian: Endian, dict: &Dictionary) {
    if dict.documents.is_empty() {
        return;
    }
    put_i32(endian, buf, REC_DOCUMENTS);
    put_i32(endian, buf, dict.documents.len() as i32);
    for line in &dict.documents {
        buf.extend_from_slice(&pad_bytes(line.as_bytes(), 80));
    }
}

fn write_long_names(buf: &mut Vec<u8>, endian: Endian, dict: &Dictionary, short_names: &[String]) {
    let payload: Vec<u8> = dict
        .vars()
        .iter()
        .zip(short_names)
        .map(|(var, short)| format!("{short}={}", var.name))
        .collect::<Vec<_>>()
        .join("\t")
        .into_bytes();
    put_i32(endian, buf, REC_EXTENSION);
    put_i32(endian, buf, EXT_LONG_NAMES);
    put_i32(endian, buf, 1);
    put_i32(endian, buf, payload.len() as i32);
    buf.extend_from_slice(&payload);
}
