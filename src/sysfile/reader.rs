//! 系统文件读入端
//!
//! 严格状态机：头 → 字典 → （值标签 / 文档 / 扩展）→ 999 → 数据。
//! 任何不一致（坏 magic、未知压缩码、宽度越界、记录中途截断、
//! 非法操作码）都是致命的 `Corrupt`，绝不猜测。字节序由头里的
//! `layout_code` 探测：两种字节序下都读不出 2 即判坏文件。

use crate::case::Case;
use crate::common::{Endian, EngineError, Result};
use crate::dictionary::Dictionary;
use crate::stream::CaseReader;
use crate::value::{Value, SYSMIS};
use crate::variable::{MissingValues, RangeEnd, Variable};
use flate2::read::ZlibDecoder;
use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;

use super::*;

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::SysFileIo(e.to_string())
}

fn corrupt(msg: impl Into<String>) -> EngineError {
    EngineError::Corrupt(msg.into())
}

/// 扩展记录 payload 的上限；字典区没有任何合法记录会接近它
const EXT_PAYLOAD_MAX: u64 = 1 << 20;

// ── 低层读取 ──────────────────────────────────────────────────────────────────

fn read_bytes<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => corrupt("file truncated"),
            _ => io_err(e),
        })?;
    Ok(buf)
}

fn read_i32<R: Read>(r: &mut R, endian: Endian) -> Result<i32> {
    let b = read_bytes(r, 4)?;
    Ok(get_i32(endian, &b[..].try_into().map_err(|_| corrupt("short i32"))?))
}

fn read_f64<R: Read>(r: &mut R, endian: Endian) -> Result<f64> {
    let b = read_bytes(r, 8)?;
    Ok(get_f64(endian, &b[..].try_into().map_err(|_| corrupt("short f64"))?))
}

fn trim_padding(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

// ── 读入口 ────────────────────────────────────────────────────────────────────

/// 解析一个系统文件，返回重建的字典与数据区的 case 流
pub fn read_sysfile<R: Read>(mut inner: R) -> Result<(Arc<Dictionary>, SysFileCases<R>)> {
    // ── 头 ──
    let magic = read_bytes(&mut inner, 4)?;
    // v2 与 v3 只在写出端（名字截断与 7.13 记录）有分别，读入端同层
    if magic.as_slice() != MAGIC_V2 && magic.as_slice() != MAGIC_V3 {
        return Err(corrupt("bad magic"));
    }
    let _eye_catcher = read_bytes(&mut inner, 60)?;

    // layout_code 兼做字节序探测
    let layout_raw: [u8; 4] = read_bytes(&mut inner, 4)?[..].try_into().unwrap();
    let endian = if get_i32(Endian::Little, &layout_raw) == LAYOUT_CODE {
        Endian::Little
    } else if get_i32(Endian::Big, &layout_raw) == LAYOUT_CODE {
        Endian::Big
    } else {
        return Err(corrupt("bad layout code"));
    };

    let nominal_case_size = read_i32(&mut inner, endian)?;
    let compression = SysCompression::from_code(read_i32(&mut inner, endian)?)?;
    let weight_element = read_i32(&mut inner, endian)?;
    let n_cases = read_i32(&mut inner, endian)?;
    let bias = read_f64(&mut inner, endian)?;
    let _date = read_bytes(&mut inner, 9)?;
    let _time = read_bytes(&mut inner, 8)?;
    let file_label = trim_padding(&read_bytes(&mut inner, 64)?);
    let _pad = read_bytes(&mut inner, 3)?;

    // ── 字典区 ──
    let mut vars: Vec<Variable> = Vec::new();
    // 元素下标（1 起算）→ 变量下标
    let mut element_to_var: Vec<usize> = Vec::new();
    let mut documents: Vec<String> = Vec::new();
    let mut pending_continuations = 0usize;

    loop {
        let rec_type = read_i32(&mut inner, endian)?;
        match rec_type {
            REC_VARIABLE => {
                let width = read_i32(&mut inner, endian)?;
                let has_label = read_i32(&mut inner, endian)?;
                let missing_code = read_i32(&mut inner, endian)?;
                let print = read_i32(&mut inner, endian)?;
                let write = read_i32(&mut inner, endian)?;
                let name = trim_padding(&read_bytes(&mut inner, 8)?);

                if width == -1 {
                    if pending_continuations == 0 {
                        return Err(corrupt("unexpected continuation record"));
                    }
                    pending_continuations -= 1;
                    element_to_var.push(vars.len() - 1);
                    continue;
                }
                if pending_continuations > 0 {
                    return Err(corrupt("missing continuation record"));
                }
                if !(0..=255).contains(&width) {
                    return Err(corrupt(format!("variable width {width} out of range")));
                }

                let mut var = if width == 0 {
                    let mut v = Variable::numeric(&name).with_format(unpack_format(print)?);
                    v.write = unpack_format(write)?;
                    v
                } else {
                    Variable::string(&name, width as usize)
                };
                if has_label != 0 {
                    let len = read_i32(&mut inner, endian)?;
                    if !(0..=65535).contains(&len) {
                        return Err(corrupt("bad variable label length"));
                    }
                    let padded = (len as usize + 3) / 4 * 4;
                    let raw = read_bytes(&mut inner, padded)?;
                    var.label = Some(trim_padding(&raw[..len as usize]));
                }
                var.missing = read_missing_values(&mut inner, endian, missing_code, width as usize)?;

                element_to_var.push(vars.len());
                pending_continuations = element_width(width as usize) - 1;
                vars.push(var);
            }
            REC_VALUE_LABELS => {
                read_value_label_group(&mut inner, endian, &mut vars, &element_to_var)?;
            }
            REC_VALUE_LABEL_VARS => {
                return Err(corrupt("value-label variable record without label record"));
            }
            REC_DOCUMENTS => {
                let n = read_i32(&mut inner, endian)?;
                if !(0..=10_000).contains(&n) {
                    return Err(corrupt("bad document line count"));
                }
                for _ in 0..n {
                    documents.push(trim_padding(&read_bytes(&mut inner, 80)?));
                }
            }
            REC_EXTENSION => {
                let subtype = read_i32(&mut inner, endian)?;
                let size = read_i32(&mut inner, endian)?;
                let count = read_i32(&mut inner, endian)?;
                if size < 0 || count < 0 {
                    return Err(corrupt("bad extension record size"));
                }
                let total = size as u64 * count as u64;
                if total > EXT_PAYLOAD_MAX {
                    return Err(corrupt(format!(
                        "extension record claims {total} payload bytes"
                    )));
                }
                let payload = read_bytes(&mut inner, total as usize)?;
                if subtype == EXT_LONG_NAMES {
                    apply_long_names(&mut vars, &payload)?;
                }
                // 其余扩展按长度跳过
            }
            REC_TERMINATOR => {
                let _zero = read_i32(&mut inner, endian)?;
                break;
            }
            n => return Err(corrupt(format!("unknown record type {n}"))),
        }
    }
    if pending_continuations > 0 {
        return Err(corrupt("dictionary ends inside a wide string"));
    }
    if vars.is_empty() {
        return Err(corrupt("no variables"));
    }
    if element_to_var.len() != nominal_case_size as usize {
        return Err(corrupt(format!(
            "nominal case size {nominal_case_size} does not match {} elements",
            element_to_var.len()
        )));
    }

    let weight_name = if weight_element > 0 {
        let idx = *element_to_var
            .get(weight_element as usize - 1)
            .ok_or_else(|| corrupt("weight index out of range"))?;
        Some(vars[idx].name.clone())
    } else {
        None
    };

    let mut dict = Dictionary::with_vars(vars)?;
    if let Some(name) = weight_name {
        dict.set_weight(&name)?;
    }
    dict.documents = documents;
    if !file_label.is_empty() {
        dict.file_label = Some(file_label);
    }
    let dict = Arc::new(dict);

    let cases = SysFileCases::new(dict.clone(), inner, endian, compression, n_cases, bias)?;
    Ok((dict, cases))
}

fn read_missing_values<R: Read>(
    r:      &mut R,
    endian: Endian,
    code:   i32,
    width:  usize,
) -> Result<MissingValues> {
    let mut mv = MissingValues::none();
    let discrete_count = match code {
        0..=3 => code,
        -3 | -2 => {
            if width > 0 {
                return Err(corrupt("missing-value range on a string variable"));
            }
            let lo = read_f64(r, endian)?;
            let hi = read_f64(r, endian)?;
            let lo = if lo == f64::MIN { RangeEnd::Lo } else { RangeEnd::Value(lo) };
            let hi = if hi == f64::MAX { RangeEnd::Hi } else { RangeEnd::Value(hi) };
            mv.range = Some((lo, hi));
            -code - 2
        }
        n => return Err(corrupt(format!("bad missing-value code {n}"))),
    };
    for _ in 0..discrete_count {
        if width == 0 {
            mv.discrete.push(Value::Number(read_f64(r, endian)?));
        } else {
            let raw = read_bytes(r, 8)?;
            mv.discrete.push(Value::string(&raw, width));
        }
    }
    Ok(mv)
}

fn read_value_label_group<R: Read>(
    r:              &mut R,
    endian:         Endian,
    vars:           &mut [Variable],
    element_to_var: &[usize],
) -> Result<()> {
    let n = read_i32(r, endian)?;
    if !(0..=65536).contains(&n) {
        return Err(corrupt("bad value-label count"));
    }
    let mut raw_labels = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let value: [u8; 8] = read_bytes(r, 8)?[..].try_into().unwrap();
        let len = read_bytes(r, 1)?[0] as usize;
        let padded = (1 + len + 7) / 8 * 8 - 1;
        let raw = read_bytes(r, padded)?;
        raw_labels.push((value, trim_padding(&raw[..len])));
    }

    // 必须紧跟 type 4 记录
    if read_i32(r, endian)? != REC_VALUE_LABEL_VARS {
        return Err(corrupt("value labels not followed by variable list"));
    }
    let n_vars = read_i32(r, endian)?;
    if !(1..=element_to_var.len() as i32).contains(&n_vars) {
        return Err(corrupt("bad value-label variable count"));
    }
    for _ in 0..n_vars {
        let element = read_i32(r, endian)?;
        let var_idx = *element_to_var
            .get(element as usize - 1)
            .ok_or_else(|| corrupt("value-label element out of range"))?;
        let var = &mut vars[var_idx];
        for (raw, label) in &raw_labels {
            let value = if var.width == 0 {
                Value::Number(get_f64(endian, raw))
            } else {
                Value::string(raw, var.width)
            };
            var.value_labels.push((value, label.clone()));
        }
    }
    Ok(())
}

fn apply_long_names(vars: &mut [Variable], payload: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(payload);
    for pair in text.split('\t') {
        let (short, long) = pair
            .split_once('=')
            .ok_or_else(|| corrupt("malformed long-name pair"))?;
        if let Some(var) = vars.iter_mut().find(|v| v.name == short) {
            var.name = long.to_string();
        }
    }
    Ok(())
}

// ── 数据区 ────────────────────────────────────────────────────────────────────

enum DataSource<R: Read> {
    Plain(R),
    Deflate(Box<ZlibDecoder<R>>),
}

impl<R: Read> Read for DataSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            DataSource::Plain(r)   => r.read(buf),
            DataSource::Deflate(r) => r.read(buf),
        }
    }
}

/// 数据区的 case 流（实现 [`CaseReader`]）
pub struct SysFileCases<R: Read> {
    dict:        Arc<Dictionary>,
    endian:      Endian,
    compression: SysCompression,
    source:      DataSource<R>,
    bias:        f64,
    /// 头声明的剩余 case 数；哨兵 -1 时为 None（读到数据区结束）
    remaining:   Option<i64>,
    opcodes:     VecDeque<u8>,
    eof:         bool,
}

impl<R: Read> SysFileCases<R> {
    fn new(
        dict:        Arc<Dictionary>,
        inner:       R,
        endian:      Endian,
        compression: SysCompression,
        n_cases:     i32,
        bias:        f64,
    ) -> Result<Self> {
        let source = match compression {
            SysCompression::Deflate => DataSource::Deflate(Box::new(ZlibDecoder::new(inner))),
            _ => DataSource::Plain(inner),
        };
        Ok(Self {
            dict,
            endian,
            compression,
            source,
            bias,
            remaining: (n_cases >= 0).then_some(n_cases as i64),
            opcodes: VecDeque::new(),
            eof: false,
        })
    }

    /// 读 8 字节原始元素；`at_case_start` 时允许干净 EOF
    fn raw_element(&mut self, at_case_start: bool) -> Result<Option<[u8; 8]>> {
        let mut buf = [0u8; 8];
        let mut filled = 0;
        while filled < 8 {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => {
                    return if filled == 0 && at_case_start {
                        Ok(None)
                    } else {
                        Err(corrupt("data block ends mid-record"))
                    };
                }
                Ok(n) => filled += n,
                Err(e) => return Err(io_err(e)),
            }
        }
        Ok(Some(buf))
    }

    /// 简单压缩：取下一个操作码，按需补读一组 8 个
    fn next_opcode(&mut self, at_case_start: bool) -> Result<Option<u8>> {
        loop {
            if self.eof {
                return Ok(None);
            }
            match self.opcodes.pop_front() {
                Some(OPC_PADDING) => continue,
                Some(OPC_EOF) => {
                    self.eof = true;
                    if at_case_start {
                        return Ok(None);
                    }
                    return Err(corrupt("compressed data ends mid-record"));
                }
                Some(op) => return Ok(Some(op)),
                None => match self.raw_element(at_case_start)? {
                    Some(block) => self.opcodes.extend(block),
                    None => {
                        self.eof = true;
                        return Ok(None);
                    }
                },
            }
        }
    }

    fn read_number(&mut self, at_case_start: bool) -> Result<Option<f64>> {
        match self.compression {
            SysCompression::Simple => match self.next_opcode(at_case_start)? {
                None => Ok(None),
                Some(OPC_SYSMIS) => Ok(Some(SYSMIS)),
                Some(OPC_RAW) => {
                    let raw = self
                        .raw_element(false)?
                        .ok_or_else(|| corrupt("raw element missing"))?;
                    Ok(Some(get_f64(self.endian, &raw)))
                }
                Some(op @ 1..=251) => Ok(Some(op as f64 - self.bias)),
                Some(op) => Err(corrupt(format!("bad opcode {op} for numeric element"))),
            },
            _ => Ok(self
                .raw_element(at_case_start)?
                .map(|raw| get_f64(self.endian, &raw))),
        }
    }

    fn read_segment(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self.compression {
            SysCompression::Simple => match self.next_opcode(false)? {
                Some(OPC_SPACES) => {
                    out.extend_from_slice(b"        ");
                    Ok(())
                }
                Some(OPC_RAW) => {
                    let raw = self
                        .raw_element(false)?
                        .ok_or_else(|| corrupt("raw element missing"))?;
                    out.extend_from_slice(&raw);
                    Ok(())
                }
                Some(op) => Err(corrupt(format!("bad opcode {op} for string element"))),
                None => Err(corrupt("compressed data ends mid-record")),
            },
            _ => {
                let raw = self
                    .raw_element(false)?
                    .ok_or_else(|| corrupt("data block ends mid-record"))?;
                out.extend_from_slice(&raw);
                Ok(())
            }
        }
    }
}

impl<R: Read> CaseReader for SysFileCases<R> {
    fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }

    fn next_case(&mut self) -> Result<Option<Case>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }
        let dict = self.dict.clone();
        let mut values = Vec::with_capacity(dict.len());
        for (i, var) in dict.vars().iter().enumerate() {
            let at_start = i == 0;
            if var.width == 0 {
                match self.read_number(at_start)? {
                    Some(v) => values.push(Value::Number(v)),
                    None => {
                        // 声明了 case 数就不允许提前结束
                        return if self.remaining.is_some() {
                            Err(corrupt("fewer cases than header declares"))
                        } else {
                            Ok(None)
                        };
                    }
                }
            } else {
                let segments = element_width(var.width);
                let mut raw = Vec::with_capacity(segments * 8);
                if at_start {
                    // 先探一个元素判断流是否已干净结束
                    match self.compression {
                        SysCompression::Simple => match self.next_opcode(true)? {
                            None => {
                                return if self.remaining.is_some() {
                                    Err(corrupt("fewer cases than header declares"))
                                } else {
                                    Ok(None)
                                };
                            }
                            Some(OPC_SPACES) => raw.extend_from_slice(b"        "),
                            Some(OPC_RAW) => {
                                let e = self
                                    .raw_element(false)?
                                    .ok_or_else(|| corrupt("raw element missing"))?;
                                raw.extend_from_slice(&e);
                            }
                            Some(op) => {
                                return Err(corrupt(format!(
                                    "bad opcode {op} for string element"
                                )));
                            }
                        },
                        _ => match self.raw_element(true)? {
                            Some(e) => raw.extend_from_slice(&e),
                            None => {
                                return if self.remaining.is_some() {
                                    Err(corrupt("fewer cases than header declares"))
                                } else {
                                    Ok(None)
                                };
                            }
                        },
                    }
                }
                while raw.len() < segments * 8 {
                    self.read_segment(&mut raw)?;
                }
                raw.truncate(var.width);
                values.push(Value::Str(raw));
            }
        }
        if let Some(n) = &mut self.remaining {
            *n -= 1;
        }
        Ok(Some(Case::new(values)))
    }
}
