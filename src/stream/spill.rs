//! 外排序的 spill run 文件：分块、压缩、带校验和
//!
//! ```text
//! run 文件 = block*
//! ┌──────────────────────────────────┐
//! │ case_count  (u32 LE)             │
//! │ uncomp_size (u32 LE)             │
//! │ comp_size   (u32 LE)             │
//! │ payload     (lz4 或原始字节)     │
//! │ CRC32       (u32 LE, 头+payload) │
//! └──────────────────────────────────┘
//! ```
//!
//! payload 内每个 case 定步长编码：数值 8 字节 LE double，
//! 字符串按声明宽度原样写出。临时文件由 `tempfile` 创建，
//! 句柄一关即回收，任何退出路径都不留文件。

use crate::case::Case;
use crate::common::{EngineError, Result, SpillCompression};
use crate::dictionary::Dictionary;
use crate::value::Value;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// 单块目标字节数（未压缩）
const BLOCK_TARGET_BYTES: usize = 256 * 1024;

// ── case 定步长编解码 ─────────────────────────────────────────────────────────

/// 把一个 case 按字典的固定步长追加编码进 `out`
pub fn encode_case_into(case: &Case, dict: &Dictionary, out: &mut Vec<u8>) {
    for value in &case.values {
        match value {
            Value::Number(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(b)    => out.extend_from_slice(b),
        }
    }
    debug_assert_eq!(case.values.len(), dict.len());
}

/// 从 `buf[offset..]` 解出一个 case，返回新偏移
pub fn decode_case_from(buf: &[u8], offset: usize, dict: &Dictionary) -> Result<(Case, usize)> {
    let mut pos = offset;
    let mut values = Vec::with_capacity(dict.len());
    for var in dict.vars() {
        if var.width == 0 {
            let end = pos + 8;
            let bytes = buf
                .get(pos..end)
                .ok_or_else(|| EngineError::SpillIo("truncated case data".into()))?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            values.push(Value::Number(f64::from_le_bytes(arr)));
            pos = end;
        } else {
            let end = pos + var.width;
            let bytes = buf
                .get(pos..end)
                .ok_or_else(|| EngineError::SpillIo("truncated case data".into()))?;
            values.push(Value::Str(bytes.to_vec()));
            pos = end;
        }
    }
    Ok((Case::new(values), pos))
}

// ── 块编解码 ──────────────────────────────────────────────────────────────────

fn encode_block(raw: &[u8], case_count: u32, codec: SpillCompression) -> Result<Vec<u8>> {
    let payload = match codec {
        SpillCompression::None => raw.to_vec(),
        SpillCompression::Lz4 => lz4::block::compress(raw, None, false)
            .map_err(|e| EngineError::Compression(e.to_string()))?,
    };
    let mut block = Vec::with_capacity(16 + payload.len());
    block.extend_from_slice(&case_count.to_le_bytes());
    block.extend_from_slice(&(raw.len() as u32).to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    block.extend_from_slice(&payload);
    let crc = crc32fast::hash(&block);
    block.extend_from_slice(&crc.to_le_bytes());
    Ok(block)
}

fn decode_block(block: &[u8], codec: SpillCompression) -> Result<(u32, Vec<u8>)> {
    if block.len() < 16 {
        return Err(EngineError::SpillIo("spill block too short".into()));
    }
    let body_end = block.len() - 4;
    let stored = u32::from_le_bytes(block[body_end..].try_into().unwrap());
    if crc32fast::hash(&block[..body_end]) != stored {
        return Err(EngineError::ChecksumMismatch);
    }
    let case_count = u32::from_le_bytes(block[0..4].try_into().unwrap());
    let uncomp_size = u32::from_le_bytes(block[4..8].try_into().unwrap()) as usize;
    let payload = &block[12..body_end];
    let raw = match codec {
        SpillCompression::None => payload.to_vec(),
        SpillCompression::Lz4 => lz4::block::decompress(payload, Some(uncomp_size as i32))
            .map_err(|e| EngineError::Compression(e.to_string()))?,
    };
    Ok((case_count, raw))
}

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::SpillIo(e.to_string())
}

// ── RunWriter ─────────────────────────────────────────────────────────────────

/// 把一个已排序 run 写入匿名临时文件
pub struct RunWriter {
    file:     File,
    dict:     Arc<Dictionary>,
    codec:    SpillCompression,
    buf:      Vec<u8>,
    buffered: u32,
}

impl RunWriter {
    pub fn new(dict: Arc<Dictionary>, codec: SpillCompression) -> Result<Self> {
        let file = tempfile::tempfile().map_err(io_err)?;
        Ok(Self { file, dict, codec, buf: Vec::new(), buffered: 0 })
    }

    pub fn push(&mut self, case: &Case) -> Result<()> {
        encode_case_into(case, &self.dict, &mut self.buf);
        self.buffered += 1;
        if self.buf.len() >= BLOCK_TARGET_BYTES {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let block = encode_block(&self.buf, self.buffered, self.codec)?;
        self.file
            .write_all(&(block.len() as u32).to_le_bytes())
            .and_then(|_| self.file.write_all(&block))
            .map_err(io_err)?;
        self.buf.clear();
        self.buffered = 0;
        Ok(())
    }

    /// 收尾并转成读取端（回绕到文件头）
    pub fn finish(mut self) -> Result<RunReader> {
        self.flush_block()?;
        self.file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        Ok(RunReader {
            file:    self.file,
            dict:    self.dict,
            codec:   self.codec,
            pending: VecDeque::new(),
        })
    }
}

// ── RunReader ─────────────────────────────────────────────────────────────────

/// 顺序回放一个 spill run
pub struct RunReader {
    file:    File,
    dict:    Arc<Dictionary>,
    codec:   SpillCompression,
    pending: VecDeque<Case>,
}

impl RunReader {
    pub fn next_case(&mut self) -> Result<Option<Case>> {
        if let Some(c) = self.pending.pop_front() {
            return Ok(Some(c));
        }
        // 读下一块
        let mut len_buf = [0u8; 4];
        match self.file.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(io_err(e)),
        }
        let block_len = u32::from_le_bytes(len_buf) as usize;
        let mut block = vec![0u8; block_len];
        self.file.read_exact(&mut block).map_err(io_err)?;
        let (count, raw) = decode_block(&block, self.codec)?;
        let mut pos = 0;
        for _ in 0..count {
            let (case, next) = decode_case_from(&raw, pos, &self.dict)?;
            self.pending.push_back(case);
            pos = next;
        }
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EngineError;
    use crate::variable::Variable;

    fn dict() -> Arc<Dictionary> {
        Arc::new(
            Dictionary::with_vars(vec![Variable::numeric("x"), Variable::string("s", 6)]).unwrap(),
        )
    }

    fn case(x: f64, s: &str) -> Case {
        Case::new(vec![Value::Number(x), Value::string(s.as_bytes(), 6)])
    }

    #[test]
    fn run_round_trip() {
        for codec in [SpillCompression::None, SpillCompression::Lz4] {
            let d = dict();
            let mut w = RunWriter::new(d.clone(), codec).unwrap();
            let cases: Vec<Case> = (0..1000).map(|i| case(i as f64, "abc")).collect();
            for c in &cases {
                w.push(c).unwrap();
            }
            let mut r = w.finish().unwrap();
            let mut got = Vec::new();
            while let Some(c) = r.next_case().unwrap() {
                got.push(c);
            }
            assert_eq!(got, cases);
        }
    }

    #[test]
    fn sysmis_survives_spill() {
        let d = dict();
        let mut w = RunWriter::new(d.clone(), SpillCompression::Lz4).unwrap();
        w.push(&Case::new(vec![Value::sysmis(), Value::string(b"", 6)])).unwrap();
        let mut r = w.finish().unwrap();
        assert!(r.next_case().unwrap().unwrap().values[0].is_sysmis());
    }

    #[test]
    fn corrupted_block_is_detected() {
        let d = dict();
        let mut raw = Vec::new();
        encode_case_into(&case(7.0, "hello"), &d, &mut raw);
        let mut block = encode_block(&raw, 1, SpillCompression::Lz4).unwrap();
        let mid = block.len() / 2;
        block[mid] ^= 0xFF;
        assert!(matches!(
            decode_block(&block, SpillCompression::Lz4),
            Err(EngineError::ChecksumMismatch)
        ));
    }
}
