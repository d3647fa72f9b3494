//! 全局基础类型、引擎配置与错误定义

use thiserror::Error;

// ── 引擎配置 ──────────────────────────────────────────────────────────────────

/// 系统文件数据区的字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// 当前平台的本机字节序
    pub fn native() -> Self {
        if cfg!(target_endian = "big") { Endian::Big } else { Endian::Little }
    }
}

/// 外排序 spill run 的块压缩方案
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillCompression {
    None,
    Lz4,
}

/// 引擎配置。所有排序 / 物化 / 编解码入口显式接收一份，
/// 不存在任何全局可变状态。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 排序缓冲与 CaseWindow 允许驻留内存的字节预算
    pub workspace_bytes:   usize,
    /// 系统文件写出时使用的字节序
    pub endian:            Endian,
    /// spill run 块压缩方案
    pub spill_compression: SpillCompression,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_bytes:   64 * 1024 * 1024,
            endian:            Endian::native(),
            spill_compression: SpillCompression::Lz4,
        }
    }
}

impl EngineConfig {
    pub fn with_workspace_bytes(mut self, bytes: usize) -> Self {
        self.workspace_bytes = bytes;
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn with_spill_compression(mut self, c: SpillCompression) -> Self {
        self.spill_compression = c;
        self
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("variable not found: {0}")]
    VariableNotFound(String),
    #[error("duplicate variable name: {0}")]
    DuplicateVariable(String),
    #[error("type mismatch for variable {0}: {1}")]
    TypeMismatch(String, String),
    #[error("invalid dictionary: {0}")]
    BadDictionary(String),
    #[error("invalid aggregate specification: {0}")]
    BadAggregateSpec(String),
    #[error("spill I/O error: {0}")]
    SpillIo(String),
    #[error("system file I/O error: {0}")]
    SysFileIo(String),
    #[error("corrupt system file: {0}")]
    Corrupt(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("compression error: {0}")]
    Compression(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
