//! CaseWindow：随机访问的 case 物化，超预算整体落盘
//!
//! 追加阶段估算驻留字节数；一旦越过工作区预算，把已有内容一次性
//! 按固定步长（数值 8 字节、字符串按宽度）写进匿名临时文件，
//! 之后的追加直接走磁盘。固定步长让 `get(idx)` 保持 O(1) 寻址。
//! 读侧文件句柄用 `Mutex` 保护，多个游标可共享同一个只读窗口。

use crate::case::Case;
use crate::common::{EngineConfig, EngineError, Result};
use crate::dictionary::Dictionary;
use crate::stream::spill::{decode_case_from, encode_case_into};
use crate::stream::CaseReader;
use crate::value::Value;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

fn io_err(e: std::io::Error) -> EngineError {
    EngineError::SpillIo(e.to_string())
}

pub struct CaseWindow {
    dict:      Arc<Dictionary>,
    stride:    usize,
    budget:    usize,
    mem:       Vec<Case>,
    mem_bytes: usize,
    disk:      Option<Mutex<File>>,
    len:       usize,
}

impl CaseWindow {
    pub fn new(dict: Arc<Dictionary>, config: &EngineConfig) -> Self {
        let stride = dict.case_stride();
        Self {
            dict,
            stride,
            budget: config.workspace_bytes,
            mem: Vec::new(),
            mem_bytes: 0,
            disk: None,
            len: 0,
        }
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 追加一个 case。值类型与字典不符说明调用方破坏了契约，立即报错。
    pub fn push(&mut self, case: Case) -> Result<()> {
        self.check_shape(&case)?;
        self.len += 1;

        if let Some(file) = &self.disk {
            let mut buf = Vec::with_capacity(self.stride);
            encode_case_into(&case, &self.dict, &mut buf);
            let mut f = file.lock().map_err(|_| poisoned())?;
            f.seek(SeekFrom::End(0)).map_err(io_err)?;
            f.write_all(&buf).map_err(io_err)?;
            return Ok(());
        }

        self.mem_bytes += case.heap_size();
        self.mem.push(case);
        if self.mem_bytes > self.budget {
            self.dump_to_disk()?;
        }
        Ok(())
    }

    fn check_shape(&self, case: &Case) -> Result<()> {
        if case.values.len() != self.dict.len() {
            return Err(EngineError::TypeMismatch(
                "<case>".into(),
                format!("expected {} values, got {}", self.dict.len(), case.values.len()),
            ));
        }
        for (var, value) in self.dict.vars().iter().zip(&case.values) {
            let ok = match value {
                Value::Number(_) => var.width == 0,
                Value::Str(b)    => var.width > 0 && b.len() == var.width,
            };
            if !ok {
                return Err(EngineError::TypeMismatch(
                    var.name.clone(),
                    "case value does not match variable type/width".into(),
                ));
            }
        }
        Ok(())
    }

    /// 把内存部分整体搬到磁盘，之后的追加全部走文件
    fn dump_to_disk(&mut self) -> Result<()> {
        let mut file = tempfile::tempfile().map_err(io_err)?;
        let mut buf = Vec::with_capacity(self.stride * self.mem.len());
        for case in &self.mem {
            encode_case_into(case, &self.dict, &mut buf);
        }
        file.write_all(&buf).map_err(io_err)?;
        self.mem.clear();
        self.mem_bytes = 0;
        self.disk = Some(Mutex::new(file));
        Ok(())
    }

    /// 随机读取第 `idx` 个 case
    pub fn get(&self, idx: usize) -> Result<Case> {
        if idx >= self.len {
            return Err(EngineError::SpillIo(format!(
                "case index {idx} out of range (len {})", self.len
            )));
        }
        match &self.disk {
            None => Ok(self.mem[idx].clone()),
            Some(file) => {
                let mut buf = vec![0u8; self.stride];
                {
                    let mut f = file.lock().map_err(|_| poisoned())?;
                    f.seek(SeekFrom::Start((idx * self.stride) as u64)).map_err(io_err)?;
                    f.read_exact(&mut buf).map_err(io_err)?;
                }
                let (case, _) = decode_case_from(&buf, 0, &self.dict)?;
                Ok(case)
            }
        }
    }

    /// 共享所有权地开一个游标
    pub fn cursor(self: Arc<Self>) -> WindowCursor {
        WindowCursor::new(self)
    }
}

fn poisoned() -> EngineError {
    EngineError::SpillIo("window file lock poisoned".into())
}

/// 独立游标：多个游标共享一个只读窗口，互不影响读取进度
pub struct WindowCursor {
    window: Arc<CaseWindow>,
    pos:    usize,
}

impl WindowCursor {
    pub fn new(window: Arc<CaseWindow>) -> Self {
        Self { window, pos: 0 }
    }
}

impl CaseReader for WindowCursor {
    fn dictionary(&self) -> &Arc<Dictionary> {
        self.window.dictionary()
    }

    fn next_case(&mut self) -> Result<Option<Case>> {
        if self.pos >= self.window.len() {
            return Ok(None);
        }
        let case = self.window.get(self.pos)?;
        self.pos += 1;
        Ok(Some(case))
    }
}
