//! Region-based memory for the reference interpreter.
//!
//! Every allocation is a separate region of typed cells, and pointers are a region index
//! plus an element offset. Pointer arithmetic may leave the region (C allows forming
//! such pointers); dereferencing outside it is a fault.

use std::collections::HashMap;
use tangle_core::eval::Scalar;
use tangle_core::ir::ScalarTy;
use tangle_utils::errors::{EvalError, VerifyError};

/// Address of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub region: usize,
    /// Offset in elements of the region's type.
    pub offset: i64,
}

impl Pointer {
    pub const fn add(self, delta: i64) -> Self {
        Self {
            region: self.region,
            offset: self.offset.wrapping_add(delta),
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(Scalar),
    Ptr(Pointer),
    Null,
}

impl Value {
    pub const fn is_true(&self) -> bool {
        match self {
            Self::Int(s) => s.is_true(),
            Self::Ptr(_) => true,
            Self::Null => false,
        }
    }

    pub fn int(&self) -> Result<Scalar, EvalError> {
        match self {
            Self::Int(s) => Ok(*s),
            other => Err(EvalError::TypeMismatch(format!("expected an integer, got {other:?}"))),
        }
    }

    pub fn pointer(&self) -> Result<Pointer, VerifyError> {
        match self {
            Self::Ptr(p) => Ok(*p),
            Self::Null => Err(VerifyError::Memory("null pointer dereference".into())),
            Self::Int(s) => Err(EvalError::TypeMismatch(format!(
                "expected a pointer, got integer {}",
                s.value
            ))
            .into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub label: String,
    pub elem: ScalarTy,
    /// Cell contents as raw bit patterns.
    pub cells: Vec<u64>,
    pub read_only: bool,
}

impl Region {
    /// Cell contents as bytes, truncating each cell to its low byte.
    pub fn bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|c| *c as u8).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    regions: Vec<Region>,
    strings: HashMap<String, usize>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(
        &mut self,
        label: impl Into<String>,
        elem: ScalarTy,
        cells: Vec<u64>,
        read_only: bool,
    ) -> Pointer {
        self.regions.push(Region {
            label: label.into(),
            elem,
            cells,
            read_only,
        });
        Pointer {
            region: self.regions.len() - 1,
            offset: 0,
        }
    }

    /// Writable `char` buffer holding `bytes` and a terminating NUL.
    pub fn alloc_c_string(&mut self, label: impl Into<String>, bytes: &[u8]) -> Pointer {
        let cells = bytes.iter().map(|b| u64::from(*b)).chain([0]).collect();
        self.alloc(label, ScalarTy::I8, cells, false)
    }

    /// Read-only storage for a string literal. Equal literals share one region.
    pub fn intern(&mut self, literal: &str) -> Pointer {
        if let Some(&region) = self.strings.get(literal) {
            return Pointer { region, offset: 0 };
        }
        let cells = literal.bytes().map(u64::from).chain([0]).collect();
        let ptr = self.alloc(format!("{literal:?}"), ScalarTy::I8, cells, true);
        self.strings.insert(literal.to_string(), ptr.region);
        ptr
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn cell(&self, p: Pointer) -> Result<(&Region, usize), VerifyError> {
        let region = self
            .regions
            .get(p.region)
            .ok_or_else(|| VerifyError::Memory(format!("no region #{}", p.region)))?;
        usize::try_from(p.offset)
            .ok()
            .filter(|i| *i < region.cells.len())
            .map(|i| (region, i))
            .ok_or_else(|| {
                VerifyError::Memory(format!(
                    "offset {} outside {} ({} cells)",
                    p.offset,
                    region.label,
                    region.cells.len()
                ))
            })
    }

    pub fn elem(&self, p: Pointer) -> Result<ScalarTy, VerifyError> {
        self.regions
            .get(p.region)
            .map(|r| r.elem)
            .ok_or_else(|| VerifyError::Memory(format!("no region #{}", p.region)))
    }

    pub fn load(&self, p: Pointer) -> Result<Scalar, VerifyError> {
        let (region, i) = self.cell(p)?;
        Ok(Scalar::from_bits(region.cells[i], region.elem))
    }

    pub fn store(&mut self, p: Pointer, value: Scalar) -> Result<(), VerifyError> {
        let (region, i) = self.cell(p)?;
        if region.read_only {
            return Err(VerifyError::Memory(format!("write to read-only {}", region.label)));
        }
        let elem = region.elem;
        self.regions[p.region].cells[i] = value.cast(elem).bits();
        Ok(())
    }

    /// Bytes from `p` up to, not including, the next NUL.
    pub fn read_c_string(&self, p: Pointer) -> Result<Vec<u8>, VerifyError> {
        let mut out = Vec::new();
        let mut at = p;
        loop {
            let c = self.load(at)?.bits() as u8;
            if c == 0 {
                return Ok(out);
            }
            out.push(c);
            at = at.add(1);
        }
    }
}
