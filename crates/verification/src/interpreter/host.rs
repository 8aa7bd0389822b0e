//! External functions called by interpreted code.

use super::memory::{Memory, Value};
use tangle_core::eval::Scalar;
use tangle_core::ir::ScalarTy;
use tangle_utils::errors::VerifyError;

/// Result of a host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    Return(Value),
    /// The program terminated through `exit(code)`.
    Exit(i32),
}

/// Provides the functions a CFG may call.
pub trait Host {
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        memory: &mut Memory,
    ) -> Result<HostOutcome, VerifyError>;

    /// Everything written to standard output so far.
    fn output(&self) -> &[u8];

    /// Host-side state that belongs to the observable behaviour of a run, such as the
    /// contents of a mocked file. Compared between runs by the equivalence checker.
    fn state(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// The C library subset used by benchmark programs: `printf`, `putchar`, `puts`, `exit`,
/// `rand`, and `strlen`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdHost {
    output: Vec<u8>,
    rand_state: u32,
}

const RAND_MAX: u32 = 0x7fff;

impl StdHost {
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// `rand()` starts from `seed`, as after `srand(seed)`.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            output: Vec::new(),
            rand_state: seed,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    fn rand(&mut self) -> i32 {
        self.rand_state = self
            .rand_state
            .wrapping_mul(1_103_515_245)
            .wrapping_add(12_345);
        ((self.rand_state >> 16) & RAND_MAX) as i32
    }

    fn printf(&mut self, args: &[Value], memory: &Memory) -> Result<i32, VerifyError> {
        let format = memory.read_c_string(arg(args, 0, "printf")?.pointer()?)?;
        let mut out = Vec::new();
        let mut next = 1;
        let mut chars = format.iter().copied().peekable();
        while let Some(c) = chars.next() {
            if c != b'%' {
                out.push(c);
                continue;
            }
            while chars.next_if(|c| *c == b'l').is_some() {}
            let Some(conv) = chars.next() else {
                out.push(b'%');
                break;
            };
            if conv == b'%' {
                out.push(b'%');
                continue;
            }
            let value = arg(args, next, "printf")?;
            next += 1;
            match conv {
                b'c' => out.push(value.int()?.bits() as u8),
                b'd' | b'i' => {
                    let s = value.int()?;
                    let signed = if s.ty.bits() == 64 { s } else { s.cast(ScalarTy::I32) };
                    out.extend(signed.value.to_string().bytes());
                }
                b'u' => out.extend(value.int()?.bits().to_string().bytes()),
                b'x' => out.extend(format!("{:x}", value.int()?.bits()).bytes()),
                b's' => out.extend(memory.read_c_string(value.pointer()?)?),
                other => {
                    return Err(VerifyError::Harness(format!(
                        "unsupported printf conversion `%{}`",
                        other as char
                    )))
                }
            }
        }
        self.output.extend_from_slice(&out);
        Ok(out.len() as i32)
    }
}

fn arg(args: &[Value], index: usize, callee: &str) -> Result<Value, VerifyError> {
    args.get(index)
        .copied()
        .ok_or_else(|| VerifyError::Harness(format!("`{callee}` is missing argument {index}")))
}

impl Host for StdHost {
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        memory: &mut Memory,
    ) -> Result<HostOutcome, VerifyError> {
        let ret = |v: i32| Ok(HostOutcome::Return(Value::Int(Scalar::int(v))));
        match name {
            "printf" => ret(self.printf(args, memory)?),
            "putchar" => {
                let c = arg(args, 0, name)?.int()?.bits() as u8;
                self.output.push(c);
                ret(i32::from(c))
            }
            "puts" => {
                let s = memory.read_c_string(arg(args, 0, name)?.pointer()?)?;
                self.output.extend_from_slice(&s);
                self.output.push(b'\n');
                ret(1)
            }
            "exit" => {
                let code = arg(args, 0, name)?.int()?.cast(ScalarTy::I32).value as i32;
                Ok(HostOutcome::Exit(code))
            }
            "rand" => ret(self.rand()),
            "strlen" => {
                let len = memory.read_c_string(arg(args, 0, name)?.pointer()?)?.len();
                Ok(HostOutcome::Return(Value::Int(Scalar::new(
                    len as i128,
                    ScalarTy::U64,
                ))))
            }
            other => Err(VerifyError::UnknownCall(other.to_string())),
        }
    }

    fn output(&self) -> &[u8] {
        &self.output
    }
}
