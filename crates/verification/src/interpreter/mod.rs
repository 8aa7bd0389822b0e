//! Reference interpreter for [`FunctionCfg`].
//!
//! Runs a function to completion against a [`Host`], with C integer semantics from
//! `tangle_core::eval` and explicit [`Memory`]. Every visited block and every dispatched
//! state is recorded in a [`Trace`], which is what the property tests inspect to count
//! loop-copy executions and to prove that injected dead blocks never run.

pub mod host;
pub mod memory;

use host::{Host, HostOutcome};
use indexmap::IndexMap;
use memory::{Memory, Pointer, Value};
use std::collections::HashMap;
use tangle_core::cfg_ir::{BlockId, FunctionCfg, Provenance, Terminator};
use tangle_core::eval::{binary, unary, Scalar};
use tangle_core::ir::{BinOp, Expr, ScalarTy, Stmt, Ty, UnOp};
use tangle_utils::errors::{EvalError, VerifyError};
use tracing::trace;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `return`, with the value converted to the declared return type.
    Returned(Option<Scalar>),
    /// `exit(code)` was called.
    Exited(i32),
}

/// Blocks and dispatch states in the order they were executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    pub blocks: Vec<BlockId>,
    pub states: Vec<u64>,
}

impl Trace {
    pub fn visits(&self, id: BlockId) -> usize {
        self.blocks.iter().filter(|b| **b == id).count()
    }

    /// Number of executed blocks that `cfg` marks with `provenance`.
    pub fn visits_with(&self, cfg: &FunctionCfg, provenance: Provenance) -> usize {
        self.blocks
            .iter()
            .filter(|b| cfg.block(**b).is_some_and(|blk| blk.provenance == provenance))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    pub trace: Trace,
    /// Final values of the function's globals.
    pub globals: IndexMap<String, Scalar>,
    pub steps: u64,
}

enum Stop {
    Exit(i32),
    Fault(VerifyError),
}

impl From<VerifyError> for Stop {
    fn from(e: VerifyError) -> Self {
        Self::Fault(e)
    }
}

impl From<EvalError> for Stop {
    fn from(e: EvalError) -> Self {
        Self::Fault(e.into())
    }
}

struct Frame<'a, H> {
    cfg: &'a FunctionCfg,
    memory: &'a mut Memory,
    host: &'a mut H,
    vars: HashMap<&'a str, Option<Value>>,
    globals: IndexMap<String, Scalar>,
}

/// Runs `cfg` with `args` bound to its parameters in order.
///
/// Faults (memory errors, unknown calls, reaching an `Unreachable` block, running past
/// `step_limit` blocks) are returned as errors. A call to `exit` is a normal outcome.
pub fn execute<H: Host>(
    cfg: &FunctionCfg,
    args: &[Value],
    memory: &mut Memory,
    host: &mut H,
    step_limit: u64,
) -> Result<Execution, VerifyError> {
    if args.len() != cfg.params.len() {
        return Err(VerifyError::Harness(format!(
            "`{}` takes {} arguments, got {}",
            cfg.name,
            cfg.params.len(),
            args.len()
        )));
    }
    let mut frame = Frame {
        cfg,
        memory,
        host,
        vars: HashMap::new(),
        globals: cfg
            .globals
            .iter()
            .map(|(name, g)| (name.clone(), Scalar::from_bits(g.init, g.ty)))
            .collect(),
    };
    for (param, arg) in cfg.params.iter().zip(args) {
        let value = frame.coerce(param.ty, *arg)?;
        frame.vars.insert(param.name.as_str(), Some(value));
    }
    for (name, ty) in &cfg.locals {
        let value = match ty {
            Ty::Array(elem, len) => Some(Value::Ptr(frame.memory.alloc(
                name.clone(),
                *elem,
                vec![0; *len],
                false,
            ))),
            _ => None,
        };
        frame.vars.insert(name.as_str(), value);
    }

    let mut trace = Trace::default();
    let mut current = cfg.entry();
    let mut steps = 0u64;
    let outcome = loop {
        steps += 1;
        if steps > step_limit {
            return Err(VerifyError::StepLimit(step_limit));
        }
        trace.blocks.push(current);
        match frame.step(current, &mut trace) {
            Ok(Next::Goto(next)) => current = next,
            Ok(Next::Done(outcome)) => break outcome,
            Err(Stop::Exit(code)) => break Outcome::Exited(code),
            Err(Stop::Fault(e)) => return Err(e),
        }
    };
    trace!("`{}` finished after {steps} blocks: {outcome:?}", cfg.name);
    Ok(Execution {
        outcome,
        trace,
        globals: frame.globals,
        steps,
    })
}

enum Next {
    Goto(BlockId),
    Done(Outcome),
}

impl<'a, H: Host> Frame<'a, H> {
    fn step(&mut self, id: BlockId, trace: &mut Trace) -> Result<Next, Stop> {
        let cfg = self.cfg;
        let block = cfg.get(id).map_err(VerifyError::from)?;
        for stmt in &block.stmts {
            self.exec(stmt)?;
        }
        Ok(match &block.terminator {
            Terminator::Fallthrough { next } => Next::Goto(*next),
            Terminator::Branch {
                cond,
                then_to,
                else_to,
            } => Next::Goto(if self.eval(cond)?.is_true() {
                *then_to
            } else {
                *else_to
            }),
            Terminator::Return { value } => {
                let value = match value {
                    Some(expr) => {
                        let v = self.eval(expr)?.int()?;
                        Some(cfg.ret.map_or(v, |ty| v.cast(ty)))
                    }
                    None => None,
                };
                Next::Done(Outcome::Returned(value))
            }
            Terminator::Unreachable => return Err(VerifyError::ReachedUnreachable(id.0).into()),
            Terminator::Dispatch { state, table, .. } => {
                let s = self.read_var(state)?.int()?.bits();
                trace.states.push(s);
                let target = usize::try_from(s)
                    .ok()
                    .and_then(|i| table.get(i))
                    .ok_or(VerifyError::BadDispatch {
                        block: id.0,
                        state: s,
                    })?;
                Next::Goto(*target)
            }
        })
    }

    fn exec(&mut self, stmt: &'a Stmt) -> Result<(), Stop> {
        match stmt {
            Stmt::Assign { dest, value } => {
                let v = self.eval(value)?;
                self.write_var(dest, v)
            }
            Stmt::Store { addr, value } => {
                let p = self.eval(addr)?.pointer()?;
                let v = self.eval(value)?.int()?;
                self.memory.store(p, v)?;
                Ok(())
            }
            Stmt::Eval { expr } => self.eval(expr).map(drop),
        }
    }

    /// Converts `value` for storage in a variable of type `ty`.
    fn coerce(&self, ty: Ty, value: Value) -> Result<Value, VerifyError> {
        match (ty, value) {
            (Ty::Scalar(t), Value::Int(s)) => Ok(Value::Int(s.cast(t))),
            (Ty::Ptr(_), Value::Ptr(_) | Value::Null) => Ok(value),
            (Ty::Ptr(_), Value::Int(s)) if s.value == 0 => Ok(Value::Null),
            _ => Err(EvalError::TypeMismatch(format!("cannot store {value:?} as {ty:?}")).into()),
        }
    }

    fn read_var(&self, name: &str) -> Result<Value, Stop> {
        if let Some(slot) = self.vars.get(name) {
            return slot.ok_or_else(|| VerifyError::Uninitialized(name.to_string()).into());
        }
        self.globals
            .get(name)
            .map(|s| Value::Int(*s))
            .ok_or_else(|| EvalError::Unbound(name.to_string()).into())
    }

    fn write_var(&mut self, name: &'a str, value: Value) -> Result<(), Stop> {
        let ty = self
            .cfg
            .var_type(name)
            .ok_or_else(|| EvalError::Unbound(name.to_string()))?;
        if matches!(ty, Ty::Array(..)) {
            return Err(EvalError::TypeMismatch(format!("assignment to array `{name}`")).into());
        }
        let value = self.coerce(ty, value)?;
        if let Some(global) = self.globals.get_mut(name) {
            *global = value.int()?;
        } else {
            self.vars.insert(name, Some(value));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, Stop> {
        Ok(match expr {
            Expr::Const { bits, ty } => Value::Int(Scalar::from_bits(*bits, *ty)),
            Expr::Str { value } => Value::Ptr(self.memory.intern(value)),
            Expr::Null => Value::Null,
            Expr::Var { name } => self.read_var(name)?,
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match (op, v) {
                    (UnOp::LogicalNot, _) => Value::Int(Scalar::bool(!v.is_true())),
                    (_, v) => Value::Int(unary(*op, v.int()?)),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                match op {
                    BinOp::LogicalAnd if !l.is_true() => Value::Int(Scalar::bool(false)),
                    BinOp::LogicalOr if l.is_true() => Value::Int(Scalar::bool(true)),
                    BinOp::LogicalAnd | BinOp::LogicalOr => {
                        Value::Int(Scalar::bool(self.eval(rhs)?.is_true()))
                    }
                    _ => {
                        let r = self.eval(rhs)?;
                        self.binary(*op, l, r)?
                    }
                }
            }
            Expr::Load { addr } => {
                let p = self.eval(addr)?.pointer()?;
                Value::Int(self.memory.load(p)?)
            }
            Expr::Cast { ty, operand } => Value::Int(self.eval(operand)?.int()?.cast(*ty)),
            Expr::Select {
                cond,
                then_value,
                else_value,
            } => {
                if self.eval(cond)?.is_true() {
                    self.eval(then_value)?
                } else {
                    self.eval(else_value)?
                }
            }
            Expr::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a)?);
                }
                match self.host.call(callee, &values, self.memory)? {
                    HostOutcome::Return(v) => v,
                    HostOutcome::Exit(code) => return Err(Stop::Exit(code)),
                }
            }
        })
    }

    fn binary(&self, op: BinOp, l: Value, r: Value) -> Result<Value, Stop> {
        let mismatch = || -> Stop {
            EvalError::TypeMismatch(format!("`{}` applied to {l:?} and {r:?}", op.symbol())).into()
        };
        Ok(match (l, r) {
            (Value::Int(a), Value::Int(b)) => Value::Int(binary(op, a, b)?),
            (Value::Ptr(p), Value::Int(n)) => match op {
                BinOp::Add => Value::Ptr(p.add(n.value as i64)),
                BinOp::Sub => Value::Ptr(p.add((n.value as i64).wrapping_neg())),
                _ => return Err(mismatch()),
            },
            (Value::Int(n), Value::Ptr(p)) if op == BinOp::Add => Value::Ptr(p.add(n.value as i64)),
            (Value::Ptr(a), Value::Ptr(b)) if a.region == b.region => {
                let (x, y) = (a.offset, b.offset);
                match op {
                    BinOp::Sub => Value::Int(Scalar::new(i128::from(x - y), ScalarTy::I64)),
                    _ if op.is_comparison() => Value::Int(Scalar::bool(compare(op, x, y))),
                    _ => return Err(mismatch()),
                }
            }
            (a, b) if matches!(op, BinOp::Eq | BinOp::Ne) => {
                let same = pointer_identity(a) == pointer_identity(b);
                Value::Int(Scalar::bool(same == (op == BinOp::Eq)))
            }
            _ => return Err(mismatch()),
        })
    }
}

fn compare(op: BinOp, x: i64, y: i64) -> bool {
    match op {
        BinOp::Eq => x == y,
        BinOp::Ne => x != y,
        BinOp::Lt => x < y,
        BinOp::Le => x <= y,
        BinOp::Gt => x > y,
        _ => x >= y,
    }
}

/// Identity used for pointer equality across regions; null and integer zero compare equal.
fn pointer_identity(v: Value) -> Option<Pointer> {
    match v {
        Value::Ptr(p) => Some(p),
        Value::Null | Value::Int(_) => None,
    }
}
