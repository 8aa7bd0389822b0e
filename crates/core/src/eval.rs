//! C-like integer arithmetic over [`Scalar`] values.
//!
//! Arithmetic wraps at the width of the operand type after the usual arithmetic conversions,
//! comparisons and logical operators yield an `int` of 0 or 1, and the two cases C leaves
//! undefined that matter here (division by zero and oversized shifts) are reported as errors.

use crate::ir::{BinOp, Expr, ScalarTy, UnOp};
use tangle_utils::errors::EvalError;

/// Integer value tagged with its C type. `value` is always normalized for `ty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scalar {
    pub value: i128,
    pub ty: ScalarTy,
}

impl Scalar {
    pub fn new(value: i128, ty: ScalarTy) -> Self {
        Self {
            value: ty.normalize(value),
            ty,
        }
    }

    pub fn from_bits(bits: u64, ty: ScalarTy) -> Self {
        Self {
            value: ty.from_bits(bits),
            ty,
        }
    }

    pub fn int(value: i32) -> Self {
        Self::new(i128::from(value), ScalarTy::I32)
    }

    pub fn bool(value: bool) -> Self {
        Self::int(i32::from(value))
    }

    pub fn bits(self) -> u64 {
        self.ty.to_bits(self.value)
    }

    pub const fn is_true(self) -> bool {
        self.value != 0
    }

    pub fn cast(self, ty: ScalarTy) -> Self {
        Self::new(self.value, ty)
    }
}

/// Applies a unary operator.
pub fn unary(op: UnOp, operand: Scalar) -> Scalar {
    match op {
        UnOp::LogicalNot => Scalar::bool(!operand.is_true()),
        UnOp::Neg => {
            let ty = operand.ty.promoted();
            Scalar::new(ty.normalize(operand.value).wrapping_neg(), ty)
        }
        UnOp::Not => {
            let ty = operand.ty.promoted();
            Scalar::new(!ty.normalize(operand.value), ty)
        }
    }
}

/// Applies a binary operator. Logical operators are evaluated strictly here; callers that
/// need short-circuiting must test the left operand first.
pub fn binary(op: BinOp, lhs: Scalar, rhs: Scalar) -> Result<Scalar, EvalError> {
    if op.is_logical() {
        let result = match op {
            BinOp::LogicalAnd => lhs.is_true() && rhs.is_true(),
            _ => lhs.is_true() || rhs.is_true(),
        };
        return Ok(Scalar::bool(result));
    }

    if matches!(op, BinOp::Shl | BinOp::Shr) {
        let ty = lhs.ty.promoted();
        let bits = ty.bits();
        let amount = rhs.ty.promoted().normalize(rhs.value);
        if amount < 0 || amount >= i128::from(bits) {
            return Err(EvalError::ShiftOverflow { amount, bits });
        }
        let a = ty.normalize(lhs.value);
        let shifted = match op {
            BinOp::Shl => a.wrapping_shl(amount as u32),
            _ => a >> amount,
        };
        return Ok(Scalar::new(shifted, ty));
    }

    let ty = lhs.ty.common(rhs.ty);
    let a = ty.normalize(lhs.value);
    let b = ty.normalize(rhs.value);

    if op.is_comparison() {
        let result = match op {
            BinOp::Eq => a == b,
            BinOp::Ne => a != b,
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        };
        return Ok(Scalar::bool(result));
    }

    let value = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
        BinOp::Div => a / b,
        BinOp::Rem => a % b,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        other => {
            return Err(EvalError::TypeMismatch(format!(
                "operator `{}` is not arithmetic",
                other.symbol()
            )))
        }
    };
    Ok(Scalar::new(value, ty))
}

/// Folds `expr` to a constant, resolving variables through `lookup`.
///
/// Only integer-valued sub-expressions can be folded. Memory reads, string literals, pointers,
/// and calls yield [`EvalError::NotConstant`]; variables unknown to `lookup` yield
/// [`EvalError::Unbound`].
pub fn fold(expr: &Expr, lookup: &dyn Fn(&str) -> Option<Scalar>) -> Result<Scalar, EvalError> {
    match expr {
        Expr::Const { bits, ty } => Ok(Scalar::from_bits(*bits, *ty)),
        Expr::Var { name } => lookup(name).ok_or_else(|| EvalError::Unbound(name.clone())),
        Expr::Unary { op, operand } => Ok(unary(*op, fold(operand, lookup)?)),
        Expr::Binary { op, lhs, rhs } => {
            let l = fold(lhs, lookup)?;
            match op {
                BinOp::LogicalAnd if !l.is_true() => Ok(Scalar::bool(false)),
                BinOp::LogicalOr if l.is_true() => Ok(Scalar::bool(true)),
                _ => binary(*op, l, fold(rhs, lookup)?),
            }
        }
        Expr::Cast { ty, operand } => Ok(fold(operand, lookup)?.cast(*ty)),
        Expr::Select {
            cond,
            then_value,
            else_value,
        } => {
            let chosen = if fold(cond, lookup)?.is_true() {
                then_value
            } else {
                else_value
            };
            fold(chosen, lookup)
        }
        Expr::Str { .. } | Expr::Null | Expr::Load { .. } | Expr::Call { .. } => {
            Err(EvalError::NotConstant(expr.to_string()))
        }
    }
}
