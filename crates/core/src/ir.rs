//! Typed statement and expression IR carried inside basic blocks.
//!
//! Expressions are pure trees over a small set of C integer types. Integer constants are
//! stored as raw bit patterns together with their type so that `4465652213940039705UL` and
//! `-1` survive a JSON round-trip exactly. The `Display` impls render C syntax with every
//! compound sub-expression parenthesized, which is what the emitter writes out.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarTy {
    /// Plain `char`, treated as signed.
    I8,
    U8,
    I32,
    U32,
    I64,
    U64,
}

impl ScalarTy {
    /// Width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 8,
            Self::I32 | Self::U32 => 32,
            Self::I64 | Self::U64 => 64,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I32 | Self::I64)
    }

    /// Integer promotion: anything narrower than `int` becomes `int`.
    pub const fn promoted(self) -> Self {
        match self {
            Self::I8 | Self::U8 => Self::I32,
            other => other,
        }
    }

    /// Result type of a binary arithmetic operator under the usual arithmetic conversions.
    pub fn common(self, other: Self) -> Self {
        let (a, b) = (self.promoted(), other.promoted());
        if a == b {
            return a;
        }
        if a.is_signed() == b.is_signed() {
            return if a.bits() >= b.bits() { a } else { b };
        }
        let (signed, unsigned) = if a.is_signed() { (a, b) } else { (b, a) };
        if unsigned.bits() >= signed.bits() {
            unsigned
        } else {
            signed
        }
    }

    /// Truncates `value` to this type's width and sign-extends it if the type is signed.
    pub fn normalize(self, value: i128) -> i128 {
        let bits = self.bits();
        let mask = (1i128 << bits) - 1;
        let raw = value & mask;
        if self.is_signed() && (raw >> (bits - 1)) & 1 == 1 {
            raw - (1i128 << bits)
        } else {
            raw
        }
    }

    /// Interprets a raw bit pattern as a value of this type.
    pub fn from_bits(self, bits: u64) -> i128 {
        self.normalize(i128::from(bits))
    }

    /// Two's complement bit pattern of `value`, zero-extended to 64 bits.
    pub fn to_bits(self, value: i128) -> u64 {
        let mask = if self.bits() == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        };
        (self.normalize(value) as u64) & mask
    }

    pub const fn c_name(self) -> &'static str {
        match self {
            Self::I8 => "char",
            Self::U8 => "unsigned char",
            Self::I32 => "int",
            Self::U32 => "unsigned int",
            Self::I64 => "long",
            Self::U64 => "unsigned long",
        }
    }
}

/// Declared type of a parameter, local, or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ty {
    Scalar(ScalarTy),
    /// Pointer to elements of the given scalar type.
    Ptr(ScalarTy),
    /// Fixed-size array; decays to `Ptr` when used in an expression.
    Array(ScalarTy, usize),
}

impl Ty {
    pub const fn scalar(self) -> Option<ScalarTy> {
        match self {
            Self::Scalar(ty) => Some(ty),
            _ => None,
        }
    }

    /// Element type for pointers and arrays.
    pub const fn element(self) -> Option<ScalarTy> {
        match self {
            Self::Ptr(ty) | Self::Array(ty, _) => Some(ty),
            Self::Scalar(_) => None,
        }
    }

    /// Renders a declaration of `name` with this type, e.g. `char buf[10]`.
    pub fn declare(self, name: &str) -> String {
        match self {
            Self::Scalar(ty) => format!("{} {name}", ty.c_name()),
            Self::Ptr(ty) => format!("{} *{name}", ty.c_name()),
            Self::Array(ty, len) => format!("{} {name}[{len}]", ty.c_name()),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Neg,
    /// Bitwise complement `~`.
    Not,
    /// Logical negation `!`.
    LogicalNot,
}

impl UnOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "~",
            Self::LogicalNot => "!",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr)
    }
}

/// Side-effect free expression tree, except for `Call`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    /// Integer literal stored as a raw bit pattern.
    Const { bits: u64, ty: ScalarTy },
    /// String literal; evaluates to a pointer to read-only `char` storage.
    Str { value: String },
    /// The null pointer.
    Null,
    Var { name: String },
    Unary { op: UnOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Dereference `*(addr)`; the element type comes from the pointer.
    Load { addr: Box<Expr> },
    Cast { ty: ScalarTy, operand: Box<Expr> },
    /// `cond ? then_value : else_value`
    Select {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    /// Call to an external function resolved by the host.
    Call { callee: String, args: Vec<Expr> },
}

impl Expr {
    /// Integer literal of type `ty` holding `value` (truncated to the type's width).
    pub fn int(value: i128, ty: ScalarTy) -> Self {
        Self::Const {
            bits: ty.to_bits(value),
            ty,
        }
    }

    pub fn i32(value: i32) -> Self {
        Self::int(i128::from(value), ScalarTy::I32)
    }

    pub fn u32(value: u32) -> Self {
        Self::int(i128::from(value), ScalarTy::U32)
    }

    pub fn u64(value: u64) -> Self {
        Self::Const {
            bits: value,
            ty: ScalarTy::U64,
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::Str {
            value: value.into(),
        }
    }

    pub fn unary(op: UnOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinOp, lhs: Self, rhs: Self) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn load(addr: Self) -> Self {
        Self::Load {
            addr: Box::new(addr),
        }
    }

    pub fn cast(ty: ScalarTy, operand: Self) -> Self {
        Self::Cast {
            ty,
            operand: Box::new(operand),
        }
    }

    pub fn select(cond: Self, then_value: Self, else_value: Self) -> Self {
        Self::Select {
            cond: Box::new(cond),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Call {
            callee: callee.into(),
            args,
        }
    }

    pub fn add(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Mul, lhs, rhs)
    }

    pub fn lt(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Lt, lhs, rhs)
    }

    pub fn ne(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Ne, lhs, rhs)
    }

    pub fn eq(lhs: Self, rhs: Self) -> Self {
        Self::binary(BinOp::Eq, lhs, rhs)
    }

    /// Calls `f` for every variable name read by this expression, in evaluation order.
    pub fn visit_vars<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Self::Const { .. } | Self::Str { .. } | Self::Null => {}
            Self::Var { name } => f(name),
            Self::Unary { operand, .. } | Self::Cast { operand, .. } => operand.visit_vars(f),
            Self::Load { addr } => addr.visit_vars(f),
            Self::Binary { lhs, rhs, .. } => {
                lhs.visit_vars(f);
                rhs.visit_vars(f);
            }
            Self::Select {
                cond,
                then_value,
                else_value,
            } => {
                cond.visit_vars(f);
                then_value.visit_vars(f);
                else_value.visit_vars(f);
            }
            Self::Call { args, .. } => args.iter().for_each(|a| a.visit_vars(f)),
        }
    }

    pub fn mentions(&self, var: &str) -> bool {
        let mut found = false;
        self.visit_vars(&mut |name| found |= name == var);
        found
    }

    /// True if evaluating the expression may read memory or call out to the host.
    pub fn touches_memory(&self) -> bool {
        match self {
            Self::Load { .. } | Self::Call { .. } => true,
            Self::Const { .. } | Self::Str { .. } | Self::Null | Self::Var { .. } => false,
            Self::Unary { operand, .. } | Self::Cast { operand, .. } => operand.touches_memory(),
            Self::Binary { lhs, rhs, .. } => lhs.touches_memory() || rhs.touches_memory(),
            Self::Select {
                cond,
                then_value,
                else_value,
            } => {
                cond.touches_memory() || then_value.touches_memory() || else_value.touches_memory()
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const { bits, ty } => write_const(f, *bits, *ty),
            Self::Str { value } => write_c_string(f, value),
            Self::Null => f.write_str("(void *)0"),
            Self::Var { name } => f.write_str(name),
            Self::Unary { op, operand } => write!(f, "({}{operand})", op.symbol()),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Load { addr } => write!(f, "(*{addr})"),
            Self::Cast { ty, operand } => write!(f, "(({}){operand})", ty.c_name()),
            Self::Select {
                cond,
                then_value,
                else_value,
            } => write!(f, "({cond} ? {then_value} : {else_value})"),
            Self::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_const(f: &mut fmt::Formatter<'_>, bits: u64, ty: ScalarTy) -> fmt::Result {
    let value = ty.from_bits(bits);
    match ty {
        ScalarTy::I8 | ScalarTy::U8 => write!(f, "(({}){value})", ty.c_name()),
        ScalarTy::U32 => write!(f, "{value}U"),
        ScalarTy::U64 => write!(f, "{value}UL"),
        ScalarTy::I32 | ScalarTy::I64 => {
            let suffix = if ty == ScalarTy::I64 { "L" } else { "" };
            let min = -(1i128 << (ty.bits() - 1));
            if value == min {
                // The literal `-2147483648` is parsed as negation of an out-of-range constant.
                write!(f, "({}{suffix} - 1{suffix})", value + 1)
            } else if value < 0 {
                write!(f, "({value}{suffix})")
            } else {
                write!(f, "{value}{suffix}")
            }
        }
    }
}

fn write_c_string(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for byte in value.bytes() {
        match byte {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\t' => f.write_str("\\t")?,
            b'\r' => f.write_str("\\r")?,
            0x20..=0x7e => write!(f, "{}", byte as char)?,
            other => write!(f, "\\{other:03o}")?,
        }
    }
    f.write_str("\"")
}

/// Straight-line statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    /// `dest = value;` where `dest` is a scalar or pointer variable.
    Assign { dest: String, value: Expr },
    /// `*(addr) = value;`
    Store { addr: Expr, value: Expr },
    /// Expression evaluated for its side effects, typically a call.
    Eval { expr: Expr },
}

impl Stmt {
    pub fn assign(dest: impl Into<String>, value: Expr) -> Self {
        Self::Assign {
            dest: dest.into(),
            value,
        }
    }

    pub const fn store(addr: Expr, value: Expr) -> Self {
        Self::Store { addr, value }
    }

    pub const fn eval(expr: Expr) -> Self {
        Self::Eval { expr }
    }

    /// Variable written by this statement, if any.
    pub fn assigned_var(&self) -> Option<&str> {
        match self {
            Self::Assign { dest, .. } => Some(dest),
            Self::Store { .. } | Self::Eval { .. } => None,
        }
    }

    /// Calls `f` for every variable this statement reads or writes.
    pub fn visit_vars<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Self::Assign { dest, value } => {
                value.visit_vars(f);
                f(dest);
            }
            Self::Store { addr, value } => {
                addr.visit_vars(f);
                value.visit_vars(f);
            }
            Self::Eval { expr } => expr.visit_vars(f),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign { dest, value } => write!(f, "{dest} = {value};"),
            Self::Store { addr, value } => write!(f, "*{addr} = {value};"),
            Self::Eval { expr } => write!(f, "{expr};"),
        }
    }
}
