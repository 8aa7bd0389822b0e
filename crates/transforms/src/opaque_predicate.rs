//! Opaque predicates built from two run-wide constants.
//!
//! Every predicate reads the globals `_entropy` (an arbitrary non-zero bit pattern) and
//! `_alwaysZero` (zero by construction, never written). The core disguise is the
//! mixed boolean-arithmetic identity
//!
//! ```text
//! x * k == (x & k) * (x | k) + (x & ~k) * (~x & k)
//! ```
//!
//! which holds in wrapping arithmetic for every `x` and mask `k`. Nesting it over
//! `_alwaysZero` yields an expression that looks computed from `_entropy` but is always
//! zero. A second family uses `(x ^ k) + 2 * (x & k) == x + k`.
//!
//! The values are not baked into the expressions; they are threaded in through
//! [`OpaqueContext`] and installed as globals of the function being transformed. Each
//! generated predicate is folded against the constants before it is handed out.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tangle_core::cfg_ir::{FunctionCfg, Global};
use tangle_core::eval::{fold, Scalar};
use tangle_core::ir::{BinOp, Expr, ScalarTy, UnOp};
use tangle_utils::errors::{EvalError, TransformError};
use tracing::debug;

/// Name of the global holding the entropy constant.
pub const ENTROPY_GLOBAL: &str = "_entropy";
/// Name of the global holding the always-zero constant.
pub const ALWAYS_ZERO_GLOBAL: &str = "_alwaysZero";

const NAME: &str = "opaque-predicate";

/// The two read-only values every opaque predicate of a run is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueConstants {
    entropy: u64,
    always_zero: u64,
}

impl OpaqueConstants {
    /// Uses `entropy` as the entropy constant. Zero is rejected because it would make the
    /// entropy-based disguises collapse under folding.
    pub fn new(entropy: u64) -> Result<Self, TransformError> {
        if entropy == 0 {
            return Err(TransformError::InvalidParameter {
                pass: NAME,
                detail: "entropy constant must be non-zero".into(),
            });
        }
        Ok(Self {
            entropy,
            always_zero: 0,
        })
    }

    /// Derives the entropy constant from a run seed via Keccak-256.
    pub fn from_seed(seed: u64) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(seed.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        Self {
            entropy: u64::from_le_bytes(word).max(1),
            always_zero: 0,
        }
    }

    pub const fn entropy(&self) -> u64 {
        self.entropy
    }

    pub const fn always_zero(&self) -> u64 {
        self.always_zero
    }
}

/// Generator state for one pipeline run.
#[derive(Debug, Clone)]
pub struct OpaqueContext {
    constants: OpaqueConstants,
}

impl OpaqueContext {
    pub const fn new(constants: OpaqueConstants) -> Self {
        Self { constants }
    }

    pub const fn constants(&self) -> OpaqueConstants {
        self.constants
    }

    /// Declares the two constant globals in `cfg`. Calling it again on the same function is
    /// a no-op; a conflicting existing declaration is an error.
    pub fn install(&self, cfg: &mut FunctionCfg) -> Result<(), TransformError> {
        for (name, value) in [
            (ENTROPY_GLOBAL, self.constants.entropy),
            (ALWAYS_ZERO_GLOBAL, self.constants.always_zero),
        ] {
            let existing = cfg.globals.get(name).copied();
            match existing {
                Some(g) if g.ty == ScalarTy::U64 && g.init == value => continue,
                Some(g) => {
                    return Err(TransformError::InvariantViolation {
                        pass: NAME,
                        block: None,
                        detail: format!(
                            "global `{name}` already holds {:#x} of type {}",
                            g.init,
                            g.ty.c_name()
                        ),
                    })
                }
                None if cfg.is_declared(name) => {
                    return Err(TransformError::UnsupportedConstruct {
                        pass: NAME,
                        reason: format!("`{name}` is already used as a parameter or local"),
                    })
                }
                None => cfg.declare_global(
                    name,
                    Global {
                        ty: ScalarTy::U64,
                        init: value,
                    },
                )?,
            }
        }
        Ok(())
    }

    /// Produces a predicate whose truth value is `known_value` for every execution.
    ///
    /// The same `seed` always yields the same expression.
    pub fn generate(&self, known_value: bool, seed: u64) -> Result<Expr, TransformError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let e = Expr::var(ENTROPY_GLOBAL);
        let z = Expr::var(ALWAYS_ZERO_GLOBAL);
        let k = Expr::u64(rng.random_range(1..=8));

        let expr = if rng.random_range(0..3) < 2 {
            let w = mba_product(z, mba_product(e.clone(), k));
            let wrapped = match rng.random_range(0..3) {
                0 => Expr::sub(
                    Expr::binary(
                        BinOp::Shl,
                        Expr::binary(BinOp::Or, w.clone(), Expr::u64(0)),
                        Expr::u64(1),
                    ),
                    Expr::binary(BinOp::Xor, w, Expr::u64(0)),
                ),
                1 => Expr::sub(Expr::binary(BinOp::Xor, w, e.clone()), e),
                _ => Expr::sub(Expr::add(w, e.clone()), e),
            };
            if known_value {
                Expr::eq(wrapped, Expr::u64(0))
            } else if rng.random_bool(0.5) {
                wrapped
            } else {
                Expr::ne(wrapped, Expr::u64(0))
            }
        } else {
            let twice = Expr::add(
                Expr::binary(BinOp::And, e.clone(), k.clone()),
                Expr::binary(BinOp::And, e.clone(), k.clone()),
            );
            let sum = Expr::add(Expr::binary(BinOp::Xor, e.clone(), k.clone()), twice);
            let diff = Expr::sub(sum, e);
            if known_value {
                Expr::eq(diff, k)
            } else {
                Expr::ne(diff, k)
            }
        };

        self.check(&expr, known_value)?;
        debug!("opaque predicate ({known_value}): {expr}");
        Ok(expr)
    }

    /// Folds `expr` against the run constants and checks it evaluates to `known_value`.
    ///
    /// Any variable other than the two constants means the predicate would depend on
    /// program state, which is a contract violation.
    pub fn check(&self, expr: &Expr, known_value: bool) -> Result<(), TransformError> {
        let constants = self.constants;
        let lookup = move |name: &str| match name {
            ENTROPY_GLOBAL => Some(Scalar::from_bits(constants.entropy, ScalarTy::U64)),
            ALWAYS_ZERO_GLOBAL => Some(Scalar::from_bits(constants.always_zero, ScalarTy::U64)),
            _ => None,
        };
        let value = fold(expr, &lookup).map_err(|e| TransformError::InvariantViolation {
            pass: NAME,
            block: None,
            detail: match e {
                EvalError::Unbound(var) => {
                    format!("predicate depends on `{var}`, which is not an opaque constant")
                }
                other => format!("predicate does not fold: {other}"),
            },
        })?;
        if value.is_true() != known_value {
            return Err(TransformError::InvariantViolation {
                pass: NAME,
                block: None,
                detail: format!(
                    "predicate evaluates to {} instead of {known_value}",
                    value.is_true()
                ),
            });
        }
        Ok(())
    }
}

/// `(x & k) * (x | k) + (x & ~k) * (~x & k)`, which equals `x * k`.
fn mba_product(x: Expr, k: Expr) -> Expr {
    Expr::add(
        Expr::mul(
            Expr::binary(BinOp::And, x.clone(), k.clone()),
            Expr::binary(BinOp::Or, x.clone(), k.clone()),
        ),
        Expr::mul(
            Expr::binary(BinOp::And, x.clone(), Expr::unary(UnOp::Not, k.clone())),
            Expr::binary(BinOp::And, Expr::unary(UnOp::Not, x), k),
        ),
    )
}
