use thiserror::Error;

/// Error type for CFG construction and validation.
///
/// Block ids are carried as raw `u32` values so that this crate stays below `tangle-core`
/// in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CfgError {
    /// The function contains no blocks at all.
    #[error("function has no blocks")]
    Empty,
    /// The declared entry block is not part of the block map.
    #[error("entry block bb{0} does not exist")]
    MissingEntry(u32),
    /// A terminator references a block id that is not in the block map.
    #[error("block bb{from} transfers to unknown block bb{to}")]
    DanglingTarget { from: u32, to: u32 },
    /// A block id was inserted twice.
    #[error("block id bb{0} is already in use")]
    DuplicateBlock(u32),
    #[error("unknown block bb{0}")]
    UnknownBlock(u32),
    /// A block was reserved through the builder but never given a body.
    #[error("block bb{0} was reserved but never defined")]
    Unterminated(u32),
    /// A statement or terminator mentions a variable that is not a param, local, or global.
    #[error("variable `{name}` used in bb{block} is not declared")]
    UnknownVariable { block: u32, name: String },
    #[error("variable `{0}` is declared twice")]
    DuplicateVariable(String),
    /// Every `u32` block id has already been handed out.
    #[error("no block ids left")]
    BlockIdsExhausted,
}

impl CfgError {
    /// Block the error points at, if any.
    pub const fn block(&self) -> Option<u32> {
        match self {
            Self::MissingEntry(b)
            | Self::DuplicateBlock(b)
            | Self::UnknownBlock(b)
            | Self::Unterminated(b) => Some(*b),
            Self::DanglingTarget { from, .. } => Some(*from),
            Self::UnknownVariable { block, .. } => Some(*block),
            Self::Empty | Self::DuplicateVariable(_) | Self::BlockIdsExhausted => None,
        }
    }
}

/// Errors raised while evaluating expressions under C-like integer semantics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("shift amount {amount} out of range for {bits}-bit operand")]
    ShiftOverflow { amount: i128, bits: u32 },
    /// A variable was read before any value was bound to it.
    #[error("variable `{0}` has no value")]
    Unbound(String),
    /// Constant folding met a sub-expression that depends on memory, calls, or pointers.
    #[error("expression is not a constant: {0}")]
    NotConstant(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Reasons a loop is rejected by the loop analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopShapeError {
    #[error("bb{0} is not the header of a natural loop")]
    NotAHeader(u32),
    /// The header does not end in a two-way branch with exactly one side leaving the loop.
    #[error("loop header bb{0} has no single exit branch")]
    NoExitBranch(u32),
    #[error("loop condition at bb{0} is not of the form `index < bound`")]
    ConditionShape(u32),
    #[error("loop bound at bb{header} is not invariant: {reason}")]
    BoundNotInvariant { header: u32, reason: String },
    #[error("loop index `{index}` at bb{header} must be incremented exactly once by a positive constant")]
    IndexUpdate { header: u32, index: String },
}

/// Error type for metrics computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("CFG is empty or malformed")]
    EmptyCfg,
    #[error("CFG validation failed: {0}")]
    Invalid(#[from] CfgError),
}

/// Error type for transform operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// The CFG contains a shape the pass cannot handle. The pass is aborted, never skipped.
    #[error("{pass}: unsupported construct: {reason}")]
    UnsupportedConstruct { pass: &'static str, reason: String },
    /// A pass was scheduled after `flatten`. Raised before any pass runs.
    #[error("`{pass}` at position {position} follows flatten; flatten must be the last pass")]
    PassOrderViolation { pass: &'static str, position: usize },
    /// A pass produced a malformed CFG. This is a defect in the engine itself.
    #[error("{pass}: invariant violated at {}: {detail}", describe_block(.block))]
    InvariantViolation {
        pass: &'static str,
        block: Option<u32>,
        detail: String,
    },
    /// A pass parameter is out of range. Raised before any CFG mutation.
    #[error("{pass}: invalid parameter: {detail}")]
    InvalidParameter { pass: &'static str, detail: String },
    #[error("core operation failed: {0}")]
    Cfg(#[from] CfgError),
    #[error("metrics computation failed: {0}")]
    Metrics(#[from] MetricsError),
    /// A batch worker task panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
}

fn describe_block(block: &Option<u32>) -> String {
    match block {
        Some(id) => format!("bb{id}"),
        None => "function level".to_string(),
    }
}

/// Errors raised by the reference interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
    #[error("read of uninitialized variable `{0}`")]
    Uninitialized(String),
    /// Out-of-bounds access, write to a read-only region, or null dereference.
    #[error("memory fault: {0}")]
    Memory(String),
    #[error("unknown host function `{0}`")]
    UnknownCall(String),
    #[error("control reached unreachable block bb{0}")]
    ReachedUnreachable(u32),
    #[error("dispatch state {state} out of range in bb{block}")]
    BadDispatch { block: u32, state: u64 },
    #[error("harness error: {0}")]
    Harness(String),
    #[error("invalid CFG: {0}")]
    Cfg(#[from] CfgError),
}

/// Errors that can occur during obfuscation.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// Transform application failed.
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    /// Invalid transform pass specified.
    #[error("invalid pass: {0}")]
    InvalidPass(String),
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Equivalence checking failed to run.
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
}
