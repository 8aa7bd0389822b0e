//! Benchmark programs as function CFGs.
//!
//! Each string function takes `char *s` and walks it up to `strlen(s)`, which is the shape
//! the equivalence checker drives with generated inputs. Counted functions take an
//! `unsigned int n` that the checker binds to the input length.

use tangle_core::cfg_ir::{FunctionBuilder, FunctionCfg, Terminator};
use tangle_core::eval::Scalar;
use tangle_core::ir::{BinOp, Expr, ScalarTy, Stmt, Ty, UnOp};
use tangle_utils::errors::{CfgError, VerifyError};
use tangle_verification::{Host, HostOutcome, Memory, StdHost, Value};

/// Hash the BKDR benchmark compares against before printing its banner.
pub const BKDR_MAGIC: u32 = 0xbd92_82b2;

const U32: Ty = Ty::Scalar(ScalarTy::U32);
const U64: Ty = Ty::Scalar(ScalarTy::U64);
const I32: Ty = Ty::Scalar(ScalarTy::I32);

fn char_at(i: &str) -> Expr {
    Expr::load(Expr::add(Expr::var("s"), Expr::var(i)))
}

fn strlen_of_s() -> Stmt {
    Stmt::assign("len", Expr::call("strlen", vec![Expr::var("s")]))
}

fn printf(format: &str, args: Vec<Expr>) -> Stmt {
    let mut all = vec![Expr::str(format)];
    all.extend(args);
    Stmt::eval(Expr::call("printf", all))
}

fn string_fn(name: &str) -> FunctionBuilder {
    let mut b = FunctionBuilder::new(name);
    b.param("s", Ty::Ptr(ScalarTy::I8));
    b.local("len", U64).local("i", U64);
    b
}

fn step(i: &str) -> Stmt {
    Stmt::assign(i, Expr::add(Expr::var(i), Expr::u64(1)))
}

fn in_range(c: Expr, lo: u8, hi: u8) -> Expr {
    Expr::binary(
        BinOp::LogicalAnd,
        Expr::binary(BinOp::Ge, c.clone(), Expr::i32(i32::from(lo))),
        Expr::binary(BinOp::Le, c, Expr::i32(i32::from(hi))),
    )
}

/// ```c
/// unsigned int bkdr(char *s) {
///     unsigned int seed = 131, hash = 0;
///     for (i = 0; i < strlen(s); i++) hash = hash * seed + s[i];
///     if (hash == magic) printf("You win!\n");
///     return hash;
/// }
/// ```
pub fn bkdr_hash_with_magic(magic: u32) -> Result<FunctionCfg, CfgError> {
    let mut b = string_fn("bkdr_hash");
    b.returns(ScalarTy::U32);
    b.local("seed", U32).local("hash", U32);
    let entry = b.reserve();
    let header = b.reserve();
    let body = b.reserve();
    let check = b.reserve();
    let win = b.reserve();
    let done = b.reserve();
    b.block(
        entry,
        vec![
            Stmt::assign("seed", Expr::u32(131)),
            Stmt::assign("hash", Expr::u32(0)),
            strlen_of_s(),
            Stmt::assign("i", Expr::u64(0)),
        ],
        Terminator::goto(header),
    );
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("len")), body, check),
    );
    b.block(
        body,
        vec![
            Stmt::assign(
                "hash",
                Expr::add(
                    Expr::mul(Expr::var("hash"), Expr::var("seed")),
                    char_at("i"),
                ),
            ),
            step("i"),
        ],
        Terminator::goto(header),
    );
    b.block(
        check,
        vec![],
        Terminator::branch(Expr::eq(Expr::var("hash"), Expr::u32(magic)), win, done),
    );
    b.block(win, vec![printf("You win!\n", vec![])], Terminator::goto(done));
    b.block(done, vec![], Terminator::ret(Some(Expr::var("hash"))));
    b.finish()
}

pub fn bkdr_hash() -> Result<FunctionCfg, CfgError> {
    bkdr_hash_with_magic(BKDR_MAGIC)
}

pub fn bkdr_reference(input: &[u8]) -> u32 {
    input.iter().fold(0u32, |h, &c| {
        h.wrapping_mul(131).wrapping_add(i32::from(c as i8) as u32)
    })
}

/// The ELF hash, with a conditional fold inside the loop body.
pub fn elf_hash() -> Result<FunctionCfg, CfgError> {
    let mut b = string_fn("elf_hash");
    b.returns(ScalarTy::U32);
    b.local("h", U32).local("g", U32);
    let entry = b.reserve();
    let header = b.reserve();
    let body = b.reserve();
    let fold = b.reserve();
    let latch = b.reserve();
    let done = b.reserve();
    b.block(
        entry,
        vec![
            Stmt::assign("h", Expr::u32(0)),
            strlen_of_s(),
            Stmt::assign("i", Expr::u64(0)),
        ],
        Terminator::goto(header),
    );
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("len")), body, done),
    );
    b.block(
        body,
        vec![
            Stmt::assign(
                "h",
                Expr::add(
                    Expr::binary(BinOp::Shl, Expr::var("h"), Expr::u32(4)),
                    char_at("i"),
                ),
            ),
            Stmt::assign(
                "g",
                Expr::binary(BinOp::And, Expr::var("h"), Expr::u32(0xf000_0000)),
            ),
        ],
        Terminator::branch(Expr::ne(Expr::var("g"), Expr::u32(0)), fold, latch),
    );
    b.block(
        fold,
        vec![Stmt::assign(
            "h",
            Expr::binary(
                BinOp::Xor,
                Expr::var("h"),
                Expr::binary(BinOp::Shr, Expr::var("g"), Expr::u32(24)),
            ),
        )],
        Terminator::goto(latch),
    );
    b.block(
        latch,
        vec![
            Stmt::assign(
                "h",
                Expr::binary(
                    BinOp::And,
                    Expr::var("h"),
                    Expr::unary(UnOp::Not, Expr::var("g")),
                ),
            ),
            step("i"),
        ],
        Terminator::goto(header),
    );
    b.block(done, vec![], Terminator::ret(Some(Expr::var("h"))));
    b.finish()
}

pub fn elf_reference(input: &[u8]) -> u32 {
    input.iter().fold(0u32, |h, &c| {
        let mut h = (h << 4).wrapping_add(i32::from(c as i8) as u32);
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h & !g
    })
}

/// `h = h * 33 + c` starting from 5381, written with a shift.
pub fn djb_hash() -> Result<FunctionCfg, CfgError> {
    let mut b = string_fn("djb_hash");
    b.returns(ScalarTy::U32);
    b.local("h", U32);
    let entry = b.reserve();
    let header = b.reserve();
    let body = b.reserve();
    let done = b.reserve();
    b.block(
        entry,
        vec![
            Stmt::assign("h", Expr::u32(5381)),
            strlen_of_s(),
            Stmt::assign("i", Expr::u64(0)),
        ],
        Terminator::goto(header),
    );
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("len")), body, done),
    );
    b.block(
        body,
        vec![
            Stmt::assign(
                "h",
                Expr::add(
                    Expr::add(
                        Expr::binary(BinOp::Shl, Expr::var("h"), Expr::u32(5)),
                        Expr::var("h"),
                    ),
                    char_at("i"),
                ),
            ),
            step("i"),
        ],
        Terminator::goto(header),
    );
    b.block(done, vec![], Terminator::ret(Some(Expr::var("h"))));
    b.finish()
}

pub fn djb_reference(input: &[u8]) -> u32 {
    input.iter().fold(5381u32, |h, &c| {
        (h << 5)
            .wrapping_add(h)
            .wrapping_add(i32::from(c as i8) as u32)
    })
}

/// Fills `int a[8]` with `a[k] = k * n` and sums it back in a second loop.
pub fn array_sum() -> Result<FunctionCfg, CfgError> {
    let mut b = FunctionBuilder::new("array_sum");
    b.param("n", U32).returns(ScalarTy::I32);
    b.local("a", Ty::Array(ScalarTy::I32, 8))
        .local("k", I32)
        .local("sum", I32);
    let entry = b.reserve();
    let fill = b.reserve();
    let fill_body = b.reserve();
    let mid = b.reserve();
    let add = b.reserve();
    let add_body = b.reserve();
    let done = b.reserve();
    let slot = || Expr::add(Expr::var("a"), Expr::var("k"));
    let bound = Expr::i32(8);
    b.block(entry, vec![Stmt::assign("k", Expr::i32(0))], Terminator::goto(fill));
    b.block(
        fill,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("k"), bound.clone()), fill_body, mid),
    );
    b.block(
        fill_body,
        vec![
            Stmt::store(
                slot(),
                Expr::mul(Expr::var("k"), Expr::cast(ScalarTy::I32, Expr::var("n"))),
            ),
            Stmt::assign("k", Expr::add(Expr::var("k"), Expr::i32(1))),
        ],
        Terminator::goto(fill),
    );
    b.block(
        mid,
        vec![
            Stmt::assign("k", Expr::i32(0)),
            Stmt::assign("sum", Expr::i32(0)),
        ],
        Terminator::goto(add),
    );
    b.block(
        add,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("k"), bound), add_body, done),
    );
    b.block(
        add_body,
        vec![
            Stmt::assign("sum", Expr::add(Expr::var("sum"), Expr::load(slot()))),
            Stmt::assign("k", Expr::add(Expr::var("k"), Expr::i32(1))),
        ],
        Terminator::goto(add),
    );
    b.block(done, vec![], Terminator::ret(Some(Expr::var("sum"))));
    b.finish()
}

/// Upper-cases `s` in place, writes every character to a mocked file, counts the writes
/// in the global `written`, and closes the file.
pub fn save_upper() -> Result<FunctionCfg, CfgError> {
    let mut b = string_fn("save_upper");
    b.returns(ScalarTy::U32);
    b.local("c", I32).global("written", ScalarTy::U32, 0);
    let entry = b.reserve();
    let header = b.reserve();
    let load = b.reserve();
    let upper = b.reserve();
    let write = b.reserve();
    let done = b.reserve();
    b.block(
        entry,
        vec![strlen_of_s(), Stmt::assign("i", Expr::u64(0))],
        Terminator::goto(header),
    );
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("len")), load, done),
    );
    b.block(
        load,
        vec![Stmt::assign("c", Expr::cast(ScalarTy::I32, char_at("i")))],
        Terminator::branch(in_range(Expr::var("c"), b'a', b'z'), upper, write),
    );
    b.block(
        upper,
        vec![
            Stmt::assign("c", Expr::sub(Expr::var("c"), Expr::i32(32))),
            Stmt::store(
                Expr::add(Expr::var("s"), Expr::var("i")),
                Expr::cast(ScalarTy::I8, Expr::var("c")),
            ),
        ],
        Terminator::goto(write),
    );
    b.block(
        write,
        vec![
            Stmt::eval(Expr::call("fputc", vec![Expr::var("c")])),
            Stmt::assign("written", Expr::add(Expr::var("written"), Expr::u32(1))),
            step("i"),
        ],
        Terminator::goto(header),
    );
    b.block(
        done,
        vec![Stmt::eval(Expr::call("fclose", vec![]))],
        Terminator::ret(Some(Expr::var("written"))),
    );
    b.finish()
}

/// Index of the first ASCII digit in `s`, or -1. The loop leaves early through a `break`.
pub fn first_digit() -> Result<FunctionCfg, CfgError> {
    let mut b = string_fn("first_digit");
    b.returns(ScalarTy::I32);
    b.local("c", I32).local("pos", I32);
    let entry = b.reserve();
    let header = b.reserve();
    let test = b.reserve();
    let found = b.reserve();
    let latch = b.reserve();
    let done = b.reserve();
    b.block(
        entry,
        vec![
            Stmt::assign("pos", Expr::i32(-1)),
            strlen_of_s(),
            Stmt::assign("i", Expr::u64(0)),
        ],
        Terminator::goto(header),
    );
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("len")), test, done),
    );
    b.block(
        test,
        vec![Stmt::assign("c", Expr::cast(ScalarTy::I32, char_at("i")))],
        Terminator::branch(in_range(Expr::var("c"), b'0', b'9'), found, latch),
    );
    b.block(
        found,
        vec![Stmt::assign("pos", Expr::cast(ScalarTy::I32, Expr::var("i")))],
        Terminator::goto(done),
    );
    b.block(latch, vec![step("i")], Terminator::goto(header));
    b.block(done, vec![], Terminator::ret(Some(Expr::var("pos"))));
    b.finish()
}

/// Prints `0,1,...,n-1,` one index per iteration.
pub fn print_indices() -> Result<FunctionCfg, CfgError> {
    let mut b = FunctionBuilder::new("print_indices");
    b.param("n", U32);
    b.local("i", U32);
    let entry = b.reserve();
    let header = b.reserve();
    let body = b.reserve();
    let done = b.reserve();
    b.block(entry, vec![Stmt::assign("i", Expr::u32(0))], Terminator::goto(header));
    b.block(
        header,
        vec![],
        Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("n")), body, done),
    );
    b.block(
        body,
        vec![
            printf("%u,", vec![Expr::var("i")]),
            Stmt::assign("i", Expr::add(Expr::var("i"), Expr::u32(1))),
        ],
        Terminator::goto(header),
    );
    b.block(done, vec![], Terminator::ret(None));
    b.finish()
}

/// The string benchmarks, for tests that sweep all of them.
pub fn string_benchmarks() -> Result<Vec<FunctionCfg>, CfgError> {
    Ok(vec![
        bkdr_hash()?,
        elf_hash()?,
        djb_hash()?,
        first_digit()?,
    ])
}

/// Host with a mocked output file on top of the standard C subset.
///
/// `fputc(c)` appends a byte to the file and `fclose()` marks it closed. The file contents
/// and the closed flag are part of the observable state.
#[derive(Debug, Clone, Default)]
pub struct FileHost {
    std: StdHost,
    file: Vec<u8>,
    closed: bool,
}

impl FileHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self) -> &[u8] {
        &self.file
    }
}

impl Host for FileHost {
    fn call(
        &mut self,
        name: &str,
        args: &[Value],
        memory: &mut Memory,
    ) -> Result<HostOutcome, VerifyError> {
        match name {
            "fputc" => {
                let c = args
                    .first()
                    .ok_or_else(|| VerifyError::Harness("fputc needs a character".into()))?
                    .int()?;
                if self.closed {
                    return Err(VerifyError::Harness("write to a closed file".into()));
                }
                self.file.push(c.bits() as u8);
                Ok(HostOutcome::Return(Value::Int(c)))
            }
            "fclose" => {
                self.closed = true;
                Ok(HostOutcome::Return(Value::Int(Scalar::int(0))))
            }
            _ => self.std.call(name, args, memory),
        }
    }

    fn output(&self) -> &[u8] {
        self.std.output()
    }

    fn state(&self) -> Vec<u8> {
        let mut state = self.file.clone();
        state.push(u8::from(self.closed));
        state
    }
}
