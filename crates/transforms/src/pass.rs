//! Pass specifications and the pipeline that runs them.

use crate::block_fission::{self, BlockFission};
use crate::dead_code::{self, DeadCode, DeadCodeVariant};
use crate::flatten::{self, Flatten};
use crate::irrelevant_code::{self, IrrelevantCode};
use crate::loop_fission::{self, FissionExit, LoopFission};
use crate::loop_unroll::{self, LoopUnroll};
use crate::opaque_predicate::{OpaqueConstants, OpaqueContext};
use crate::{PassConfig, PassContext, Transform};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tangle_analysis::{collect_metrics, compare};
use tangle_core::cfg_ir::{BlockId, DispatchMode, FunctionCfg};
use tangle_utils::errors::TransformError;
use tracing::info;

/// Unroll factor used when `loop-unroll` is given without one.
pub const DEFAULT_UNROLL_FACTOR: usize = 3;
/// Sub-loop count used when `loop-fission` is given without one.
pub const DEFAULT_SPLIT_COUNT: usize = 4;

const fn default_factor() -> usize {
    DEFAULT_UNROLL_FACTOR
}

const fn default_split_count() -> usize {
    DEFAULT_SPLIT_COUNT
}

/// One entry of a pass list.
///
/// Serialized tagged by `kind`, and also parsed from the compact form
/// `name[:tag][=number][@block]`, e.g. `loop-unroll=3`, `deadcode:bug`, `flatten:switch`,
/// `loop-fission:random=2@4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PassSpec {
    Flatten {
        #[serde(default)]
        mode: DispatchMode,
    },
    LoopUnroll {
        #[serde(default = "default_factor")]
        factor: usize,
        /// Restrict the pass to one loop.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<BlockId>,
    },
    LoopFission {
        #[serde(default = "default_split_count")]
        split_count: usize,
        #[serde(default)]
        exit: FissionExit,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<BlockId>,
    },
    Deadcode {
        #[serde(default)]
        variant: DeadCodeVariant,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        insertion_point: Option<BlockId>,
    },
    IrrelevantCode,
    BlockFission,
}

impl PassSpec {
    /// The pass name as written in pass lists and footers.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Flatten { .. } => flatten::NAME,
            Self::LoopUnroll { .. } => loop_unroll::NAME,
            Self::LoopFission { .. } => loop_fission::NAME,
            Self::Deadcode { .. } => dead_code::NAME,
            Self::IrrelevantCode => irrelevant_code::NAME,
            Self::BlockFission => block_fission::NAME,
        }
    }

    /// The resolved variant tag, if the pass has one.
    pub const fn tag(&self) -> Option<&'static str> {
        match self {
            Self::Flatten { mode } => Some(mode.tag()),
            Self::LoopFission {
                exit: FissionExit::Random,
                ..
            } => Some(FissionExit::Random.tag()),
            Self::Deadcode { variant, .. } => Some(variant.tag()),
            _ => None,
        }
    }

    /// `kind[:tag]`.
    pub fn label(&self) -> String {
        match self.tag() {
            Some(tag) => format!("{}:{tag}", self.kind()),
            None => self.kind().to_string(),
        }
    }

    pub const fn is_flatten(&self) -> bool {
        matches!(self, Self::Flatten { .. })
    }

    /// Checks parameter ranges without touching any CFG.
    pub fn validate(&self) -> Result<(), TransformError> {
        match self {
            Self::LoopUnroll { factor, .. } => loop_unroll::check_factor(*factor),
            Self::LoopFission { split_count, .. } => loop_fission::check_split_count(*split_count),
            _ => Ok(()),
        }
    }

    /// Instantiates the transform.
    pub fn build(&self) -> Result<Box<dyn Transform>, TransformError> {
        Ok(match self {
            Self::Flatten { mode } => Box::new(Flatten::new(*mode)),
            Self::LoopUnroll { factor, header } => Box::new(LoopUnroll::new(*factor, *header)?),
            Self::LoopFission {
                split_count,
                exit,
                header,
            } => Box::new(LoopFission::new(*split_count, *exit, *header)?),
            Self::Deadcode {
                variant,
                insertion_point,
            } => Box::new(DeadCode::new(*variant, *insertion_point)),
            Self::IrrelevantCode => Box::new(IrrelevantCode::new()),
            Self::BlockFission => Box::new(BlockFission::new()),
        })
    }
}

fn invalid(detail: String) -> TransformError {
    TransformError::InvalidParameter {
        pass: "pipeline",
        detail,
    }
}

impl FromStr for PassSpec {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (rest, block) = match s.split_once('@') {
            Some((rest, b)) => {
                let b = b.trim().trim_start_matches("bb");
                let id = b
                    .parse::<u32>()
                    .map_err(|_| invalid(format!("bad block id in `{s}`")))?;
                (rest, Some(BlockId(id)))
            }
            None => (s, None),
        };
        let (rest, number) = match rest.split_once('=') {
            Some((rest, n)) => {
                let n = n
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid(format!("bad number in `{s}`")))?;
                (rest, Some(n))
            }
            None => (rest, None),
        };
        let (name, tag) = match rest.split_once(':') {
            Some((name, tag)) => (name.trim(), Some(tag.trim())),
            None => (rest.trim(), None),
        };

        let no_number = |spec: Self| match number {
            Some(_) => Err(invalid(format!("`{name}` takes no number"))),
            None => Ok(spec),
        };
        let no_block = |spec: Self| match block {
            Some(_) => Err(invalid(format!("`{name}` takes no block"))),
            None => Ok(spec),
        };
        let bad_tag = |tag: &str| invalid(format!("unknown variant `{tag}` for `{name}`"));

        let spec = match name {
            flatten::NAME => {
                let mode = match tag {
                    None | Some("indirect-goto") => DispatchMode::IndirectGoto,
                    Some("switch") => DispatchMode::Switch,
                    Some(t) => return Err(bad_tag(t)),
                };
                no_block(no_number(Self::Flatten { mode })?)?
            }
            loop_unroll::NAME => {
                if let Some(t) = tag {
                    return Err(bad_tag(t));
                }
                Self::LoopUnroll {
                    factor: number.unwrap_or(DEFAULT_UNROLL_FACTOR),
                    header: block,
                }
            }
            loop_fission::NAME => {
                let exit = match tag {
                    None | Some("counted") => FissionExit::Counted,
                    Some("random") => FissionExit::Random,
                    Some(t) => return Err(bad_tag(t)),
                };
                Self::LoopFission {
                    split_count: number.unwrap_or(DEFAULT_SPLIT_COUNT),
                    exit,
                    header: block,
                }
            }
            dead_code::NAME => {
                let variant = match tag {
                    None | Some("bug") => DeadCodeVariant::Bug,
                    Some("plain") => DeadCodeVariant::Plain,
                    Some(t) => return Err(bad_tag(t)),
                };
                no_number(Self::Deadcode {
                    variant,
                    insertion_point: block,
                })?
            }
            irrelevant_code::NAME | block_fission::NAME => {
                if let Some(t) = tag {
                    return Err(bad_tag(t));
                }
                let spec = if name == irrelevant_code::NAME {
                    Self::IrrelevantCode
                } else {
                    Self::BlockFission
                };
                no_block(no_number(spec)?)?
            }
            other => return Err(invalid(format!("unknown pass `{other}`"))),
        };
        Ok(spec)
    }
}

impl fmt::Display for PassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())?;
        match self {
            Self::LoopUnroll { factor, header } => {
                write!(f, "={factor}")?;
                if let Some(h) = header {
                    write!(f, "@{}", h.0)?;
                }
            }
            Self::LoopFission {
                split_count,
                header,
                ..
            } => {
                write!(f, "={split_count}")?;
                if let Some(h) = header {
                    write!(f, "@{}", h.0)?;
                }
            }
            Self::Deadcode {
                insertion_point: Some(at),
                ..
            } => write!(f, "@{}", at.0)?,
            _ => {}
        }
        Ok(())
    }
}

/// Parses a comma-separated pass list.
pub fn parse_pass_list(list: &str) -> Result<Vec<PassSpec>, TransformError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Checks every pass's parameters and that nothing follows `flatten`.
pub fn validate_pipeline(passes: &[PassSpec]) -> Result<(), TransformError> {
    for pass in passes {
        pass.validate()?;
    }
    if let Some(first) = passes.iter().position(PassSpec::is_flatten) {
        if let Some(late) = passes.get(first + 1) {
            return Err(TransformError::PassOrderViolation {
                pass: late.kind(),
                position: first + 1,
            });
        }
    }
    Ok(())
}

/// What one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub pass: PassSpec,
    /// False when the pass found nothing to do.
    pub changed: bool,
    /// Metric delta reported by [`compare`].
    pub delta: f64,
}

impl PassManifest {
    /// Applied passes, `flatten` first and the rest in run order.
    fn applied(&self) -> impl Iterator<Item = &PassSpec> {
        let changed = || self.entries.iter().filter(|e| e.changed).map(|e| &e.pass);
        changed()
            .filter(|p| p.is_flatten())
            .chain(changed().filter(|p| !p.is_flatten()))
    }

    /// Bare pass names, as on the footer's `variants:` line.
    pub fn variants(&self) -> Vec<&'static str> {
        self.applied().map(PassSpec::kind).collect()
    }

    /// Tag-resolved pass names, as on the footer's `expanded variants:` line.
    pub fn expanded(&self) -> Vec<String> {
        self.applied().map(PassSpec::label).collect()
    }

    /// The provenance comment appended to emitted source.
    pub fn footer(&self) -> String {
        format!(
            "// variants: {}\n// expanded variants: {}\n",
            self.variants().join(", "),
            self.expanded().join(", ")
        )
    }
}

/// Trait for running a sequence of obfuscation passes on a function CFG.
pub trait Pass {
    /// Runs `passes` in order. On error `cfg` is left exactly as it was.
    fn run(
        &self,
        cfg: &mut FunctionCfg,
        passes: &[PassSpec],
        config: &PassConfig,
        seed: u64,
    ) -> Result<PassManifest, TransformError>;
}

/// Default implementation of the Pass trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPass;

impl Pass for DefaultPass {
    fn run(
        &self,
        cfg: &mut FunctionCfg,
        passes: &[PassSpec],
        config: &PassConfig,
        seed: u64,
    ) -> Result<PassManifest, TransformError> {
        validate_pipeline(passes)?;
        let transforms = passes
            .iter()
            .map(PassSpec::build)
            .collect::<Result<Vec<_>, _>>()?;

        let opaque = OpaqueContext::new(OpaqueConstants::from_seed(seed));
        let mut ctx = PassContext::new(seed, opaque, config.clone());
        let mut work = cfg.clone();
        let mut manifest = PassManifest::default();

        for (spec, pass) in passes.iter().zip(&transforms) {
            let before = collect_metrics(&work)?;
            let mut snapshot = work.clone();

            let mutated = pass.apply(&mut snapshot, &mut ctx)?;
            if !mutated {
                info!("{:>16} skipped", pass.name());
                manifest.entries.push(ManifestEntry {
                    pass: spec.clone(),
                    changed: false,
                    delta: 0.0,
                });
                continue;
            }

            snapshot
                .validate()
                .map_err(|e| TransformError::InvariantViolation {
                    pass: pass.name(),
                    block: e.block(),
                    detail: e.to_string(),
                })?;
            let after = collect_metrics(&snapshot)?;
            let delta = compare(&before, &after);
            info!(
                "{:>16} Δ{:+.2} {} blocks",
                spec.label(),
                delta,
                snapshot.block_count()
            );

            work = snapshot;
            manifest.entries.push(ManifestEntry {
                pass: spec.clone(),
                changed: true,
                delta,
            });
        }
        *cfg = work;
        Ok(manifest)
    }
}

/// Convenience function to run the default pass.
pub fn run(
    cfg: &mut FunctionCfg,
    passes: &[PassSpec],
    config: &PassConfig,
    seed: u64,
) -> Result<PassManifest, TransformError> {
    DefaultPass.run(cfg, passes, config, seed)
}
