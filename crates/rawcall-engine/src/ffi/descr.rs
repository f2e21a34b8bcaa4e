//! Immutable call descriptors built from dynamic signatures

use serde::{Deserialize, Serialize};

use super::classify::{classify_type, UnsupportedKind};
use super::types::{Abi, CpuCapabilities, ScalarKind, ScalarType, Signature};

/// Side-effect level of a native call, passed through to the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtraEffect {
    /// Pure and cannot raise
    ElidableCannotRaise,
    /// Cannot raise
    CannotRaise,
    /// May raise
    CanRaise,
    /// May force the caller's frame
    ForcesFrame,
    /// Anything may happen
    RandomEffects,
}

/// Opaque effect metadata attached to a descriptor; never interpreted here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectInfo {
    /// Effect level
    pub extra_effect: ExtraEffect,
}

impl EffectInfo {
    /// No assumptions at all
    pub const MOST_GENERAL: EffectInfo = EffectInfo { extra_effect: ExtraEffect::RandomEffects };
}

impl Default for EffectInfo {
    fn default() -> Self {
        Self::MOST_GENERAL
    }
}

/// Compact, immutable summary of one native signature.
///
/// Built once per distinct signature and shared read-only by every call site
/// that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallDescriptor {
    args: Box<[ScalarType]>,
    result: ScalarType,
    abi: Abi,
    extra: EffectInfo,
}

impl CallDescriptor {
    /// Argument types in declaration order
    pub fn arg_types(&self) -> &[ScalarType] {
        &self.args
    }

    /// Argument kinds in declaration order
    pub fn arg_kinds(&self) -> impl ExactSizeIterator<Item = ScalarKind> + '_ {
        self.args.iter().map(|t| t.kind)
    }

    /// Argument kind codes, e.g. `"iif"`
    pub fn arg_classes(&self) -> String {
        self.arg_kinds().map(|k| k.code()).collect()
    }

    /// Number of arguments
    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// Result type
    pub fn result_type(&self) -> ScalarType {
        self.result
    }

    /// Result kind
    pub fn result_kind(&self) -> ScalarKind {
        self.result.kind
    }

    /// Whether integer results are sign-extended when read back
    pub fn is_result_signed(&self) -> bool {
        self.result.signed
    }

    /// Result size in bytes (0 for void)
    pub fn result_size(&self) -> usize {
        self.result.size
    }

    /// Calling convention copied from the signature
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// Effect metadata supplied at build time
    pub fn extra_info(&self) -> EffectInfo {
        self.extra
    }
}

impl std::fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ") -> {} [{}]", self.result, self.abi)
    }
}

pub(crate) fn try_build_call_descriptor(
    cpu: &CpuCapabilities,
    sig: &Signature,
    extra: EffectInfo,
) -> Result<CallDescriptor, UnsupportedKind> {
    let result = classify_type(cpu, &sig.result)?;
    let args = sig
        .args
        .iter()
        .map(|ty| classify_type(cpu, ty))
        .collect::<Result<Box<[_]>, _>>()?;
    Ok(CallDescriptor { args, result, abi: sig.abi, extra })
}

/// Build the descriptor for `sig`, or `None` when any argument or the result
/// cannot be carried on this CPU.
///
/// Building is pure; callers cache the result per signature.
#[tracing::instrument(level = "trace", skip_all, fields(nargs = sig.nargs(), abi = %sig.abi))]
pub fn build_call_descriptor(
    cpu: &CpuCapabilities,
    sig: &Signature,
    extra: EffectInfo,
) -> Option<CallDescriptor> {
    match try_build_call_descriptor(cpu, sig, extra) {
        Ok(descr) => Some(descr),
        Err(err) => {
            tracing::debug!(%err, "no call descriptor for signature");
            None
        }
    }
}
