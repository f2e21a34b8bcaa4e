//! Backend-facing target description and code generation errors

use serde::{Deserialize, Serialize};

use super::regs::RegisterBudget;

/// Target architecture.
///
/// Serialized under the same names `FromStr` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetArch {
    /// x86-64, System V register budget
    #[serde(rename = "x86_64", alias = "x86-64", alias = "amd64")]
    X86_64,
    /// AArch64 (AAPCS64)
    #[serde(rename = "aarch64", alias = "arm64")]
    AArch64,
    /// 32-bit ARM, soft-float EABI
    #[serde(rename = "arm", alias = "arm32", alias = "armv7")]
    Arm32,
}

impl TargetArch {
    /// Architecture of the running process
    pub fn host() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            TargetArch::AArch64
        }

        #[cfg(target_arch = "arm")]
        {
            TargetArch::Arm32
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
        {
            TargetArch::X86_64
        }
    }

    /// Register width in bytes
    pub fn word_size(&self) -> usize {
        match self {
            TargetArch::X86_64 | TargetArch::AArch64 => 8,
            TargetArch::Arm32 => 4,
        }
    }
}

impl std::fmt::Display for TargetArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetArch::X86_64 => "x86_64",
            TargetArch::AArch64 => "aarch64",
            TargetArch::Arm32 => "arm",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for TargetArch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "x86-64" | "amd64" => Ok(TargetArch::X86_64),
            "aarch64" | "arm64" => Ok(TargetArch::AArch64),
            "arm" | "arm32" | "armv7" => Ok(TargetArch::Arm32),
            other => Err(format!("unknown target architecture '{}'", other)),
        }
    }
}

/// Target information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Architecture
    pub arch: TargetArch,
    /// Pointer size in bytes
    pub pointer_size: usize,
    /// Argument register budget of the default calling convention
    pub registers: RegisterBudget,
}

impl TargetInfo {
    /// Target information for `arch`
    pub fn for_arch(arch: TargetArch) -> Self {
        TargetInfo {
            arch,
            pointer_size: arch.word_size(),
            registers: RegisterBudget::for_target(arch),
        }
    }
}

/// Error while generating or running generated call stubs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    /// Backend error
    #[error("Backend error: {0}")]
    BackendError(String),
    /// The descriptor cannot be lowered on this backend
    #[error("Unsupported signature: {0}")]
    UnsupportedSignature(String),
}
