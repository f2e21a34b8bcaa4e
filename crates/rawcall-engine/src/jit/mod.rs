//! JIT support for native calls
//!
//! This module provides:
//! - Target descriptions and argument register assignment
//! - The exchange-buffer call protocol and its deoptimization hand-off
//! - The managed-execution lock and forcible frames
//! - A descriptor cache shared by all call sites
//! - Cranelift exchange trampolines (feature `jit`)

pub mod backend;
pub mod runtime;

mod engine;
pub use engine::{BridgeConfig, BridgeError, CallBridge, ConfigError, InvokerKind};
