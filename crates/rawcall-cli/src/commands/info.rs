//! `rawcall info`: effective configuration and target description.

use rawcall_engine::jit::backend::{FloatRegisterFile, TargetInfo};
use rawcall_engine::jit::{BridgeConfig, CallBridge};
use serde::Serialize;

#[derive(Serialize)]
struct InfoReport<'a> {
    version: &'static str,
    host: String,
    jit: bool,
    target: TargetInfo,
    capabilities: rawcall_engine::ffi::CpuCapabilities,
    invoker: &'a str,
    config: &'a BridgeConfig,
}

pub fn execute(config: BridgeConfig, json: bool) -> anyhow::Result<()> {
    let bridge = CallBridge::with_config(config)?;
    let report = InfoReport {
        version: env!("CARGO_PKG_VERSION"),
        host: std::env::consts::ARCH.to_string(),
        jit: cfg!(feature = "jit"),
        target: *bridge.target(),
        capabilities: bridge.capabilities(),
        invoker: bridge.protocol().invoker().name(),
        config: bridge.config(),
    };

    if json {
        return super::print_json(&report);
    }

    let caps = &report.capabilities;
    let regs = &report.target.registers;
    println!("Rawcall v{}", report.version);
    println!();
    println!("Host:         {}", report.host);
    println!("JIT:          {}", if report.jit { "available (Cranelift)" } else { "disabled" });
    println!("Target:       {} ({}-byte pointers)", report.target.arch, report.target.pointer_size);
    println!("Invoker:      {}", report.invoker);
    println!("Stride:       {} bytes", report.config.exchange_stride);
    println!();
    println!("Capabilities:");
    println!("  floats       {}", caps.supports_floats);
    println!("  longlong     {}", caps.supports_longlong);
    println!("  singlefloats {}", caps.supports_singlefloats);
    println!("Registers:");
    println!("  integer      {} ({:?} pairs)", regs.gp_slots, regs.pair_policy);
    match regs.float_file {
        FloatRegisterFile::Shared => println!("  float        shared with integer"),
        FloatRegisterFile::Split { slots } => println!("  float        {}", slots),
    }
    println!();
    println!("Environment:");
    match std::env::var("RAWCALL_LOG") {
        Ok(val) => println!("  RAWCALL_LOG = {}", val),
        Err(_) => println!("  RAWCALL_LOG = (default)"),
    }
    Ok(())
}
