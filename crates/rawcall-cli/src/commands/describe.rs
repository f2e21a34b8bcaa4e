//! `rawcall describe`: descriptor, register plan and exchange layout for one
//! signature.

use anyhow::anyhow;
use rawcall_engine::ffi::{classify, CpuCapabilities, EffectInfo, FfiType, Signature, SlotAccessTable};
use rawcall_engine::jit::runtime::{CachedCall, ExchangeLayout};
use rawcall_engine::jit::{BridgeConfig, CallBridge};
use serde::Serialize;

use crate::signature::{parse_abi, parse_signature};

#[derive(Serialize)]
struct SlotReport {
    index: usize,
    ty: String,
    kind: char,
    offset: usize,
    register_resident: bool,
    access: String,
}

#[derive(Serialize)]
struct DescribeReport {
    target: String,
    descriptor: String,
    arg_classes: String,
    result_kind: char,
    result_size: usize,
    result_signed: bool,
    register_resident: usize,
    stack_resident: usize,
    stride: usize,
    buffer_size: usize,
    result_offset: usize,
    args: Vec<SlotReport>,
}

#[derive(Serialize)]
struct UnsupportedReport {
    target: String,
    supported: bool,
    reason: String,
}

pub fn execute(config: BridgeConfig, text: &str, abi: &str, json: bool) -> anyhow::Result<()> {
    let abi = parse_abi(abi)?;
    let sig = parse_signature(text, abi, config.target.word_size())?;
    let stride = config.exchange_stride;
    let bridge = CallBridge::with_config(config)?;
    let target = bridge.target().arch.to_string();

    let Some(call) = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL) else {
        let report = UnsupportedReport {
            target,
            supported: false,
            reason: unsupported_reason(&bridge.capabilities(), &sig),
        };
        if json {
            return super::print_json(&report);
        }
        println!("Target:     {}", report.target);
        println!("Not accelerated: {}", report.reason);
        return Ok(());
    };

    let table = SlotAccessTable::new(&bridge.capabilities());
    let report = build_report(target, &call, &table, stride)?;
    if json {
        return super::print_json(&report);
    }

    println!("Target:     {}", report.target);
    println!("Descriptor: {}", report.descriptor);
    println!("Classes:    {}", report.arg_classes);
    println!(
        "Result:     {} ({} bytes, {})",
        report.result_kind,
        report.result_size,
        if report.result_signed { "sign-extended" } else { "zero-extended" }
    );
    println!(
        "Registers:  {} register-resident, {} on the stack",
        report.register_resident, report.stack_resident
    );
    println!(
        "Exchange:   {} bytes, stride {}, result at {}",
        report.buffer_size, report.stride, report.result_offset
    );
    for slot in &report.args {
        println!(
            "  arg {:<3} {:<5} @{:<4} {:<6} {}",
            slot.index,
            slot.ty,
            slot.offset,
            if slot.register_resident { "reg" } else { "stack" },
            slot.access
        );
    }
    Ok(())
}

fn build_report(
    target: String,
    call: &CachedCall,
    table: &SlotAccessTable,
    stride: usize,
) -> anyhow::Result<DescribeReport> {
    let descr = &call.descr;
    let layout = ExchangeLayout::for_descriptor(descr, stride)?;
    let args = descr
        .arg_types()
        .iter()
        .enumerate()
        .map(|(index, ty)| {
            let access = table.get(ty).ok_or_else(|| anyhow!("argument {}: {} has no slot access", index, ty))?;
            Ok(SlotReport {
                index,
                ty: ty.to_string(),
                kind: ty.kind.code(),
                offset: layout.arg_offset(index),
                register_resident: call.plan.is_register_resident(index),
                access: format!("{:?}", access),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(DescribeReport {
        target,
        descriptor: descr.to_string(),
        arg_classes: descr.arg_classes(),
        result_kind: descr.result_kind().code(),
        result_size: descr.result_size(),
        result_signed: descr.is_result_signed(),
        register_resident: call.plan.register_resident,
        stack_resident: call.plan.stack_resident(),
        stride: layout.stride(),
        buffer_size: layout.size(),
        result_offset: layout.result_offset(),
        args,
    })
}

/// First type in `sig` the CPU cannot carry
fn unsupported_reason(cpu: &CpuCapabilities, sig: &Signature) -> String {
    let check = |ty: &FfiType| classify(cpu, ty).err();
    if let Some(err) = check(&sig.result) {
        return format!("result: {}", err);
    }
    sig.args
        .iter()
        .enumerate()
        .find_map(|(i, ty)| check(ty).map(|err| format!("argument {}: {}", i, err)))
        .unwrap_or_else(|| "no descriptor".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rawcall_engine::ffi::Abi;
    use rawcall_engine::jit::backend::TargetArch;
    use rawcall_engine::jit::InvokerKind;

    fn arm_bridge() -> CallBridge {
        let config = BridgeConfig {
            target: TargetArch::Arm32,
            invoker: InvokerKind::RawCall,
            ..Default::default()
        };
        CallBridge::with_config(config).unwrap()
    }

    #[test]
    fn test_report_for_arm_soft_float() {
        let bridge = arm_bridge();
        let sig = parse_signature("sint32,sint32,double->sint8", Abi::Default, 4).unwrap();
        let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).unwrap();
        let table = SlotAccessTable::new(&bridge.capabilities());
        let report = build_report("arm".to_string(), &call, &table, 16).unwrap();

        assert_eq!(report.arg_classes, "iif");
        assert_eq!(report.register_resident, 3);
        assert_eq!(report.stack_resident, 0);
        assert_eq!(report.buffer_size, 80);
        assert_eq!(report.result_offset, 64);
        let offsets: Vec<_> = report.args.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![16, 32, 48]);
        assert_eq!(report.result_size, 1);
        assert!(report.result_signed);
    }

    #[test]
    fn test_unsupported_reason_names_the_argument() {
        let bridge = arm_bridge();
        let sig = parse_signature("sint32,pointer->void", Abi::Default, 4).unwrap();
        assert!(bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).is_none());
        let reason = unsupported_reason(&bridge.capabilities(), &sig);
        assert_eq!(reason, "argument 1: unsupported kind '*'");
    }

    #[test]
    fn test_report_rejects_overlapping_stride() {
        let bridge = arm_bridge();
        let sig = parse_signature("double,double->void", Abi::Default, 4).unwrap();
        let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).unwrap();
        let table = SlotAccessTable::new(&bridge.capabilities());
        assert!(build_report("arm".to_string(), &call, &table, 4).is_err());
    }

    #[test]
    fn test_report_uses_target_access_recipes() {
        let bridge = arm_bridge();
        let sig = parse_signature("float,sint64->void", Abi::Default, 4).unwrap();
        let call = bridge.descriptor_for(&sig, EffectInfo::MOST_GENERAL).unwrap();
        let table = SlotAccessTable::new(&bridge.capabilities());
        let report = build_report("arm".to_string(), &call, &table, 16).unwrap();
        assert!(report.args[0].access.contains("Single"));
        assert!(report.args[1].access.contains("LongLong"));
    }
}
