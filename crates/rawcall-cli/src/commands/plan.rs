//! `rawcall plan`: register assignment for a list of argument kinds.

use rawcall_engine::jit::backend::{RegisterPlan, TargetInfo};
use rawcall_engine::jit::BridgeConfig;
use serde::Serialize;

use crate::signature::parse_kinds;

#[derive(Serialize)]
struct PlanReport {
    target: String,
    kinds: String,
    #[serde(flatten)]
    plan: RegisterPlan,
    stack_resident: usize,
}

pub fn execute(config: BridgeConfig, kinds: &str, json: bool) -> anyhow::Result<()> {
    let kinds = parse_kinds(kinds)?;
    let target: TargetInfo = config.target_info();
    let plan = target.registers.assign(&kinds);
    let report = PlanReport {
        target: target.arch.to_string(),
        kinds: kinds.iter().map(|k| k.code()).collect(),
        plan,
        stack_resident: plan.stack_resident(),
    };

    if json {
        return super::print_json(&report);
    }

    println!("Target:     {}", report.target);
    println!("Kinds:      {}", report.kinds);
    println!("Registers:  {} of {}", plan.register_resident, plan.nargs);
    if plan.stack_resident() > 0 {
        println!("Stack:      {} (from argument {})", plan.stack_resident(), plan.register_resident);
    }
    Ok(())
}
