//! Cranelift IR for exchange stubs
//!
//! A stub has the C signature `(func, exchange) -> ()`. It loads every
//! argument from its exchange slot, calls `func` with the descriptor's
//! signature and calling convention, and stores the result into the result
//! slot.

use cranelift_codegen::ir::{self, AbiParam, InstBuilder, MemFlags};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};
use target_lexicon::Architecture;

use crate::ffi::access::{SlotAccess, SlotAccessTable, SlotItem};
use crate::ffi::descr::CallDescriptor;
use crate::ffi::types::{Abi, ScalarType};
use crate::jit::backend::traits::CodegenError;
use crate::jit::runtime::exchange::ExchangeLayout;

/// Calling convention for `abi` on `isa`
pub fn call_conv_for(abi: Abi, isa: &dyn TargetIsa) -> Result<CallConv, CodegenError> {
    let arch = isa.triple().architecture;
    match abi {
        Abi::Default => Ok(isa.default_call_conv()),
        Abi::SystemV => Ok(CallConv::SystemV),
        Abi::WindowsFastcall if arch == Architecture::X86_64 => Ok(CallConv::WindowsFastcall),
        Abi::AppleAarch64 if matches!(arch, Architecture::Aarch64(_)) => Ok(CallConv::AppleAarch64),
        other => Err(CodegenError::UnsupportedSignature(format!(
            "calling convention {} is not available on {}",
            other, arch
        ))),
    }
}

/// Access recipe for `ty`, if the target carries it
pub fn slot_access(table: &SlotAccessTable, ty: &ScalarType) -> Result<SlotAccess, CodegenError> {
    table
        .get(ty)
        .ok_or_else(|| CodegenError::UnsupportedSignature(format!("{} is not carried on this target", ty)))
}

/// Memory type of an exchange slot
pub fn slot_type(access: SlotAccess) -> Result<ir::Type, CodegenError> {
    match access.item {
        SlotItem::Integer { size: 1, .. } => Ok(ir::types::I8),
        SlotItem::Integer { size: 2, .. } => Ok(ir::types::I16),
        SlotItem::Integer { size: 4, .. } => Ok(ir::types::I32),
        SlotItem::Integer { size: 8, .. } | SlotItem::LongLong => Ok(ir::types::I64),
        SlotItem::Double => Ok(ir::types::F64),
        SlotItem::Single => Ok(ir::types::F32),
        SlotItem::Integer { size, .. } => Err(CodegenError::UnsupportedSignature(format!(
            "{}-byte integers cannot be passed",
            size
        ))),
        SlotItem::Empty => Err(CodegenError::UnsupportedSignature("void argument".to_string())),
    }
}

fn abi_param(access: SlotAccess) -> Result<AbiParam, CodegenError> {
    let param = AbiParam::new(slot_type(access)?);
    Ok(match access.item {
        SlotItem::Integer { size, signed: true } if size < 8 => param.sext(),
        SlotItem::Integer { size, signed: false } if size < 8 => param.uext(),
        _ => param,
    })
}

/// Signature of the native target described by `descr`
pub fn callee_signature(
    descr: &CallDescriptor,
    isa: &dyn TargetIsa,
    table: &SlotAccessTable,
) -> Result<ir::Signature, CodegenError> {
    let mut sig = ir::Signature::new(call_conv_for(descr.abi(), isa)?);
    for ty in descr.arg_types() {
        sig.params.push(abi_param(slot_access(table, ty)?)?);
    }
    if descr.result_size() != 0 {
        sig.returns.push(abi_param(slot_access(table, &descr.result_type())?)?);
    }
    Ok(sig)
}

/// Declare and define the stub for `descr` under `name`
pub(super) fn define_stub(
    module: &mut JITModule,
    isa: &dyn TargetIsa,
    table: &SlotAccessTable,
    descr: &CallDescriptor,
    layout: ExchangeLayout,
    name: &str,
) -> Result<FuncId, CodegenError> {
    let ptr_ty = module.target_config().pointer_type();
    let callee_sig = callee_signature(descr, isa, table)?;

    let mut stub_sig = module.make_signature();
    stub_sig.params.push(AbiParam::new(ptr_ty));
    stub_sig.params.push(AbiParam::new(ptr_ty));

    let func_id = module
        .declare_function(name, Linkage::Local, &stub_sig)
        .map_err(|e| CodegenError::BackendError(format!("Failed to declare stub: {}", e)))?;

    let mut ctx = module.make_context();
    ctx.func.signature = stub_sig;
    let mut func_builder_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_builder_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let func_ptr = builder.block_params(entry)[0];
        let exchange = builder.block_params(entry)[1];

        // Slots are stride-aligned inside a 16-byte aligned buffer
        let flags = MemFlags::trusted();
        let mut args = Vec::with_capacity(descr.nargs());
        for (i, ty) in descr.arg_types().iter().enumerate() {
            let offset = slot_offset(layout.arg_offset(i))?;
            let ty = slot_type(slot_access(table, ty)?)?;
            args.push(builder.ins().load(ty, flags, exchange, offset));
        }

        let sig_ref = builder.import_signature(callee_sig);
        let call = builder.ins().call_indirect(sig_ref, func_ptr, &args);
        if descr.result_size() != 0 {
            let result = builder.inst_results(call)[0];
            let offset = slot_offset(layout.result_offset())?;
            builder.ins().store(flags, result, exchange, offset);
        }
        builder.ins().return_(&[]);
        builder.finalize();
    }

    module
        .define_function(func_id, &mut ctx)
        .map_err(|e| CodegenError::BackendError(format!("Cranelift compilation failed: {:?}", e)))?;
    module.clear_context(&mut ctx);
    Ok(func_id)
}

fn slot_offset(offset: usize) -> Result<i32, CodegenError> {
    i32::try_from(offset)
        .map_err(|_| CodegenError::UnsupportedSignature(format!("slot offset {} too large", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::types::{CpuCapabilities, ScalarKind};

    fn int(size: usize, signed: bool) -> SlotAccess {
        SlotAccess::of(&ScalarType { kind: ScalarKind::Int, size, signed })
    }

    #[test]
    fn test_slot_types() {
        assert_eq!(slot_type(int(1, true)).unwrap(), ir::types::I8);
        assert_eq!(slot_type(int(2, false)).unwrap(), ir::types::I16);
        assert_eq!(slot_type(int(8, true)).unwrap(), ir::types::I64);
        let single = SlotAccess::of(&ScalarType { kind: ScalarKind::SingleFloat, size: 4, signed: true });
        assert_eq!(slot_type(single).unwrap(), ir::types::F32);
        let longlong = SlotAccess::of(&ScalarType { kind: ScalarKind::LongLong, size: 8, signed: false });
        assert_eq!(slot_type(longlong).unwrap(), ir::types::I64);
        assert!(slot_type(int(3, true)).is_err());
        assert!(slot_type(SlotAccess::of(&ScalarType::VOID)).is_err());
    }

    #[test]
    fn test_narrow_params_are_extended() {
        let sext = abi_param(int(1, true)).unwrap();
        assert_eq!(sext.extension, ir::ArgumentExtension::Sext);
        let uext = abi_param(int(2, false)).unwrap();
        assert_eq!(uext.extension, ir::ArgumentExtension::Uext);
        let wide = abi_param(int(8, true)).unwrap();
        assert_eq!(wide.extension, ir::ArgumentExtension::None);
    }

    #[test]
    fn test_slot_access_follows_target_table() {
        let table = SlotAccessTable::new(&CpuCapabilities::integer_only(8));
        let int32 = ScalarType { kind: ScalarKind::Int, size: 4, signed: true };
        assert_eq!(slot_access(&table, &int32).unwrap(), SlotAccess::of(&int32));
        let double = ScalarType { kind: ScalarKind::Float, size: 8, signed: true };
        assert!(matches!(
            slot_access(&table, &double),
            Err(CodegenError::UnsupportedSignature(_))
        ));
    }
}
