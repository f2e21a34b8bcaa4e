//! Textual signatures: `sint32,double->sint8`
//!
//! Type names: `void`, `sint8`..`sint64`, `uint8`..`uint64`, `float`,
//! `double`, `pointer`, `slong`, `ulong`. An empty argument list is written
//! `->double` or `void->double`.

use anyhow::{anyhow, bail, Context, Result};
use rawcall_engine::ffi::{Abi, FfiType, FfiTypeKind, ScalarKind, Signature};

/// Parse one type name; `slong`/`ulong` take the target's word size
pub fn parse_type(name: &str, word_size: usize) -> Result<FfiType> {
    let ty = match name.trim() {
        "void" => FfiType::VOID,
        "sint8" | "int8" => FfiType::SINT8,
        "uint8" => FfiType::UINT8,
        "sint16" | "int16" => FfiType::SINT16,
        "uint16" => FfiType::UINT16,
        "sint32" | "int32" => FfiType::SINT32,
        "uint32" => FfiType::UINT32,
        "sint64" | "int64" => FfiType::SINT64,
        "uint64" => FfiType::UINT64,
        "float" => FfiType::FLOAT,
        "double" => FfiType::DOUBLE,
        "pointer" => FfiType::new(FfiTypeKind::Pointer, word_size),
        "slong" => FfiType::new(FfiTypeKind::Signed, word_size),
        "ulong" => FfiType::new(FfiTypeKind::Unsigned, word_size),
        other => bail!("unknown type '{}'", other),
    };
    Ok(ty)
}

/// Parse a calling-convention name as printed by `Abi`'s `Display`
pub fn parse_abi(name: &str) -> Result<Abi> {
    match name {
        "default" => Ok(Abi::Default),
        "sysv" | "systemv" => Ok(Abi::SystemV),
        "win64" | "fastcall" => Ok(Abi::WindowsFastcall),
        "apple-aarch64" => Ok(Abi::AppleAarch64),
        other => Err(anyhow!("unknown calling convention '{}'", other)),
    }
}

/// Parse `args->result`
pub fn parse_signature(text: &str, abi: Abi, word_size: usize) -> Result<Signature> {
    let (args, result) = text
        .split_once("->")
        .ok_or_else(|| anyhow!("signature '{}' is missing '->'", text))?;

    let result = parse_type(result, word_size).context("in result type")?;
    let args = args.trim();
    let args = if args.is_empty() || args == "void" {
        Vec::new()
    } else {
        args.split(',')
            .enumerate()
            .map(|(i, name)| parse_type(name, word_size).with_context(|| format!("in argument {}", i)))
            .collect::<Result<Vec<_>>>()?
    };
    if args.iter().any(|ty| ty.kind == FfiTypeKind::Void) {
        bail!("'void' is only valid as a result type");
    }
    Ok(Signature::new(args, result, abi))
}

/// Parse argument kind codes such as `iifS`
pub fn parse_kinds(codes: &str) -> Result<Vec<ScalarKind>> {
    const ARG_KINDS: [ScalarKind; 4] =
        [ScalarKind::Int, ScalarKind::Float, ScalarKind::SingleFloat, ScalarKind::LongLong];

    codes
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(|c| {
            ARG_KINDS
                .into_iter()
                .find(|k| k.code() == c)
                .ok_or_else(|| anyhow!("unknown kind code '{}' (expected one of i f S L)", c))
        })
        .collect()
}
