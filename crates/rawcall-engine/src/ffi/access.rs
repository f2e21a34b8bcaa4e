//! How generated code loads and stores individual exchange slots
//!
//! Single floats travel through integer registers as raw bits, and 64-bit
//! integers on narrow-word targets travel through float registers.

use rustc_hash::FxHashMap;

use super::classify::{classify_type, C_INTEGER_SIZES};
use super::types::{CpuCapabilities, FfiType, ScalarKind, ScalarType};

/// Register class a slot value is loaded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// Nothing is loaded
    Void,
    /// General-purpose register
    Int,
    /// Floating-point register
    Float,
}

/// Memory representation of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotItem {
    /// No data
    Empty,
    /// Integer of `size` bytes
    Integer {
        /// Width in bytes
        size: usize,
        /// Sign-extend on load
        signed: bool,
    },
    /// 64-bit float
    Double,
    /// 32-bit float
    Single,
    /// 64-bit integer kept whole on a narrow-word target
    LongLong,
}

impl SlotItem {
    /// Bytes occupied in the slot
    pub fn size(&self) -> usize {
        match self {
            SlotItem::Empty => 0,
            SlotItem::Integer { size, .. } => *size,
            SlotItem::Double | SlotItem::LongLong => 8,
            SlotItem::Single => 4,
        }
    }
}

/// Load/store recipe for one exchange slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAccess {
    /// Register class the value lives in
    pub class: RegisterClass,
    /// Representation in memory
    pub item: SlotItem,
}

impl SlotAccess {
    const VOID: SlotAccess = SlotAccess { class: RegisterClass::Void, item: SlotItem::Empty };

    /// Recipe for an already-classified type
    pub fn of(ty: &ScalarType) -> SlotAccess {
        match ty.kind {
            ScalarKind::Void => SlotAccess::VOID,
            ScalarKind::Int => SlotAccess {
                class: RegisterClass::Int,
                item: SlotItem::Integer { size: ty.size, signed: ty.signed },
            },
            ScalarKind::Float => SlotAccess { class: RegisterClass::Float, item: SlotItem::Double },
            ScalarKind::SingleFloat => {
                SlotAccess { class: RegisterClass::Int, item: SlotItem::Single }
            }
            ScalarKind::LongLong => {
                SlotAccess { class: RegisterClass::Float, item: SlotItem::LongLong }
            }
        }
    }
}

/// Per-CPU table from classified types to slot access recipes.
///
/// Only types the CPU can carry have an entry.
#[derive(Debug, Clone)]
pub struct SlotAccessTable {
    cpu: CpuCapabilities,
    entries: FxHashMap<ScalarType, SlotAccess>,
}

impl SlotAccessTable {
    /// Build the table for `cpu`
    pub fn new(cpu: &CpuCapabilities) -> Self {
        let mut carried = vec![ScalarType::VOID];
        for size in C_INTEGER_SIZES.into_iter().filter(|&size| size <= cpu.word_size) {
            for signed in [true, false] {
                carried.push(ScalarType { kind: ScalarKind::Int, size, signed });
            }
        }
        if cpu.supports_floats {
            carried.push(ScalarType { kind: ScalarKind::Float, size: 8, signed: true });
        }
        if cpu.supports_singlefloats {
            carried.push(ScalarType { kind: ScalarKind::SingleFloat, size: 4, signed: true });
        }
        if cpu.supports_longlong && cpu.word_size < 8 {
            for signed in [true, false] {
                carried.push(ScalarType { kind: ScalarKind::LongLong, size: 8, signed });
            }
        }

        let entries = carried.into_iter().map(|ty| (ty, SlotAccess::of(&ty))).collect();
        SlotAccessTable { cpu: *cpu, entries }
    }

    /// Recipe for a classified type
    pub fn get(&self, ty: &ScalarType) -> Option<SlotAccess> {
        self.entries.get(ty).copied()
    }

    /// Recipe for `ty`, or `None` if it cannot be carried
    pub fn lookup(&self, ty: &FfiType) -> Option<SlotAccess> {
        let scalar = classify_type(&self.cpu, ty).ok()?;
        self.get(&scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_floats_load_as_integers() {
        let table = SlotAccessTable::new(&CpuCapabilities::host());
        let access = table.lookup(&FfiType::FLOAT).unwrap();
        assert_eq!(access.class, RegisterClass::Int);
        assert_eq!(access.item, SlotItem::Single);
    }

    #[test]
    fn test_longlong_loads_as_float_on_narrow_word() {
        let cpu = CpuCapabilities { word_size: 4, ..CpuCapabilities::host() };
        let table = SlotAccessTable::new(&cpu);
        let access = table.lookup(&FfiType::SINT64).unwrap();
        assert_eq!(access.class, RegisterClass::Float);
        assert_eq!(access.item, SlotItem::LongLong);
        assert_eq!(table.lookup(&FfiType::UINT64), Some(access));
    }

    #[test]
    fn test_unsigned_zero_extends() {
        let table = SlotAccessTable::new(&CpuCapabilities::host());
        let access = table.lookup(&FfiType::UINT16).unwrap();
        assert_eq!(access.item, SlotItem::Integer { size: 2, signed: false });
        let access = table.lookup(&FfiType::SINT16).unwrap();
        assert_eq!(access.item, SlotItem::Integer { size: 2, signed: true });
    }

    #[test]
    fn test_disabled_capabilities_have_no_entry() {
        let cpu = CpuCapabilities::integer_only(4);
        let table = SlotAccessTable::new(&cpu);
        assert!(table.lookup(&FfiType::DOUBLE).is_none());
        assert!(table.lookup(&FfiType::FLOAT).is_none());
        assert!(table.lookup(&FfiType::SINT64).is_none());
        assert!(table.lookup(&FfiType::POINTER).is_none());
        assert!(table.lookup(&FfiType::SINT32).is_some());
    }

    #[test]
    fn test_table_agrees_with_classified_types() {
        let cpu = CpuCapabilities::host();
        let table = SlotAccessTable::new(&cpu);
        for ty in [FfiType::SINT8, FfiType::UINT32, FfiType::SINT64, FfiType::DOUBLE, FfiType::FLOAT] {
            let scalar = crate::ffi::classify_type(&cpu, &ty).unwrap();
            assert_eq!(table.lookup(&ty), Some(SlotAccess::of(&scalar)), "{:?}", ty);
        }
    }

    #[test]
    fn test_odd_widths_have_no_entry() {
        let table = SlotAccessTable::new(&CpuCapabilities::host());
        let odd = ScalarType { kind: ScalarKind::Int, size: 3, signed: true };
        assert!(table.get(&odd).is_none());
        let wide = ScalarType { kind: ScalarKind::Int, size: 8, signed: true };
        let narrow = SlotAccessTable::new(&CpuCapabilities { word_size: 4, ..CpuCapabilities::host() });
        assert!(table.get(&wide).is_some());
        assert!(narrow.get(&wide).is_none());
    }
}
