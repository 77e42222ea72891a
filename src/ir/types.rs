//! Semantic type tags for IR values.

/// Type of an IR value.
///
/// Block labels are not values in this IR; branch targets are `BlockId`s
/// carried in the opcode payload, so no label type appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    I8,
    I32,
    /// Opaque pointer. Element sizes travel in the instructions that need
    /// them (`Alloca` records its element type, `GetElem` its element size).
    Ptr,
}

impl Type {
    /// Size in bytes of one object of this type.
    pub fn size(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::I8 => 1,
            Type::I32 | Type::Ptr => 4,
        }
    }

    pub fn is_void(self) -> bool {
        matches!(self, Type::Void)
    }
}
