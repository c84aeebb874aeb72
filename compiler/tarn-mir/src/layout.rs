//! Value-witness layout strings.
//!
//! A layout string is the byte program the runtime walks to copy, move and destroy a value of a
//! type generically. Each instruction is one opcode byte. An opcode with the high bit set is
//! followed by an unsigned LEB128 count; the bare high bit is the skip opcode, which steps over
//! that many bytes of plain data.
//!
//! Lowering only changes how values are passed, never how they are laid out in memory. The layout
//! string of every type must therefore be the same before and after the pass.
//!
//! Layouts are packed: fields follow each other without alignment padding.

use crate::context::{MirNominalKind, MirTypeContext};
use crate::ty::{MirFunctionRepresentation, MirTy};
use miette::Diagnostic;
use std::fmt::Display;
use tarn_diagnostics::ice;
use thiserror::Error;

/// The opcodes of the layout program.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefCountingKind {
    End = 0x00,
    Error = 0x01,
    NativeStrong = 0x02,
    NativeUnowned = 0x03,
    NativeWeak = 0x04,
    Unknown = 0x05,
    UnknownUnowned = 0x06,
    UnknownWeak = 0x07,
    Bridge = 0x08,
    Block = 0x09,
    ObjC = 0x0a,
    Custom = 0x0b,
    Metatype = 0x0c,
    Generic = 0x0d,
    Existential = 0x0e,
    Resilient = 0x0f,
    Skip = 0x80,
}

/// Set on an opcode byte when a LEB128 count follows it.
pub const COUNT_FLAG: u8 = 0x80;

/// Size in bytes of a pointer-sized field.
const POINTER_SIZE: u64 = 8;

const MAX_TYPE_DEPTH: u32 = 128;

impl RefCountingKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte {
            0x00 => Self::End,
            0x01 => Self::Error,
            0x02 => Self::NativeStrong,
            0x03 => Self::NativeUnowned,
            0x04 => Self::NativeWeak,
            0x05 => Self::Unknown,
            0x06 => Self::UnknownUnowned,
            0x07 => Self::UnknownWeak,
            0x08 => Self::Bridge,
            0x09 => Self::Block,
            0x0a => Self::ObjC,
            0x0b => Self::Custom,
            0x0c => Self::Metatype,
            0x0d => Self::Generic,
            0x0e => Self::Existential,
            0x0f => Self::Resilient,
            0x80 => Self::Skip,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::End => "end",
            Self::Error => "error",
            Self::NativeStrong => "native_strong",
            Self::NativeUnowned => "native_unowned",
            Self::NativeWeak => "native_weak",
            Self::Unknown => "unknown",
            Self::UnknownUnowned => "unknown_unowned",
            Self::UnknownWeak => "unknown_weak",
            Self::Bridge => "bridge",
            Self::Block => "block",
            Self::ObjC => "objc",
            Self::Custom => "custom",
            Self::Metatype => "metatype",
            Self::Generic => "generic",
            Self::Existential => "existential",
            Self::Resilient => "resilient",
            Self::Skip => "skip",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOp {
    pub kind: RefCountingKind,
    pub count: Option<u64>,
}

impl Display for LayoutOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.count {
            Some(count) => write!(f, "{} {}", self.kind.name(), count),
            None => write!(f, "{}", self.kind.name()),
        }
    }
}

#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum LayoutDecodeError {
    #[error("layout string ends before its end opcode")]
    #[diagnostic(code(layout::truncated))]
    Truncated,
    #[error("unknown layout opcode {0:#04x}")]
    #[diagnostic(code(layout::unknown_opcode))]
    UnknownOpcode(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutString {
    bytes: Vec<u8>,
}

impl LayoutString {
    /// Build the layout program of a concrete type.
    pub fn for_type<'ta>(tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>) -> Self {
        let mut builder = LayoutBuilder::new(tcx);
        builder.visit(ty, 0);
        builder.finish()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Read a layout program back into its operations, up to and including the end opcode.
    pub fn decode(bytes: &[u8]) -> Result<Vec<LayoutOp>, LayoutDecodeError> {
        let mut ops = Vec::new();
        let mut cursor = bytes.iter().copied();
        loop {
            let byte = cursor.next().ok_or(LayoutDecodeError::Truncated)?;
            let op = if byte & COUNT_FLAG != 0 {
                let opcode = if byte == COUNT_FLAG {
                    byte
                } else {
                    byte & !COUNT_FLAG
                };
                let kind = RefCountingKind::from_byte(opcode)
                    .ok_or(LayoutDecodeError::UnknownOpcode(byte))?;
                let count = read_leb128(&mut cursor)?;
                LayoutOp {
                    kind,
                    count: Some(count),
                }
            } else {
                let kind =
                    RefCountingKind::from_byte(byte).ok_or(LayoutDecodeError::UnknownOpcode(byte))?;
                LayoutOp { kind, count: None }
            };
            ops.push(op);
            if op.kind == RefCountingKind::End {
                return Ok(ops);
            }
        }
    }
}

fn read_leb128(cursor: &mut impl Iterator<Item = u8>) -> Result<u64, LayoutDecodeError> {
    let mut value = 0u64;
    let mut shift = 0;
    loop {
        let byte = cursor.next().ok_or(LayoutDecodeError::Truncated)?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn write_leb128(bytes: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            bytes.push(byte);
            return;
        }
        bytes.push(byte | 0x80);
    }
}

struct LayoutBuilder<'a, 'ta> {
    tcx: &'a MirTypeContext<'ta>,
    bytes: Vec<u8>,
    pending_skip: u64,
}

impl<'a, 'ta> LayoutBuilder<'a, 'ta> {
    fn new(tcx: &'a MirTypeContext<'ta>) -> Self {
        Self {
            tcx,
            bytes: Vec::new(),
            pending_skip: 0,
        }
    }

    fn skip(&mut self, bytes: u64) {
        self.pending_skip += bytes;
    }

    fn flush(&mut self) {
        if self.pending_skip > 0 {
            self.bytes.push(RefCountingKind::Skip as u8);
            write_leb128(&mut self.bytes, self.pending_skip);
            self.pending_skip = 0;
        }
    }

    fn emit(&mut self, kind: RefCountingKind) {
        self.flush();
        self.bytes.push(kind as u8);
    }

    fn emit_counted(&mut self, kind: RefCountingKind, count: u64) {
        self.flush();
        self.bytes.push(kind as u8 | COUNT_FLAG);
        write_leb128(&mut self.bytes, count);
    }

    fn finish(mut self) -> LayoutString {
        // Trailing plain data needs no instructions.
        self.pending_skip = 0;
        self.bytes.push(RefCountingKind::End as u8);
        LayoutString { bytes: self.bytes }
    }

    fn visit(&mut self, ty: &'ta MirTy<'ta>, depth: u32) {
        if depth > MAX_TYPE_DEPTH {
            ice!("type {} contains itself by value", ty);
        }
        match ty {
            MirTy::Integer(_) | MirTy::RawPointer | MirTy::Token => {
                self.skip(byte_size(self.tcx, ty, depth))
            }
            MirTy::Function(f) => match f.representation {
                MirFunctionRepresentation::Thick => {
                    self.skip(POINTER_SIZE);
                    self.emit(RefCountingKind::NativeStrong);
                }
                MirFunctionRepresentation::Block => self.emit(RefCountingKind::Block),
                MirFunctionRepresentation::Thin
                | MirFunctionRepresentation::Method
                | MirFunctionRepresentation::WitnessMethod
                | MirFunctionRepresentation::CFunction
                | MirFunctionRepresentation::ObjCMethod => self.skip(POINTER_SIZE),
            },
            MirTy::Tuple(t) => {
                for element in t.elements {
                    self.visit(element, depth + 1);
                }
            }
            MirTy::Optional(o) => {
                if self.tcx.is_class(o.wrapped) || o.wrapped.is_function() {
                    self.visit(o.wrapped, depth + 1);
                } else {
                    self.opaque(ty, depth);
                }
            }
            MirTy::Nominal(_) => {
                let kind = self
                    .tcx
                    .nominal_kind(ty)
                    .unwrap_or_else(|| ice!("nominal type {} is not declared", ty));
                match kind {
                    MirNominalKind::Class => self.emit(RefCountingKind::NativeStrong),
                    MirNominalKind::Struct => {
                        for field in self.tcx.fields(ty) {
                            self.visit(field.ty, depth + 1);
                        }
                    }
                    MirNominalKind::Enum => self.opaque(ty, depth),
                }
            }
            MirTy::Parameter(_) => self.emit(RefCountingKind::Generic),
            MirTy::BlockStorage(b) => {
                self.emit(RefCountingKind::Block);
                self.visit(b.captured, depth + 1);
            }
        }
    }

    /// Tagged values are plain data when trivial, and need a custom witness otherwise.
    fn opaque(&mut self, ty: &'ta MirTy<'ta>, depth: u32) {
        let size = byte_size(self.tcx, ty, depth);
        if self.tcx.is_trivial(ty) {
            self.skip(size);
        } else {
            self.emit_counted(RefCountingKind::Custom, size);
        }
    }
}

/// The packed size of a value of the type in bytes.
pub fn byte_size<'ta>(tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>, depth: u32) -> u64 {
    if depth > MAX_TYPE_DEPTH {
        ice!("type {} contains itself by value", ty);
    }
    let size = |ty: &'ta MirTy<'ta>| byte_size(tcx, ty, depth + 1);
    match ty {
        MirTy::Integer(i) => u64::from(i.bits.div_ceil(8).max(1)),
        MirTy::RawPointer | MirTy::Token | MirTy::Parameter(_) => POINTER_SIZE,
        MirTy::Function(f) if f.representation == MirFunctionRepresentation::Thick => {
            2 * POINTER_SIZE
        }
        MirTy::Function(_) => POINTER_SIZE,
        MirTy::Tuple(t) => t.elements.iter().map(|e| size(*e)).sum(),
        MirTy::Optional(o) if tcx.is_class(o.wrapped) || o.wrapped.is_function() => size(o.wrapped),
        MirTy::Optional(o) => size(o.wrapped) + 1,
        MirTy::BlockStorage(b) => POINTER_SIZE + size(b.captured),
        MirTy::Nominal(_) => match tcx.nominal_kind(ty) {
            Some(MirNominalKind::Class) => POINTER_SIZE,
            Some(MirNominalKind::Struct) => tcx.fields(ty).iter().map(|f| size(f.ty)).sum(),
            Some(MirNominalKind::Enum) => {
                let cases = tcx.cases(ty);
                let payload = cases
                    .iter()
                    .filter_map(|c| c.payload)
                    .map(|p| size(p))
                    .max()
                    .unwrap_or(0);
                payload + if cases.len() > 1 { 1 } else { 0 }
            }
            None => ice!("nominal type {} is not declared", ty),
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::context::{MirEnumCase, MirField, MirNominalDecl, MirNominalKind, MirTypeContext};
    use crate::layout::{LayoutDecodeError, LayoutOp, LayoutString, RefCountingKind};
    use bumpalo::Bump;
    use tarn_macros::{assert_err, assert_ok};

    fn context(bump: &Bump) -> MirTypeContext<'_> {
        let mut tcx = MirTypeContext::new(MirArena::new(bump));
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let node_ty = arena.get_nominal_ty("Node", &[]);
        let decls = vec![
            MirNominalDecl {
                name: arena.intern_str("Node"),
                kind: MirNominalKind::Class,
                type_parameters: 0,
                fields: vec![],
                cases: vec![],
            },
            MirNominalDecl {
                name: arena.intern_str("Big"),
                kind: MirNominalKind::Struct,
                type_parameters: 0,
                fields: ["a", "b", "c", "d", "e"]
                    .iter()
                    .map(|n| MirField {
                        name: arena.intern_str(n),
                        ty: i64_ty,
                    })
                    .collect(),
                cases: vec![],
            },
            MirNominalDecl {
                name: arena.intern_str("Tagged"),
                kind: MirNominalKind::Struct,
                type_parameters: 0,
                fields: vec![
                    MirField {
                        name: arena.intern_str("tag"),
                        ty: i64_ty,
                    },
                    MirField {
                        name: arena.intern_str("owner"),
                        ty: node_ty,
                    },
                ],
                cases: vec![],
            },
            MirNominalDecl {
                name: arena.intern_str("Either"),
                kind: MirNominalKind::Enum,
                type_parameters: 0,
                fields: vec![],
                cases: vec![
                    MirEnumCase {
                        name: arena.intern_str("left"),
                        payload: Some(node_ty),
                    },
                    MirEnumCase {
                        name: arena.intern_str("right"),
                        payload: Some(i64_ty),
                    },
                ],
            },
        ];
        for decl in decls {
            tcx.declare_nominal(decl);
        }
        tcx
    }

    #[test]
    fn test_plain_struct_is_a_single_skip() {
        let bump = Bump::new();
        let tcx = context(&bump);
        let big = tcx.arena().get_nominal_ty("Big", &[]);
        let layout = LayoutString::for_type(&tcx, big);
        // Trailing plain data is dropped, leaving only the end opcode.
        assert_eq!(layout.bytes(), &[0x00]);
    }

    #[test]
    fn test_reference_fields_are_retained() {
        let bump = Bump::new();
        let tcx = context(&bump);
        let tagged = tcx.arena().get_nominal_ty("Tagged", &[]);
        let layout = LayoutString::for_type(&tcx, tagged);
        assert_eq!(layout.bytes(), &[0x80, 0x08, 0x02, 0x00]);
        assert_eq!(layout.to_hex(), "80 08 02 00");
        let ops = assert_ok!(LayoutString::decode(layout.bytes()));
        let printed = ops.iter().map(|o| o.to_string()).collect::<Vec<_>>();
        assert_eq!(printed, vec!["skip 8", "native_strong", "end"]);
    }

    #[test]
    fn test_non_trivial_enums_use_a_custom_witness() {
        let bump = Bump::new();
        let tcx = context(&bump);
        let either = tcx.arena().get_nominal_ty("Either", &[]);
        let ops = assert_ok!(LayoutString::decode(
            LayoutString::for_type(&tcx, either).bytes()
        ));
        assert_eq!(
            ops[0],
            LayoutOp {
                kind: RefCountingKind::Custom,
                count: Some(9),
            }
        );
    }

    #[test]
    fn test_decode_long_counts_and_errors() {
        let ops = assert_ok!(LayoutString::decode(&[0x80, 0xc8, 0x01, 0x09, 0x00]));
        assert_eq!(ops[0].count, Some(200));
        assert_eq!(ops[1].kind, RefCountingKind::Block);
        assert_eq!(
            assert_err!(LayoutString::decode(&[0x02])),
            LayoutDecodeError::Truncated
        );
        assert_eq!(
            assert_err!(LayoutString::decode(&[0x42, 0x00])),
            LayoutDecodeError::UnknownOpcode(0x42)
        );
    }
}
