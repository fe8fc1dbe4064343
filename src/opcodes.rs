//! JVM opcodes referenced by the instruction walker and the shim synthesizer.

pub(crate) const NOP: u8 = 0x00;
pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const ILOAD: u8 = 0x15;
pub(crate) const LLOAD: u8 = 0x16;
pub(crate) const FLOAD: u8 = 0x17;
pub(crate) const DLOAD: u8 = 0x18;
pub(crate) const ALOAD: u8 = 0x19;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const TABLESWITCH: u8 = 0xaa;
pub(crate) const LOOKUPSWITCH: u8 = 0xab;
pub(crate) const IRETURN: u8 = 0xac;
pub(crate) const LRETURN: u8 = 0xad;
pub(crate) const FRETURN: u8 = 0xae;
pub(crate) const DRETURN: u8 = 0xaf;
pub(crate) const ARETURN: u8 = 0xb0;
pub(crate) const RETURN: u8 = 0xb1;
pub(crate) const GETSTATIC: u8 = 0xb2;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;
pub(crate) const WIDE: u8 = 0xc4;
