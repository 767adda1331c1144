//! Access-flag masks and predicates over the raw `access_flags` item of
//! classes, fields and methods.

/// [Class Access Flags](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#page=85)
pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
/// Treat superclass methods specially when invoked by the invokespecial
/// instruction. Same bit as ACC_SYNCHRONIZED on methods.
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_VOLATILE: u16 = 0x0040;
pub const ACC_BRIDGE: u16 = 0x0040;
pub const ACC_TRANSIENT: u16 = 0x0080;
pub const ACC_VARARGS: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;
pub const ACC_STRICT: u16 = 0x0800;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ANNOTATION: u16 = 0x2000;
pub const ACC_ENUM: u16 = 0x4000;
pub const ACC_MODULE: u16 = 0x8000;

pub fn is_public(access: u32) -> bool {
    access & ACC_PUBLIC as u32 != 0
}

pub fn is_private(access: u32) -> bool {
    access & ACC_PRIVATE as u32 != 0
}

pub fn is_protected(access: u32) -> bool {
    access & ACC_PROTECTED as u32 != 0
}

pub fn is_static(access: u32) -> bool {
    access & ACC_STATIC as u32 != 0
}

pub fn is_final(access: u32) -> bool {
    access & ACC_FINAL as u32 != 0
}

pub fn is_super(access: u32) -> bool {
    access & ACC_SUPER as u32 != 0
}

pub fn is_synchronized(access: u32) -> bool {
    access & ACC_SYNCHRONIZED as u32 != 0
}

pub fn is_volatile(access: u32) -> bool {
    access & ACC_VOLATILE as u32 != 0
}

pub fn is_native(access: u32) -> bool {
    access & ACC_NATIVE as u32 != 0
}

pub fn is_interface(access: u32) -> bool {
    access & ACC_INTERFACE as u32 != 0
}

pub fn is_abstract(access: u32) -> bool {
    access & ACC_ABSTRACT as u32 != 0
}

pub fn is_synthetic(access: u32) -> bool {
    access & ACC_SYNTHETIC as u32 != 0
}

pub fn is_module(access: u32) -> bool {
    access & ACC_MODULE as u32 != 0
}
