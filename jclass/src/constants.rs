use crate::errors::{FormatCause, FormatError};
use crate::reader::Reader;

/// [The Constant Pool](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#%5B%7B%22num%22%3A2201%2C%22gen%22%3A0%7D%2C%7B%22name%22%3A%22XYZ%22%7D%2C72%2C256%2Cnull%5D)
///
/// The raw, unresolved view of a class file constant pool. Index 0 and the
/// upper halves of long/double entries are `Unusable`.
#[derive(Clone, Debug, PartialEq)]
pub enum PoolConstant {
    /// Bytes are in modified UTF-8; the runtime decodes them when interning.
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
    Unusable,
}

#[repr(u8)]
pub enum Tag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    Fieldref = 9,
    Methodref = 10,
    InterfaceMethodref = 11,
    NameAndType = 12,
    MethodHandle = 15,
    MethodType = 16,
    Dynamic = 17,
    InvokeDynamic = 18,
    Module = 19,
    Package = 20,
}

/// Reads `count - 1` entries, leaving slot 0 `Unusable`. Long and double
/// entries occupy two slots (JVMS 4.4.5).
pub fn read_constant_pool(
    reader: &mut Reader<'_>,
    count: u16,
) -> Result<Vec<PoolConstant>, FormatError> {
    let mut pool = Vec::with_capacity(count as usize);
    pool.push(PoolConstant::Unusable);
    let mut index = 1;
    while index < count {
        let tag = reader.read_u1()?;
        let constant = match tag {
            t if t == Tag::Utf8 as u8 => {
                let length = reader.read_u2()?;
                PoolConstant::Utf8(reader.read_bytes(length as usize)?)
            }
            t if t == Tag::Integer as u8 => PoolConstant::Integer(reader.read_i4()?),
            t if t == Tag::Float as u8 => PoolConstant::Float(reader.read_f4()?),
            t if t == Tag::Long as u8 => PoolConstant::Long(reader.read_i8()?),
            t if t == Tag::Double as u8 => PoolConstant::Double(reader.read_f8()?),
            t if t == Tag::Class as u8 => PoolConstant::Class {
                name_index: reader.read_u2()?,
            },
            t if t == Tag::String as u8 => PoolConstant::String {
                string_index: reader.read_u2()?,
            },
            t if t == Tag::Fieldref as u8 => PoolConstant::Fieldref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            t if t == Tag::Methodref as u8 => PoolConstant::Methodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            t if t == Tag::InterfaceMethodref as u8 => PoolConstant::InterfaceMethodref {
                class_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            t if t == Tag::NameAndType as u8 => PoolConstant::NameAndType {
                name_index: reader.read_u2()?,
                descriptor_index: reader.read_u2()?,
            },
            t if t == Tag::MethodHandle as u8 => PoolConstant::MethodHandle {
                reference_kind: reader.read_u1()?,
                reference_index: reader.read_u2()?,
            },
            t if t == Tag::MethodType as u8 => PoolConstant::MethodType {
                descriptor_index: reader.read_u2()?,
            },
            t if t == Tag::Dynamic as u8 => PoolConstant::Dynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            t if t == Tag::InvokeDynamic as u8 => PoolConstant::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u2()?,
                name_and_type_index: reader.read_u2()?,
            },
            t if t == Tag::Module as u8 => PoolConstant::Module {
                name_index: reader.read_u2()?,
            },
            t if t == Tag::Package as u8 => PoolConstant::Package {
                name_index: reader.read_u2()?,
            },
            _ => {
                return Err(FormatError::new(
                    FormatCause::InvalidTag(tag),
                    "unknown constant pool tag",
                ))
            }
        };
        let double_width =
            matches!(constant, PoolConstant::Long(_) | PoolConstant::Double(_));
        pool.push(constant);
        index += 1;
        if double_width {
            pool.push(PoolConstant::Unusable);
            index += 1;
        }
    }
    Ok(pool)
}

/// Fetches the modified UTF-8 bytes behind a `Utf8` entry.
pub fn utf8_at(pool: &[PoolConstant], index: u16) -> Result<&[u8], FormatError> {
    match pool.get(index as usize) {
        Some(PoolConstant::Utf8(bytes)) => Ok(bytes),
        _ => Err(FormatError::new(
            FormatCause::InvalidIndex(index),
            "expected a Utf8 constant",
        )),
    }
}

/// Fetches the name behind a `Class` entry.
pub fn class_name_at(pool: &[PoolConstant], index: u16) -> Result<&[u8], FormatError> {
    match pool.get(index as usize) {
        Some(PoolConstant::Class { name_index }) => utf8_at(pool, *name_index),
        _ => Err(FormatError::new(
            FormatCause::InvalidIndex(index),
            "expected a Class constant",
        )),
    }
}
