use crate::access_flags::{self, ACC_MODULE};
use crate::attributes::{self, AttributeSpan};
use crate::constants::{self, PoolConstant};
use crate::errors::{FormatCause, FormatError};
use crate::reader::Reader;

/// A field or method record. Attribute payloads stay in the class file
/// bytes; only the spans are kept here.
#[derive(Clone, Debug)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeSpan>,
}

impl MemberInfo {
    fn read(reader: &mut Reader<'_>) -> Result<MemberInfo, FormatError> {
        Ok(MemberInfo {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: attributes::read_attributes(reader)?,
        })
    }
}

/// The parsed shape of a `.class` file. Indices refer into `constant_pool`;
/// the original bytes must be retained by the caller for attribute spans.
#[derive(Clone, Debug)]
pub struct ClassFile {
    /**
     * **minor_version and major_version**\
     *  The values of the minor_version and major_version items are the minor
     *  and major version numbers of this class file. Together, a major and a
     *  minor version number determine the version of the class file format.
     */
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: Vec<PoolConstant>,
    pub access_flags: u16,
    /**
     * **this_class**\
     *  The value of the this_class item must be a valid index into the
     *  constant_pool table, naming the class or interface defined by this
     *  class file.
     */
    pub this_class: u16,
    /**
     * **super_class**\
     *  Either zero (only for java/lang/Object) or a valid Class constant
     *  index naming the direct superclass.
     */
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeSpan>,
}

impl ClassFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, FormatError> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u4()?;
        if magic != 0xCAFEBABE {
            return Err(FormatError::new(
                FormatCause::IncorrectMagic(magic),
                "magic value in class file was incorrect",
            ));
        }
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool_count = reader.read_u2()?;
        let constant_pool = constants::read_constant_pool(&mut reader, constant_pool_count)?;
        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;
        let interfaces_count = reader.read_u2()?;
        let interfaces = {
            let mut interfaces = Vec::with_capacity(interfaces_count as usize);
            for _ in 0..interfaces_count {
                interfaces.push(reader.read_u2()?);
            }
            interfaces
        };
        let field_count = reader.read_u2()?;
        let fields = {
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                fields.push(MemberInfo::read(&mut reader)?);
            }
            fields
        };
        let methods_count = reader.read_u2()?;
        let methods = {
            let mut methods = Vec::with_capacity(methods_count as usize);
            for _ in 0..methods_count {
                methods.push(MemberInfo::read(&mut reader)?);
            }
            methods
        };
        let attributes = attributes::read_attributes(&mut reader)?;
        // The class file must not be truncated or have extra bytes at the end.
        if reader.remaining() != 0 {
            return Err(FormatError::new(
                FormatCause::ExtraBytes,
                "class file has leftover bytes",
            ));
        }
        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        check_format(&class)?;
        Ok(class)
    }

    pub fn pool_at(&self, index: u16) -> Result<&PoolConstant, FormatError> {
        self.constant_pool
            .get(index as usize)
            .ok_or_else(|| FormatError::new(FormatCause::InvalidIndex(index), ""))
    }

    /// Internal name of the class this file defines, e.g. `java/lang/Object`.
    pub fn this_class_name(&self) -> Result<&[u8], FormatError> {
        constants::class_name_at(&self.constant_pool, self.this_class)
    }

    /// Internal name of the superclass, or None for java/lang/Object.
    pub fn super_class_name(&self) -> Result<Option<&[u8]>, FormatError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        constants::class_name_at(&self.constant_pool, self.super_class).map(Some)
    }
}

/// [Format Checking](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#%5B%7B%22num%22%3A2235%2C%22gen%22%3A0%7D%2C%7B%22name%22%3A%22XYZ%22%7D%2C72%2C590%2Cnull%5D)
///
/// The constant pool must satisfy the constraints documented throughout
/// JVMS §4.4. Only the structural constraints the runtime later relies on
/// are enforced here; descriptor well-formedness is checked when
/// descriptors are interned.
fn check_format(class: &ClassFile) -> Result<(), FormatError> {
    if access_flags::is_module(class.access_flags as u32) && class.access_flags != ACC_MODULE {
        return Err(FormatError::new(
            FormatCause::InvalidIndex(class.this_class),
            "no other flag may be set with ACC_MODULE",
        ));
    }
    for constant in &class.constant_pool {
        match constant {
            PoolConstant::Class { name_index } => {
                constants::utf8_at(&class.constant_pool, *name_index).map_err(|_| {
                    FormatError::new(
                        FormatCause::InvalidIndex(*name_index),
                        "Class name_index was not a Utf8 constant",
                    )
                })?;
            }
            PoolConstant::String { string_index } => {
                constants::utf8_at(&class.constant_pool, *string_index).map_err(|_| {
                    FormatError::new(
                        FormatCause::InvalidIndex(*string_index),
                        "String string_index was not a Utf8 constant",
                    )
                })?;
            }
            PoolConstant::Fieldref {
                class_index,
                name_and_type_index,
            }
            | PoolConstant::Methodref {
                class_index,
                name_and_type_index,
            }
            | PoolConstant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                if !matches!(
                    class.pool_at(*class_index),
                    Ok(PoolConstant::Class { .. })
                ) {
                    return Err(FormatError::new(
                        FormatCause::InvalidIndex(*class_index),
                        "member ref class_index was not a Class constant",
                    ));
                }
                if !matches!(
                    class.pool_at(*name_and_type_index),
                    Ok(PoolConstant::NameAndType { .. })
                ) {
                    return Err(FormatError::new(
                        FormatCause::InvalidIndex(*name_and_type_index),
                        "member ref name_and_type_index was not a NameAndType constant",
                    ));
                }
            }
            PoolConstant::NameAndType {
                name_index,
                descriptor_index,
            } => {
                constants::utf8_at(&class.constant_pool, *name_index).map_err(|_| {
                    FormatError::new(
                        FormatCause::InvalidIndex(*name_index),
                        "NameAndType name_index was not a Utf8 constant",
                    )
                })?;
                constants::utf8_at(&class.constant_pool, *descriptor_index).map_err(|_| {
                    FormatError::new(
                        FormatCause::InvalidIndex(*descriptor_index),
                        "NameAndType descriptor_index was not a Utf8 constant",
                    )
                })?;
            }
            _ => {}
        }
    }
    if !matches!(class.pool_at(class.this_class), Ok(PoolConstant::Class { .. })) {
        return Err(FormatError::new(
            FormatCause::InvalidIndex(class.this_class),
            "this_class was not a Class constant",
        ));
    }
    Ok(())
}
