use crate::constants::{self, PoolConstant};
use crate::errors::{FormatCause, FormatError};
use crate::reader::Reader;

/// An attribute recorded as a span into the class file. The payload is not
/// parsed at load time; callers re-read it through a `Reader` with one of
/// the typed readers below when the attribute is actually consulted.
#[derive(Clone, Debug)]
pub struct AttributeSpan {
    pub name_index: u16,
    pub start: u32,
    pub length: u32,
}

impl AttributeSpan {
    pub fn name<'a>(&self, pool: &'a [PoolConstant]) -> Result<&'a [u8], FormatError> {
        constants::utf8_at(pool, self.name_index)
    }
}

pub fn read_attributes(reader: &mut Reader<'_>) -> Result<Vec<AttributeSpan>, FormatError> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()?;
        let start = reader.position();
        reader.skip(length as u64)?;
        attributes.push(AttributeSpan {
            name_index,
            start,
            length,
        });
    }
    Ok(attributes)
}

/// Finds an attribute by name among spans.
pub fn lookup<'a>(
    attributes: &'a [AttributeSpan],
    pool: &[PoolConstant],
    name: &[u8],
) -> Option<&'a AttributeSpan> {
    attributes
        .iter()
        .find(|att| matches!(att.name(pool), Ok(n) if n == name))
}

pub const CODE: &[u8] = b"Code";
pub const EXCEPTIONS: &[u8] = b"Exceptions";
pub const CONSTANT_VALUE: &[u8] = b"ConstantValue";
pub const INNER_CLASSES: &[u8] = b"InnerClasses";
pub const LINE_NUMBER_TABLE: &[u8] = b"LineNumberTable";
pub const SOURCE_FILE: &[u8] = b"SourceFile";
pub const SIGNATURE: &[u8] = b"Signature";
pub const ENCLOSING_METHOD: &[u8] = b"EnclosingMethod";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &[u8] = b"RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &[u8] = b"RuntimeInvisibleAnnotations";
pub const ANNOTATION_DEFAULT: &[u8] = b"AnnotationDefault";

/// One entry of a Code attribute's exception table.
#[derive(Clone, Copy, Debug)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Zero for a catch-all handler.
    pub catch_type: u16,
}

/// The parts of a Code attribute the runtime needs: sizes, the bytecode
/// span, the exception table and nested attribute spans.
#[derive(Clone, Debug)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_start: u32,
    pub code_length: u32,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeSpan>,
}

impl CodeAttribute {
    pub fn read(bytes: &[u8], span: &AttributeSpan) -> Result<CodeAttribute, FormatError> {
        let mut reader = Reader::over(bytes, span.start, span.length);
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()?;
        let code_start = reader.position();
        reader.skip(code_length as u64)?;
        let entries = reader.read_u2()?;
        let mut exception_table = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            exception_table.push(ExceptionTableEntry {
                start_pc: reader.read_u2()?,
                end_pc: reader.read_u2()?,
                handler_pc: reader.read_u2()?,
                catch_type: reader.read_u2()?,
            });
        }
        let attributes = read_attributes(&mut reader)?;
        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code_start,
            code_length,
            exception_table,
            attributes,
        })
    }
}

/// Reads an Exceptions attribute: the constant-pool indices of the declared
/// thrown classes.
pub fn read_exceptions(bytes: &[u8], span: &AttributeSpan) -> Result<Vec<u16>, FormatError> {
    let mut reader = Reader::over(bytes, span.start, span.length);
    let count = reader.read_u2()?;
    let mut indices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        indices.push(reader.read_u2()?);
    }
    Ok(indices)
}

/// Reads a ConstantValue attribute: the index of the constant.
pub fn read_constant_value(bytes: &[u8], span: &AttributeSpan) -> Result<u16, FormatError> {
    if span.length != 2 {
        return Err(FormatError::new(
            FormatCause::Truncated,
            "ConstantValue must be two bytes",
        ));
    }
    Reader::over(bytes, span.start, span.length).read_u2()
}

#[derive(Clone, Copy, Debug)]
pub struct InnerClassInfo {
    pub inner_class_index: u16,
    pub outer_class_index: u16,
    pub inner_name_index: u16,
    pub inner_access: u16,
}

pub fn read_inner_classes(
    bytes: &[u8],
    span: &AttributeSpan,
) -> Result<Vec<InnerClassInfo>, FormatError> {
    let mut reader = Reader::over(bytes, span.start, span.length);
    let count = reader.read_u2()?;
    let mut classes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        classes.push(InnerClassInfo {
            inner_class_index: reader.read_u2()?,
            outer_class_index: reader.read_u2()?,
            inner_name_index: reader.read_u2()?,
            inner_access: reader.read_u2()?,
        });
    }
    Ok(classes)
}

/// Walks the LineNumberTable inside a Code attribute and returns the source
/// line covering `pc`.
pub fn line_for_pc(
    bytes: &[u8],
    code: &CodeAttribute,
    pool: &[PoolConstant],
    pc: u16,
) -> Result<u16, FormatError> {
    let Some(span) = lookup(&code.attributes, pool, LINE_NUMBER_TABLE) else {
        return Ok(0);
    };
    let mut reader = Reader::over(bytes, span.start, span.length);
    let count = reader.read_u2()?;
    let mut current = 0;
    for _ in 0..count {
        let start_pc = reader.read_u2()?;
        let line = reader.read_u2()?;
        if start_pc > pc {
            return Ok(current);
        }
        current = line;
    }
    Ok(current)
}
