//! The runtime constant pool of a regular class.
//!
//! Built once from the raw class-file pool at definition time; resolvable
//! entries carry a once-written slot so concurrent first uses observe
//! either the unresolved entry or the final resolution, never a partial
//! one. Failed resolutions are cached so every retry reports the same
//! error (JVMS 5.4.3).

use std::sync::{Arc, OnceLock};

use jclass::constants::PoolConstant;

use crate::class::{ClassRef, FieldPtr, MethodPtr};
use crate::errors::{JavaError, JavaKind};
use crate::loader::ClassLoader;
use crate::names::{Name, NameTable};
use crate::object::ObjRef;
use crate::vm::Jvm;

/// The four invoke flavors a method reference resolves under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    Static,
    Virtual,
    Special,
    Interface,
}

#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    Static,
    Instance,
}

#[derive(Clone)]
pub struct ResolvedMethod {
    /// The class the lookup found the method in.
    pub class: ClassRef,
    pub method: MethodPtr,
}

#[derive(Clone)]
pub struct ResolvedField {
    pub class: ClassRef,
    pub field: FieldPtr,
}

pub enum PoolItem {
    Empty,
    Utf8(Name),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    ClassRef {
        name: Name,
        resolved: OnceLock<Result<ClassRef, JavaError>>,
    },
    StringRef {
        value: Name,
        resolved: OnceLock<ObjRef>,
    },
    NameAndType {
        name: Name,
        descriptor: Name,
    },
    MethodRef {
        class_index: u16,
        nat_index: u16,
        interface: bool,
        resolved: OnceLock<Result<ResolvedMethod, JavaError>>,
    },
    FieldRef {
        class_index: u16,
        nat_index: u16,
        resolved: OnceLock<Result<ResolvedField, JavaError>>,
    },
    /// Entries the execution core never resolves itself (method handles,
    /// invokedynamic, modules); kept for index fidelity.
    Other,
}

pub struct ConstantPool {
    raw: Vec<PoolConstant>,
    items: Vec<PoolItem>,
}

impl ConstantPool {
    /// Rebuilds the raw pool into runtime entries, interning every name.
    pub fn build(raw: Vec<PoolConstant>, names: &NameTable) -> Result<ConstantPool, JavaError> {
        let mut items = Vec::with_capacity(raw.len());
        for constant in &raw {
            let item = match constant {
                PoolConstant::Unusable => PoolItem::Empty,
                PoolConstant::Utf8(bytes) => PoolItem::Utf8(names.from_modified_utf8(bytes)?),
                PoolConstant::Integer(v) => PoolItem::Integer(*v),
                PoolConstant::Float(v) => PoolItem::Float(*v),
                PoolConstant::Long(v) => PoolItem::Long(*v),
                PoolConstant::Double(v) => PoolItem::Double(*v),
                PoolConstant::Class { name_index } => PoolItem::ClassRef {
                    name: names.from_modified_utf8(utf8_raw(&raw, *name_index)?)?,
                    resolved: OnceLock::new(),
                },
                PoolConstant::String { string_index } => PoolItem::StringRef {
                    value: names.from_modified_utf8(utf8_raw(&raw, *string_index)?)?,
                    resolved: OnceLock::new(),
                },
                PoolConstant::NameAndType {
                    name_index,
                    descriptor_index,
                } => PoolItem::NameAndType {
                    name: names.from_modified_utf8(utf8_raw(&raw, *name_index)?)?,
                    descriptor: names.from_modified_utf8(utf8_raw(&raw, *descriptor_index)?)?,
                },
                PoolConstant::Methodref {
                    class_index,
                    name_and_type_index,
                } => PoolItem::MethodRef {
                    class_index: *class_index,
                    nat_index: *name_and_type_index,
                    interface: false,
                    resolved: OnceLock::new(),
                },
                PoolConstant::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => PoolItem::MethodRef {
                    class_index: *class_index,
                    nat_index: *name_and_type_index,
                    interface: true,
                    resolved: OnceLock::new(),
                },
                PoolConstant::Fieldref {
                    class_index,
                    name_and_type_index,
                } => PoolItem::FieldRef {
                    class_index: *class_index,
                    nat_index: *name_and_type_index,
                    resolved: OnceLock::new(),
                },
                _ => PoolItem::Other,
            };
            items.push(item);
        }
        Ok(ConstantPool { raw, items })
    }

    /// The raw class-file entries, for attribute name lookups.
    pub fn raw(&self) -> &[PoolConstant] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn item(&self, index: u16) -> Result<&PoolItem, JavaError> {
        self.items.get(index as usize).ok_or_else(|| {
            JavaError::new(
                JavaKind::ClassFormatError,
                format!("constant pool index {index} out of range"),
            )
        })
    }

    pub fn utf8_at(&self, index: u16) -> Result<Name, JavaError> {
        match self.item(index)? {
            PoolItem::Utf8(name) => Ok(name.clone()),
            _ => Err(bad_entry(index, "Utf8")),
        }
    }

    pub fn integer_at(&self, index: u16) -> Result<i32, JavaError> {
        match self.item(index)? {
            PoolItem::Integer(v) => Ok(*v),
            _ => Err(bad_entry(index, "Integer")),
        }
    }

    pub fn long_at(&self, index: u16) -> Result<i64, JavaError> {
        match self.item(index)? {
            PoolItem::Long(v) => Ok(*v),
            _ => Err(bad_entry(index, "Long")),
        }
    }

    pub fn float_at(&self, index: u16) -> Result<f32, JavaError> {
        match self.item(index)? {
            PoolItem::Float(v) => Ok(*v),
            _ => Err(bad_entry(index, "Float")),
        }
    }

    pub fn double_at(&self, index: u16) -> Result<f64, JavaError> {
        match self.item(index)? {
            PoolItem::Double(v) => Ok(*v),
            _ => Err(bad_entry(index, "Double")),
        }
    }

    pub fn class_name_at(&self, index: u16) -> Result<Name, JavaError> {
        match self.item(index)? {
            PoolItem::ClassRef { name, .. } => Ok(name.clone()),
            _ => Err(bad_entry(index, "Class")),
        }
    }

    pub fn string_value_at(&self, index: u16) -> Result<Name, JavaError> {
        match self.item(index)? {
            PoolItem::StringRef { value, .. } => Ok(value.clone()),
            _ => Err(bad_entry(index, "String")),
        }
    }

    pub fn name_and_type_at(&self, index: u16) -> Result<(Name, Name), JavaError> {
        match self.item(index)? {
            PoolItem::NameAndType { name, descriptor } => {
                Ok((name.clone(), descriptor.clone()))
            }
            _ => Err(bad_entry(index, "NameAndType")),
        }
    }

    /// Resolves (loading if necessary) the class behind a Class entry. The
    /// result, success or failure, is installed once and returned to every
    /// caller.
    pub fn resolve_class(
        &self,
        loader: &Arc<ClassLoader>,
        index: u16,
    ) -> Result<ClassRef, JavaError> {
        match self.item(index)? {
            PoolItem::ClassRef { name, resolved } => resolved
                .get_or_init(|| loader.load_class(name))
                .clone(),
            _ => Err(bad_entry(index, "Class")),
        }
    }

    /// Resolves a method reference under the given invoke flavor.
    pub fn resolve_method(
        &self,
        loader: &Arc<ClassLoader>,
        caller: &ClassRef,
        index: u16,
        kind: MethodKind,
    ) -> Result<ResolvedMethod, JavaError> {
        let (class_index, nat_index, slot) = match self.item(index)? {
            PoolItem::MethodRef {
                class_index,
                nat_index,
                resolved,
                ..
            } => (*class_index, *nat_index, resolved),
            _ => return Err(bad_entry(index, "Methodref")),
        };
        slot.get_or_init(|| {
            let class = self.resolve_class(loader, class_index)?;
            let (name, descriptor) = self.name_and_type_at(nat_index)?;
            crate::loader::resolve_class(loader, &class)?;
            let found = match kind {
                MethodKind::Static => {
                    class.lookup_method_dont_throw(&name, &descriptor, true, true)
                }
                MethodKind::Virtual => {
                    class.lookup_method_dont_throw(&name, &descriptor, false, true)
                }
                MethodKind::Interface => {
                    class.lookup_interface_method_dont_throw(&name, &descriptor)
                }
                MethodKind::Special => {
                    class.lookup_special_method_dont_throw(&name, &descriptor, caller)
                }
            };
            let (defining, method) = found.ok_or_else(|| {
                JavaError::new(
                    JavaKind::NoSuchMethodError,
                    format!("{}.{}{}", class.name, name, descriptor),
                )
            })?;
            let expect_static = matches!(kind, MethodKind::Static);
            if method.get().is_static() != expect_static {
                return Err(JavaError::new(
                    JavaKind::IncompatibleClassChangeError,
                    format!("{}.{}{}", class.name, name, descriptor),
                ));
            }
            Ok(ResolvedMethod {
                class: defining,
                method,
            })
        })
        .clone()
    }

    /// Resolves a field reference.
    pub fn resolve_field(
        &self,
        loader: &Arc<ClassLoader>,
        index: u16,
        kind: FieldKind,
    ) -> Result<ResolvedField, JavaError> {
        let (class_index, nat_index, slot) = match self.item(index)? {
            PoolItem::FieldRef {
                class_index,
                nat_index,
                resolved,
            } => (*class_index, *nat_index, resolved),
            _ => return Err(bad_entry(index, "Fieldref")),
        };
        slot.get_or_init(|| {
            let class = self.resolve_class(loader, class_index)?;
            let (name, descriptor) = self.name_and_type_at(nat_index)?;
            crate::loader::resolve_class(loader, &class)?;
            let is_static = matches!(kind, FieldKind::Static);
            let (defining, field) = class
                .lookup_field_dont_throw(&name, &descriptor, is_static, true)
                .ok_or_else(|| {
                    JavaError::new(
                        JavaKind::NoSuchFieldError,
                        format!("{}.{} {}", class.name, name, descriptor),
                    )
                })?;
            Ok(ResolvedField {
                class: defining,
                field,
            })
        })
        .clone()
    }

    /// Resolves a String entry to the interned java.lang.String instance.
    pub fn resolve_string(&self, vm: &Jvm, index: u16) -> Result<ObjRef, JavaError> {
        match self.item(index)? {
            PoolItem::StringRef { value, resolved } => {
                if let Some(existing) = resolved.get() {
                    return Ok(*existing);
                }
                let interned = vm.intern_string(value)?;
                Ok(*resolved.get_or_init(|| interned))
            }
            _ => Err(bad_entry(index, "String")),
        }
    }
}

fn bad_entry(index: u16, expected: &str) -> JavaError {
    JavaError::new(
        JavaKind::ClassFormatError,
        format!("constant pool entry {index} is not a {expected} constant"),
    )
}

fn utf8_raw(raw: &[PoolConstant], index: u16) -> Result<&[u8], JavaError> {
    match raw.get(index as usize) {
        Some(PoolConstant::Utf8(bytes)) => Ok(bytes),
        _ => Err(JavaError::new(
            JavaKind::ClassFormatError,
            format!("constant pool index {index} is not a Utf8 constant"),
        )),
    }
}
