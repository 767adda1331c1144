//! Parsed field and method descriptors.
//!
//! A `Typedef` is the parsed form of one field descriptor, a `Signdef` the
//! parsed form of a method descriptor. Both are interned per loader under
//! their descriptor name, and both cache the class (or trampoline) they
//! resolve to after first use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::class::ClassRef;
use crate::errors::{JavaError, JavaKind};
use crate::names::{Name, NameTable};

pub const I_TAB: u16 = b'[' as u16;
pub const I_END_REF: u16 = b';' as u16;
pub const I_PARG: u16 = b'(' as u16;
pub const I_PARD: u16 = b')' as u16;
pub const I_REF: u16 = b'L' as u16;

/// The nine primitive JVM types, with their descriptor tag and log size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Void,
}

impl Primitive {
    pub fn descriptor(&self) -> u8 {
        match self {
            Primitive::Bool => b'Z',
            Primitive::Byte => b'B',
            Primitive::Char => b'C',
            Primitive::Short => b'S',
            Primitive::Int => b'I',
            Primitive::Float => b'F',
            Primitive::Long => b'J',
            Primitive::Double => b'D',
            Primitive::Void => b'V',
        }
    }

    pub fn from_descriptor(c: u16) -> Option<Primitive> {
        Some(match c as u8 {
            b'Z' => Primitive::Bool,
            b'B' => Primitive::Byte,
            b'C' => Primitive::Char,
            b'S' => Primitive::Short,
            b'I' => Primitive::Int,
            b'F' => Primitive::Float,
            b'J' => Primitive::Long,
            b'D' => Primitive::Double,
            b'V' => Primitive::Void,
            _ => return None,
        })
    }

    /// log2 of the storage size in bytes: 0 for byte/boolean up to 3 for
    /// long/double. Void has no storage.
    pub fn log_size(&self) -> usize {
        match self {
            Primitive::Bool | Primitive::Byte | Primitive::Void => 0,
            Primitive::Char | Primitive::Short => 1,
            Primitive::Int | Primitive::Float => 2,
            Primitive::Long | Primitive::Double => 3,
        }
    }

    pub fn java_name(&self) -> &'static str {
        match self {
            Primitive::Bool => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Long => "long",
            Primitive::Double => "double",
            Primitive::Void => "void",
        }
    }

    pub const ALL: [Primitive; 9] = [
        Primitive::Bool,
        Primitive::Byte,
        Primitive::Char,
        Primitive::Short,
        Primitive::Int,
        Primitive::Float,
        Primitive::Long,
        Primitive::Double,
        Primitive::Void,
    ];
}

#[derive(Debug)]
pub enum TypedefKind {
    Primitive(Primitive),
    /// Holds the internal name of the referent class.
    Reference { class_name: Name },
    Array { component: Arc<Typedef> },
}

/// One parsed field descriptor. The associated class pointer is cached
/// after first resolution; everything else is immutable.
#[derive(Debug)]
pub struct Typedef {
    pub key: Name,
    pub kind: TypedefKind,
    assoc: OnceLock<ClassRef>,
}

impl Typedef {
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, TypedefKind::Primitive(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, TypedefKind::Reference { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypedefKind::Array { .. })
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.kind {
            TypedefKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// log2 of the storage size of one value of this type.
    pub fn log_size(&self) -> usize {
        match &self.kind {
            TypedefKind::Primitive(p) => p.log_size(),
            _ => {
                if std::mem::size_of::<usize>() == 8 {
                    3
                } else {
                    2
                }
            }
        }
    }

    pub fn size(&self) -> usize {
        1 << self.log_size()
    }

    pub fn cached_class(&self) -> Option<&ClassRef> {
        self.assoc.get()
    }

    /// The class this type stands for, loaded through `loader` on first
    /// use and cached on the typedef afterwards.
    pub fn assoc_class(
        &self,
        loader: &std::sync::Arc<crate::loader::ClassLoader>,
    ) -> Result<ClassRef, JavaError> {
        if let Some(existing) = self.assoc.get() {
            return Ok(existing.clone());
        }
        let class = match &self.kind {
            TypedefKind::Primitive(p) => loader
                .primitive_class(p.descriptor())
                .ok_or_else(|| {
                    JavaError::new(
                        JavaKind::InternalError,
                        "primitive classes not preallocated",
                    )
                })?,
            TypedefKind::Reference { class_name } => loader.load_class(class_name)?,
            TypedefKind::Array { .. } => loader.construct_array(&self.key)?,
        };
        Ok(self.assoc.get_or_init(|| class).clone())
    }
}

/// One parsed method descriptor plus the trampolines the compiler installs
/// for it. The four slots cover {static, virtual} x {buffer, va-list}
/// calling conventions.
#[derive(Debug)]
pub struct Signdef {
    pub key: Name,
    pub arguments: Vec<Arc<Typedef>>,
    pub return_type: Arc<Typedef>,
    static_call_buf: AtomicUsize,
    virtual_call_buf: AtomicUsize,
    static_call_ap: AtomicUsize,
    virtual_call_ap: AtomicUsize,
}

impl Signdef {
    pub fn nb_arguments(&self) -> usize {
        self.arguments.len()
    }

    pub fn static_call_buf(&self) -> usize {
        self.static_call_buf.load(Ordering::Acquire)
    }

    pub fn set_static_call_buf(&self, entry: usize) {
        self.static_call_buf.store(entry, Ordering::Release);
    }

    pub fn virtual_call_buf(&self) -> usize {
        self.virtual_call_buf.load(Ordering::Acquire)
    }

    pub fn set_virtual_call_buf(&self, entry: usize) {
        self.virtual_call_buf.store(entry, Ordering::Release);
    }

    pub fn static_call_ap(&self) -> usize {
        self.static_call_ap.load(Ordering::Acquire)
    }

    pub fn set_static_call_ap(&self, entry: usize) {
        self.static_call_ap.store(entry, Ordering::Release);
    }

    pub fn virtual_call_ap(&self) -> usize {
        self.virtual_call_ap.load(Ordering::Acquire)
    }

    pub fn set_virtual_call_ap(&self, entry: usize) {
        self.virtual_call_ap.store(entry, Ordering::Release);
    }
}

fn bad_descriptor(name: &Name) -> JavaError {
    JavaError::new(
        JavaKind::ClassFormatError,
        format!("malformed descriptor {name}"),
    )
}

/// Recursive descent over the code units of a field descriptor, starting at
/// `pos`. Returns the parsed node and the position after it.
fn parse_component(
    types: &TypeMap,
    names: &NameTable,
    name: &Name,
    pos: usize,
) -> Result<(Arc<Typedef>, usize), JavaError> {
    let chars = name.chars();
    let Some(&cur) = chars.get(pos) else {
        return Err(bad_descriptor(name));
    };
    if let Some(primitive) = Primitive::from_descriptor(cur) {
        let key = names.substring(name, pos, pos + 1);
        let typedef = types.intern(&key, || TypedefKind::Primitive(primitive));
        return Ok((typedef, pos + 1));
    }
    match cur {
        I_REF => {
            let mut end = pos + 1;
            while *chars.get(end).ok_or_else(|| bad_descriptor(name))? != I_END_REF {
                end += 1;
            }
            let key = names.substring(name, pos, end + 1);
            let class_name = names.substring(name, pos + 1, end);
            let typedef = types.intern(&key, || TypedefKind::Reference { class_name });
            Ok((typedef, end + 1))
        }
        I_TAB => {
            let (component, end) = parse_component(types, names, name, pos + 1)?;
            let key = names.substring(name, pos, end);
            let typedef = types.intern(&key, || TypedefKind::Array { component });
            Ok((typedef, end))
        }
        _ => Err(bad_descriptor(name)),
    }
}

/// Per-loader intern table for Typedefs, keyed by descriptor name.
pub struct TypeMap {
    map: RwLock<HashMap<Name, Arc<Typedef>>>,
}

impl Default for TypeMap {
    fn default() -> TypeMap {
        TypeMap::new()
    }
}

impl TypeMap {
    pub fn new() -> TypeMap {
        TypeMap {
            map: RwLock::new(HashMap::new()),
        }
    }

    fn intern(&self, key: &Name, make: impl FnOnce() -> TypedefKind) -> Arc<Typedef> {
        if let Some(existing) = self.map.read().get(key) {
            return existing.clone();
        }
        let mut map = self.map.write();
        if let Some(existing) = map.get(key) {
            return existing.clone();
        }
        let typedef = Arc::new(Typedef {
            key: key.clone(),
            kind: make(),
            assoc: OnceLock::new(),
        });
        map.insert(key.clone(), typedef.clone());
        typedef
    }

    /// Parses and interns a full field descriptor.
    pub fn construct_type(
        &self,
        names: &NameTable,
        descriptor: &Name,
    ) -> Result<Arc<Typedef>, JavaError> {
        if let Some(existing) = self.map.read().get(descriptor) {
            return Ok(existing.clone());
        }
        let (typedef, end) = parse_component(self, names, descriptor, 0)?;
        if end != descriptor.len() {
            return Err(bad_descriptor(descriptor));
        }
        Ok(typedef)
    }
}

/// Per-loader intern table for Signdefs, keyed by method descriptor name.
pub struct SignMap {
    map: RwLock<HashMap<Name, Arc<Signdef>>>,
}

impl Default for SignMap {
    fn default() -> SignMap {
        SignMap::new()
    }
}

impl SignMap {
    pub fn new() -> SignMap {
        SignMap {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Parses and interns a full method descriptor `(args...)ret`.
    pub fn construct_sign(
        &self,
        types: &TypeMap,
        names: &NameTable,
        descriptor: &Name,
    ) -> Result<Arc<Signdef>, JavaError> {
        if let Some(existing) = self.map.read().get(descriptor) {
            return Ok(existing.clone());
        }
        let chars = descriptor.chars();
        if chars.first() != Some(&I_PARG) {
            return Err(bad_descriptor(descriptor));
        }
        let mut arguments = Vec::new();
        let mut pos = 1;
        while *chars.get(pos).ok_or_else(|| bad_descriptor(descriptor))? != I_PARD {
            let (arg, next) = parse_component(types, names, descriptor, pos)?;
            arguments.push(arg);
            pos = next;
        }
        let (return_type, end) = parse_component(types, names, descriptor, pos + 1)?;
        if end != descriptor.len() {
            return Err(bad_descriptor(descriptor));
        }
        let mut map = self.map.write();
        if let Some(existing) = map.get(descriptor) {
            return Ok(existing.clone());
        }
        let signdef = Arc::new(Signdef {
            key: descriptor.clone(),
            arguments,
            return_type,
            static_call_buf: AtomicUsize::new(0),
            virtual_call_buf: AtomicUsize::new(0),
            static_call_ap: AtomicUsize::new(0),
            virtual_call_ap: AtomicUsize::new(0),
        });
        map.insert(descriptor.clone(), signdef.clone());
        Ok(signdef)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn setup() -> (NameTable, TypeMap, SignMap) {
        (NameTable::new(), TypeMap::new(), SignMap::new())
    }

    #[test]
    fn primitive_descriptors() {
        let (names, types, _) = setup();
        let t = types.construct_type(&names, &names.from_str("I")).unwrap();
        assert_eq!(t.as_primitive(), Some(Primitive::Int));
        assert_eq!(t.log_size(), 2);
        let j = types.construct_type(&names, &names.from_str("J")).unwrap();
        assert_eq!(j.log_size(), 3);
    }

    #[test]
    fn reference_and_array_descriptors() {
        let (names, types, _) = setup();
        let t = types
            .construct_type(&names, &names.from_str("Ljava/lang/Object;"))
            .unwrap();
        match &t.kind {
            TypedefKind::Reference { class_name } => {
                assert_eq!(class_name.to_string(), "java/lang/Object")
            }
            other => panic!("expected reference, got {other:?}"),
        }
        let a = types.construct_type(&names, &names.from_str("[[I")).unwrap();
        match &a.kind {
            TypedefKind::Array { component } => {
                assert!(component.is_array());
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn typedefs_are_interned() {
        let (names, types, _) = setup();
        let a = types.construct_type(&names, &names.from_str("[I")).unwrap();
        let b = types.construct_type(&names, &names.from_str("[I")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn signatures_parse_arguments_and_return() {
        let (names, types, signs) = setup();
        let sign = signs
            .construct_sign(
                &types,
                &names,
                &names.from_str("(ILjava/lang/String;[J)V"),
            )
            .unwrap();
        assert_eq!(sign.nb_arguments(), 3);
        assert_eq!(sign.return_type.as_primitive(), Some(Primitive::Void));
        assert!(sign.arguments[1].is_reference());
        assert!(sign.arguments[2].is_array());
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let (names, types, signs) = setup();
        assert!(types.construct_type(&names, &names.from_str("Q")).is_err());
        assert!(types
            .construct_type(&names, &names.from_str("Ljava/lang/Object"))
            .is_err());
        assert!(signs
            .construct_sign(&types, &names, &names.from_str("(I"))
            .is_err());
    }

    #[test]
    fn trampoline_slots_are_per_signature() {
        let (names, types, signs) = setup();
        let sign = signs
            .construct_sign(&types, &names, &names.from_str("()V"))
            .unwrap();
        assert_eq!(sign.virtual_call_buf(), 0);
        sign.set_virtual_call_buf(0xBEEF);
        let again = signs
            .construct_sign(&types, &names, &names.from_str("()V"))
            .unwrap();
        assert_eq!(again.virtual_call_buf(), 0xBEEF);
    }
}
