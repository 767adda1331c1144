//! Interned UTF-16 names.
//!
//! A `Name` is the key used everywhere else in the core: class names, field
//! and method names, descriptors. Within one loader two equal character
//! sequences always yield the same allocation, so equality is a pointer
//! compare and the content hash is computed once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{JavaError, JavaKind};

pub struct NameData {
    chars: Box<[u16]>,
    hash: u32,
}

/// An interned name. Clone is a pointer copy; equality is identity within
/// the owning `NameTable`.
#[derive(Clone)]
pub struct Name(Arc<NameData>);

impl Name {
    pub fn chars(&self) -> &[u16] {
        &self.0.chars
    }

    pub fn len(&self) -> usize {
        self.0.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.chars.is_empty()
    }

    pub fn char_at(&self, index: usize) -> u16 {
        self.0.chars[index]
    }

    pub fn content_hash(&self) -> u32 {
        self.0.hash
    }

    /// Lexicographic order on code units, used to keep sorted method lists.
    pub fn lexical_cmp(&self, other: &Name) -> std::cmp::Ordering {
        self.0.chars.cmp(&other.0.chars)
    }

    /// Content equality; `==` is identity.
    pub fn same_chars(&self, other: &[u16]) -> bool {
        *self.0.chars == *other
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Name) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.0.hash);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for piece in char::decode_utf16(self.0.chars.iter().copied()) {
            f.write_fmt(format_args!(
                "{}",
                piece.unwrap_or(char::REPLACEMENT_CHARACTER)
            ))?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

fn content_hash(chars: &[u16]) -> u32 {
    // Same recurrence as String.hashCode, which keeps IMT bucket spreads
    // comparable with what the original tables see.
    let mut h: u32 = 0;
    for &c in chars {
        h = h.wrapping_mul(31).wrapping_add(c as u32);
    }
    h
}

/// Per-loader intern table. Reads take the shared lock; only a miss takes
/// the write lock.
pub struct NameTable {
    map: RwLock<HashMap<Box<[u16]>, Name>>,
}

impl Default for NameTable {
    fn default() -> NameTable {
        NameTable::new()
    }
}

impl NameTable {
    pub fn new() -> NameTable {
        NameTable {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_utf16(&self, chars: &[u16]) -> Name {
        if let Some(existing) = self.map.read().get(chars) {
            return existing.clone();
        }
        let mut map = self.map.write();
        if let Some(existing) = map.get(chars) {
            return existing.clone();
        }
        let name = Name(Arc::new(NameData {
            chars: chars.to_vec().into_boxed_slice(),
            hash: content_hash(chars),
        }));
        map.insert(name.0.chars.clone(), name.clone());
        name
    }

    /// Interns the modified UTF-8 bytes of a class-file constant.
    pub fn from_modified_utf8(&self, bytes: &[u8]) -> Result<Name, JavaError> {
        let decoded = cesu8::from_java_cesu8(bytes).map_err(|_| {
            JavaError::new(
                JavaKind::ClassFormatError,
                "constant is not valid modified UTF-8",
            )
        })?;
        let chars: Vec<u16> = decoded.encode_utf16().collect();
        Ok(self.from_utf16(&chars))
    }

    pub fn from_str(&self, s: &str) -> Name {
        let chars: Vec<u16> = s.encode_utf16().collect();
        self.from_utf16(&chars)
    }

    pub fn substring(&self, name: &Name, start: usize, end: usize) -> Name {
        self.from_utf16(&name.chars()[start..end])
    }

    /// `java/lang/Object` -> `java.lang.Object`.
    pub fn internal_to_java(&self, name: &Name) -> Name {
        let chars: Vec<u16> = name
            .chars()
            .iter()
            .map(|&c| if c == b'/' as u16 { b'.' as u16 } else { c })
            .collect();
        self.from_utf16(&chars)
    }

    /// `java.lang.Object` -> `java/lang/Object`.
    pub fn java_to_internal(&self, name: &Name) -> Name {
        let chars: Vec<u16> = name
            .chars()
            .iter()
            .map(|&c| if c == b'.' as u16 { b'/' as u16 } else { c })
            .collect();
        self.from_utf16(&chars)
    }

    /// Builds the internal name of an array class with `dims` dimensions
    /// over a component name: `java/lang/Object` -> `[Ljava/lang/Object;`,
    /// `[I` -> `[[I`.
    pub fn array_name(&self, dims: usize, component: &Name) -> Name {
        let mut chars: Vec<u16> = Vec::with_capacity(component.len() + dims + 2);
        chars.extend(std::iter::repeat(b'[' as u16).take(dims));
        let first = component.char_at(0);
        let is_descriptor = first == b'[' as u16
            || (component.len() == 1 && b"ZBCSIFJD".iter().any(|&p| p as u16 == first));
        if is_descriptor {
            chars.extend_from_slice(component.chars());
        } else {
            chars.push(b'L' as u16);
            chars.extend_from_slice(component.chars());
            chars.push(b';' as u16);
        }
        self.from_utf16(&chars)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_gives_pointer_equality() {
        let table = NameTable::new();
        let a = table.from_str("java/lang/Object");
        let b = table.from_str("java/lang/Object");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        let c = table.from_str("java/lang/String");
        assert_ne!(a, c);
    }

    #[test]
    fn modified_utf8_round_trips_through_utf16() {
        let table = NameTable::new();
        let name = table.from_modified_utf8(b"java/lang/Object").unwrap();
        assert_eq!(name.to_string(), "java/lang/Object");
        assert_eq!(name, table.from_str("java/lang/Object"));
    }

    #[test]
    fn internal_java_conversions_are_interned() {
        let table = NameTable::new();
        let internal = table.from_str("java/lang/Object");
        let java = table.internal_to_java(&internal);
        assert_eq!(java.to_string(), "java.lang.Object");
        assert_eq!(table.java_to_internal(&java), internal);
    }

    #[test]
    fn array_names() {
        let table = NameTable::new();
        let object = table.from_str("java/lang/Object");
        assert_eq!(
            table.array_name(1, &object).to_string(),
            "[Ljava/lang/Object;"
        );
        assert_eq!(
            table.array_name(2, &object).to_string(),
            "[[Ljava/lang/Object;"
        );
        let int_array = table.from_str("[I");
        assert_eq!(table.array_name(1, &int_array).to_string(), "[[I");
    }
}
