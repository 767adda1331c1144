use jclass::access_flags;
use jclass::class_file::ClassFile;
use jclass::errors::FormatCause;

/// Hand-assembled minimal class file: `public class A` with no members.
fn minimal_class() -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend(0xCAFEBABEu32.to_be_bytes());
    out.extend(0u16.to_be_bytes()); // minor
    out.extend(50u16.to_be_bytes()); // major
    out.extend(5u16.to_be_bytes()); // constant_pool_count
    // 1: Utf8 "A"
    out.push(1);
    out.extend(1u16.to_be_bytes());
    out.push(b'A');
    // 2: Class #1
    out.push(7);
    out.extend(1u16.to_be_bytes());
    // 3: Utf8 "java/lang/Object"
    out.push(1);
    out.extend(16u16.to_be_bytes());
    out.extend(b"java/lang/Object");
    // 4: Class #3
    out.push(7);
    out.extend(3u16.to_be_bytes());
    out.extend(0x0021u16.to_be_bytes()); // ACC_PUBLIC | ACC_SUPER
    out.extend(2u16.to_be_bytes()); // this_class
    out.extend(4u16.to_be_bytes()); // super_class
    out.extend(0u16.to_be_bytes()); // interfaces
    out.extend(0u16.to_be_bytes()); // fields
    out.extend(0u16.to_be_bytes()); // methods
    out.extend(0u16.to_be_bytes()); // attributes
    out
}

#[test]
fn parses_a_minimal_class() {
    let class = ClassFile::from_bytes(&minimal_class()).unwrap();
    assert_eq!(class.major_version, 50);
    assert_eq!(class.minor_version, 0);
    assert_eq!(class.this_class_name().unwrap(), b"A");
    assert_eq!(class.super_class_name().unwrap().unwrap(), b"java/lang/Object");
    assert!(access_flags::is_public(class.access_flags as u32));
    assert!(class.fields.is_empty());
    assert!(class.methods.is_empty());
}

#[test]
fn rejects_a_wrong_magic() {
    let mut bytes = minimal_class();
    bytes[0] = 0xDE;
    let err = ClassFile::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err.cause(), FormatCause::IncorrectMagic(_)));
}

#[test]
fn rejects_truncation() {
    let bytes = minimal_class();
    let err = ClassFile::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(matches!(err.cause(), FormatCause::Truncated));
}

#[test]
fn rejects_trailing_bytes() {
    let mut bytes = minimal_class();
    bytes.push(0);
    let err = ClassFile::from_bytes(&bytes).unwrap_err();
    assert!(matches!(err.cause(), FormatCause::ExtraBytes));
}

#[test]
fn long_constants_take_two_pool_slots() {
    let mut out: Vec<u8> = Vec::new();
    out.extend(0xCAFEBABEu32.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(50u16.to_be_bytes());
    out.extend(7u16.to_be_bytes()); // 1 long (2 slots) + 2 utf8/class pairs... count = entries + 1
    // 1-2: Long
    out.push(5);
    out.extend((1i64 << 40).to_be_bytes());
    // 3: Utf8 "B"
    out.push(1);
    out.extend(1u16.to_be_bytes());
    out.push(b'B');
    // 4: Class #3
    out.push(7);
    out.extend(3u16.to_be_bytes());
    // 5: Utf8 "java/lang/Object"
    out.push(1);
    out.extend(16u16.to_be_bytes());
    out.extend(b"java/lang/Object");
    // 6: Class #5
    out.push(7);
    out.extend(5u16.to_be_bytes());
    out.extend(0x0021u16.to_be_bytes());
    out.extend(4u16.to_be_bytes());
    out.extend(6u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    out.extend(0u16.to_be_bytes());
    let class = ClassFile::from_bytes(&out).unwrap();
    assert_eq!(class.this_class_name().unwrap(), b"B");
    assert!(matches!(
        class.constant_pool[1],
        jclass::constants::PoolConstant::Long(v) if v == 1 << 40
    ));
    assert!(matches!(
        class.constant_pool[2],
        jclass::constants::PoolConstant::Unusable
    ));
}
