use jclass::errors::FormatError;
use thiserror::Error;

/// Every error kind the core raises or surfaces. The names follow the Java
/// classes that a complete class library would materialize for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaKind {
    ClassNotFoundException,
    NoClassDefFoundError,
    ClassFormatError,
    UnsupportedClassVersionError,
    ClassCircularityError,
    IncompatibleClassChangeError,
    NoSuchMethodError,
    NoSuchFieldError,
    AbstractMethodError,
    IllegalAccessError,
    VerifyError,
    ExceptionInInitializerError,
    NoClassInitializerError,
    NullPointerException,
    ArrayIndexOutOfBoundsException,
    ArrayStoreException,
    ClassCastException,
    NegativeArraySizeException,
    ArithmeticException,
    IllegalMonitorStateException,
    InterruptedException,
    OutOfMemoryError,
    StackOverflowError,
    InternalError,
    UnknownError,
    /// Carries a user exception out of `<clinit>` so the initializer can
    /// decide whether to wrap it.
    RuntimeException,
}

impl JavaKind {
    /// Internal name of the Java class standing for this kind.
    pub fn class_name(&self) -> &'static str {
        match self {
            JavaKind::ClassNotFoundException => "java/lang/ClassNotFoundException",
            JavaKind::NoClassDefFoundError => "java/lang/NoClassDefFoundError",
            JavaKind::ClassFormatError => "java/lang/ClassFormatError",
            JavaKind::UnsupportedClassVersionError => "java/lang/UnsupportedClassVersionError",
            JavaKind::ClassCircularityError => "java/lang/ClassCircularityError",
            JavaKind::IncompatibleClassChangeError => "java/lang/IncompatibleClassChangeError",
            JavaKind::NoSuchMethodError => "java/lang/NoSuchMethodError",
            JavaKind::NoSuchFieldError => "java/lang/NoSuchFieldError",
            JavaKind::AbstractMethodError => "java/lang/AbstractMethodError",
            JavaKind::IllegalAccessError => "java/lang/IllegalAccessError",
            JavaKind::VerifyError => "java/lang/VerifyError",
            JavaKind::ExceptionInInitializerError => "java/lang/ExceptionInInitializerError",
            JavaKind::NoClassInitializerError => "java/lang/NoClassDefFoundError",
            JavaKind::NullPointerException => "java/lang/NullPointerException",
            JavaKind::ArrayIndexOutOfBoundsException => {
                "java/lang/ArrayIndexOutOfBoundsException"
            }
            JavaKind::ArrayStoreException => "java/lang/ArrayStoreException",
            JavaKind::ClassCastException => "java/lang/ClassCastException",
            JavaKind::NegativeArraySizeException => "java/lang/NegativeArraySizeException",
            JavaKind::ArithmeticException => "java/lang/ArithmeticException",
            JavaKind::IllegalMonitorStateException => "java/lang/IllegalMonitorStateException",
            JavaKind::InterruptedException => "java/lang/InterruptedException",
            JavaKind::OutOfMemoryError => "java/lang/OutOfMemoryError",
            JavaKind::StackOverflowError => "java/lang/StackOverflowError",
            JavaKind::InternalError => "java/lang/InternalError",
            JavaKind::UnknownError => "java/lang/UnknownError",
            JavaKind::RuntimeException => "java/lang/RuntimeException",
        }
    }

    /// True for kinds that are `java.lang.Error` subclasses. The initializer
    /// wraps anything else thrown from `<clinit>`.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            JavaKind::ClassNotFoundException
                | JavaKind::NullPointerException
                | JavaKind::ArrayIndexOutOfBoundsException
                | JavaKind::ArrayStoreException
                | JavaKind::ClassCastException
                | JavaKind::NegativeArraySizeException
                | JavaKind::ArithmeticException
                | JavaKind::IllegalMonitorStateException
                | JavaKind::InterruptedException
                | JavaKind::RuntimeException
        )
    }
}

/// A raised Java error or exception, carried through `Result` until a Java
/// frame re-enters and converts it to a throwable object.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.class_name())]
pub struct JavaError {
    pub kind: JavaKind,
    pub message: String,
}

impl JavaError {
    pub fn new(kind: JavaKind, message: impl Into<String>) -> JavaError {
        JavaError {
            kind,
            message: message.into(),
        }
    }
}

impl From<FormatError> for JavaError {
    fn from(err: FormatError) -> JavaError {
        JavaError::new(JavaKind::ClassFormatError, err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clinit_wrapping_distinguishes_errors() {
        assert!(JavaKind::OutOfMemoryError.is_error());
        assert!(JavaKind::NoClassDefFoundError.is_error());
        assert!(!JavaKind::RuntimeException.is_error());
        assert!(!JavaKind::InterruptedException.is_error());
    }

    #[test]
    fn display_uses_the_java_class_name() {
        let err = JavaError::new(JavaKind::NoSuchMethodError, "foo()V");
        assert_eq!(err.to_string(), "java/lang/NoSuchMethodError: foo()V");
    }
}
