pub mod interner {
    use std::fmt::{Debug, Display};

    /// An interned name. Every member, object, and interface label in the
    /// compiler is one of these, so comparisons and hashing are just integer ops.
    #[derive(Copy, Clone, Hash, Eq, PartialEq)]
    pub struct IStr {
        internal: usize,
    }

    unsafe impl lasso::Key for IStr {
        fn into_usize(self) -> usize {
            self.internal
        }

        fn try_from_usize(int: usize) -> Option<Self> {
            Some(IStr { internal: int })
        }
    }

    impl Display for IStr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.resolve())
        }
    }

    impl Debug for IStr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "S('{}')", self.resolve())
        }
    }

    lazy_static::lazy_static! {
        static ref INTERNER: lasso::ThreadedRodeo<IStr> = lasso::ThreadedRodeo::new();
    }

    fn rodeo() -> &'static lasso::ThreadedRodeo<IStr> {
        &INTERNER
    }

    pub fn intern(v: &str) -> IStr {
        rodeo().get_or_intern(v)
    }

    pub trait SpurHelper {
        fn resolve(&self) -> &'static str;
        fn try_resolve(&self) -> Option<&'static str>;
    }

    impl SpurHelper for IStr {
        fn resolve(&self) -> &'static str {
            rodeo().resolve(self)
        }

        fn try_resolve(&self) -> Option<&'static str> {
            rodeo().try_resolve(self)
        }
    }

    pub trait Internable {
        fn intern(&self) -> IStr;
    }

    impl Internable for str {
        fn intern(&self) -> IStr {
            intern(self)
        }
    }

    impl Internable for String {
        fn intern(&self) -> IStr {
            intern(self.as_str())
        }
    }

    impl From<&str> for IStr {
        fn from(v: &str) -> Self {
            intern(v)
        }
    }

    impl From<String> for IStr {
        fn from(v: String) -> Self {
            intern(v.as_str())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn interning_is_stable_across_threads() {
            let here = "quack".intern();
            let there = std::thread::spawn(|| "quack".intern()).join().unwrap();

            assert_eq!(here, there);
            assert_eq!(there.resolve(), "quack");
            assert_ne!(here, "QUACK".intern());
        }
    }
}

/// Indentation prefix used by the pretty printers for layouts and tables.
pub fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}
