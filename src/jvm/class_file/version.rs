use std::fmt;

/// Class file version
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1-200-B.2
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major_version: u16,
    pub minor_version: u16,
}

impl Version {
    pub const JAVA6: Version = Version::new(50);
    pub const JAVA7: Version = Version::new(51);
    pub const JAVA8: Version = Version::new(52);

    pub const fn new(major_version: u16) -> Version {
        Version {
            major_version,
            minor_version: 0,
        }
    }

    /// Starting with Java 7, methods must carry `StackMapTable` frames that pass the type-checking
    /// verifier, so frames are recomputed for methods that get rewritten
    pub fn requires_frames(&self) -> bool {
        *self >= Version::JAVA7
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}
