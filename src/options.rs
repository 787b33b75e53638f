use bitflags::bitflags;

use crate::constants;

bitflags! {
    /// Switches that narrow what the transformer touches.
    #[derive(Default)]
    pub struct TransformFlags: u32 {
        /// Leave `<init>` methods alone.
        const SKIP_CONSTRUCTORS = 0x0001;
        /// Leave synthetic and bridge methods alone.
        const SKIP_SYNTHETIC = 0x0002;
        /// Drop `LocalVariableTable` and `LocalVariableTypeTable` from rewritten methods.
        const DROP_DEBUG_TABLES = 0x0004;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    pub flags: TransformFlags,
    /// Classes older than this major version never get a `StackMapTable`.
    pub min_frame_version: u16,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            flags: TransformFlags::empty(),
            min_frame_version: constants::V1_6,
        }
    }
}

impl TransformOptions {
    pub fn with_flags(mut self, flags: TransformFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn emits_frames(&self, major_version: u16) -> bool {
        major_version >= self.min_frame_version
    }

    /// Whether a method with these flags is skipped outright.
    pub fn skips_method(&self, access_flags: u16, name: &str) -> bool {
        if self.flags.contains(TransformFlags::SKIP_CONSTRUCTORS)
            && name == constants::CONSTRUCTOR_NAME
        {
            return true;
        }
        self.flags.contains(TransformFlags::SKIP_SYNTHETIC)
            && access_flags & (constants::ACC_SYNTHETIC | constants::ACC_BRIDGE) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TransformOptions::default();
        assert!(options.flags.is_empty());
        assert!(options.emits_frames(50));
        assert!(!options.emits_frames(49));
    }

    #[test]
    fn test_skips_method() {
        let options = TransformOptions::default()
            .with_flags(TransformFlags::SKIP_CONSTRUCTORS | TransformFlags::SKIP_SYNTHETIC);
        assert!(options.skips_method(0x0001, "<init>"));
        assert!(options.skips_method(0x1001, "access$000"));
        assert!(options.skips_method(0x0041, "compareTo"));
        assert!(!options.skips_method(0x0001, "run"));
        assert!(!TransformOptions::default().skips_method(0x1001, "<init>"));
    }
}
