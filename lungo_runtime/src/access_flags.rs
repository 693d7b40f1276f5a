use bitflags::bitflags;

bitflags! {
    /// Class access and property flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ClassAccessFlags: u16 {
        /// Declared public; may be accessed from outside its package.
        const PUBLIC = 0x0001;
        /// Declared final; no subclasses allowed.
        const FINAL = 0x0010;
        /// Treat superclass methods specially when invoked by the invokespecial instruction.
        const SUPER = 0x0020;
        /// Is an interface, not a class.
        const INTERFACE = 0x0200;
        /// Declared abstract; must not be instantiated.
        const ABSTRACT = 0x0400;
    }
}

bitflags! {
    /// Field access and property flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct FieldAccessFlags: u16 {
        /// Declared public; may be accessed from outside its package.
        const PUBLIC = 0x0001;
        /// Declared private; accessible only within the defining class.
        const PRIVATE = 0x0002;
        /// Declared protected; may be accessed within subclasses.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final; never directly assigned to after object construction.
        const FINAL = 0x0010;
        /// Declared volatile; cannot be cached.
        const VOLATILE = 0x0040;
    }
}

bitflags! {
    /// Method access and property flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct MethodAccessFlags: u16 {
        /// Declared public; may be accessed from outside its package.
        const PUBLIC = 0x0001;
        /// Declared private; accessible only within the defining class.
        const PRIVATE = 0x0002;
        /// Declared protected; may be accessed within subclasses.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final; must not be overridden.
        const FINAL = 0x0010;
        /// Declared synchronized; invocation is wrapped by a monitor use.
        const SYNCHRONIZED = 0x0020;
        /// Declared native; implemented outside the bytecode interpreter and
        /// dispatched through the native-call adapter.
        const NATIVE = 0x0100;
        /// Declared abstract; no implementation is provided.
        const ABSTRACT = 0x0400;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_flags() {
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        assert!(flags.contains(MethodAccessFlags::STATIC));
        assert!(!flags.contains(MethodAccessFlags::NATIVE));
        assert_eq!(0x0009, flags.bits());
    }

    #[test]
    fn test_field_flags() {
        let flags = FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        assert!(flags.contains(FieldAccessFlags::STATIC));
        assert_eq!(0x001a, flags.bits());
    }
}
