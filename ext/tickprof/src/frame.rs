/// Bytecode index recorded for frames resolved through a code cache.
pub const BCI_NATIVE_FRAME: i32 = -10;

// Symbol tags; 0 is left for "no symbol"
const METHOD_TAG: u8 = 1;
const NAMED_TAG: u8 = 2;

/// Opaque handle into the managed runtime's method table (e.g. a `jmethodID`).
/// Every value, 0 and tagged pointers included, is a valid handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u64);

/// Index into the interned name table held by [`crate::Symbols`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameId(pub u32);

/// What a code range or a frame resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A managed method, named at report time by the runtime.
    Method(MethodId),
    /// A native function or a generated stub, named through the name table.
    Named(NameId),
}

impl Symbol {
    // (tag, payload) with a non-zero tag, for storage in plain atomics
    pub(crate) fn encode(self) -> (u8, u64) {
        match self {
            Symbol::Method(MethodId(id)) => (METHOD_TAG, id),
            Symbol::Named(NameId(index)) => (NAMED_TAG, u64::from(index)),
        }
    }

    pub(crate) fn decode(tag: u8, payload: u64) -> Option<Symbol> {
        match tag {
            METHOD_TAG => Some(Symbol::Method(MethodId(payload))),
            NAMED_TAG => u32::try_from(payload).ok().map(|index| Symbol::Named(NameId(index))),
            _ => None,
        }
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Symbol::Method(MethodId::default())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    pub symbol: Symbol,
    /// Bytecode index or line, as reported by the runtime.
    /// [`BCI_NATIVE_FRAME`] for frames resolved through a code cache.
    pub bci: i32,
}

impl Frame {
    pub fn managed(method: MethodId, bci: i32) -> Self {
        Self {
            symbol: Symbol::Method(method),
            bci,
        }
    }

    pub fn native(symbol: Symbol) -> Self {
        Self {
            symbol,
            bci: BCI_NATIVE_FRAME,
        }
    }

    pub fn is_native(&self) -> bool {
        self.bci == BCI_NATIVE_FRAME
    }
}

/// An (offset, length) reference into the shared [`crate::FrameBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRange {
    pub offset: u32,
    pub len: u32,
}
