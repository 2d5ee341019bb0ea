use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Which of the two loops a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKind {
    Fast,
    Graphics,
}

impl LoopKind {
    pub fn label(self) -> &'static str {
        match self {
            LoopKind::Fast => "fast",
            LoopKind::Graphics => "graphics",
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Marker for the device-polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fast {}

/// Marker for the display-paced loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Graphics {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Fast {}
    impl Sealed for super::Graphics {}
}

/// Type-level loop identity. Only [`Fast`] and [`Graphics`] implement it.
pub trait LoopRole: sealed::Sealed + Send + Sync + 'static {
    const KIND: LoopKind;
}

impl LoopRole for Fast {
    const KIND: LoopKind = LoopKind::Fast;
}

impl LoopRole for Graphics {
    const KIND: LoopKind = LoopKind::Graphics;
}

/// Write capability for fields owned by loop `L`.
///
/// A token is minted once by the thread that runs loop `L` and cannot be sent
/// to another thread, so shared fields keyed by `L` have exactly one writer.
/// Safe code cannot mint one:
///
/// ```compile_fail
/// use cogloop_core::{Graphics, LoopToken};
///
/// let token = LoopToken::<Graphics>::mint();
/// ```
pub struct LoopToken<L: LoopRole> {
    _role: PhantomData<L>,
    _not_send: PhantomData<*const ()>,
}

impl<L: LoopRole> LoopToken<L> {
    /// Only the loop runner calls this, once per loop thread.
    ///
    /// # Safety
    ///
    /// The caller must be the only thread that writes fields owned by `L`
    /// for as long as any token of this role is alive.
    #[cfg(any(test, feature = "runner"))]
    #[doc(hidden)]
    pub unsafe fn mint() -> Self {
        Self {
            _role: PhantomData,
            _not_send: PhantomData,
        }
    }

    pub fn kind(&self) -> LoopKind {
        L::KIND
    }
}

impl<L: LoopRole> fmt::Debug for LoopToken<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopToken<{}>", L::KIND)
    }
}
