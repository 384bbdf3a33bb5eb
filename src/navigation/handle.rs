use serde::{Deserialize, Serialize};

use super::error::{NavError, NavResult};

/// Generation-tagged index into a node container.
///
/// Containers bump their generation whenever their storage is replaced, so a
/// handle taken before an unload or rebuild fails [`Generation::check`] instead
/// of aliasing whatever now lives at the same index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub generation: u32,
    pub index: u32,
}

impl Handle {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Storage generation counter owned by a container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Generation(u32);

impl Generation {
    #[inline]
    pub fn current(self) -> u32 {
        self.0
    }

    /// Invalidate every handle issued so far.
    #[inline]
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    #[inline]
    pub fn handle(self, index: usize) -> Handle {
        Handle {
            generation: self.0,
            index: index as u32,
        }
    }

    #[inline]
    pub fn check(self, handle: Handle) -> NavResult<usize> {
        if handle.generation == self.0 {
            Ok(handle.index())
        } else {
            Err(NavError::StaleHandle {
                generation: handle.generation,
                current: self.0,
            })
        }
    }
}
