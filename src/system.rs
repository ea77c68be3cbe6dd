// system.rs — The level-0 linear system and the trait that produces it.
//
// The solver does not know what the coefficients mean. A `SystemAssembler`
// turns (source, target, mask, offset) into the five level-0 fields; the
// solver consumes them through `GridHierarchy::build`. `SeamlessCloneAssembler`
// in assembler.rs is the reference implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::Field;

/// Placement of the source patch inside the target, in target pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub dx: i32,
    pub dy: i32,
}

impl Offset {
    pub const fn new(dx: i32, dy: i32) -> Self {
        Offset { dx, dy }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:+}, {:+})", self.dx, self.dy)
    }
}

/// Level-0 fields handed to the hierarchy. All five share one size.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub a1: Field,
    pub a2: Field,
    pub a3: Field,
    pub b: Field,
    /// Initial guess. Inactive pixels carry the fixed boundary values.
    pub x0: Field,
}

impl LinearSystem {
    pub fn dims(&self) -> (usize, usize) {
        self.b.dims()
    }

    /// Check that all five fields have the same dimensions.
    ///
    /// # Panics
    /// On any mismatch, naming the offending field.
    pub fn assert_consistent(&self) {
        let dims = self.dims();
        for (name, f) in [("a1", &self.a1), ("a2", &self.a2), ("a3", &self.a3), ("x0", &self.x0)] {
            assert_eq!(f.dims(), dims, "{name} is {:?} but b is {:?}", f.dims(), dims);
        }
    }
}

/// Produces the level-0 system for a given patch placement.
pub trait SystemAssembler {
    /// Resolution of the system (the source patch size).
    fn dimensions(&self) -> (usize, usize);

    fn assemble(&self, offset: Offset) -> LinearSystem;
}

/// A precomputed system ignores the offset.
impl SystemAssembler for LinearSystem {
    fn dimensions(&self) -> (usize, usize) {
        self.dims()
    }

    fn assemble(&self, _offset: Offset) -> LinearSystem {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_display() {
        assert_eq!(Offset::new(3, -2).to_string(), "(+3, -2)");
    }

    #[test]
    #[should_panic(expected = "x0 is")]
    fn test_inconsistent_system_panics() {
        let f = Field::new(2, 2);
        let sys = LinearSystem {
            a1: f.clone(),
            a2: f.clone(),
            a3: f.clone(),
            b: f,
            x0: Field::new(3, 2),
        };
        sys.assert_consistent();
    }
}
