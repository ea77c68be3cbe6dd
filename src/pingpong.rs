// pingpong.rs — One logical field backed by two physical buffers.
//
// A relaxation sweep reads the current estimate and writes the next one;
// the two cannot alias. Instead of copying after every sweep, the roles
// flip: `swap()` toggles a selector and the old back buffer becomes the
// front. The same type wraps CPU `Field`s and GPU textures.

/// Front/back pair with a selector.
#[derive(Debug, Clone)]
pub struct PingPong<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        PingPong { buffers: [first, second], front: 0 }
    }

    /// The current estimate.
    #[inline]
    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    #[inline]
    pub fn front_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front]
    }

    /// The scratch buffer the next sweep writes into.
    #[inline]
    pub fn back(&self) -> &T {
        &self.buffers[self.front ^ 1]
    }

    #[inline]
    pub fn back_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front ^ 1]
    }

    /// Borrow `(front, back_mut)` at once, for a sweep that reads one and
    /// writes the other.
    pub fn split(&mut self) -> (&T, &mut T) {
        let [a, b] = &mut self.buffers;
        if self.front == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Flip roles. No data moves.
    #[inline]
    pub fn swap(&mut self) {
        self.front ^= 1;
    }

    /// Index (0 or 1) of the buffer currently acting as front.
    #[inline]
    pub fn front_index(&self) -> usize {
        self.front
    }

    /// Both buffers, in physical order.
    pub fn buffers(&self) -> &[T; 2] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [T; 2] {
        &mut self.buffers
    }
}
