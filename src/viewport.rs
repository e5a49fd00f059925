//! Integer pixel rectangles.

/// A pixel rectangle with its origin at the bottom-left of the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole `width` x `height` target.
    pub const fn full(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn top(&self) -> i32 {
        self.y + self.height
    }

    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}
