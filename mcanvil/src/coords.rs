/// Generic 2D point in the horizontal (X, Z) plane, intended for use with
/// numeric types.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::SubAssign,
)]
#[display(bounds(T: std::fmt::Display))]
#[display("<x={x} z={z}>")]
pub struct PointXZ<T: Copy> {
    pub x: T,
    pub z: T,
}

impl<T: Copy> PointXZ<T> {
    pub const fn new(x: T, z: T) -> Self {
        Self { x, z }
    }
}

impl<T: Copy + Ord> Ord for PointXZ<T> {
    /// Right-to-left ordering, i.e. (Z, X), matching the on-disk order of
    /// region offset tables.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.z, self.x).cmp(&(other.z, other.x))
    }
}

impl<T: Copy + Ord> PartialOrd for PointXZ<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Generic 3D point in (X, Z, Y) order, matching the right-to-left ordering
/// of block data within a chunk.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::Sub,
    derive_more::SubAssign,
)]
#[display(bounds(T: std::fmt::Display))]
#[display("<x={x} z={z} y={y}>")]
pub struct PointXZY<T: Copy> {
    pub x: T,
    pub z: T,
    pub y: T,
}

impl<T: Copy> PointXZY<T> {
    pub const fn new(x: T, z: T, y: T) -> Self {
        Self { x, z, y }
    }
}

impl<T: Copy + Ord> Ord for PointXZY<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.y, self.z, self.x).cmp(&(other.y, other.z, other.x))
    }
}

impl<T: Copy + Ord> PartialOrd for PointXZY<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub type CoordsXZ = PointXZ<i32>;
pub type CoordsXZY = PointXZY<i32>;
pub type IndexXZ = PointXZ<u32>;
pub type IndexXZY = PointXZY<u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointxz() {
        let a = PointXZ::new(1, 2);
        assert_eq!(format!("{}", a), "<x=1 z=2>");
        assert_eq!(PointXZ::from((1, 2)), a);
        assert_eq!(<(i32, i32)>::from(a), (1, 2));
        assert_eq!(a + PointXZ::new(1, 1), PointXZ::new(2, 3));
    }

    #[test]
    fn test_pointxz_ordering() {
        // Z is the most significant axis
        assert!(PointXZ::new(5, 1) < PointXZ::new(0, 2));
        assert!(PointXZ::new(1, 3) < PointXZ::new(2, 3));
    }

    #[test]
    fn test_pointxzy() {
        let a = PointXZY::new(1, 2, 3);
        assert_eq!(format!("{}", a), "<x=1 z=2 y=3>");
        assert_eq!(PointXZY::from((1, 2, 3)), a);
        assert_eq!(<(i32, i32, i32)>::from(a), (1, 2, 3));
        // Y is the most significant axis
        assert!(PointXZY::new(9, 9, 0) < PointXZY::new(0, 0, 1));
    }
}
