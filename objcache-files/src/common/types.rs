use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct C3Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct C4Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for C4Quaternion {
    fn default() -> Self {
        C4Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// The 16 byte cache identifier the server hands out in the region handshake.
/// A file written under a different id belongs to a previous incarnation of the region.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheId(pub [u8; 16]);

impl CacheId {
    pub const NULL: CacheId = CacheId([0; 16]);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl From<u128> for CacheId {
    fn from(value: u128) -> Self {
        CacheId(value.to_be_bytes())
    }
}

impl Display for CacheId {
    // 8-4-4-4-12, like every other uuid in the logs
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                write!(f, "-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
