use crate::cache::entry::LocalId;
use glam::{Quat, Vec3};
use objcache_files::ParserError;
use objcache_files::common::types::{C3Vector, C4Quaternion};
use objcache_files::update::types::ObjectUpdatePreamble;

/// The only part of an object update the cache understands.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpatialExtents {
    pub parent_id: LocalId,
    pub position: Vec3,
    /// Half extents
    pub scale: Vec3,
    pub rotation: Quat,
}

/// Pulls spatial extents and the parent id out of an otherwise opaque payload. The payload format belongs
/// to the network layer, which is why this is pluggable.
pub trait ExtentsDecoder {
    fn decode(&self, payload: &[u8]) -> Result<SpatialExtents, ParserError>;
}

/// Decoder for payloads that start with an [`ObjectUpdatePreamble`].
#[derive(Debug, Default, Copy, Clone)]
pub struct PackedUpdateDecoder;

impl ExtentsDecoder for PackedUpdateDecoder {
    fn decode(&self, payload: &[u8]) -> Result<SpatialExtents, ParserError> {
        let preamble = ObjectUpdatePreamble::parse_from(payload)?;
        let position = to_vec3(preamble.position);
        let scale = to_vec3(preamble.scale);
        if !position.is_finite() || !scale.is_finite() {
            return Err(ParserError::FormatError {
                reason: "Non finite position or scale",
            });
        }

        Ok(SpatialExtents {
            parent_id: preamble.parent_id,
            position,
            scale: scale.abs(),
            rotation: Quat::from_xyzw(
                preamble.rotation.x,
                preamble.rotation.y,
                preamble.rotation.z,
                preamble.rotation.w,
            ),
        })
    }
}

fn to_vec3(vector: C3Vector) -> Vec3 {
    Vec3::new(vector.x, vector.y, vector.z)
}

fn to_c3(vector: Vec3) -> C3Vector {
    C3Vector {
        x: vector.x,
        y: vector.y,
        z: vector.z,
    }
}

/// Builds a payload the [`PackedUpdateDecoder`] understands: the preamble followed by `body`.
pub fn pack_update(parent_id: LocalId, position: Vec3, scale: Vec3, body: &[u8]) -> Result<Vec<u8>, ParserError> {
    ObjectUpdatePreamble {
        parent_id,
        position: to_c3(position),
        scale: to_c3(scale),
        rotation: C4Quaternion::default(),
    }
    .pack(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_payload_decodes() -> anyhow::Result<()> {
        let payload = pack_update(3, Vec3::new(1.0, 2.0, 3.0), Vec3::new(-0.5, 0.5, 0.5), b"opaque")?;
        let extents = PackedUpdateDecoder.decode(&payload)?;

        assert_eq!(extents.parent_id, 3);
        assert_eq!(extents.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(extents.scale, Vec3::splat(0.5));
        assert_eq!(extents.rotation, Quat::IDENTITY);
        assert!(payload.ends_with(b"opaque"));
        Ok(())
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(PackedUpdateDecoder.decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn nan_is_rejected() -> anyhow::Result<()> {
        let payload = pack_update(0, Vec3::new(f32::NAN, 0.0, 0.0), Vec3::ONE, &[])?;
        assert!(PackedUpdateDecoder.decode(&payload).is_err());
        Ok(())
    }
}
