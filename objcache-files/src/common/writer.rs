use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::ParserError;
use crate::common::types::{C3Vector, C4Quaternion, CacheId};

pub trait Emittable {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError>;
}

impl Emittable for C3Vector {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        wtr.write_f32::<LittleEndian>(self.x)?;
        wtr.write_f32::<LittleEndian>(self.y)?;
        wtr.write_f32::<LittleEndian>(self.z)?;
        Ok(())
    }
}

impl Emittable for C4Quaternion {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        wtr.write_f32::<LittleEndian>(self.x)?;
        wtr.write_f32::<LittleEndian>(self.y)?;
        wtr.write_f32::<LittleEndian>(self.z)?;
        wtr.write_f32::<LittleEndian>(self.w)?;
        Ok(())
    }
}

impl Emittable for CacheId {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_all(&self.0)?)
    }
}

impl Emittable for u8 {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_u8(*self)?)
    }
}

impl Emittable for u16 {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_u16::<LittleEndian>(*self)?)
    }
}

impl Emittable for u32 {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_u32::<LittleEndian>(*self)?)
    }
}

impl Emittable for f32 {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_f32::<LittleEndian>(*self)?)
    }
}

impl Emittable for u64 {
    fn emit<W: Write>(&self, wtr: &mut W) -> Result<(), ParserError> {
        Ok(wtr.write_u64::<LittleEndian>(*self)?)
    }
}

pub fn write_blob<W: Write>(wtr: &mut W, data: &[u8]) -> Result<(), ParserError> {
    let len = u32::try_from(data.len()).map_err(|_| ParserError::FormatError {
        reason: "Blob does not fit a u32 length prefix",
    })?;
    wtr.write_u32::<LittleEndian>(len)?;
    wtr.write_all(data)?;
    Ok(())
}
