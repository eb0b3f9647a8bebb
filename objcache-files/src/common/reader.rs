use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ParserError;
use crate::common::types::{C3Vector, C4Quaternion, CacheId};

pub trait Parseable<T> {
    fn parse<R: Read>(rdr: &mut R) -> Result<T, ParserError>;
}

impl Parseable<C3Vector> for C3Vector {
    fn parse<R: Read>(rdr: &mut R) -> Result<C3Vector, ParserError> {
        Ok(C3Vector {
            x: rdr.read_f32::<LittleEndian>()?,
            y: rdr.read_f32::<LittleEndian>()?,
            z: rdr.read_f32::<LittleEndian>()?,
        })
    }
}

impl Parseable<C4Quaternion> for C4Quaternion {
    fn parse<R: Read>(rdr: &mut R) -> Result<C4Quaternion, ParserError> {
        Ok(C4Quaternion {
            x: rdr.read_f32::<LittleEndian>()?,
            y: rdr.read_f32::<LittleEndian>()?,
            z: rdr.read_f32::<LittleEndian>()?,
            w: rdr.read_f32::<LittleEndian>()?,
        })
    }
}

impl Parseable<CacheId> for CacheId {
    fn parse<R: Read>(rdr: &mut R) -> Result<CacheId, ParserError> {
        let mut bytes = [0u8; 16];
        rdr.read_exact(&mut bytes)?;
        Ok(CacheId(bytes))
    }
}

impl Parseable<u8> for u8 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u8, ParserError> {
        Ok(rdr.read_u8()?)
    }
}

impl Parseable<u16> for u16 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u16, ParserError> {
        Ok(rdr.read_u16::<LittleEndian>()?)
    }
}

impl Parseable<u32> for u32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u32, ParserError> {
        Ok(rdr.read_u32::<LittleEndian>()?)
    }
}

impl Parseable<f32> for f32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<f32, ParserError> {
        Ok(rdr.read_f32::<LittleEndian>()?)
    }
}

impl Parseable<u64> for u64 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u64, ParserError> {
        Ok(rdr.read_u64::<LittleEndian>()?)
    }
}

/// Reads a length-prefixed (u32) opaque blob, refusing anything larger than `max_len`.
pub fn read_blob<R: Read>(rdr: &mut R, max_len: u32) -> Result<Vec<u8>, ParserError> {
    let len = rdr.read_u32::<LittleEndian>()?;
    if len > max_len {
        return Err(ParserError::FormatError {
            reason: "Blob length exceeds the allowed maximum",
        });
    }
    let mut data = vec![0; len as usize];
    rdr.read_exact(&mut data)?;
    Ok(data)
}

/// Parses `T` until the reader is exhausted. Running into EOF exactly on an element boundary is the
/// regular way to stop, any other error is propagated.
pub fn read_chunk_array<T: Parseable<T>, R: Read>(rdr: &mut R) -> Result<Vec<T>, ParserError> {
    let mut list = Vec::<T>::new();
    let mut element = T::parse(rdr);
    while element.is_ok() {
        list.push(element?);
        element = T::parse(rdr);
    }

    // weird error handling because when EoF, we get that inside a parser error.
    match element {
        Err(err) if err.is_eof() => (),
        err => return err.map(|_| Vec::with_capacity(0)),
    };
    Ok(list)
}
