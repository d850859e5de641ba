//! Length-delimited `MsgPack` framing for packages on byte streams.
//!
//! Each frame is a 4-byte big-endian body length followed by the package
//! encoded with `rmp_serde::to_vec_named`. Decoding yields [`RawPackage`] so a
//! frame with an unknown type tag can still be answered; converting it into a
//! [`Package`] is where the type is checked.

use aocc_core::{Package, RawPackage};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::config::DEFAULT_MAX_FRAME_LENGTH;
use crate::error::FabricError;

const LENGTH_PREFIX: usize = 4;

/// `tokio_util` codec for package frames.
#[derive(Debug, Clone, Copy)]
pub struct PackageCodec {
    max_frame_length: usize,
}

impl PackageCodec {
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for PackageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl Decoder for PackageCodec {
    type Item = RawPackage;
    type Error = FabricError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_length {
            return Err(FabricError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }

        let frame_len = LENGTH_PREFIX + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let body = src.split_to(len);
        Ok(Some(RawPackage::from_msgpack(&body)?))
    }
}

impl Encoder<Package> for PackageCodec {
    type Error = FabricError;

    fn encode(&mut self, item: Package, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_msgpack()?;
        let too_large = || FabricError::FrameTooLarge {
            len: body.len(),
            max: self.max_frame_length,
        };
        if body.len() > self.max_frame_length {
            return Err(too_large());
        }
        let len = u32::try_from(body.len()).map_err(|_| too_large())?;

        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
