//! # marshal
//!
//! why: one binary channel format for everything that is persisted or shipped
//! relations: implemented by member.rs and membership/state.rs, used by raft-storage
//! what: Marshal trait and bounds-checked readers that report end of stream

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MarshalError;

/// Binary encoding to and from a byte channel.
///
/// `unmarshal` must fail with [`MarshalError::EndOfStream`] when the channel
/// ends in the middle of a record.
pub trait Marshal: Sized {
    fn marshal<B: BufMut>(&self, channel: &mut B);

    fn unmarshal<B: Buf>(channel: &mut B) -> Result<Self, MarshalError>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.marshal(&mut buf);
        buf.freeze()
    }
}

fn ensure<B: Buf>(channel: &B, needed: usize) -> Result<(), MarshalError> {
    let remaining = channel.remaining();
    if remaining < needed {
        return Err(MarshalError::EndOfStream { needed, remaining });
    }
    Ok(())
}

pub(crate) fn get_u8<B: Buf>(channel: &mut B) -> Result<u8, MarshalError> {
    ensure(channel, 1)?;
    Ok(channel.get_u8())
}

pub(crate) fn get_u32<B: Buf>(channel: &mut B) -> Result<u32, MarshalError> {
    ensure(channel, 4)?;
    Ok(channel.get_u32())
}

pub(crate) fn get_u64<B: Buf>(channel: &mut B) -> Result<u64, MarshalError> {
    ensure(channel, 8)?;
    Ok(channel.get_u64())
}

pub(crate) fn get_array<B: Buf, const N: usize>(channel: &mut B) -> Result<[u8; N], MarshalError> {
    ensure(channel, N)?;
    let mut out = [0u8; N];
    channel.copy_to_slice(&mut out);
    Ok(out)
}

/// Read a presence flag written as a single byte.
pub(crate) fn get_flag<B: Buf>(channel: &mut B) -> Result<bool, MarshalError> {
    match get_u8(channel)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(MarshalError::Invalid {
            reason: format!("bad presence flag {other}"),
        }),
    }
}
