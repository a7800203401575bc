//! # member
//!
//! why: identify cluster members independently of their network address
//! relations: stored in membership entries, exposed state and follower maps
//! what: MemberId (uuid based) with its 16-byte wire format, MemberSet alias

use std::collections::BTreeSet;
use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MarshalError;
use crate::marshal::{self, Marshal};

/// Identity of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    /// A fresh random member id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form, the full uuid is noise in logs
        let id = self.0.simple().to_string();
        write!(f, "MemberId{{{}}}", &id[..8])
    }
}

impl Marshal for MemberId {
    fn marshal<B: BufMut>(&self, channel: &mut B) {
        channel.put_slice(self.0.as_bytes());
    }

    fn unmarshal<B: Buf>(channel: &mut B) -> Result<Self, MarshalError> {
        let bytes = marshal::get_array::<_, 16>(channel)?;
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

/// Set of members, ordered so the wire encoding is deterministic.
pub type MemberSet = BTreeSet<MemberId>;

pub(crate) fn marshal_members<B: BufMut>(members: &MemberSet, channel: &mut B) {
    channel.put_u32(members.len() as u32);
    for member in members {
        member.marshal(channel);
    }
}

pub(crate) fn unmarshal_members<B: Buf>(channel: &mut B) -> Result<MemberSet, MarshalError> {
    let count = marshal::get_u32(channel)?;
    let mut members = MemberSet::new();
    for _ in 0..count {
        members.insert(MemberId::unmarshal(channel)?);
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn member_id_survives_the_wire() {
        let member = MemberId::random();
        let mut bytes = member.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(MemberId::unmarshal(&mut bytes).unwrap(), member);
    }

    #[test]
    fn truncated_member_id_is_end_of_stream() {
        let member = MemberId::random();
        let encoded = member.to_bytes();

        for cut in 0..encoded.len() {
            let mut partial = encoded.slice(..cut);
            let err = MemberId::unmarshal(&mut partial).unwrap_err();
            assert!(matches!(err, MarshalError::EndOfStream { .. }), "cut at {cut}");
        }
    }

    #[test]
    fn truncated_member_set_is_end_of_stream() {
        let members: MemberSet = (0..3).map(|_| MemberId::random()).collect();
        let mut buf = BytesMut::new();
        marshal_members(&members, &mut buf);
        let encoded = buf.freeze();

        let mut partial = encoded.slice(..encoded.len() - 1);
        assert!(matches!(
            unmarshal_members(&mut partial),
            Err(MarshalError::EndOfStream { .. })
        ));

        let mut whole = encoded.clone();
        assert_eq!(unmarshal_members(&mut whole).unwrap(), members);
    }

    #[test]
    fn display_is_short() {
        let member = MemberId::from_uuid(Uuid::nil());
        assert_eq!(member.to_string(), "MemberId{00000000}");
    }
}
