//! # consensus-storage
//!
//! why: make the membership state survive restarts without replaying the whole log
//! relations: stores consensus-core's RaftMembershipState, feeds its recovery index
//! what: StateStorage trait, FileStorage implementation, InMemoryStorage for testing

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use consensus_core::{
    Clock, Marshal, MarshalError, RaftConfig, RaftMembershipManager, RaftMembershipState,
    ReadableRaftLog,
};

/// trait for durable storage of the membership state
///
/// each snapshot is stored together with the log index it reflects, so
/// recovery only has to replay the log after that index
pub trait StateStorage {
    /// persist `state` as of `applied_index`, replacing any earlier snapshot
    fn save(&mut self, applied_index: u64, state: &RaftMembershipState) -> io::Result<()>;

    /// load the last persisted snapshot, if any
    fn load(&self) -> io::Result<Option<(u64, RaftMembershipState)>>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> io::Result<()>;
}

/// encode a snapshot as `applied_index | state`
fn encode(applied_index: u64, state: &RaftMembershipState) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u64(applied_index);
    state.marshal(&mut buf);
    buf
}

fn decode(mut data: &[u8]) -> io::Result<(u64, RaftMembershipState)> {
    if data.remaining() < 8 {
        return Err(marshal_error(MarshalError::EndOfStream {
            needed: 8,
            remaining: data.remaining(),
        }));
    }
    let applied_index = data.get_u64();
    let state = RaftMembershipState::unmarshal(&mut data).map_err(marshal_error)?;
    if data.has_remaining() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} trailing bytes after membership state", data.remaining()),
        ));
    }
    Ok((applied_index, state))
}

/// truncated snapshots read as unexpected eof, anything else as invalid data
fn marshal_error(e: MarshalError) -> io::Error {
    match e {
        MarshalError::EndOfStream { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        MarshalError::Invalid { .. } => io::Error::new(io::ErrorKind::InvalidData, e),
    }
}

// -- file storage implementation --

/// file-based storage implementation using std::fs
///
/// stores the snapshot in a directory as `membership.state`
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// get the path to the state file
    fn state_path(&self) -> PathBuf {
        self.dir.join("membership.state")
    }
}

impl StateStorage for FileStorage {
    fn save(&mut self, applied_index: u64, state: &RaftMembershipState) -> io::Result<()> {
        let data = encode(applied_index, state);

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join("membership.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.state_path())?;

        tracing::debug!(applied_index, ordinal = state.get_ordinal(), "persisted membership state");
        Ok(())
    }

    fn load(&self) -> io::Result<Option<(u64, RaftMembershipState)>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None); // nothing persisted yet
        }

        let mut file = File::open(&path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        decode(&contents).map(Some)
    }

    fn clear(&mut self) -> io::Result<()> {
        let _ = fs::remove_file(self.state_path());
        Ok(())
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// keeps the encoded snapshot, so it exercises the same format as the file
#[derive(Default)]
pub struct InMemoryStorage {
    data: Option<Vec<u8>>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for InMemoryStorage {
    fn save(&mut self, applied_index: u64, state: &RaftMembershipState) -> io::Result<()> {
        self.data = Some(encode(applied_index, state).to_vec());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<(u64, RaftMembershipState)>> {
        self.data.as_deref().map(decode).transpose()
    }

    fn clear(&mut self) -> io::Result<()> {
        self.data = None;
        Ok(())
    }
}

// -- recovery --

/// rebuild a membership manager from the persisted snapshot plus the log
///
/// replay starts right after the snapshot's applied index; without a
/// snapshot the whole retained log is replayed
pub fn recover_membership(
    storage: &dyn StateStorage,
    entry_log: Arc<dyn ReadableRaftLog>,
    clock: Arc<dyn Clock>,
    config: RaftConfig,
) -> io::Result<RaftMembershipManager> {
    let (recover_from, state) = match storage.load()? {
        Some((applied_index, state)) => (applied_index + 1, state),
        None => (0, RaftMembershipState::new()),
    };

    let mut manager = RaftMembershipManager::with_state(entry_log, clock, config, state);
    manager.set_recover_from_index_supplier(move || recover_from);
    manager
        .start()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(manager)
}
