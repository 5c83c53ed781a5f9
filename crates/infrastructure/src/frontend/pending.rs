//! Pending queries: client requests whose answer is still owed.
//!
//! The table correlates resolver answer chunks back to client sessions by
//! a random 64-bit id. Lookup by id is the only hot path, so a hash map
//! replaces any ordered structure; iteration stays available for
//! diagnostics.

use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use unwind_dns_domain::{EdnsInfo, FrontendError, QueryHeader, QuestionInfo, Transport};

/// Which listening socket a datagram arrived on; the answer leaves
/// through the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpSock {
    V4,
    V6,
}

/// Transport-specific owner of the client session. The TCP variant holds
/// only the reply channel into the connection task; dropping it releases
/// the connection.
#[derive(Debug)]
pub enum QueryOrigin {
    Udp {
        sock: UdpSock,
    },
    Tcp {
        conn: u64,
        reply: oneshot::Sender<Vec<u8>>,
    },
}

impl QueryOrigin {
    pub fn transport(&self) -> Transport {
        match self {
            QueryOrigin::Udp { .. } => Transport::Udp,
            QueryOrigin::Tcp { .. } => Transport::Tcp,
        }
    }
}

/// Answer reassembly buffer. The first resolver chunk fixes the capacity;
/// later chunks append and may never overflow it.
#[derive(Debug, Default)]
pub struct AnswerBuffer {
    data: Vec<u8>,
    capacity: Option<usize>,
}

impl AnswerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), FrontendError> {
        if self.capacity.is_some() {
            return Err(FrontendError::AnswerCapacityFixed);
        }
        self.capacity = Some(capacity);
        self.data.reserve_exact(capacity);
        Ok(())
    }

    pub fn write(&mut self, chunk: &[u8]) -> Result<(), FrontendError> {
        let capacity = self.capacity.unwrap_or(0);
        if self.data.len() + chunk.len() > capacity {
            return Err(FrontendError::AnswerOverflow {
                position: self.data.len(),
                chunk: chunk.len(),
                capacity,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.data.len() == capacity,
            None => false,
        }
    }

    pub fn take(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug)]
pub struct PendingQuery {
    pub imsg_id: u64,
    pub from: SocketAddr,
    pub origin: QueryOrigin,
    pub qbuf: Vec<u8>,
    pub abuf: AnswerBuffer,
    pub qinfo: QuestionInfo,
    pub header: QueryHeader,
    pub edns: EdnsInfo,
    pub question_end: usize,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    map: FxHashMap<u64, PendingQuery>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws a fresh correlation id from OS entropy, retrying on the
    /// (astronomically unlikely) collision with a live query.
    pub fn new_id(&self) -> u64 {
        loop {
            let mut bytes = [0u8; 8];
            getrandom::fill(&mut bytes).expect("entropy source failed");
            let id = u64::from_ne_bytes(bytes);
            if !self.map.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn insert(&mut self, pq: PendingQuery) {
        debug_assert!(!self.map.contains_key(&pq.imsg_id));
        self.map.insert(pq.imsg_id, pq);
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut PendingQuery> {
        self.map.get_mut(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingQuery> {
        self.map.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingQuery> {
        self.map.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_query(id: u64) -> PendingQuery {
        PendingQuery {
            imsg_id: id,
            from: "127.0.0.1:5300".parse().unwrap(),
            origin: QueryOrigin::Udp { sock: UdpSock::V4 },
            qbuf: Vec::new(),
            abuf: AnswerBuffer::new(),
            qinfo: QuestionInfo {
                qname_wire: Vec::new(),
                qname: "example.com.".into(),
                qtype: 1,
                qclass: 1,
            },
            header: QueryHeader::default(),
            edns: EdnsInfo::default(),
            question_end: 0,
        }
    }

    #[test]
    fn ids_are_unique_and_looked_up() {
        let mut table = PendingTable::new();
        let mut ids = Vec::new();
        for _ in 0..64 {
            let id = table.new_id();
            table.insert(dummy_query(id));
            ids.push(id);
        }
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
        for id in ids {
            assert_eq!(table.get_mut(id).unwrap().imsg_id, id);
        }
        assert_eq!(table.len(), 64);
    }

    #[test]
    fn remove_releases_entry() {
        let mut table = PendingTable::new();
        let id = table.new_id();
        table.insert(dummy_query(id));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn answer_buffer_capacity_fixed_once() {
        let mut abuf = AnswerBuffer::new();
        abuf.set_capacity(4).unwrap();
        assert!(abuf.set_capacity(8).is_err());
    }

    #[test]
    fn answer_buffer_appends_until_complete() {
        let mut abuf = AnswerBuffer::new();
        abuf.set_capacity(4).unwrap();
        abuf.write(b"ab").unwrap();
        assert!(!abuf.is_complete());
        assert_eq!(abuf.position(), 2);
        abuf.write(b"cd").unwrap();
        assert!(abuf.is_complete());
        assert_eq!(abuf.take(), b"abcd");
    }

    #[test]
    fn answer_buffer_rejects_overflow() {
        let mut abuf = AnswerBuffer::new();
        abuf.set_capacity(4).unwrap();
        abuf.write(b"abc").unwrap();
        assert!(abuf.write(b"de").is_err());
        // Failed writes leave the buffer untouched.
        assert_eq!(abuf.position(), 3);
    }

    #[test]
    fn answer_buffer_rejects_write_before_capacity() {
        let mut abuf = AnswerBuffer::new();
        assert!(abuf.write(b"x").is_err());
    }
}
