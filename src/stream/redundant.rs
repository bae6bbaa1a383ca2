//! Redundant edit log backend
//!
//! Merges several replicas believed to hold the same transaction range.
//! Reads come from one replica at a time, healthiest first. When the current
//! replica fails, the next one is positioned on the last transaction already
//! delivered. If it holds that transaction too, the two checksums must
//! match: replicas that agree on ids but not on contents mean undetected
//! storage corruption, and that is fatal rather than a reason to fail over
//! again.

use std::cmp::Reverse;
use std::io;

use crate::config::StreamConfig;
use crate::observability::{Event, Logger};
use crate::op::EditLogOp;

use super::backend::{JournalType, StreamBackend};
use super::errors::{StreamError, StreamResult};
use super::input::DynEditLogInputStream;

/// Backend that fails over between replica streams.
pub struct RedundantBackend {
    name: String,
    replicas: Vec<DynEditLogInputStream>,
    current: usize,
    last_txid_read: Option<u64>,
    last_checksum: Option<u32>,
    verify_checksums: bool,
    last_error: Option<StreamError>,
}

impl RedundantBackend {
    /// Merges `replicas`. Finalized replicas are preferred over in-progress
    /// ones, then replicas reaching further.
    pub fn new(mut replicas: Vec<DynEditLogInputStream>, config: &StreamConfig) -> StreamResult<Self> {
        if replicas.is_empty() {
            return Err(StreamError::io(
                "Redundant stream needs at least one replica",
                io::Error::new(io::ErrorKind::InvalidInput, "no replicas"),
            ));
        }

        replicas.sort_by_key(|r| (r.is_in_progress(), Reverse(r.last_txid())));

        let names: Vec<&str> = replicas.iter().map(|r| r.name()).collect();
        let name = format!("redundant[{}]", names.join(","));

        Ok(Self {
            name,
            replicas,
            current: 0,
            last_txid_read: None,
            last_checksum: None,
            verify_checksums: config.verify_replica_checksums,
            last_error: None,
        })
    }

    /// Name of the replica currently serving reads, if any is left.
    pub fn current_replica(&self) -> Option<&str> {
        self.replicas.get(self.current).map(|r| r.name())
    }

    fn current_mut(&mut self) -> StreamResult<&mut DynEditLogInputStream> {
        let name = &self.name;
        self.replicas.get_mut(self.current).ok_or_else(|| {
            StreamError::io(
                format!("All replicas of {} have failed", name),
                io::Error::new(io::ErrorKind::Other, "no healthy replica"),
            )
        })
    }

    fn exhausted_error(&mut self) -> StreamError {
        Logger::error(Event::ReplicasExhausted, &[("stream", &self.name)]);
        match self.last_error.take() {
            Some(e) => e,
            None => StreamError::io(
                format!("All replicas of {} have failed", self.name),
                io::Error::new(io::ErrorKind::Other, "no healthy replica"),
            ),
        }
    }

    /// Move to the next replica able to continue after `last_txid_read`.
    fn fail_over(&mut self, cause: StreamError) -> StreamResult<()> {
        let from = self.current_replica().unwrap_or("").to_string();
        let message = cause.to_string();
        self.last_error = Some(cause);

        loop {
            self.current += 1;
            if self.current >= self.replicas.len() {
                return Err(self.exhausted_error());
            }

            let to = self.replicas[self.current].name().to_string();
            Logger::warn(
                Event::ReplicaFailover,
                &[
                    ("stream", &self.name),
                    ("from", &from),
                    ("to", &to),
                    ("error", &message),
                ],
            );

            match self.align_current() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.last_error = Some(e),
            }
        }
    }

    /// Position the current replica right after the last delivered txid,
    /// cross-checking that txid when the replica holds it.
    fn align_current(&mut self) -> StreamResult<()> {
        let last = match self.last_txid_read {
            Some(last) => last,
            None => return Ok(()),
        };
        let expected_checksum = self.last_checksum;
        let verify = self.verify_checksums;
        let replica = &mut self.replicas[self.current];

        if !replica.skip_until(last)? {
            return Err(StreamError::decode(format!(
                "Replica {} ends before txid {}",
                replica.name(),
                last
            )));
        }

        let next_txid = match replica.peek_op()?.map(EditLogOp::txid) {
            Some(txid) => txid,
            None => {
                return Err(StreamError::decode(format!(
                    "Replica {} ends before txid {}",
                    replica.name(),
                    last
                )))
            }
        };

        if next_txid == last {
            let duplicate = replica.read_op()?;
            if let (true, Some(expected), Some(op)) = (verify, expected_checksum, duplicate) {
                if op.checksum() != expected {
                    let err = StreamError::replica_divergence(last, expected, op.checksum(), replica.name());
                    Logger::fatal(
                        Event::ReplicaDivergence,
                        &[
                            ("stream", &self.name),
                            ("txid", &last.to_string()),
                            ("expected_checksum", &format!("{:08x}", expected)),
                            ("actual_checksum", &format!("{:08x}", op.checksum())),
                        ],
                    );
                    return Err(err);
                }
            }
            Ok(())
        } else if next_txid == last + 1 {
            Ok(())
        } else {
            Err(StreamError::decode(format!(
                "Replica {} has a gap: expected txid {}, found {}",
                replica.name(),
                last + 1,
                next_txid
            )))
        }
    }
}

impl StreamBackend for RedundantBackend {
    /// Replicas open lazily on their first read.
    fn open(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn next_op(&mut self) -> StreamResult<Option<EditLogOp>> {
        loop {
            let result = match self.replicas.get_mut(self.current) {
                Some(replica) => replica.read_op(),
                None => return Err(self.exhausted_error()),
            };
            match result {
                Ok(Some(op)) => {
                    self.last_txid_read = Some(op.txid());
                    self.last_checksum = Some(op.checksum());
                    return Ok(Some(op));
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.fail_over(e)?,
            }
        }
    }

    fn version(&mut self) -> StreamResult<i32> {
        self.current_mut()?.version()
    }

    /// Position within the replica currently serving reads.
    fn position(&self) -> StreamResult<u64> {
        match self.replicas.get(self.current) {
            Some(replica) => replica.position(),
            None => Ok(0),
        }
    }

    fn set_position(&mut self, position: u64) -> StreamResult<()> {
        self.current_mut()?.set_position(position)?;
        self.last_txid_read = None;
        self.last_checksum = None;
        Ok(())
    }

    fn length(&self) -> StreamResult<u64> {
        match self.replicas.get(self.current) {
            Some(replica) => replica.length(),
            None => Ok(0),
        }
    }

    /// Refreshes the current replica; the others are realigned by txid if
    /// a failover happens later.
    fn refresh(&mut self, position: u64, skipped_until_txid: u64) -> StreamResult<()> {
        self.current_mut()?.refresh(position, skipped_until_txid)?;
        self.last_txid_read = skipped_until_txid.checked_sub(1);
        self.last_checksum = None;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn journal_type(&self) -> JournalType {
        JournalType::Redundant
    }

    fn first_txid(&self) -> u64 {
        self.replicas.iter().map(|r| r.first_txid()).min().unwrap_or(0)
    }

    /// Open-ended if no replica is finalized.
    fn last_txid(&self) -> Option<u64> {
        self.replicas.iter().filter_map(|r| r.last_txid()).max()
    }

    fn close(&mut self) -> StreamResult<()> {
        let mut first_error = None;
        for replica in &mut self.replicas {
            if let Err(e) = replica.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpCode;
    use crate::stream::{EditLogInputStream, MemoryBackend};

    fn op(txid: u64) -> EditLogOp {
        EditLogOp::new(OpCode::Rename, txid, format!("/a{} /b{}", txid, txid).into_bytes())
    }

    fn replica(name: &str, txids: &[u64]) -> MemoryBackend {
        MemoryBackend::new(name, txids.iter().map(|&t| op(t)).collect())
    }

    fn redundant(replicas: Vec<MemoryBackend>) -> EditLogInputStream<RedundantBackend> {
        let streams = replicas
            .into_iter()
            .map(|b| EditLogInputStream::new(b).into_dyn())
            .collect();
        EditLogInputStream::new(RedundantBackend::new(streams, &StreamConfig::default()).unwrap())
    }

    fn drain(stream: &mut EditLogInputStream<RedundantBackend>) -> Vec<u64> {
        stream.ops().map(|r| r.unwrap().txid()).collect()
    }

    #[test]
    fn test_empty_replica_set_rejected() {
        assert!(RedundantBackend::new(Vec::new(), &StreamConfig::default()).is_err());
    }

    #[test]
    fn test_prefers_replica_reaching_further() {
        let mut stream = redundant(vec![replica("short", &[1, 2]), replica("long", &[1, 2, 3])]);
        assert_eq!(stream.backend().current_replica(), Some("long"));
        assert_eq!(drain(&mut stream), vec![1, 2, 3]);
        assert_eq!(stream.last_txid(), Some(3));
    }

    #[test]
    fn test_prefers_finalized_over_in_progress() {
        let stream = redundant(vec![
            replica("open", &[1, 2, 3, 4]).in_progress(),
            replica("sealed", &[1, 2, 3]),
        ]);
        assert_eq!(stream.backend().current_replica(), Some("sealed"));
    }

    #[test]
    fn test_failover_continues_without_duplicates() {
        let mut stream = redundant(vec![
            replica("a", &[1, 2, 3, 4, 5]).with_failure_at(2),
            replica("b", &[1, 2, 3, 4]),
        ]);

        // The surviving replica ends at 4; nothing is delivered twice.
        assert_eq!(drain(&mut stream), vec![1, 2, 3, 4]);
        assert_eq!(stream.backend().current_replica(), Some("b"));
    }

    #[test]
    fn test_failover_on_first_read() {
        let mut stream = redundant(vec![
            replica("a", &[1, 2, 3]).with_failure_at(0),
            replica("b", &[1, 2]),
        ]);
        assert_eq!(drain(&mut stream), vec![1, 2]);
    }

    #[test]
    fn test_divergent_replica_is_fatal() {
        let mut good = replica("a", &[1, 2, 3]).with_failure_at(2);
        let mut bad_ops = vec![op(1)];
        bad_ops.push(EditLogOp::new(OpCode::Rename, 2, b"/elsewhere".to_vec()));
        bad_ops.push(op(3));
        let bad = MemoryBackend::new("b", bad_ops);
        good.push(op(4));

        let mut stream = redundant(vec![good, bad]);
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 2);

        let err = stream.read_op().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code().code(), "EDITLOG_REPLICA_DIVERGENCE");
    }

    #[test]
    fn test_divergence_check_can_be_disabled() {
        let good = replica("a", &[1, 2, 3]).with_failure_at(1);
        let bad = MemoryBackend::new(
            "b",
            vec![EditLogOp::new(OpCode::Rename, 1, b"/other".to_vec()), op(2)],
        );
        let config = StreamConfig {
            verify_replica_checksums: false,
            ..StreamConfig::default()
        };
        let streams = vec![
            EditLogInputStream::new(good).into_dyn(),
            EditLogInputStream::new(bad).into_dyn(),
        ];
        let mut stream = EditLogInputStream::new(RedundantBackend::new(streams, &config).unwrap());

        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 2);
    }

    #[test]
    fn test_replica_with_gap_is_skipped() {
        let mut stream = redundant(vec![
            replica("a", &[1, 2, 3, 4, 5]).with_failure_at(2),
            replica("gap", &[1, 4, 5]),
            replica("c", &[1, 2, 3]),
        ]);
        assert_eq!(drain(&mut stream), vec![1, 2, 3]);
        assert_eq!(stream.backend().current_replica(), Some("c"));
    }

    #[test]
    fn test_all_replicas_failing_returns_error() {
        let mut stream = redundant(vec![
            replica("a", &[1, 2, 3]).with_failure_at(1),
            replica("b", &[1, 2]).with_failure_at(1),
        ]);

        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);
        let err = stream.read_op().unwrap_err();
        assert!(!err.is_fatal());
        assert!(stream.backend().current_replica().is_none());
    }

    #[test]
    fn test_resync_after_all_replicas_fail_reads_as_end() {
        let mut stream = redundant(vec![
            replica("a", &[1, 2]).with_failure_at(1),
            replica("b", &[1]).with_failure_at(1),
        ]);
        assert_eq!(stream.read_op().unwrap().unwrap().txid(), 1);

        stream.resync().unwrap();
        assert!(stream.read_op().unwrap().is_none());
    }

    #[test]
    fn test_read_checksum_matches_delivered_op() {
        let ops = vec![op(1), op(2)];
        let expected = ops[1].checksum();
        let backend = MemoryBackend::new("a", ops);
        let streams = vec![EditLogInputStream::new(backend).into_dyn()];
        let mut stream = EditLogInputStream::new(RedundantBackend::new(streams, &StreamConfig::default()).unwrap());

        while stream.read_op().unwrap().is_some() {}
        assert_eq!(stream.read_checksum(), Some(expected));
    }
}
