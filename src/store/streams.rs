use crate::error::CommandError;
use crate::store::strings::now_ms;
use dashmap::DashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn to_string(self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<StreamEntry>,
    last_id: Option<StreamId>,
}

/// Append-only, lexicographically ordered stream keyspace. Entries are
/// never mutated or removed once appended; only `XADD` grows a stream.
#[derive(Default)]
pub struct StreamStore {
    streams: DashMap<Vec<u8>, RwLock<Stream>>,
}

/// How the caller specified the id half of an `XADD` argument.
pub enum IdSpec {
    /// `*` — both halves auto-generated.
    Auto,
    /// `<ms>-*` — explicit milliseconds, auto-incremented sequence.
    AutoSeq(u64),
    /// `<ms>-<seq>` — fully explicit.
    Explicit(StreamId),
}

pub fn parse_id_spec(raw: &[u8]) -> Result<IdSpec, CommandError> {
    let s = std::str::from_utf8(raw)
        .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
    if s == "*" {
        return Ok(IdSpec::Auto);
    }
    match s.split_once('-') {
        Some((ms, "*")) => {
            let ms: u64 = ms
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            Ok(IdSpec::AutoSeq(ms))
        }
        Some((ms, seq)) => {
            let ms: u64 = ms
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            let seq: u64 = seq
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            Ok(IdSpec::Explicit(StreamId { ms, seq }))
        }
        None => {
            let ms: u64 = s
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            Ok(IdSpec::Explicit(StreamId { ms, seq: 0 }))
        }
    }
}

/// Parses an `XRANGE`-style bound: `-` (the smallest possible id), `+`
/// (the largest), a bare milliseconds value, or `<ms>-<seq>`.
pub fn parse_range_bound(raw: &[u8], is_start: bool) -> Result<StreamId, CommandError> {
    let s = std::str::from_utf8(raw)
        .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
    if s == "-" {
        return Ok(StreamId::MIN);
    }
    if s == "+" {
        return Ok(StreamId::MAX);
    }
    match s.split_once('-') {
        Some((ms, seq)) => {
            let ms: u64 = ms
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            let seq: u64 = seq
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            Ok(StreamId { ms, seq })
        }
        None => {
            let ms: u64 = s
                .parse()
                .map_err(|_| CommandError::Stream("Invalid stream ID specified as stream command argument".into()))?;
            Ok(StreamId {
                ms,
                seq: if is_start { 0 } else { u64::MAX },
            })
        }
    }
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.streams.contains_key(key)
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn last_id(&self, key: &[u8]) -> StreamId {
        self.streams
            .get(key)
            .map(|s| s.read().unwrap().last_id.unwrap_or(StreamId::MIN))
            .unwrap_or(StreamId::MIN)
    }

    pub fn xadd(&self, key: &[u8], id_spec: IdSpec, fields: Vec<(Vec<u8>, Vec<u8>)>) -> Result<StreamId, CommandError> {
        let stream_lock = self
            .streams
            .entry(key.to_vec())
            .or_insert_with(|| RwLock::new(Stream::default()));
        let mut stream = stream_lock.write().unwrap();

        let id = match id_spec {
            IdSpec::Auto => {
                let ms = now_ms();
                let seq = match stream.last_id {
                    Some(last) if last.ms == ms => last.seq + 1,
                    _ => 0,
                };
                StreamId { ms, seq }
            }
            IdSpec::AutoSeq(ms) => {
                let seq = match stream.last_id {
                    Some(last) if last.ms == ms => last.seq + 1,
                    Some(last) if last.ms > ms => {
                        return Err(CommandError::Stream(
                            "The ID specified in XADD is equal or smaller than the target stream top item".into(),
                        ))
                    }
                    _ => 0,
                };
                StreamId { ms, seq }
            }
            IdSpec::Explicit(id) => id,
        };

        if id == StreamId::MIN {
            return Err(CommandError::Stream(
                "The ID specified in XADD must be greater than 0-0".into(),
            ));
        }
        if let Some(last) = stream.last_id {
            if id <= last {
                return Err(CommandError::Stream(
                    "The ID specified in XADD is equal or smaller than the target stream top item".into(),
                ));
            }
        }

        stream.entries.push(StreamEntry { id, fields });
        stream.last_id = Some(id);
        Ok(id)
    }

    pub fn xrange(&self, key: &[u8], start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        match self.streams.get(key) {
            None => Vec::new(),
            Some(stream) => stream
                .read()
                .unwrap()
                .entries
                .iter()
                .filter(|e| e.id >= start && e.id <= end)
                .cloned()
                .collect(),
        }
    }

    /// Entries strictly after `after_id`, for `XREAD`. An empty vector
    /// means "nothing new yet" — it is the caller's job to decide
    /// whether that counts as an empty overall reply (only once every
    /// requested stream is empty).
    pub fn xread_after(&self, key: &[u8], after_id: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        match self.streams.get(key) {
            None => Vec::new(),
            Some(stream) => {
                let guard = stream.read().unwrap();
                let mut results: Vec<StreamEntry> =
                    guard.entries.iter().filter(|e| e.id > after_id).cloned().collect();
                if let Some(n) = count {
                    results.truncate(n);
                }
                results
            }
        }
    }

    pub fn load_entry(&self, key: Vec<u8>, id: StreamId, fields: Vec<(Vec<u8>, Vec<u8>)>) {
        let stream_lock = self
            .streams
            .entry(key)
            .or_insert_with(|| RwLock::new(Stream::default()));
        let mut stream = stream_lock.write().unwrap();
        stream.entries.push(StreamEntry { id, fields });
        stream.last_id = Some(id);
    }
}
