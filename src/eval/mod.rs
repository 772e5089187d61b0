pub mod transaction;

use std::sync::Arc;
use std::time::Duration;

use crate::command::{self, Command};
use crate::error::CommandError;
use crate::events::Event;
use crate::proto::Reply;
use crate::state::ServerState;
use crate::store::streams::{self, StreamEntry, StreamId};
use crate::store::ValueType;

pub use transaction::{ConnContext, TransactionState};

/// What a dispatched command asks the connection pump to do. Most
/// commands just produce a reply; `Psync` hands control of the
/// connection back to the caller because the `FULLRESYNC` line and
/// the raw RDB payload that follows it don't fit the `Reply` encoding
/// (the RDB bulk has no trailing CRLF).
pub enum Outcome {
    Reply(Reply),
    Psync { replid: String, offset: u64 },
    Suppressed,
}

pub async fn dispatch(state: &Arc<ServerState>, conn: &mut ConnContext, args: Vec<Vec<u8>>) -> Outcome {
    let cmd = match command::parse(&args) {
        Ok(c) => c,
        Err(e) => return Outcome::Reply(Reply::Error(e.to_string())),
    };

    match (&conn.tx, &cmd) {
        (TransactionState::Open(_), Command::Multi) => {
            Outcome::Reply(Reply::Error(CommandError::NestedMulti.to_string()))
        }
        (TransactionState::Open(_), Command::Exec) => run_queued(state, conn).await,
        (TransactionState::Open(_), Command::Discard) => {
            conn.tx = TransactionState::Idle;
            Outcome::Reply(Reply::Simple("OK".into()))
        }
        (TransactionState::Open(_), _) => {
            if let TransactionState::Open(queue) = &mut conn.tx {
                queue.push(args);
            }
            Outcome::Reply(Reply::Simple("QUEUED".into()))
        }
        (TransactionState::Idle, Command::Multi) => {
            conn.tx = TransactionState::Open(Vec::new());
            Outcome::Reply(Reply::Simple("OK".into()))
        }
        (TransactionState::Idle, Command::Exec) => {
            Outcome::Reply(Reply::Error(CommandError::ExecWithoutMulti.to_string()))
        }
        (TransactionState::Idle, Command::Discard) => {
            Outcome::Reply(Reply::Error(CommandError::DiscardWithoutMulti.to_string()))
        }
        (TransactionState::Idle, _) => execute(state, conn, cmd, &args).await,
    }
}

async fn run_queued(state: &Arc<ServerState>, conn: &mut ConnContext) -> Outcome {
    let queued = match std::mem::replace(&mut conn.tx, TransactionState::Idle) {
        TransactionState::Open(q) => q,
        TransactionState::Idle => Vec::new(),
    };
    let mut results = Vec::with_capacity(queued.len());
    for queued_args in queued {
        let cmd = match command::parse(&queued_args) {
            Ok(c) => c,
            Err(e) => {
                results.push(Reply::Error(e.to_string()));
                continue;
            }
        };
        let outcome = Box::pin(execute(state, conn, cmd, &queued_args)).await;
        results.push(match outcome {
            Outcome::Reply(r) => r,
            Outcome::Suppressed => Reply::None,
            Outcome::Psync { .. } => {
                Reply::Error(CommandError::Unsupported("PSYNC".into()).to_string())
            }
        });
    }
    Outcome::Reply(Reply::Array(results))
}

async fn execute(state: &Arc<ServerState>, conn: &mut ConnContext, cmd: Command, raw_args: &[Vec<u8>]) -> Outcome {
    match cmd {
        Command::Ping(msg) => Outcome::Reply(match msg {
            Some(m) => Reply::Bulk(m),
            None => Reply::Simple("PONG".into()),
        }),
        Command::Echo(msg) => Outcome::Reply(Reply::Bulk(msg)),
        Command::Get(key) => Outcome::Reply(match state.datastore.strings.get(&key) {
            Some(v) => Reply::Bulk(v),
            None => Reply::Nil,
        }),
        Command::Set { key, value, ttl_ms } => {
            let expire_at = ttl_ms.map(|ms| crate::store::strings::now_ms() + ms);
            state.datastore.strings.set(key, value, expire_at);
            propagate_if_master(state, raw_args).await;
            Outcome::Reply(Reply::Simple("OK".into()))
        }
        Command::Incr(key) => match state.datastore.strings.incr(&key) {
            Ok(n) => {
                propagate_if_master(state, raw_args).await;
                Outcome::Reply(Reply::Integer(n))
            }
            Err(e) => Outcome::Reply(Reply::Error(e.to_string())),
        },
        Command::Type(key) => {
            let t = match state.datastore.type_of(&key) {
                ValueType::String => "string",
                ValueType::Stream => "stream",
                ValueType::None => "none",
            };
            Outcome::Reply(Reply::Simple(t.into()))
        }
        Command::Keys(_pattern) => {
            let keys = state.datastore.keys();
            Outcome::Reply(Reply::Array(keys.into_iter().map(Reply::Bulk).collect()))
        }
        Command::Info => Outcome::Reply(Reply::Bulk(info_reply(state).into_bytes())),
        Command::ConfigGet(key) => {
            let key_str = String::from_utf8_lossy(&key).to_lowercase();
            let value = match key_str.as_str() {
                "dir" => Some(state.config.dir.to_string_lossy().to_string()),
                "dbfilename" => Some(state.config.dbfilename.clone()),
                _ => None,
            };
            Outcome::Reply(match value {
                Some(v) => Reply::Array(vec![Reply::Bulk(key), Reply::bulk_str(v)]),
                None => Reply::Error(format!("ERR Unknown config: {key_str}")),
            })
        }
        Command::Multi | Command::Exec | Command::Discard => {
            unreachable!("transaction commands are handled in dispatch()")
        }
        Command::XAdd { key, id_raw, fields } => {
            let id_spec = match streams::parse_id_spec(&id_raw) {
                Ok(s) => s,
                Err(e) => return Outcome::Reply(Reply::Error(e.to_string())),
            };
            match state.datastore.streams.xadd(&key, id_spec, fields) {
                Ok(id) => {
                    propagate_if_master(state, raw_args).await;
                    Outcome::Reply(Reply::bulk_str(id.to_string()))
                }
                Err(e) => Outcome::Reply(Reply::Error(e.to_string())),
            }
        }
        Command::XRange { key, start, end } => {
            let start_id = match streams::parse_range_bound(&start, true) {
                Ok(v) => v,
                Err(e) => return Outcome::Reply(Reply::Error(e.to_string())),
            };
            let end_id = match streams::parse_range_bound(&end, false) {
                Ok(v) => v,
                Err(e) => return Outcome::Reply(Reply::Error(e.to_string())),
            };
            let entries = state.datastore.streams.xrange(&key, start_id, end_id);
            Outcome::Reply(encode_stream_entries(entries))
        }
        Command::XRead { block_ms, count, streams: req } => {
            Outcome::Reply(xread(state, block_ms, count, req).await)
        }
        Command::ReplconfListeningPort(port) => {
            // Registering the port against the replica is the
            // replication engine's job, not the connection server's —
            // routed through the event bus so the two stay decoupled.
            state.events.emit(Event::ReplicaCapabilities {
                addr: conn.addr,
                listening_port: Some(port),
            });
            Outcome::Reply(Reply::Simple("OK".into()))
        }
        Command::ReplconfCapa => Outcome::Reply(Reply::Simple("OK".into())),
        Command::ReplconfGetack => Outcome::Reply(Reply::Simple("OK".into())),
        Command::ReplconfAck(offset) => {
            if let Some(master) = state.as_master() {
                master.record_ack(conn.addr, offset);
            }
            Outcome::Suppressed
        }
        Command::Psync => match state.as_master() {
            Some(master) => Outcome::Psync {
                replid: master.master_replid.clone(),
                offset: master.offset(),
            },
            None => Outcome::Reply(Reply::Error("ERR PSYNC is only supported on a master".into())),
        },
        Command::Wait { numreplicas, timeout_ms } => match state.as_master() {
            Some(master) => {
                let count = master.wait(numreplicas, timeout_ms).await;
                Outcome::Reply(Reply::Integer(count))
            }
            None => Outcome::Reply(Reply::Error("ERR WAIT is only supported on a master".into())),
        },
        Command::CommandDocs => Outcome::Reply(Reply::Simple("not_implemented".into())),
    }
}

async fn propagate_if_master(state: &Arc<ServerState>, raw_args: &[Vec<u8>]) {
    if let Some(master) = state.as_master() {
        let bytes = crate::proto::encode_command(raw_args);
        master.propagate(&bytes).await;
    }
}

/// Applies a propagated write on a replica: mutate the datastore,
/// nothing else. Replies and further propagation are meaningless here
/// since this path only ever runs on the replica's own link to its
/// master.
pub fn apply_replicated(state: &Arc<ServerState>, args: &[Vec<u8>]) {
    let cmd = match command::parse(args) {
        Ok(c) => c,
        Err(_) => return,
    };
    match cmd {
        Command::Set { key, value, ttl_ms } => {
            let expire_at = ttl_ms.map(|ms| crate::store::strings::now_ms() + ms);
            state.datastore.strings.set(key, value, expire_at);
        }
        Command::Incr(key) => {
            let _ = state.datastore.strings.incr(&key);
        }
        Command::XAdd { key, id_raw, fields } => {
            if let Ok(id_spec) = streams::parse_id_spec(&id_raw) {
                let _ = state.datastore.streams.xadd(&key, id_spec, fields);
            }
        }
        _ => {}
    }
}

fn encode_one_entry(entry: StreamEntry) -> Reply {
    Reply::Array(vec![
        Reply::bulk_str(entry.id.to_string()),
        Reply::Array(
            entry
                .fields
                .into_iter()
                .flat_map(|(f, v)| vec![Reply::Bulk(f), Reply::Bulk(v)])
                .collect(),
        ),
    ])
}

fn encode_stream_entries(entries: Vec<StreamEntry>) -> Reply {
    Reply::Array(entries.into_iter().map(encode_one_entry).collect())
}

/// `XREAD`, including the blocking form. Resolves any `$` id to "the
/// current last id" once, up front — before blocking — so a client
/// only observes entries appended after the call started. Returns a
/// null array only once every requested stream has been checked and
/// found empty, never on the first empty stream encountered.
async fn xread(
    state: &Arc<ServerState>,
    block_ms: Option<u64>,
    count: Option<usize>,
    req: Vec<(Vec<u8>, Vec<u8>)>,
) -> Reply {
    let resolved: Vec<(Vec<u8>, StreamId)> = req
        .into_iter()
        .map(|(key, id_raw)| {
            let after = if id_raw == b"$" {
                state.datastore.streams.last_id(&key)
            } else {
                streams::parse_range_bound(&id_raw, false).unwrap_or(StreamId::MIN)
            };
            (key, after)
        })
        .collect();

    let deadline: Option<Option<tokio::time::Instant>> = block_ms.map(|ms| {
        if ms == 0 {
            None
        } else {
            Some(tokio::time::Instant::now() + Duration::from_millis(ms))
        }
    });

    loop {
        let mut out = Vec::new();
        for (key, after) in &resolved {
            let entries = state.datastore.streams.xread_after(key, *after, count);
            if !entries.is_empty() {
                out.push(Reply::Array(vec![
                    Reply::Bulk(key.clone()),
                    encode_stream_entries(entries),
                ]));
            }
        }
        if !out.is_empty() {
            return Reply::Array(out);
        }
        match deadline {
            None if block_ms.is_none() => return Reply::NilArray,
            Some(Some(d)) if tokio::time::Instant::now() >= d => return Reply::NilArray,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}

fn info_reply(state: &ServerState) -> String {
    let mut s = String::from("# Replication\r\n");
    match state.as_master() {
        Some(master) => {
            s.push_str("role:master\r\n");
            let replicas = master.connected_replicas();
            s.push_str(&format!("connected_slaves:{}\r\n", replicas.len()));
            for (i, (addr, port)) in replicas.into_iter().enumerate() {
                let port = port.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
                s.push_str(&format!("slave{i}:ip={},port={port}\r\n", addr.ip()));
            }
            s.push_str(&format!("master_replid:{}\r\n", master.master_replid));
            s.push_str(&format!("master_repl_offset:{}\r\n", master.offset()));
        }
        None => {
            s.push_str("role:slave\r\n");
        }
    }
    s
}
