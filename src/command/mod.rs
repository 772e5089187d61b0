use crate::error::CommandError;

#[derive(Debug, Clone)]
pub enum Command {
    Ping(Option<Vec<u8>>),
    Echo(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
    },
    Get(Vec<u8>),
    Incr(Vec<u8>),
    Type(Vec<u8>),
    Keys(Vec<u8>),
    Info,
    ConfigGet(Vec<u8>),
    Multi,
    Exec,
    Discard,
    XAdd {
        key: Vec<u8>,
        id_raw: Vec<u8>,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    },
    XRange {
        key: Vec<u8>,
        start: Vec<u8>,
        end: Vec<u8>,
    },
    XRead {
        block_ms: Option<u64>,
        count: Option<usize>,
        streams: Vec<(Vec<u8>, Vec<u8>)>,
    },
    ReplconfListeningPort(u16),
    ReplconfCapa,
    ReplconfGetack,
    ReplconfAck(u64),
    Psync,
    Wait {
        numreplicas: i64,
        timeout_ms: i64,
    },
    CommandDocs,
}

fn upper(b: &[u8]) -> String {
    String::from_utf8_lossy(b).to_uppercase()
}

fn unsupported(name: &str) -> CommandError {
    CommandError::Unsupported(name.to_string())
}

/// Parses a decoded argument vector into a typed `Command`. This is
/// the dispatch table the rest of the evaluator is built around: one
/// arm per supported command, each responsible for its own arity.
pub fn parse(args: &[Vec<u8>]) -> Result<Command, CommandError> {
    let name_bytes = args.first().ok_or_else(|| unsupported(""))?;
    let name = upper(name_bytes);

    match name.as_str() {
        "PING" => Ok(Command::Ping(args.get(1).cloned())),
        "ECHO" => {
            let msg = args.get(1).ok_or_else(|| unsupported(&name))?;
            Ok(Command::Echo(msg.clone()))
        }
        "SET" => {
            if args.len() < 3 {
                return Err(unsupported(&name));
            }
            let key = args[1].clone();
            let value = args[2].clone();
            let mut ttl_ms = None;
            let mut i = 3;
            while i < args.len() {
                let opt = upper(&args[i]);
                match opt.as_str() {
                    "EX" => {
                        let secs: u64 = std::str::from_utf8(args.get(i + 1).ok_or_else(|| unsupported(&name))?)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or(CommandError::NotAnInteger)?;
                        ttl_ms = Some(secs * 1000);
                        i += 2;
                    }
                    "PX" => {
                        let ms: u64 = std::str::from_utf8(args.get(i + 1).ok_or_else(|| unsupported(&name))?)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or(CommandError::NotAnInteger)?;
                        ttl_ms = Some(ms);
                        i += 2;
                    }
                    _ => return Err(unsupported(&name)),
                }
            }
            Ok(Command::Set { key, value, ttl_ms })
        }
        "GET" => {
            let key = args.get(1).ok_or_else(|| unsupported(&name))?;
            Ok(Command::Get(key.clone()))
        }
        "INCR" => {
            let key = args.get(1).ok_or_else(|| unsupported(&name))?;
            Ok(Command::Incr(key.clone()))
        }
        "TYPE" => {
            let key = args.get(1).ok_or_else(|| unsupported(&name))?;
            Ok(Command::Type(key.clone()))
        }
        "KEYS" => {
            let pattern = args.get(1).ok_or_else(|| unsupported(&name))?;
            Ok(Command::Keys(pattern.clone()))
        }
        "INFO" => Ok(Command::Info),
        "CONFIG" => {
            if args.len() < 3 || upper(&args[1]) != "GET" {
                return Err(unsupported(&name));
            }
            Ok(Command::ConfigGet(args[2].clone()))
        }
        "MULTI" => Ok(Command::Multi),
        "EXEC" => Ok(Command::Exec),
        "DISCARD" => Ok(Command::Discard),
        "XADD" => {
            if args.len() < 5 || (args.len() - 3) % 2 != 0 {
                return Err(unsupported(&name));
            }
            let key = args[1].clone();
            let id_raw = args[2].clone();
            let mut fields = Vec::new();
            let mut i = 3;
            while i < args.len() {
                fields.push((args[i].clone(), args[i + 1].clone()));
                i += 2;
            }
            Ok(Command::XAdd { key, id_raw, fields })
        }
        "XRANGE" => {
            if args.len() != 4 {
                return Err(unsupported(&name));
            }
            Ok(Command::XRange {
                key: args[1].clone(),
                start: args[2].clone(),
                end: args[3].clone(),
            })
        }
        "XREAD" => parse_xread(&name, args),
        "REPLCONF" => parse_replconf(&name, args),
        "PSYNC" => Ok(Command::Psync),
        "COMMAND" => match args.get(1).map(|s| upper(s)) {
            Some(ref sub) if sub == "DOCS" => Ok(Command::CommandDocs),
            _ => Err(unsupported(&name)),
        },
        "WAIT" => {
            if args.len() != 3 {
                return Err(unsupported(&name));
            }
            let numreplicas: i64 = std::str::from_utf8(&args[1])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?;
            let timeout_ms: i64 = std::str::from_utf8(&args[2])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?;
            Ok(Command::Wait {
                numreplicas,
                timeout_ms,
            })
        }
        _ => Err(unsupported(&name)),
    }
}

fn parse_xread(name: &str, args: &[Vec<u8>]) -> Result<Command, CommandError> {
    let mut i = 1;
    let mut block_ms = None;
    let mut count = None;
    let mut streams_pos = None;
    while i < args.len() {
        match upper(&args[i]).as_str() {
            "BLOCK" => {
                let ms: u64 = std::str::from_utf8(args.get(i + 1).ok_or_else(|| unsupported(name))?)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotAnInteger)?;
                block_ms = Some(ms);
                i += 2;
            }
            "COUNT" => {
                let n: usize = std::str::from_utf8(args.get(i + 1).ok_or_else(|| unsupported(name))?)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(CommandError::NotAnInteger)?;
                count = Some(n);
                i += 2;
            }
            "STREAMS" => {
                streams_pos = Some(i + 1);
                break;
            }
            _ => return Err(unsupported(name)),
        }
    }
    let start = streams_pos.ok_or_else(|| unsupported(name))?;
    let rest = &args[start..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(unsupported(name));
    }
    let half = rest.len() / 2;
    let streams = (0..half)
        .map(|idx| (rest[idx].clone(), rest[half + idx].clone()))
        .collect();
    Ok(Command::XRead {
        block_ms,
        count,
        streams,
    })
}

fn parse_replconf(name: &str, args: &[Vec<u8>]) -> Result<Command, CommandError> {
    let sub = args.get(1).ok_or_else(|| unsupported(name))?;
    match upper(sub).as_str() {
        "LISTENING-PORT" => {
            let port: u16 = std::str::from_utf8(args.get(2).ok_or_else(|| unsupported(name))?)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?;
            Ok(Command::ReplconfListeningPort(port))
        }
        "CAPA" => Ok(Command::ReplconfCapa),
        "GETACK" => Ok(Command::ReplconfGetack),
        "ACK" => {
            let offset: u64 = std::str::from_utf8(args.get(2).ok_or_else(|| unsupported(name))?)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?;
            Ok(Command::ReplconfAck(offset))
        }
        _ => Err(unsupported(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn parses_set_with_ex() {
        let cmd = parse(&args(&["SET", "k", "v", "EX", "60"])).unwrap();
        match cmd {
            Command::Set { ttl_ms, .. } => assert_eq!(ttl_ms, Some(60_000)),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_set_with_px() {
        let cmd = parse(&args(&["SET", "k", "v", "PX", "1500"])).unwrap();
        match cmd {
            Command::Set { ttl_ms, .. } => assert_eq!(ttl_ms, Some(1500)),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_xread_block_and_streams() {
        let cmd = parse(&args(&["XREAD", "BLOCK", "100", "STREAMS", "s1", "s2", "0-0", "1-0"])).unwrap();
        match cmd {
            Command::XRead { block_ms, streams, .. } => {
                assert_eq!(block_ms, Some(100));
                assert_eq!(
                    streams,
                    vec![(b"s1".to_vec(), b"0-0".to_vec()), (b"s2".to_vec(), b"1-0".to_vec())]
                );
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn unknown_command_is_unsupported() {
        assert!(parse(&args(&["NOPE"])).is_err());
    }

    #[test]
    fn wrong_arity_is_unsupported() {
        assert!(parse(&args(&["GET"])).is_err());
    }

    #[test]
    fn parses_replconf_ack() {
        let cmd = parse(&args(&["REPLCONF", "ACK", "42"])).unwrap();
        match cmd {
            Command::ReplconfAck(offset) => assert_eq!(offset, 42),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_command_docs() {
        assert!(matches!(parse(&args(&["COMMAND", "DOCS"])).unwrap(), Command::CommandDocs));
    }

    #[test]
    fn command_without_docs_subcommand_is_unsupported() {
        assert!(parse(&args(&["COMMAND", "LIST"])).is_err());
    }
}
