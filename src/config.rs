use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "mikkadb", about = "An in-memory key/value and stream store speaking a RESP subset")]
pub struct Cli {
    /// Directory RDB snapshots are read from at startup.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// RDB snapshot filename within --dir.
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// TCP port to accept client connections on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// "<host> <port>" of a master to replicate from. Absent means
    /// this instance runs as a master.
    #[arg(long)]
    pub replicaof: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReplicaOf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: PathBuf,
    pub dbfilename: String,
    pub port: u16,
    pub replicaof: Option<ReplicaOf>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Config> {
        let replicaof = match cli.replicaof {
            None => None,
            Some(raw) => {
                let mut parts = raw.split_whitespace();
                let host = parts
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--replicaof requires \"<host> <port>\""))?
                    .to_string();
                let port: u16 = parts
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--replicaof requires \"<host> <port>\""))?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("--replicaof port must be numeric"))?;
                Some(ReplicaOf { host, port })
            }
        };
        Ok(Config {
            dir: cli.dir,
            dbfilename: cli.dbfilename,
            port: cli.port,
            replicaof,
        })
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replicaof_as_two_tokens() {
        let cli = Cli {
            dir: PathBuf::from("."),
            dbfilename: "dump.rdb".into(),
            port: 6380,
            replicaof: Some("localhost 6379".into()),
        };
        let cfg = Config::from_cli(cli).unwrap();
        let replicaof = cfg.replicaof.unwrap();
        assert_eq!(replicaof.host, "localhost");
        assert_eq!(replicaof.port, 6379);
    }
}
