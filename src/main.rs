use std::sync::Arc;

use clap::Parser;

use mikkadb::config::{Cli, Config};
use mikkadb::replication::replica;
use mikkadb::server::{self, ReplicaRegistrar};
use mikkadb::state::ServerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("mikkadb=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    tracing::info!(?config, "starting up");

    let state = Arc::new(ServerState::new(config.clone()));
    state.datastore.load_rdb(&config.dir, &config.dbfilename)?;

    if let Some(master) = state.as_master() {
        state.events.on(Arc::new(ReplicaRegistrar::new(master)));
    }

    // The accept loop is started before a replica's handshake against
    // its configured master completes: local clients (PING, INFO) stay
    // responsive even if the master is briefly unreachable.
    if let Some(replicaof) = config.replicaof.clone() {
        let replica_state = state.clone();
        let own_port = config.port;
        tokio::spawn(async move {
            replica::run(replica_state, replicaof, own_port).await;
        });
    }

    server::run(state).await
}
