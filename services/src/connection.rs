use async_trait::async_trait;

use crate::{
    broker::{
        BrokerConfig,
        BrokerSession,
        SessionOpener,
    },
    retry::ReconnectPolicy,
    store::{
        StoreConfig,
        TimescaleListenStore,
    },
};

/// Opens connections to the store and the broker, waiting as long as it takes
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    store: StoreConfig,
    broker: BrokerConfig,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    pub fn new(store: StoreConfig, broker: BrokerConfig, policy: ReconnectPolicy) -> Self { Self { store, broker, policy } }

    pub async fn connect_store(&self) -> TimescaleListenStore {
        self.policy
            .run("timescale", || TimescaleListenStore::connect(self.store.clone()))
            .await
    }

    /// Connects to rabbitmq and declares the writer's topology
    pub async fn connect_broker(&self) -> BrokerSession {
        self.policy
            .run("rabbitmq", || BrokerSession::open(self.broker.clone()))
            .await
    }
}

#[async_trait]
impl SessionOpener for ConnectionManager {
    type Session = BrokerSession;

    async fn open_session(&self) -> BrokerSession { self.connect_broker().await }
}
