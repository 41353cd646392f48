use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions,
        BasicConsumeOptions,
        BasicQosOptions,
        ExchangeDeclareOptions,
        QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    uri::{
        AMQPAuthority,
        AMQPScheme,
        AMQPUri,
        AMQPUserInfo,
    },
    Channel,
    Connection,
    ConnectionProperties,
    Consumer,
    ExchangeKind,
};
use tracing::{
    debug,
    info,
};

pub const DEFAULT_INCOMING_EXCHANGE: &str = "incoming";
pub const DEFAULT_INCOMING_QUEUE: &str = "ts_incoming";
pub const DEFAULT_UNIQUE_EXCHANGE: &str = "unique";


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,

    /// Fan-out exchange listen batches are published to
    pub incoming_exchange: String,
    /// Durable queue bound to `incoming_exchange` that this writer consumes
    pub incoming_queue: String,
    /// Fan-out exchange for newly stored unique listens
    pub unique_exchange: String,

    /// Max unacknowledged deliveries the broker will push at once, `0` for no limit
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl BrokerConfig {
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: Default::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            username: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            incoming_exchange: DEFAULT_INCOMING_EXCHANGE.to_owned(),
            incoming_queue: DEFAULT_INCOMING_QUEUE.to_owned(),
            unique_exchange: DEFAULT_UNIQUE_EXCHANGE.to_owned(),
            prefetch: 0,
            consumer_tag: "timescale-writer".to_owned(),
        }
    }
}


/// A delivery taken off the incoming queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDelivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
}

impl From<Delivery> for IncomingDelivery {
    fn from(delivery: Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            data: delivery.data,
        }
    }
}


/// A bound consumer on the incoming queue
#[async_trait]
pub trait QueueSession: Send {
    /// Waits for the next delivery. `None` once the consumer has been cancelled or the connection is gone.
    async fn next_delivery(&mut self) -> Option<Result<IncomingDelivery, lapin::Error>>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), lapin::Error>;

    /// Closes the session, ignoring failures since it is usually already dead
    async fn close(&mut self);
}

/// Opens bound sessions, waiting as long as it takes
#[async_trait]
pub trait SessionOpener: Send + Sync {
    type Session: QueueSession + 'static;

    async fn open_session(&self) -> Self::Session;
}


/// An open broker connection with the writer's topology declared and a consumer on the incoming queue
pub struct BrokerSession {
    connection: Connection,
    incoming: Channel,
    // Kept open for the lifetime of the session; nothing publishes to it yet
    _unique: Channel,
    consumer: Consumer,
}

impl BrokerSession {
    pub async fn open(config: BrokerConfig) -> Result<Self, lapin::Error> {
        let connection = Connection::connect_uri(config.amqp_uri(), ConnectionProperties::default()).await?;

        let incoming = connection.create_channel().await?;
        if config.prefetch > 0 {
            incoming.basic_qos(config.prefetch, BasicQosOptions::default()).await?;
        }
        incoming
            .exchange_declare(
                &config.incoming_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        incoming
            .queue_declare(
                &config.incoming_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        incoming
            .queue_bind(
                &config.incoming_queue,
                &config.incoming_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer = incoming
            .basic_consume(
                &config.incoming_queue,
                &config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let unique = connection.create_channel().await?;
        unique
            .exchange_declare(
                &config.unique_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %config.incoming_queue,
            exchange = %config.incoming_exchange,
            prefetch = config.prefetch,
            "Bound to rabbitmq"
        );
        Ok(Self {
            connection,
            incoming,
            _unique: unique,
            consumer,
        })
    }
}

#[async_trait]
impl QueueSession for BrokerSession {
    async fn next_delivery(&mut self) -> Option<Result<IncomingDelivery, lapin::Error>> {
        self.consumer.next().await.map(|res| res.map(IncomingDelivery::from))
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), lapin::Error> {
        self.incoming.basic_ack(delivery_tag, BasicAckOptions::default()).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.connection.close(200, "closing").await {
            debug!(error = %e, "Error closing rabbitmq connection");
        }
    }
}


/// Whether `err` means the connection or channel is gone, as opposed to the broker refusing the request
pub fn is_connection_closed(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::IOError(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::InvalidChannelState(_)
            | lapin::Error::MissingHeartbeatError
    )
}
