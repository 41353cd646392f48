use std::convert::Infallible;

use async_trait::async_trait;
use lapin::ConnectionState;
use tracing::{
    debug,
    error,
    info,
    warn,
};

use crate::{
    batch::decode_batch,
    broker::{
        is_connection_closed,
        IncomingDelivery,
        QueueSession,
        SessionOpener,
    },
    store::ListenStore,
    writer::BatchWriter,
};


/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked { persisted: usize },
    /// Left for the broker to redeliver
    Unacked(UnackedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnackedReason {
    Malformed,
    NothingPersisted,
    AckRefused,
}


/// Acknowledges deliveries on the current broker channel
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), lapin::Error>;

    /// Replaces the broker connection after it was found closed
    async fn reconnect(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Acknowledge deliveries that decode to zero listens instead of leaving them for redelivery
    pub ack_empty_batches: bool,
    /// The broker prefetch limit, `0` for none. Once this many deliveries are left
    /// unacknowledged the session is reopened so the broker hands them out again.
    pub prefetch: u16,
}


/// Decodes, writes and acknowledges one delivery.
///
/// Only deliveries with at least one handled listen are acknowledged; the rest
/// stay unacknowledged so the broker can redeliver them.
pub async fn handle_delivery<S, A>(
    writer: &mut BatchWriter<S>,
    acker: &mut A,
    options: ConsumerOptions,
    body: &[u8],
    delivery_tag: u64,
) -> DeliveryOutcome
where
    S: ListenStore,
    A: Acknowledger,
{
    let listens = match decode_batch(body) {
        Ok(listens) => listens,
        Err(e) => {
            error!(error = %e, delivery_tag, body = %String::from_utf8_lossy(body), "Cannot decode delivery");
            return DeliveryOutcome::Unacked(UnackedReason::Malformed);
        },
    };

    let persisted = if listens.is_empty() && options.ack_empty_batches {
        0
    } else {
        let persisted = writer.write(listens).await;
        if persisted == 0 {
            return DeliveryOutcome::Unacked(UnackedReason::NothingPersisted);
        }
        persisted
    };

    if acknowledge(acker, delivery_tag).await {
        debug!(delivery_tag, persisted, "Acknowledged delivery");
        DeliveryOutcome::Acked { persisted }
    } else {
        DeliveryOutcome::Unacked(UnackedReason::AckRefused)
    }
}

/// Acks `delivery_tag`, reconnecting and retrying for as long as the connection turns out closed
async fn acknowledge<A: Acknowledger>(acker: &mut A, delivery_tag: u64) -> bool {
    loop {
        match acker.ack(delivery_tag).await {
            Ok(()) => return true,
            Err(e) if is_connection_closed(&e) => {
                warn!(error = %e, delivery_tag, "Connection closed while acknowledging; reconnecting");
                acker.reconnect().await;
            },
            Err(e) => {
                error!(error = %e, delivery_tag, "Broker refused acknowledgement");
                return false;
            },
        }
    }
}


/// The writer's main loop: consume the incoming queue forever
pub struct QueueConsumer<S, O: SessionOpener> {
    opener: O,
    writer: BatchWriter<S>,
    options: ConsumerOptions,
    session: Option<O::Session>,
    /// Deliveries left unacknowledged on the current session
    unacked: usize,
}

impl<S, O> QueueConsumer<S, O>
where
    S: ListenStore,
    O: SessionOpener,
{
    pub fn new(opener: O, writer: BatchWriter<S>, options: ConsumerOptions) -> Self {
        Self {
            opener,
            writer,
            options,
            session: None,
            unacked: 0,
        }
    }

    pub fn writer(&self) -> &BatchWriter<S> { &self.writer }

    pub fn is_connected(&self) -> bool { self.session.is_some() }

    /// Never returns; broker disconnects are handled by reconnecting and binding again
    pub async fn run(mut self) -> Infallible {
        info!("timescale-writer started");
        loop {
            self.step().await;
        }
    }

    /// Connects if needed, then waits for and handles a single delivery.
    ///
    /// Returns the outcome of the delivery, or `None` if the session was lost instead.
    pub async fn step(&mut self) -> Option<DeliveryOutcome> {
        if self.session.is_none() {
            self.session = Some(self.opener.open_session().await);
        }
        let session = self.session.as_mut()?;

        let next = session.next_delivery().await;
        match next {
            Some(Ok(delivery)) => Some(self.deliver(delivery).await),
            Some(Err(e)) => {
                warn!(error = %e, "Connection to rabbitmq closed. Re-opening.");
                self.disconnect().await;
                None
            },
            None => {
                warn!("Consumer stopped. Re-opening.");
                self.disconnect().await;
                None
            },
        }
    }

    async fn deliver(&mut self, delivery: IncomingDelivery) -> DeliveryOutcome {
        let mut acker = SessionAcker {
            opener: &self.opener,
            session: &mut self.session,
            replaced: false,
        };
        let outcome = handle_delivery(&mut self.writer, &mut acker, self.options, &delivery.data, delivery.delivery_tag).await;
        if acker.replaced {
            // Whatever was outstanding, this delivery included, went back to the queue with the old session
            self.unacked = 0;
            return outcome;
        }

        if let DeliveryOutcome::Unacked(reason) = outcome {
            self.unacked += 1;
            let prefetch = usize::from(self.options.prefetch);
            if prefetch > 0 && self.unacked >= prefetch {
                warn!(?reason, unacked = self.unacked, "Prefetch window full of unacknowledged deliveries; reopening session");
                self.disconnect().await;
            }
        }
        outcome
    }

    async fn disconnect(&mut self) {
        self.unacked = 0;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}


/// Acks on the consumer's live session, replacing it wholesale on reconnect
struct SessionAcker<'s, O: SessionOpener> {
    opener: &'s O,
    session: &'s mut Option<O::Session>,
    replaced: bool,
}

#[async_trait]
impl<'s, O: SessionOpener> Acknowledger for SessionAcker<'s, O> {
    async fn ack(&mut self, delivery_tag: u64) -> Result<(), lapin::Error> {
        match self.session.as_mut() {
            Some(session) => session.ack(delivery_tag).await,
            None => Err(lapin::Error::InvalidConnectionState(ConnectionState::Closed)),
        }
    }

    async fn reconnect(&mut self) {
        if let Some(mut old) = self.session.take() {
            old.close().await;
        }
        *self.session = Some(self.opener.open_session().await);
        self.replaced = true;
    }
}
