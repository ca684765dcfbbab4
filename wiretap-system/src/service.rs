use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

/// A message interface for [services](Service).
///
/// Most commonly, this interface is an enumeration of messages, where each
/// variant holds one message type together with its response
/// [sender](Sender). Services with a single message can implement the
/// interface on the message type directly.
pub trait Interface: Send + 'static {}

impl Interface for () {}

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// Response behavior of a message on its [`Interface`].
///
/// See [`NoResponse`] and [`AsyncResponse`] for the available strategies.
pub trait MessageResponse: Sized + Send + 'static {
    /// The sender passed into [`FromMessage::from_message`].
    type Sender: Send;
    /// The value returned from [`Addr::send`] for this message.
    type Output;

    /// Creates the sender and output pair for one message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// Message response marker for fire-and-forget messages.
///
/// [`Addr::send`] returns immediately with `()` and the message is handled
/// asynchronously at an arbitrary later point in time.
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// Message response resolving asynchronously once the service responds.
///
/// [`Addr::send`] returns a [`Request`] future that completes when the
/// service invokes [`Sender::send`] on the sender embedded in the message.
pub struct AsyncResponse<T>(std::marker::PhantomData<T>);

impl<T: Send + 'static> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
///
/// The sender is part of the message on the service's [`Interface`] and must
/// be used to respond. If the sender is dropped without sending, the request
/// fails with [`SendError`].
#[derive(Debug)]
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> Sender<T> {
    /// Sends the response value and closes the [`Request`].
    ///
    /// If the request side has been dropped, the value is silently discarded.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// The future returned from [sending](Addr::send) a message with
/// [`AsyncResponse`] behavior.
///
/// Resolves with `Err(SendError)` if the service has shut down before
/// responding.
#[derive(Debug)]
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_err(|_| SendError)
    }
}

/// Declares a message as part of an [`Interface`].
///
/// Either [`NoResponse`] or [`AsyncResponse`] declares the response behavior
/// of the message.
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value of [`Addr::send`].
    type Response: MessageResponse;

    /// Converts the message into the service interface, capturing the sender.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// The address of a [`Service`].
///
/// The address allows sending messages into the service's mailbox as long as
/// the service is running. It can be freely cloned.
#[derive(Debug)]
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
    name: &'static str,
}

// Manually derive Clone since `#[derive(Clone)]` would require `I: Clone`.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response value.
    ///
    /// For [`NoResponse`] messages this returns `()` immediately; the message
    /// is handled asynchronously. For [`AsyncResponse`] messages this returns
    /// a [`Request`] future. The channel is unbounded, so sending never
    /// blocks; if the service has shut down, fire-and-forget messages are
    /// dropped silently and request futures resolve with [`SendError`].
    pub fn send<M>(&self, message: M) -> <I::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (sender, output) = <I as FromMessage<M>>::Response::channel();
        self.tx.send(I::from_message(message, sender)).ok();
        output
    }

    /// Returns the name of the service this address points to.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Inbound message channel of a [`Service`].
///
/// Held exclusively by the service's handler loop.
#[derive(Debug)]
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next message, or `None` once all [`Addr`]s are dropped.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }
}

/// Creates an unbounded channel for communicating with a [`Service`].
pub fn channel<I: Interface>(name: &'static str) -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx, name }, Receiver { rx })
}

/// An asynchronous unit of work with exclusive state and a message mailbox.
///
/// Messages sent to the service's [`Addr`] are drained by a single task, so
/// message handling is sequential: state owned by the service is never
/// touched concurrently and requires no locking. Re-entrant sends from
/// within a handler are delivered after the current message completes rather
/// than recursively.
pub trait Service: Sized {
    /// The messages of the service.
    type Interface: Interface;

    /// Spawns a task to handle service messages.
    ///
    /// The task must drain `rx` until it returns `None` and should exit
    /// afterwards.
    fn spawn_handler(self, rx: Receiver<Self::Interface>);

    /// Starts the service in the current tokio runtime and returns its
    /// address.
    fn start(self) -> Addr<Self::Interface> {
        let (addr, rx) = channel(Self::name());
        self.spawn_handler(rx);
        addr
    }

    /// Returns a unique name for this service implementation.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping(u32);

    struct Pong(Ping, Sender<u32>);

    impl Interface for Pong {}

    impl FromMessage<Ping> for Pong {
        type Response = AsyncResponse<u32>;

        fn from_message(message: Ping, sender: Sender<u32>) -> Self {
            Self(message, sender)
        }
    }

    struct PongService;

    impl Service for PongService {
        type Interface = Pong;

        fn spawn_handler(self, mut rx: Receiver<Self::Interface>) {
            tokio::spawn(async move {
                while let Some(Pong(ping, sender)) = rx.recv().await {
                    sender.send(ping.0 + 1);
                }
            });
        }
    }

    #[tokio::test]
    async fn requests_get_responses() {
        let addr = PongService.start();
        assert_eq!(addr.send(Ping(41)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn stopped_service_errors() {
        let (addr, rx) = channel::<Pong>("pong");
        drop(rx);

        assert!(addr.send(Ping(0)).await.is_err());
    }

    #[tokio::test]
    async fn messages_are_sequential() {
        let (addr, mut rx) = channel::<Pong>("pong");

        let handle = tokio::spawn(async move {
            let mut order = Vec::new();
            while let Some(Pong(ping, sender)) = rx.recv().await {
                order.push(ping.0);
                sender.send(ping.0);
            }
            order
        });

        let r1 = addr.send(Ping(1));
        let r2 = addr.send(Ping(2));
        let r3 = addr.send(Ping(3));
        assert_eq!(r1.await.unwrap(), 1);
        assert_eq!(r2.await.unwrap(), 2);
        assert_eq!(r3.await.unwrap(), 3);

        drop(addr);
        assert_eq!(handle.await.unwrap(), vec![1, 2, 3]);
    }
}
