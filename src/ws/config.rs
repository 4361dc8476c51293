//! WebSocket transport configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::ws::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::ws::socket::CloseEvent;

/// WebSocket endpoint URLs.
pub mod endpoints {
    /// Mainnet WebSocket endpoint.
    pub const WS_MAINNET: &str = "wss://api.hyperliquid.xyz/ws";
    /// Testnet WebSocket endpoint.
    pub const WS_TESTNET: &str = "wss://api.hyperliquid-testnet.xyz/ws";
}

/// Decides whether an involuntary close should be followed by a reconnect.
pub type ReconnectPredicate = Arc<dyn Fn(&CloseEvent) -> bool + Send + Sync>;

/// How long to wait before reconnect attempt `n` (1-based).
#[derive(Clone)]
pub enum ReconnectDelay {
    /// The same delay every time.
    Fixed(Duration),
    /// `initial * 2^attempt`, capped at `max`.
    Exponential {
        /// Base delay.
        initial: Duration,
        /// Upper bound.
        max: Duration,
    },
    /// Caller-supplied function of the attempt number.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl ReconnectDelay {
    /// Delay before reconnect attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            ReconnectDelay::Fixed(delay) => *delay,
            ReconnectDelay::Exponential { initial, max } => {
                let base = initial.as_millis() as u64;
                let cap = max.as_millis() as u64;
                let multiplier = 2u64.saturating_pow(attempt);
                Duration::from_millis(base.saturating_mul(multiplier).min(cap))
            }
            ReconnectDelay::Custom(f) => f(attempt),
        }
    }
}

impl Default for ReconnectDelay {
    fn default() -> Self {
        ReconnectDelay::Exponential {
            initial: Duration::from_millis(150),
            max: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ReconnectDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            ReconnectDelay::Exponential { initial, max } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("max", max)
                .finish(),
            ReconnectDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Reconnection policy of a [`ReconnectingSocket`](crate::ws::ReconnectingSocket).
#[derive(Clone)]
pub struct ReconnectConfig {
    /// Maximum consecutive connection attempts, including the first one.
    /// The counter resets whenever a connection opens.
    pub max_attempts: u32,
    /// Time allowed for one connection attempt.
    pub connect_timeout: Duration,
    /// Delay between attempts.
    pub delay: ReconnectDelay,
    /// Optional veto on reconnecting after a given close event.
    pub should_reconnect: Option<ReconnectPredicate>,
    /// Capacity of the default outbound message buffer.
    pub buffer_capacity: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
            delay: ReconnectDelay::default(),
            should_reconnect: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("max_attempts", &self.max_attempts)
            .field("connect_timeout", &self.connect_timeout)
            .field("delay", &self.delay)
            .field("should_reconnect", &self.should_reconnect.is_some())
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

/// Configuration for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Endpoint to connect to.
    pub url: String,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
    /// Ping interval while open (`None` disables keep-alive).
    pub keep_alive: Option<Duration>,
    /// Re-send active subscriptions after every reconnect.
    pub resubscribe: bool,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: endpoints::WS_MAINNET.to_string(),
            request_timeout: Duration::from_secs(10),
            keep_alive: Some(Duration::from_secs(30)),
            resubscribe: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl WsConfig {
    /// Create a new configuration builder.
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::new()
    }
}

/// Builder for [`WsConfig`].
#[derive(Debug, Clone, Default)]
pub struct WsConfigBuilder {
    config: WsConfig,
}

impl WsConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: WsConfig::default(),
        }
    }

    /// Set the endpoint URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Use the testnet endpoint.
    pub fn testnet(self) -> Self {
        self.url(endpoints::WS_TESTNET)
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the keep-alive ping interval, or `None` to disable pings.
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive = interval;
        self
    }

    /// Enable or disable resubscribing after reconnects.
    pub fn resubscribe(mut self, enabled: bool) -> Self {
        self.config.resubscribe = enabled;
        self
    }

    /// Set maximum consecutive connection attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Set the timeout of a single connection attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.reconnect.connect_timeout = timeout;
        self
    }

    /// Set the reconnection delay policy.
    pub fn reconnect_delay(mut self, delay: ReconnectDelay) -> Self {
        self.config.reconnect.delay = delay;
        self
    }

    /// Set the reconnection backoff parameters.
    pub fn reconnect_backoff(self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay(ReconnectDelay::Exponential { initial, max })
    }

    /// Only reconnect when `predicate` returns `true` for the close event.
    pub fn should_reconnect<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CloseEvent) -> bool + Send + Sync + 'static,
    {
        self.config.reconnect.should_reconnect = Some(Arc::new(predicate));
        self
    }

    /// Set the outbound buffer capacity.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.reconnect.buffer_capacity = capacity;
        self
    }

    /// Replace the whole reconnection policy.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> WsConfig {
        self.config
    }
}
