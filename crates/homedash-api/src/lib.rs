// homedash-api: Async client for the Home Assistant hub (auth + WebSocket session)

pub mod auth;
pub mod entities;
pub mod error;
pub mod protocol;
pub mod websocket;

pub use auth::{Auth, Credentials, authorize_url, exchange_code, login, refresh_credentials};
pub use entities::{Context, EntityMap, EntityState, EntitySubscription};
pub use error::Error;
pub use websocket::{
    ConnectOptions, ConnectionEvent, FeedItem, HubConnection, ReconnectConfig, ReconnectFailure,
    websocket_url,
};
