pub mod types;
pub mod error;
pub mod event;
pub mod sink;
pub mod transport;
pub mod config;
pub mod session;
pub mod loopback;
pub mod command;

pub use types::*;
pub use error::{NearbyError, Result, ErrorContext, ErrorCategory};
pub use event::{NearbyEvent, StatusValue, SEND_FAILED};
pub use sink::{EventSink, EventStream};
pub use config::NearbyConfig;
pub use session::PeerSessionManager;
pub use loopback::{LoopbackNetwork, LoopbackTransport};
pub use command::{Command, MethodCall, METHOD_CHANNEL, EVENT_CHANNEL};
pub use transport::{
    AdvertiseObserver, Advertiser, BrowseObserver, Browser, InvitationReply, SessionObserver, Transport,
    TransportPeerState, TransportSession,
};
