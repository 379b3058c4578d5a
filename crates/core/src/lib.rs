pub mod config;
pub mod error;
pub mod routing;
pub mod stanza;

pub use config::{ConfigError, HarnessConfig};
pub use error::{CodecError, HandlerError};
pub use routing::{DispatchRegistry, RouteKey, StanzaHandler, StanzaKind};
pub use stanza::{Stanza, parse_stanza, serialize_stanza};
