//! Núcleo de sincronización de reproducción.
//!
//! Una [`session::PlaybackSession`] por guild, creada y destruida por el
//! [`registry::SessionRegistry`], con un poller por sesión
//! ([`sync`]) que espeja el feed de Spotify sobre el sink de voz.

pub mod registry;
pub mod session;
pub mod sync;

pub use registry::{ConnectOutcome, RejectReason, SessionRegistry};
pub use session::{MirroredTrack, PlaybackSession, SessionPlayer};
pub use sync::{PlayerControl, SinkState};
