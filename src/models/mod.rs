pub mod session;

pub use session::{Session, SessionType, DEFAULT_ABORT_REASON};
