pub mod app;

pub use app::{router, AppState, ClientIdentity};
