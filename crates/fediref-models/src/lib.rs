pub mod account;
pub mod emoji;
pub mod media;
pub mod status;
pub mod wire;

pub use account::Account;
pub use emoji::Emoji;
pub use media::{MediaAttachment, MediaKind};
pub use status::Status;
pub use wire::{RemoteObject, WireAccount, WireCollection, WireError, WireStatus};
