//! Account provisioning: MTProto clients, login workers, lifecycle checks

pub mod client;
pub mod manager;
pub mod registry;

pub use client::{ClientFactory, CodeChannel, GrammersClient, SessionClient, SignInErrorKind};
pub use registry::{LoginCommand, LoginRegistry, StageOutcome};
