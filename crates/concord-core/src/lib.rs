//! # concord-core: shared contract types for the Concord protocol engine
//!
//! Everything the registry, ledger, and runtime crates agree on lives here.
//! The crate has no runtime state beyond the token counter, so it can be used
//! as a pure contract crate by hosts that only build protocol specifications.
//!
//! ## Module Overview
//!
//! - [`token`]: Token and the process-wide token allocator
//! - [`ids`]: ProtocolId, TypeKey
//! - [`member`]: Dispatch, RequiredMember, ProvidedMember, ChoiceGroup, MinimalPath
//! - [`value`]: Value, Variant, Lambda
//! - [`invoke`]: Behavior, MemberTable, Invocation (late-bound member calls)
//! - [`error`]: ProtocolError, ProtocolResult

pub mod error;
pub mod ids;
pub mod invoke;
pub mod member;
pub mod token;
pub mod value;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::{ProtocolId, TypeKey};
pub use invoke::{Behavior, Invocation, MemberTable, behavior, dispatch};
pub use member::{
    ChoiceGroup, Dispatch, MemberDescriptor, MemberMap, MinimalPath, ProvidedMember,
    RequiredMember,
};
pub use token::{Token, TokenDescriptor, new_token};
pub use value::{Lambda, Value, Variant};
