// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newtype identifiers for the runtime's entities

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>` implementations.
///
/// ```ignore
/// define_id! {
///     /// Doc comment for the ID type.
///     pub struct MyId;
/// }
/// ```
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier for a conversation session.
    ///
    /// Either the literal default-session id or a UUID allocated by the
    /// session manager.
    pub struct SessionId;
}

define_id! {
    /// Identifier for a single message within a session transcript.
    pub struct MessageId;
}

define_id! {
    /// Identifier for the agent this runtime hosts.
    pub struct AgentId;
}

define_id! {
    /// Identifier tying a tool-call request to its result.
    pub struct ToolCallId;
}

define_id! {
    /// Correlation id for a pending sandbox or daemon RPC request.
    pub struct RequestId;
}

define_id! {
    /// Identifier for a sandbox worker process.
    pub struct WorkerId;
}

define_id! {
    /// Opaque token returned by the event bus at subscription time.
    pub struct SubscriptionId;
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
