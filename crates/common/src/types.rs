use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each id gets its own type so that an event id can never be passed
/// where a user id is expected.
macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Identifies an event with a fixed seat capacity.
    EventId
}

uuid_id! {
    /// Identifies an authenticated user. Supplied by the identity
    /// collaborator and trusted as given.
    UserId
}

uuid_id! {
    /// Identifies a single registration attempt against an event.
    RegistrationId
}

uuid_id! {
    /// Identifies an entry in an event's waitlist queue.
    WaitlistEntryId
}

/// Ticket class requested at registration time.
///
/// Carried through reservation and waitlist conversion unchanged; the
/// allocator itself treats all classes identically (no priority lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketType {
    #[default]
    Regular,
    Vip,
    Student,
}

impl TicketType {
    /// Returns the ticket type name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Regular => "REGULAR",
            TicketType::Vip => "VIP",
            TicketType::Student => "STUDENT",
        }
    }
}

impl std::str::FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(TicketType::Regular),
            "VIP" => Ok(TicketType::Vip),
            "STUDENT" => Ok(TicketType::Student),
            other => Err(format!("unknown ticket type: {other}")),
        }
    }
}

impl std::fmt::Display for TicketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
