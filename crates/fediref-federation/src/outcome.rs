use fediref_models::{Account, Status, WireAccount, WireStatus};

use crate::FederationError;

/// What a dereference call produced.
#[derive(Debug)]
pub enum Outcome<T, W> {
    /// Freshly fetched from the remote and written to the store.
    Updated { entity: T, wire: W },
    /// Served from the store without contacting the remote.
    Cached(T),
    /// The remote could not be reached; the stored copy is returned and its
    /// fetch time was bumped.
    Degraded { entity: T, error: FederationError },
}

pub type AccountOutcome = Outcome<Account, WireAccount>;
pub type StatusOutcome = Outcome<Status, WireStatus>;

impl<T, W> Outcome<T, W> {
    pub fn entity(&self) -> &T {
        match self {
            Self::Updated { entity, .. } | Self::Degraded { entity, .. } => entity,
            Self::Cached(entity) => entity,
        }
    }

    pub fn into_entity(self) -> T {
        match self {
            Self::Updated { entity, .. } | Self::Degraded { entity, .. } => entity,
            Self::Cached(entity) => entity,
        }
    }

    /// The remote representation, only present after a successful fetch.
    pub fn wire(&self) -> Option<&W> {
        match self {
            Self::Updated { wire, .. } => Some(wire),
            _ => None,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    pub fn into_parts(self) -> (T, Option<W>) {
        match self {
            Self::Updated { entity, wire } => (entity, Some(wire)),
            Self::Cached(entity) | Self::Degraded { entity, .. } => (entity, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_follow_variant() {
        let updated: Outcome<u32, &str> = Outcome::Updated {
            entity: 1,
            wire: "wire",
        };
        assert!(updated.is_updated());
        assert_eq!(updated.wire(), Some(&"wire"));
        assert_eq!(updated.into_parts(), (1, Some("wire")));

        let degraded: Outcome<u32, &str> = Outcome::Degraded {
            entity: 2,
            error: FederationError::unretrievable("https://example.org/x", "gone"),
        };
        assert!(degraded.is_degraded());
        assert_eq!(*degraded.entity(), 2);
        assert_eq!(degraded.into_parts(), (2, None));

        let cached: Outcome<u32, &str> = Outcome::Cached(3);
        assert!(cached.wire().is_none());
        assert_eq!(cached.into_entity(), 3);
    }
}
