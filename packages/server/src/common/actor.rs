//! Who is calling into the dispatch core.
//!
//! Authentication happens upstream; the core only needs to know which party
//! an operation is attributed to so it can apply the status-update rules.

use serde::{Deserialize, Serialize};

use super::{AdminId, CustomerId, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Customer(CustomerId),
    Provider(ProviderId),
    Admin(AdminId),
    /// Background jobs (expiry sweep, dispatch pipeline).
    System,
}

impl Actor {
    /// Stable label for logs and lifecycle rows.
    pub fn label(&self) -> String {
        match self {
            Actor::Customer(id) => format!("customer:{}", id),
            Actor::Provider(id) => format!("provider:{}", id),
            Actor::Admin(id) => format!("admin:{}", id),
            Actor::System => "system".to_string(),
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Actor::Admin(_) | Actor::System)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_wire_format() {
        let id = ProviderId::new();
        let json = serde_json::to_value(Actor::Provider(id)).unwrap();
        assert_eq!(json["kind"], "provider");
        assert_eq!(json["id"], id.to_string());

        let system: Actor = serde_json::from_str(r#"{"kind":"system"}"#).unwrap();
        assert_eq!(system, Actor::System);
        assert!(system.is_privileged());
    }
}
