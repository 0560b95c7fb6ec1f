//! Action group configuration.
//!
//! Action groups are the pre-defined actuation commands understood by the
//! firing box firmware, grouped into named [`ActionSet`]s. They are supplied
//! externally as JSON, loaded once at startup via [`load_action_sets`], and
//! never mutated by the core.
//!
//! ```
//! let sets = padlink::load_action_sets(
//!     r#"[{ "name": "Stage 1", "groups": [{ "name": "Igniter A", "id": 1 }] }]"#,
//! )?;
//!
//! assert_eq!(sets[0].group("Igniter A").map(|g| g.id.0), Some(1));
//! # Ok::<(), serde_json::Error>(())
//! ```

use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Identifier of an action group as understood by the device firmware.
///
/// Transmitted verbatim as the parameter of a fire command.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Copy, Clone, Debug)]
#[serde(transparent)]
pub struct GroupId(pub u16);

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named actuation command understood by the device firmware.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct ActionGroup {
    /// Human-readable name shown by the UI.
    pub name: String,
    /// Firmware-level payload identifier.
    pub id: GroupId,
}

/// A named, ordered collection of action groups.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct ActionSet {
    /// Human-readable name shown by the UI.
    pub name: String,
    /// Groups in display order.
    pub groups: Vec<ActionGroup>,
}

impl ActionSet {
    /// Looks up a group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&ActionGroup> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// Parses action set definitions from their JSON representation.
pub fn load_action_sets(json: &str) -> serde_json::Result<Vec<ActionSet>> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"[
        {
            "name": "Stage 1",
            "groups": [
                { "name": "Igniter A", "id": 1 },
                { "name": "Igniter B", "id": 2 }
            ]
        },
        {
            "name": "Recovery",
            "groups": [
                { "name": "Drogue", "id": 10 }
            ]
        }
    ]"#;

    #[test]
    fn load() -> serde_json::Result<()> {
        let sets = load_action_sets(CONFIG)?;

        assert_eq!(sets.len(), 2, "number of sets should be correct");
        assert_eq!(sets[0].name, "Stage 1", "set name should be correct");
        assert_eq!(sets[0].groups.len(), 2, "number of groups should be correct");
        assert_eq!(
            sets[1].group("Drogue"),
            Some(&ActionGroup {
                name: "Drogue".to_string(),
                id: GroupId(10),
            }),
            "group lookup should be correct"
        );
        assert_eq!(
            sets[1].group("Main"),
            None,
            "unknown group should not be found"
        );

        Ok(())
    }

    #[test]
    fn reject_malformed() {
        let res = load_action_sets(r#"[{ "name": "Stage 1" }]"#);

        assert!(res.is_err(), "sets without groups should be rejected");
    }
}
