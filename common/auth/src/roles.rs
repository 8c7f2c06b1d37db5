use serde::{Deserialize, Serialize};

/// Closed set of subteam roles. Form access is gated on these; admins carry
/// no roles at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "DAQ")]
    Daq,
    #[serde(rename = "Chief")]
    Chief,
    #[serde(rename = "suspension")]
    Suspension,
    #[serde(rename = "electronic")]
    Electronic,
    #[serde(rename = "drivetrain")]
    Drivetrain,
    #[serde(rename = "driver")]
    Driver,
    #[serde(rename = "chasis")]
    Chasis,
    #[serde(rename = "aero")]
    Aero,
    #[serde(rename = "ergo")]
    Ergo,
    #[serde(rename = "powertrain")]
    Powertrain,
}

pub const ALL_ROLES: &[Role] = &[
    Role::Daq,
    Role::Chief,
    Role::Suspension,
    Role::Electronic,
    Role::Drivetrain,
    Role::Driver,
    Role::Chasis,
    Role::Aero,
    Role::Ergo,
    Role::Powertrain,
];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Daq => "DAQ",
            Role::Chief => "Chief",
            Role::Suspension => "suspension",
            Role::Electronic => "electronic",
            Role::Drivetrain => "drivetrain",
            Role::Driver => "driver",
            Role::Chasis => "chasis",
            Role::Aero => "aero",
            Role::Ergo => "ergo",
            Role::Powertrain => "powertrain",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        ALL_ROLES.iter().copied().find(|role| role.as_str() == value)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::parse(value).ok_or_else(|| crate::error::AuthError::UnknownRole(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_string_roundtrip() {
        for role in ALL_ROLES {
            assert_eq!(Role::parse(role.as_str()), Some(*role));
        }
    }

    #[test]
    fn parse_rejects_unknown_and_wrong_case() {
        assert_eq!(Role::parse("daq"), None);
        assert_eq!(Role::parse("marketing"), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Role::Daq).unwrap();
        assert_eq!(json, "\"DAQ\"");
        let back: Role = serde_json::from_str("\"chasis\"").unwrap();
        assert_eq!(back, Role::Chasis);
    }
}
