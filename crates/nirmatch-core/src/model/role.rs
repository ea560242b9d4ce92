/// Source roles and acquisition lines.
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// The data source a directory (and every record read from it) belongs to.
///
/// Line 1 is `Normal`, `Nir`, `Cam1..Cam3`; line 2 is `Normal2`, `Nir2`,
/// `Cam4..Cam6`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Normal,
    Normal2,
    Nir,
    Nir2,
    Cam1,
    Cam2,
    Cam3,
    Cam4,
    Cam5,
    Cam6,
}

/// What kind of reader a role uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    /// Timestamp-prefixed subfolders.
    Normal,
    /// `.spc` + `.txt` pairs.
    Nir,
    /// Flat image directory.
    Camera,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::Normal,
        Role::Normal2,
        Role::Nir,
        Role::Nir2,
        Role::Cam1,
        Role::Cam2,
        Role::Cam3,
        Role::Cam4,
        Role::Cam5,
        Role::Cam6,
    ];

    pub fn kind(self) -> RoleKind {
        match self {
            Role::Normal | Role::Normal2 => RoleKind::Normal,
            Role::Nir | Role::Nir2 => RoleKind::Nir,
            _ => RoleKind::Camera,
        }
    }

    pub fn line(self) -> Line {
        match self {
            Role::Normal | Role::Nir | Role::Cam1 | Role::Cam2 | Role::Cam3 => Line::One,
            _ => Line::Two,
        }
    }

    /// Settings / plan key (`normal`, `nir2`, `cam4`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Normal => "normal",
            Role::Normal2 => "normal2",
            Role::Nir => "nir",
            Role::Nir2 => "nir2",
            Role::Cam1 => "cam1",
            Role::Cam2 => "cam2",
            Role::Cam3 => "cam3",
            Role::Cam4 => "cam4",
            Role::Cam5 => "cam5",
            Role::Cam6 => "cam6",
        }
    }

    /// Position of a camera role within its line's three slots.
    pub fn camera_slot(self) -> Option<usize> {
        match self {
            Role::Cam1 | Role::Cam4 => Some(0),
            Role::Cam2 | Role::Cam5 => Some(1),
            Role::Cam3 | Role::Cam6 => Some(2),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two independent acquisition lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Line {
    One,
    Two,
}

impl Line {
    pub const ALL: [Line; 2] = [Line::One, Line::Two];

    pub fn number(self) -> u8 {
        match self {
            Line::One => 1,
            Line::Two => 2,
        }
    }

    pub fn normal_role(self) -> Role {
        match self {
            Line::One => Role::Normal,
            Line::Two => Role::Normal2,
        }
    }

    pub fn nir_role(self) -> Role {
        match self {
            Line::One => Role::Nir,
            Line::Two => Role::Nir2,
        }
    }

    pub fn camera_roles(self) -> [Role; 3] {
        match self {
            Line::One => [Role::Cam1, Role::Cam2, Role::Cam3],
            Line::Two => [Role::Cam4, Role::Cam5, Role::Cam6],
        }
    }
}

impl Serialize for Line {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_belongs_to_its_line() {
        for line in Line::ALL {
            assert_eq!(line.normal_role().line(), line);
            assert_eq!(line.nir_role().line(), line);
            for (i, cam) in line.camera_roles().into_iter().enumerate() {
                assert_eq!(cam.line(), line);
                assert_eq!(cam.camera_slot(), Some(i));
                assert_eq!(cam.kind(), RoleKind::Camera);
            }
        }
    }

    #[test]
    fn parse_matches_serde_names() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("cam7"), None);
    }
}
