use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Professor,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Professor => "professor",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "professor" => Some(Role::Professor),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Caller identity, carried by every request that needs it. The host owns
/// login and passcodes; the sidecar only trusts what it is handed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub role: Role,
}

/// What a session may do with the grades of one subject/cohort pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeAccess {
    Manage,
    ReadOwn,
    None,
}

impl Session {
    /// `assigned` tells whether a professor teaches the pair in question.
    pub fn grade_access(&self, assigned: bool) -> GradeAccess {
        match self.role {
            Role::Admin => GradeAccess::Manage,
            Role::Professor if assigned => GradeAccess::Manage,
            Role::Professor => GradeAccess::None,
            Role::Student => GradeAccess::ReadOwn,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse("Professor"), Some(Role::Professor));
        assert_eq!(Role::parse(" STUDENT "), Some(Role::Student));
        assert_eq!(Role::parse("teacher"), None);
    }

    #[test]
    fn professors_manage_only_assigned_pairs() {
        let s = Session {
            user_id: "p1".into(),
            role: Role::Professor,
        };
        assert_eq!(s.grade_access(true), GradeAccess::Manage);
        assert_eq!(s.grade_access(false), GradeAccess::None);
    }

    #[test]
    fn session_deserializes_from_request_shape() {
        let s: Session =
            serde_json::from_value(serde_json::json!({ "userId": "u1", "role": "student" }))
                .expect("session json");
        assert_eq!(s.role, Role::Student);
        assert_eq!(s.grade_access(false), GradeAccess::ReadOwn);
    }
}
