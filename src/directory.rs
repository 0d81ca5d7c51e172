//! Course and user lookups used when rendering notifications.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fallback shown when the actor cannot be resolved
pub const UNKNOWN_ACTOR: &str = "Someone";

/// Fallback shown when the course cannot be resolved
pub const UNKNOWN_COURSE: &str = "a course";

/// A course groups tasks and decides who can see them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub created_by: String,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Course {
    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|member| member == user)
    }
}

/// Public profile of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserProfile {
    /// Display name, else email, else `None`.
    pub fn label(&self) -> Option<&str> {
        non_blank(self.display_name.as_deref()).or_else(|| non_blank(self.email.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Read-only name lookups built from the task document.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    courses: HashMap<String, String>,
    users: HashMap<String, UserProfile>,
}

impl Directory {
    pub fn new(courses: &[Course], users: &[UserProfile]) -> Self {
        Self {
            courses: courses
                .iter()
                .map(|course| (course.id.clone(), course.name.clone()))
                .collect(),
            users: users
                .iter()
                .map(|user| (user.id.clone(), user.clone()))
                .collect(),
        }
    }

    /// Course name, or `"a course"` when unknown.
    pub fn course_name(&self, course_id: &str) -> String {
        self.courses
            .get(course_id)
            .and_then(|name| non_blank(Some(name.as_str())))
            .unwrap_or(UNKNOWN_COURSE)
            .to_string()
    }

    /// Actor label, or `"Someone"` when unknown.
    pub fn actor_name(&self, user_id: Option<&str>) -> String {
        user_id
            .and_then(|id| self.users.get(id))
            .and_then(UserProfile::label)
            .unwrap_or(UNKNOWN_ACTOR)
            .to_string()
    }
}

/// Anything that can produce a current [`Directory`].
pub trait DirectorySource: Send + Sync {
    fn directory(&self) -> Directory;
}

impl DirectorySource for Directory {
    fn directory(&self) -> Directory {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, display: Option<&str>, email: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: display.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn actor_name_prefers_display_then_email() {
        let dir = Directory::new(
            &[],
            &[
                profile("a", Some("Ada"), Some("ada@example.com")),
                profile("b", Some("  "), Some("bob@example.com")),
                profile("c", None, None),
            ],
        );
        assert_eq!(dir.actor_name(Some("a")), "Ada");
        assert_eq!(dir.actor_name(Some("b")), "bob@example.com");
        assert_eq!(dir.actor_name(Some("c")), UNKNOWN_ACTOR);
        assert_eq!(dir.actor_name(Some("zz")), UNKNOWN_ACTOR);
        assert_eq!(dir.actor_name(None), UNKNOWN_ACTOR);
    }

    #[test]
    fn course_name_falls_back() {
        let course = Course {
            id: "c1".to_string(),
            name: "Algebra".to_string(),
            description: String::new(),
            created_by: "a".to_string(),
            members: vec!["a".to_string()],
        };
        let dir = Directory::new(&[course], &[]);
        assert_eq!(dir.course_name("c1"), "Algebra");
        assert_eq!(dir.course_name("c2"), UNKNOWN_COURSE);
    }
}
