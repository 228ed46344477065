//! Staff directory for admin login and on-call lookup.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaffMember {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub manager: bool,
}

/// Built-in directory used when no staff file is configured.
pub fn default_directory() -> Vec<StaffMember> {
    let entry = |name: &str, email: &str, phone: &str, manager: bool| StaffMember {
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        manager,
    };
    vec![
        entry("Maya Oren", "maya.oren@examlab.example", "0525550101", true),
        entry("Daniel Peretz", "daniel.peretz@examlab.example", "0525550102", true),
        entry("Noa Feldman", "noa.feldman@examlab.example", "0525550103", true),
        entry("Amir Shalev", "amir.shalev@examlab.example", "0525550104", false),
        entry("Lena Kogan", "lena.kogan@examlab.example", "0525550105", false),
        entry("Tomer Aviv", "tomer.aviv@examlab.example", "0525550106", false),
        entry("Rania Masri", "rania.masri@examlab.example", "0525550107", false),
        entry("Eitan Brosh", "eitan.brosh@examlab.example", "0525550108", false),
    ]
}

/// Resolve a login username to a directory email.
///
/// Bare usernames get the directory domain appended; unknown addresses are
/// passed through so a new staff member can still log in before the
/// directory catches up.
pub fn resolve_username(directory: &[StaffMember], username: &str) -> String {
    let uname: String = username
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
        .collect();
    let full = if uname.contains('@') {
        uname
    } else {
        format!("{uname}@examlab.example")
    };
    directory
        .iter()
        .find(|s| s.email.eq_ignore_ascii_case(&full))
        .map(|s| s.email.clone())
        .unwrap_or(full)
}
