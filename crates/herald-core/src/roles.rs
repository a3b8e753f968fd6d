use crate::domain::UserId;

/// Role flags for a caller. `owner` implies `admin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roles {
    pub owner: bool,
    pub admin: bool,
}

impl Roles {
    /// Exempt identities (owner, admins) bypass flood control entirely.
    pub fn is_exempt(self) -> bool {
        self.admin
    }
}

/// Classify a caller against static configuration. Pure function, no state.
pub fn classify(user_id: UserId, owner_id: i64, admin_ids: &[i64]) -> Roles {
    let owner = user_id.0 == owner_id;
    let admin = owner || admin_ids.contains(&user_id.0);
    Roles { owner, admin }
}
