/// Placeholder shown instead of the email address when the viewer is neither
/// the owner nor an admin.
pub const CONFIDENTIAL_EMAIL: &str = "Confidential";

pub mod session {

    pub const ACCOUNT_ID_KEY: &str = "account_id";
}
