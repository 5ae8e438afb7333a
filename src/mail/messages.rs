//! User-facing mail text, resolved by key with positional substitution.

use std::collections::HashMap;

pub struct Messages {
    templates: HashMap<&'static str, &'static str>,
}

impl Messages {
    /// Built-in English templates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut templates = HashMap::new();

        templates.insert("verify.subject", "Please verify your account");
        templates.insert(
            "verify.body",
            "Welcome!\n\
             \n\
             Please verify your account by following this link:\n\
             \n\
             {0}\n\
             \n\
             If you did not sign up, you can ignore this mail.",
        );
        templates.insert("reset-password.subject", "Reset your password");
        templates.insert(
            "reset-password.body",
            "Hello,\n\
             \n\
             A password reset was requested for your account. To choose a new\n\
             password, follow this link:\n\
             \n\
             {0}\n\
             \n\
             If you did not request this reset, please ignore this mail and\n\
             ensure your account is secure.",
        );

        Self { templates }
    }

    /// Resolve a template by key, substituting `{0}`, `{1}`, ... in order.
    ///
    /// An unknown key falls back to the key itself, so a missing template
    /// can never turn into a panic in a mail path.
    #[must_use]
    pub fn get(&self, key: &str, args: &[&str]) -> String {
        let mut text = (*self.templates.get(key).unwrap_or(&key)).to_string();
        for (i, arg) in args.iter().enumerate() {
            text = text.replace(&format!("{{{i}}}"), arg);
        }
        text
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self::builtin()
    }
}
