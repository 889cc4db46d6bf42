/// Builds the store key layout shared by every component.
///
/// ```text
/// {prefix}:blacklist:{jti}
/// {prefix}:refresh:{token_hash}
/// {prefix}:refresh:family:{family_id}
/// {prefix}:session:{session_id}
/// {prefix}:user:sessions:{user_id}
/// ```
#[derive(Debug, Clone)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn blacklist(&self, jti: &str) -> String {
        format!("{}:blacklist:{}", self.prefix, jti)
    }

    pub fn refresh(&self, token_hash: &str) -> String {
        format!("{}:refresh:{}", self.prefix, token_hash)
    }

    pub fn family(&self, family_id: &str) -> String {
        format!("{}:refresh:family:{}", self.prefix, family_id)
    }

    pub fn session(&self, session_id: &str) -> String {
        format!("{}:session:{}", self.prefix, session_id)
    }

    pub fn user_sessions(&self, user_id: i64) -> String {
        format!("{}:user:sessions:{}", self.prefix, user_id)
    }
}
