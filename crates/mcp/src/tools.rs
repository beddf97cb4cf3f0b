use serde::Deserialize;

/// Arguments shared by every `streak_*` tool.
#[derive(Debug, Default, Deserialize)]
pub struct UserInput {
    /// Falls back to the server's default user when absent.
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_input_deserialize() {
        let input: UserInput = serde_json::from_str(r#"{"user_id":"u1"}"#).expect("deserialize");
        assert_eq!(input.user_id.as_deref(), Some("u1"));

        let input: UserInput = serde_json::from_str("{}").expect("deserialize empty");
        assert!(input.user_id.is_none());
    }
}
