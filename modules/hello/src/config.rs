use serde::{Deserialize, Serialize};

/// Configuration for the hello module (`hello:` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelloConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for HelloConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
        }
    }
}

fn default_greeting() -> String {
    "Hello, World!".to_string()
}
