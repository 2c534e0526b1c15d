//! The user's session/environment discovery.
//!
//! This is treated as an external collaborator by the core dispatch
//! logic: the primitives only ever see the resolved [`Environment`]
//! value, never how it was discovered. The concrete loader here reads
//! the same layered sources as [`crate::config::Config`] so a single
//! `gridexec` invocation only has one place configuration comes from.

use crate::config::Config;
use crate::model::RawTarget;

/// The caller's resolved data-grid session: enough to qualify relative
/// paths and to log in to the backend.
#[derive(Debug, Clone)]
pub struct Environment {
    pub host: String,
    pub port: u16,
    pub zone: String,
    pub username: String,
    /// Collection relative paths are qualified against.
    pub default_collection: String,
}

impl Environment {
    /// Loads the environment for the current process. Host/port/username
    /// come from environment variables with conventional defaults;
    /// `zone` falls back to `config.zone_name`, then to `username`'s
    /// home zone convention (`/<zone>/home/<user>`).
    pub fn load(config: &Config) -> Environment {
        let host = std::env::var("GRIDEXEC_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("GRIDEXEC_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1247);
        let username = std::env::var("GRIDEXEC_USER").unwrap_or_else(|_| "anonymous".to_string());
        let zone = config
            .zone_name
            .clone()
            .or_else(|| std::env::var("GRIDEXEC_ZONE").ok())
            .unwrap_or_else(|| "tempZone".to_string());
        let default_collection =
            std::env::var("GRIDEXEC_HOME").unwrap_or_else(|_| format!("/{zone}/home/{username}"));

        Environment {
            host,
            port,
            zone,
            username,
            default_collection,
        }
    }

    /// Qualifies a user-supplied path against the default collection if
    /// it is not already absolute.
    pub fn qualify(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.default_collection.trim_end_matches('/'), path)
        }
    }

    /// Qualifies `target.collection` against this environment if it is
    /// present and not already absolute. `directory`/`file` are left
    /// untouched — those name a location on the local filesystem, not a
    /// backend collection. Every operation's `target.collection` is
    /// "absolute or environment-relative" per the data model, not just
    /// `list`'s, so the dispatcher runs every target through this before
    /// handing it to any primitive.
    pub fn qualify_target(&self, target: &RawTarget) -> RawTarget {
        let mut target = target.clone();
        if let Some(collection) = &target.collection {
            target.collection = Some(self.qualify(collection));
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_pass_through_unchanged() {
        let env = Environment {
            host: "h".into(),
            port: 1,
            zone: "tempZone".into(),
            username: "alice".into(),
            default_collection: "/tempZone/home/alice".into(),
        };
        assert_eq!(env.qualify("/other/path"), "/other/path");
    }

    #[test]
    fn relative_paths_are_qualified_against_the_default_collection() {
        let env = Environment {
            host: "h".into(),
            port: 1,
            zone: "tempZone".into(),
            username: "alice".into(),
            default_collection: "/tempZone/home/alice".into(),
        };
        assert_eq!(env.qualify("notes.txt"), "/tempZone/home/alice/notes.txt");
    }

    #[test]
    fn qualify_target_only_touches_a_relative_collection() {
        let env = Environment {
            host: "h".into(),
            port: 1,
            zone: "tempZone".into(),
            username: "alice".into(),
            default_collection: "/tempZone/home/alice".into(),
        };
        let target = RawTarget {
            collection: Some("sub".into()),
            data_object: Some("f.txt".into()),
            directory: Some("sub".into()),
            ..Default::default()
        };
        let qualified = env.qualify_target(&target);
        assert_eq!(qualified.collection.as_deref(), Some("/tempZone/home/alice/sub"));
        assert_eq!(qualified.data_object.as_deref(), Some("f.txt"));
        assert_eq!(qualified.directory.as_deref(), Some("sub"));
    }
}
