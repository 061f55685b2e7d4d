//! Transport channel names for the primary/backup protocol

use crate::messages::SessionId;

/// Channel names for one log instance
///
/// Every name is prefixed when a prefix is configured so that several logs
/// can share one transport without their handlers colliding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    prefix: Option<String>,
    /// Channel carrying [`crate::BackupRequest`]
    pub backup_subject: String,
    /// Channel carrying [`crate::RestoreRequest`]
    pub restore_subject: String,
    /// Channel carrying [`crate::ExecuteRequest`]
    pub execute_subject: String,
    /// Channel carrying [`crate::CloseRequest`]
    pub close_subject: String,
    /// Channel carrying [`crate::MetadataRequest`]
    pub metadata_subject: String,
}

impl MessageContext {
    /// Build the channel names for an optional prefix
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        Self {
            backup_subject: subject(prefix.as_deref(), "backup"),
            restore_subject: subject(prefix.as_deref(), "restore"),
            execute_subject: subject(prefix.as_deref(), "execute"),
            close_subject: subject(prefix.as_deref(), "close"),
            metadata_subject: subject(prefix.as_deref(), "metadata"),
            prefix,
        }
    }

    /// Channel carrying events for one session
    pub fn event_subject(&self, session: SessionId) -> String {
        subject(self.prefix.as_deref(), &format!("event-{}", session))
    }

    /// Configured prefix, if any
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new(None)
    }
}

fn subject(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}-{}", prefix, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprefixed_subjects() {
        let ctx = MessageContext::default();
        assert_eq!(ctx.backup_subject, "backup");
        assert_eq!(ctx.metadata_subject, "metadata");
        assert_eq!(ctx.event_subject(SessionId(7)), "event-7");
        assert_eq!(ctx.prefix(), None);
    }

    #[test]
    fn test_prefixed_subjects() {
        let ctx = MessageContext::new(Some("counter-1"));
        assert_eq!(ctx.backup_subject, "counter-1-backup");
        assert_eq!(ctx.restore_subject, "counter-1-restore");
        assert_eq!(ctx.execute_subject, "counter-1-execute");
        assert_eq!(ctx.close_subject, "counter-1-close");
        assert_eq!(ctx.event_subject(SessionId(3)), "counter-1-event-3");
    }

    #[test]
    fn test_empty_prefix_is_ignored() {
        assert_eq!(MessageContext::new(Some("")), MessageContext::default());
    }
}
