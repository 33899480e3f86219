//! Push notifications
//!
//! There is no way to make an idle LLM think on demand, so delivery leans on
//! two channels every client already handles: a capability-list invalidation
//! (the re-fetched `check_inbox` description carries the unread alert) and an
//! alert-level log message that lands in the client's conversation. A failed
//! push means the session is dead; the handle is evicted and never retried.

use tracing::{debug, info, warn};

use crate::db::{self, Store};
use crate::session::{Push, SessionRegistry};

#[derive(Clone)]
pub struct Notifier {
    store: Store,
    sessions: SessionRegistry,
}

impl Notifier {
    pub fn new(store: Store, sessions: SessionRegistry) -> Self {
        Self { store, sessions }
    }

    /// Push a capability refresh plus an unread alert to each recipient that
    /// has a live session. Recipients without one are skipped; their alert
    /// surfaces the next time they fetch capabilities.
    pub fn notify_agents<I>(&self, recipients: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for recipient in recipients {
            self.notify_agent(recipient.as_ref());
        }
    }

    fn notify_agent(&self, agent: &str) {
        let Some(handle) = self.sessions.handle_for(agent) else {
            debug!(agent, "push skipped, no live session");
            return;
        };

        if handle.push(Push::ToolListChanged).is_err() {
            warn!(agent, "push failed, evicting dead session");
            self.sessions.unbind_agent(agent);
            return;
        }

        let alert = match self
            .store
            .with_conn(|conn| Ok(db::unread_info(conn, agent)?))
        {
            Ok((count, senders)) => unread_alert(count, &senders),
            Err(err) => {
                warn!(agent, error = %err, "unread lookup failed, skipping alert push");
                return;
            }
        };

        if handle.push(Push::Alert(alert)).is_err() {
            warn!(agent, "alert push failed, evicting dead session");
            self.sessions.unbind_agent(agent);
            return;
        }

        info!(agent, "pushed tool refresh + unread alert");
    }
}

/// The alert line pushed at log level `alert`.
pub fn unread_alert(count: i64, senders: &[String]) -> String {
    format!(
        "YOU HAVE {count} UNREAD MESSAGE(S) from {}. Call check_inbox now.",
        senders.join(", ")
    )
}
