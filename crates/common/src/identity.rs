use uuid::Uuid;

/// Identity of one actor process, stable for the process lifetime.
///
/// The full id (`"<hostname>:<uuid-v4>"`) is the coordination-namespace key;
/// the short id (`"<hostname>:<last-uuid-segment>"`) is used in audit logs
/// and as a broker consumer-group tag, where a compact, still-unique-enough
/// label is preferable to the full uuid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Actor {
    id: String,
    short_id: String,
}

impl Actor {
    /// Generate a new identity for this process: a fresh uuid v4 tagged with
    /// the local hostname.
    pub fn generate() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self::new(&hostname, Uuid::new_v4())
    }

    pub fn new(hostname: &str, uuid: Uuid) -> Self {
        let id = format!("{hostname}:{uuid}");
        let short_id = format!("{hostname}:{}", short_segment(&uuid.to_string()));
        Self { id, short_id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

fn short_segment(uuid: &str) -> &str {
    uuid.rsplit('-').next().unwrap_or(uuid)
}
