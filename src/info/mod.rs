//! The `INFO`-style diagnostics registry: ordered sections of ordered
//! key/value pairs, each value either static, atomic-counter-backed, or
//! computed on render. Grounded on `original_source/info/info.go` and
//! `info/values.go` (`Registry`/`Section`/`Value`) plus `original_source/
//! info.go` (`ServerInfo`, `clientStats`, `initDefaults`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One renderable value within a section.
pub trait Value: Send + Sync {
    fn render(&self) -> String;
}

/// A value fixed at registration time.
pub struct StaticString(pub String);
impl Value for StaticString {
    fn render(&self) -> String {
        self.0.clone()
    }
}

/// A value backed by an atomically-updated counter.
pub struct IntValue(pub Arc<AtomicI64>);
impl Value for IntValue {
    fn render(&self) -> String {
        self.0.load(Ordering::Relaxed).to_string()
    }
}

/// A value computed fresh every time the section is rendered.
pub struct Callback<F>(pub F)
where
    F: Fn() -> String + Send + Sync;
impl<F> Value for Callback<F>
where
    F: Fn() -> String + Send + Sync,
{
    fn render(&self) -> String {
        (self.0)()
    }
}

/// An ordered list of key/value pairs rendered as one `# Name` block.
pub struct Section {
    name: String,
    entries: Vec<(String, Box<dyn Value>)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: Box<dyn Value>) -> &mut Self {
        self.entries.push((key.into(), value));
        self
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn render(&self) -> String {
        let mut out = format!("# {}\n", self.name);
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push(':');
            out.push_str(&value.render());
            out.push('\n');
        }
        out
    }
}

/// The full registry: an ordered list of sections, rendered in order with a
/// blank line between each (matching `redis-cli`'s `INFO` text format).
#[derive(Default)]
pub struct Registry {
    sections: Mutex<Vec<Section>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_section(&self, section: Section) {
        self.sections.lock().unwrap().push(section);
    }

    pub fn with_section(&self, name: &str, f: impl FnOnce(&mut Section)) {
        let mut sections = self.sections.lock().unwrap();
        if let Some(s) = sections.iter_mut().find(|s| s.name == name) {
            f(s);
        } else {
            let mut s = Section::new(name);
            f(&mut s);
            sections.push(s);
        }
    }

    /// Render every non-empty section, concatenated with a blank line
    /// between each.
    pub fn render(&self) -> String {
        let sections = self.sections.lock().unwrap();
        sections
            .iter()
            .filter(|s| !s.is_empty())
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render only the sections named (case-insensitively); "all"/"default"
    /// behave like Redis's own `INFO` special-case arguments and return
    /// everything.
    pub fn render_selected(&self, names: &[String]) -> String {
        if names.is_empty()
            || names
                .iter()
                .any(|n| n.eq_ignore_ascii_case("all") || n.eq_ignore_ascii_case("default"))
        {
            return self.render();
        }
        let wanted: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        let sections = self.sections.lock().unwrap();
        sections
            .iter()
            .filter(|s| !s.is_empty() && wanted.contains(&s.name.to_ascii_lowercase()))
            .map(Section::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Live, process-wide server counters surfaced through the `# Server` and
/// `# Clients`/`# Stats` sections and updated directly by the dispatcher.
pub struct ServerInfo {
    pub registry: Arc<Registry>,
    pub connected_clients: Arc<AtomicI64>,
    pub total_connections_received: Arc<AtomicU64>,
    pub total_commands_processed: Arc<AtomicU64>,
    client_table: Mutex<HashMap<u64, ClientStats>>,
}

/// Per-connection metadata surfaced by `CLIENT LIST`/`CLIENT INFO`.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub id: u64,
    pub addr: String,
    pub name: String,
    pub last_command: String,
}

impl ServerInfo {
    pub fn new(version: &str) -> Self {
        let connected_clients = Arc::new(AtomicI64::new(0));
        let total_connections_received = Arc::new(AtomicU64::new(0));
        let total_commands_processed = Arc::new(AtomicU64::new(0));

        let registry = Arc::new(Registry::new());
        registry.with_section("Server", |s| {
            s.push("redis_version", Box::new(StaticString(version.to_string())));
            s.push(
                "process_id",
                Box::new(StaticString(std::process::id().to_string())),
            );
        });
        registry.with_section("Clients", |s| {
            s.push(
                "connected_clients",
                Box::new(IntValue(connected_clients.clone())),
            );
        });
        registry.with_section("Stats", |s| {
            s.push(
                "total_connections_received",
                Box::new(Callback({
                    let c = total_connections_received.clone();
                    move || c.load(Ordering::Relaxed).to_string()
                })),
            );
            s.push(
                "total_commands_processed",
                Box::new(Callback({
                    let c = total_commands_processed.clone();
                    move || c.load(Ordering::Relaxed).to_string()
                })),
            );
        });

        Self {
            registry,
            connected_clients,
            total_connections_received,
            total_commands_processed,
            client_table: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_connected(&self, id: u64, addr: String) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
        self.total_connections_received
            .fetch_add(1, Ordering::Relaxed);
        self.client_table.lock().unwrap().insert(
            id,
            ClientStats {
                id,
                addr,
                name: String::new(),
                last_command: String::new(),
            },
        );
    }

    pub fn client_disconnected(&self, id: u64) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
        self.client_table.lock().unwrap().remove(&id);
    }

    pub fn command_processed(&self, id: u64, name: &str) {
        self.total_commands_processed.fetch_add(1, Ordering::Relaxed);
        if let Some(c) = self.client_table.lock().unwrap().get_mut(&id) {
            c.last_command = name.to_string();
        }
    }

    pub fn clients(&self) -> Vec<ClientStats> {
        self.client_table.lock().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_in_registration_order() {
        let info = ServerInfo::new("7.0.0-redeo-rs");
        let text = info.registry.render();
        assert!(text.starts_with("# Server\n"));
        assert!(text.contains("redis_version:7.0.0-redeo-rs"));
        assert!(text.contains("# Clients\n"));
    }

    #[test]
    fn tracks_connected_clients() {
        let info = ServerInfo::new("0.0.0");
        info.client_connected(1, "127.0.0.1:1".into());
        info.client_connected(2, "127.0.0.1:2".into());
        assert_eq!(info.connected_clients.load(Ordering::Relaxed), 2);
        info.client_disconnected(1);
        assert_eq!(info.connected_clients.load(Ordering::Relaxed), 1);
        assert_eq!(info.clients().len(), 1);
    }
}
