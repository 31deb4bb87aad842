use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Protocol spoken by a hop. `"http"` and `"https"` parse to the same kind;
/// the distinction only matters to an outer TLS caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Socks5,
    Socks4,
    Http,
}

impl ProxyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "socks5" => Ok(ProxyKind::Socks5),
            "socks4" | "socks4a" => Ok(ProxyKind::Socks4),
            "http" | "https" => Ok(ProxyKind::Http),
            other => Err(Error::Config(format!("unknown proxy type: {other}"))),
        }
    }
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// One hop of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub address: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyDescriptor {
    pub fn new(kind: ProxyKind, address: impl Into<String>, port: u16) -> Self {
        ProxyDescriptor {
            address: address.into(),
            port,
            kind,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Credential pair for SOCKS5 sub-negotiation and HTTP Basic auth.
    /// Present when either field is set; the missing half defaults to "".
    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_none() && self.password.is_none() {
            return None;
        }
        Some((
            self.username.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or(""),
        ))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::Config("proxy address is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config(format!(
                "proxy {} has port 0",
                self.address
            )));
        }
        Ok(())
    }
}

/// An ordered chain of hops. Index 0 is reached directly; the last hop
/// connects to the ultimate target. Duplicates are permitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub id: String,
    pub name: String,
    pub proxies: Vec<ProxyDescriptor>,
}

impl ChainDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ChainDescriptor {
            id: id.into(),
            name: name.into(),
            proxies: Vec::new(),
        }
    }

    pub fn push(mut self, proxy: ProxyDescriptor) -> Self {
        self.proxies.push(proxy);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::Config("chain id is empty".into()));
        }
        if self.proxies.is_empty() {
            return Err(Error::Config(format!("chain '{}' has no proxies", self.id)));
        }
        for proxy in &self.proxies {
            proxy.validate()?;
        }
        Ok(())
    }
}

/// Engine tuning knobs. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub per_step_timeout_ms: u64,
    pub total_timeout_ms: u64,
    /// Extra attempts per hop negotiation, on top of the first.
    pub max_retries: u32,
    pub logging_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            per_step_timeout_ms: 30_000,
            total_timeout_ms: 120_000,
            max_retries: 2,
            logging_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn per_step(&self) -> Duration {
        Duration::from_millis(self.per_step_timeout_ms)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

/// A set of named chains, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainLibrary {
    pub chains: Vec<ChainDescriptor>,
}

// ---------------------------------------------------------------------------
// ChainLibrary implementation
// ---------------------------------------------------------------------------

impl ChainLibrary {
    pub fn find_chain(&self, id: &str) -> Option<&ChainDescriptor> {
        self.chains.iter().find(|c| c.id == id)
    }

    /// Load a chain library from an XML file.
    pub fn load_from_file(path: &str) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read chain file '{path}': {e}")))?;
        Self::from_xml(&content)
    }

    /// Save the chain library to an XML file.
    pub fn save_to_file(&self, path: &str) -> Result<(), Error> {
        let xml = self.to_xml();
        let mut file = std::fs::File::create(path)
            .map_err(|e| Error::Config(format!("failed to create chain file '{path}': {e}")))?;
        file.write_all(xml.as_bytes())
            .map_err(|e| Error::Config(format!("failed to write chain file: {e}")))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // XML serialization
    // -----------------------------------------------------------------------

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<proxychain>\n");
        out.push_str("  <chains>\n");
        for c in &self.chains {
            out.push_str(&format!(
                "    <chain id=\"{}\" name=\"{}\">\n",
                xml_escape(&c.id),
                xml_escape(&c.name)
            ));
            for p in &c.proxies {
                out.push_str(&format!(
                    "      <proxy address=\"{}\" port=\"{}\" type=\"{}\"",
                    xml_escape(&p.address),
                    p.port,
                    p.kind.as_str()
                ));
                if let Some(u) = &p.username {
                    out.push_str(&format!(" username=\"{}\"", xml_escape(u)));
                }
                if let Some(pw) = &p.password {
                    out.push_str(&format!(" password=\"{}\"", xml_escape(pw)));
                }
                out.push_str("/>\n");
            }
            out.push_str("    </chain>\n");
        }
        out.push_str("  </chains>\n");
        out.push_str("</proxychain>\n");
        out
    }

    // -----------------------------------------------------------------------
    // XML deserialization (manual quick-xml reader)
    // -----------------------------------------------------------------------

    pub fn from_xml(xml: &str) -> Result<Self, Error> {
        use quick_xml::events::Event;
        use quick_xml::Reader;

        let mut library = ChainLibrary::default();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut current_chain: Option<ChainDescriptor> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = std::str::from_utf8(e.name().as_ref())
                        .map_err(xml_err)?
                        .to_string();
                    if name == "chain" {
                        let mut chain = ChainDescriptor::new("", "");
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref())
                                .map_err(xml_err)?
                                .to_string();
                            let val = attr.unescape_value().map_err(xml_err)?.to_string();
                            match key.as_str() {
                                "id" => chain.id = val,
                                "name" => chain.name = val,
                                _ => {}
                            }
                        }
                        current_chain = Some(chain);
                    }
                }
                Ok(Event::Empty(ref e)) => {
                    let name = std::str::from_utf8(e.name().as_ref())
                        .map_err(xml_err)?
                        .to_string();
                    if name == "proxy" {
                        if let Some(ref mut chain) = current_chain {
                            let mut proxy = ProxyDescriptor::new(ProxyKind::Socks5, "", 0);
                            for attr in e.attributes().flatten() {
                                let key = std::str::from_utf8(attr.key.as_ref())
                                    .map_err(xml_err)?
                                    .to_string();
                                let val = attr.unescape_value().map_err(xml_err)?.to_string();
                                match key.as_str() {
                                    "address" => proxy.address = val,
                                    "port" => {
                                        proxy.port = val.parse().map_err(|_| {
                                            Error::Config(format!("bad proxy port: {val}"))
                                        })?
                                    }
                                    "type" => proxy.kind = ProxyKind::parse(&val)?,
                                    "username" => proxy.username = Some(val),
                                    "password" => proxy.password = Some(val),
                                    _ => {}
                                }
                            }
                            chain.proxies.push(proxy);
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"chain" {
                        if let Some(chain) = current_chain.take() {
                            chain.validate()?;
                            library.chains.push(chain);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(xml_err(e)),
                _ => {}
            }
            buf.clear();
        }

        Ok(library)
    }
}

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::Config(format!("chain XML parse error: {e}"))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
