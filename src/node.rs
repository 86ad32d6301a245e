use std::{fmt, net::SocketAddr};

/// A coordinator node of the cluster.
///
/// Nodes compare by address only; the datacenter is informational.
#[derive(Debug, Clone)]
pub struct Node {
    address: SocketAddr,
    datacenter: Option<String>,
}

impl Node {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            datacenter: None,
        }
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn datacenter(&self) -> Option<&str> {
        self.datacenter.as_deref()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_the_address() {
        let a = Node::new("127.0.0.1:9042".parse().unwrap()).with_datacenter("dc1");
        let b = Node::new("127.0.0.1:9042".parse().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "127.0.0.1:9042");
        assert_eq!(a.datacenter(), Some("dc1"));
    }
}
