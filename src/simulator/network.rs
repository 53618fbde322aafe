use crate::device::{Link, LinkId, NodeId, PortRef};
use crate::error::SimError;
use std::collections::BTreeMap;

/// Every link in the simulation, keyed by id.
#[derive(Debug, Default)]
pub struct Network {
    links: BTreeMap<LinkId, Link>,
    next_id: u32,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: PortRef, b: PortRef, length_m: f64) -> Result<LinkId, SimError> {
        let id = LinkId(self.next_id);
        let link = Link::new(id, a, b, length_m)?;
        self.next_id += 1;
        self.links.insert(id, link);
        Ok(id)
    }

    pub fn get(&self, id: LinkId) -> Result<&Link, SimError> {
        self.links.get(&id).ok_or(SimError::UnknownLink(id))
    }

    pub fn get_mut(&mut self, id: LinkId) -> Result<&mut Link, SimError> {
        self.links.get_mut(&id).ok_or(SimError::UnknownLink(id))
    }

    /// Remove a link and cancel whatever it still had on the wire.
    pub fn remove(&mut self, id: LinkId) -> Result<Link, SimError> {
        let mut link = self.links.remove(&id).ok_or(SimError::UnknownLink(id))?;
        link.cancel_in_flight();
        Ok(link)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn touching(&self, node: NodeId) -> Vec<LinkId> {
        self.links
            .values()
            .filter(|l| l.ends().iter().any(|end| end.node == node))
            .map(Link::id)
            .collect()
    }
}
